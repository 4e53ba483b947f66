//! In-memory model of a loaded executable.
//!
//! A `Binary` is built once by the loader and only read afterwards. It owns every section
//! buffer, so dropping the `Binary` releases all of them.

use std::fmt;
use std::path::PathBuf;

use crate::{Address, Architecture};

/// Container format of a loaded binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    Elf,
    Pe,
}

impl fmt::Display for BinaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryFormat::Elf => write!(f, "ELF"),
            BinaryFormat::Pe => write!(f, "PE"),
        }
    }
}

/// What a section holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Code,
    Data,
    None,
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionKind::Code => write!(f, "CODE"),
            SectionKind::Data => write!(f, "DATA"),
            SectionKind::None => write!(f, "NONE"),
        }
    }
}

/// A section in the binary.
///
/// The section covers the half-open range `[vma, vma + size)`, and `size` is always the
/// length of the owned byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name
    pub name: String,
    /// Whether this section holds code or data
    pub kind: SectionKind,
    /// Virtual address the section is mapped at
    pub vma: Address,
    /// Raw contents
    pub bytes: Vec<u8>,
}

impl Section {
    /// Create a new section
    pub fn new(name: impl Into<String>, kind: SectionKind, vma: Address, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            kind,
            vma,
            bytes,
        }
    }

    /// Size of the section in bytes
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Get the end address of this section (exclusive)
    pub fn end(&self) -> Address {
        self.vma.saturating_add(self.bytes.len() as Address)
    }

    /// Returns true if `addr` lies inside this section
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.vma && addr < self.end()
    }

    pub fn is_code(&self) -> bool {
        self.kind == SectionKind::Code
    }

    /// Bytes from `addr` up to the end of the section, or `None` if `addr` is outside it.
    pub fn bytes_from(&self, addr: Address) -> Option<&[u8]> {
        if !self.contains(addr) {
            return None;
        }
        Some(&self.bytes[(addr - self.vma) as usize..])
    }
}

/// What a symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Other,
}

/// A named location in the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub addr: Address,
}

impl Symbol {
    pub fn function(name: impl Into<String>, addr: Address) -> Self {
        Self {
            name: name.into(),
            kind: SymbolKind::Function,
            addr,
        }
    }
}

/// One loaded executable.
#[derive(Debug, Clone)]
pub struct Binary {
    /// Path the binary was loaded from
    pub path: PathBuf,
    /// Detected container format
    pub format: BinaryFormat,
    /// Target name, e.g. "elf64-x86-64"
    pub format_name: String,
    /// Detected architecture
    pub architecture: Architecture,
    /// Printable architecture name, e.g. "i386:x86-64"
    pub arch_name: String,
    /// Entry point virtual address
    pub entry: Address,
    /// Code and data sections, in file order
    pub sections: Vec<Section>,
    /// Symbols, in load order
    pub symbols: Vec<Symbol>,
}

impl Binary {
    /// Word width in bits
    pub fn bits(&self) -> u32 {
        self.architecture.bits()
    }

    /// The first code section, if there is one.
    pub fn text_section(&self) -> Option<&Section> {
        self.sections.iter().find(|s| s.is_code())
    }

    /// All code sections in file order
    pub fn code_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.is_code())
    }

    /// The first section containing `addr`.
    pub fn section_containing(&self, addr: Address) -> Option<&Section> {
        self.sections.iter().find(|s| s.contains(addr))
    }

    /// The first code section containing `addr`.
    pub fn code_section_containing(&self, addr: Address) -> Option<&Section> {
        self.code_sections().find(|s| s.contains(addr))
    }

    /// Find a section by name
    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// All function symbols
    pub fn function_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(|s| s.kind == SymbolKind::Function)
    }

    /// First function symbol located exactly at `addr`
    pub fn symbol_at(&self, addr: Address) -> Option<&Symbol> {
        self.function_symbols().find(|s| s.addr == addr)
    }
}
