//! Goblin-based ELF and PE loader.

use std::fmt;
use std::fs;
use std::path::Path;

use goblin::elf::{header as elf_header, section_header, sym};
use goblin::pe::section_table;
use goblin::{elf, pe, Object};

use crate::{Address, Architecture, Binary, BinaryFormat, LoadError, Section, SectionKind, Symbol, SymbolKind};

/// Parser trait: turn a file into a fully populated `Binary`.
pub trait BinaryParser: Send + Sync {
    /// Parse binary data into a `Binary`
    ///
    /// # Arguments
    /// * `path` - Where `data` came from, recorded on the result
    /// * `data` - The whole file
    ///
    /// # Returns
    /// A `Binary` with every section buffer populated, or the reason loading failed
    fn parse(&self, path: &Path, data: &[u8]) -> Result<Binary, LoadError>;

    /// Read `path` from disk and parse it
    fn load(&self, path: impl AsRef<Path>) -> Result<Binary, LoadError>
    where
        Self: Sized,
    {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.parse(path, &data)
    }
}

/// A loader for ELF and PE images via Goblin.
///
/// The parser value carries all loader state; there is nothing to initialise globally.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoblinParser;

impl GoblinParser {
    /// Construct a new GoblinParser.
    pub fn new() -> Self {
        GoblinParser
    }

    /// Parse an ELF image.
    fn parse_elf(&self, path: &Path, elf: elf::Elf, img: &[u8]) -> Result<Binary, LoadError> {
        let (architecture, format_name, arch_name) = match elf.header.e_machine {
            elf_header::EM_386 => (Architecture::X86_32, "elf32-i386", "i386"),
            elf_header::EM_X86_64 => (Architecture::X86_64, "elf64-x86-64", "i386:x86-64"),
            other => return Err(LoadError::UnsupportedArchitecture(elf_header::machine_to_str(other).to_string())),
        };

        let mut sections = Vec::new();
        for sh in &elf.section_headers {
            if !sh.is_alloc() || sh.sh_type == section_header::SHT_NOBITS {
                continue;
            }
            let kind = if sh.is_executable() { SectionKind::Code } else { SectionKind::Data };
            let name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("<unnamed>");
            let bytes = slice_at(img, sh.sh_offset, sh.sh_size)
                .ok_or_else(|| LoadError::SectionOutOfBounds(name.to_string()))?;
            if sh.sh_addr.checked_add(sh.sh_size).is_none() {
                return Err(LoadError::InvalidAddress(format!("section '{}' at 0x{:x}", name, sh.sh_addr)));
            }
            sections.push(Section::new(name, kind, sh.sh_addr, bytes.to_vec()));
        }

        // Symbol handling is best-effort; stripped binaries have none.
        let mut symbols = elf_symbols(&elf.syms, &elf.strtab);
        symbols.extend(elf_symbols(&elf.dynsyms, &elf.dynstrtab));

        Ok(Binary {
            path: path.to_path_buf(),
            format: BinaryFormat::Elf,
            format_name: format_name.to_string(),
            architecture,
            arch_name: arch_name.to_string(),
            entry: elf.entry,
            sections,
            symbols,
        })
    }

    /// Parse a PE image.
    fn parse_pe(&self, path: &Path, pe: pe::PE<'_>, img: &[u8]) -> Result<Binary, LoadError> {
        let (architecture, format_name, arch_name) = match pe.header.coff_header.machine {
            pe::header::COFF_MACHINE_X86 => (Architecture::X86_32, "pei-i386", "i386"),
            pe::header::COFF_MACHINE_X86_64 => (Architecture::X86_64, "pei-x86-64", "i386:x86-64"),
            other => return Err(LoadError::UnsupportedArchitecture(format!("COFF machine 0x{:x}", other))),
        };
        let image_base = pe.image_base as Address;

        let mut sections = Vec::new();
        for sect in &pe.sections {
            let name = sect.name().unwrap_or("<unnamed>").to_string();
            let kind = if sect.characteristics & (section_table::IMAGE_SCN_CNT_CODE | section_table::IMAGE_SCN_MEM_EXECUTE) != 0 {
                SectionKind::Code
            } else if sect.characteristics & section_table::IMAGE_SCN_CNT_INITIALIZED_DATA != 0 {
                SectionKind::Data
            } else {
                continue;
            };

            // Mapped size wins; the tail past the raw data is zero-filled by the OS loader.
            let size = (if sect.virtual_size != 0 { sect.virtual_size } else { sect.size_of_raw_data }) as usize;
            let raw_len = (sect.size_of_raw_data as usize).min(size);
            if size - raw_len > max_zero_fill(img) {
                return Err(LoadError::SectionTooLarge { name, size });
            }
            let mut bytes = slice_at(img, sect.pointer_to_raw_data as u64, raw_len as u64)
                .ok_or_else(|| LoadError::SectionOutOfBounds(name.clone()))?
                .to_vec();
            bytes.resize(size, 0);

            let vma = rebase(image_base, sect.virtual_address as u64 + size as u64)
                .map(|end| end - size as Address)
                .ok_or_else(|| LoadError::InvalidAddress(format!("section '{}' at RVA 0x{:x}", name, sect.virtual_address)))?;
            sections.push(Section::new(name, kind, vma, bytes));
        }

        let mut symbols = Vec::new();
        for export in &pe.exports {
            let Some(name) = export.name else { continue };
            let addr = rebase(image_base, export.rva as u64)
                .ok_or_else(|| LoadError::InvalidAddress(format!("export '{}' at RVA 0x{:x}", name, export.rva)))?;
            symbols.push(Symbol::function(name, addr));
        }
        let entry = rebase(image_base, pe.entry as u64)
            .ok_or_else(|| LoadError::InvalidAddress(format!("entry point at RVA 0x{:x}", pe.entry)))?;

        Ok(Binary {
            path: path.to_path_buf(),
            format: BinaryFormat::Pe,
            format_name: format_name.to_string(),
            architecture,
            arch_name: arch_name.to_string(),
            entry,
            sections,
            symbols,
        })
    }
}

/// Zero padding a PE section may ask for beyond its raw data.
fn max_zero_fill(img: &[u8]) -> usize {
    const FLOOR: usize = 16 << 20;
    img.len().saturating_mul(16).max(FLOOR)
}

/// `image_base + rva`, or `None` if it does not fit the address space.
fn rebase(image_base: Address, rva: u64) -> Option<Address> {
    image_base.checked_add(rva)
}

/// Bytes `[offset, offset + size)` of the file, if they exist.
fn slice_at(img: &[u8], offset: u64, size: u64) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(size).ok()?)?;
    img.get(start..end)
}

/// Defined, named function and object symbols from one ELF symbol table.
fn elf_symbols(table: &sym::Symtab, strtab: &goblin::strtab::Strtab) -> Vec<Symbol> {
    table
        .iter()
        .filter(|s| s.st_shndx != section_header::SHN_UNDEF as usize)
        .filter_map(|s| {
            let kind = match s.st_type() {
                sym::STT_FUNC => SymbolKind::Function,
                sym::STT_OBJECT => SymbolKind::Other,
                _ => return None,
            };
            let name = strtab.get_at(s.st_name).filter(|n| !n.is_empty())?;
            Some(Symbol {
                name: name.to_string(),
                kind,
                addr: s.st_value,
            })
        })
        .collect()
}

impl fmt::Display for GoblinParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GoblinParser")
    }
}

impl BinaryParser for GoblinParser {
    fn parse(&self, path: &Path, data: &[u8]) -> Result<Binary, LoadError> {
        let object = Object::parse(data).map_err(|source| LoadError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        let binary = match object {
            Object::Elf(elf) => self.parse_elf(path, elf, data)?,
            Object::PE(pe) => self.parse_pe(path, pe, data)?,
            Object::Mach(_) => return Err(LoadError::UnsupportedFormat("Mach-O".into())),
            Object::Archive(_) => return Err(LoadError::UnsupportedFormat("archive".into())),
            Object::Unknown(magic) => {
                return Err(LoadError::UnsupportedFormat(format!("unknown magic 0x{:x}", magic)))
            }
            _ => return Err(LoadError::UnsupportedFormat("unrecognized container".into())),
        };

        log::info!(
            "Loaded '{}' {}/{} ({} bits): entry 0x{:x}, {} sections, {} symbols",
            binary.path.display(),
            binary.format_name,
            binary.arch_name,
            binary.bits(),
            binary.entry,
            binary.sections.len(),
            binary.symbols.len()
        );
        Ok(binary)
    }
}
