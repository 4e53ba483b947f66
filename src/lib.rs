//! Core IR, traits, and error types for the flowdis disassembler.
//!
//! flowdis loads an ELF or PE executable, pulls out its code and data sections and its
//! symbol table, and disassembles the code by following control flow from the entry point
//! and every known function symbol. A plain linear sweep is available for comparison.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use flowdis::{
//!     decoder::CapstoneDecoder,
//!     format::OutputFormat,
//!     parser::{BinaryParser, GoblinParser},
//!     strategy::{Strategy, StrategyOptions},
//! };
//!
//! // Load the executable; the parser value is the only loader state.
//! let parser = GoblinParser::new();
//! let binary = parser.load("path/to/binary").unwrap();
//!
//! // Create a decoder for the detected architecture
//! let decoder = CapstoneDecoder::for_architecture(binary.architecture).unwrap();
//!
//! // Follow control flow from the entry point and function symbols
//! let disassembly = Strategy::Recursive
//!     .run(&binary, &decoder, &StrategyOptions::default())
//!     .unwrap();
//!
//! let text = OutputFormat::Text
//!     .get_formatter()
//!     .format(&disassembly, &binary)
//!     .unwrap();
//! print!("{}", text);
//! ```

pub mod binary;
pub mod classify;
pub mod decoder;
pub mod format;
pub mod parser;
pub mod strategy;

pub use binary::{Binary, BinaryFormat, Section, SectionKind, Symbol, SymbolKind};
pub use classify::{classify, Flow, Target};

/// Represents an address in memory
pub type Address = u64;

use std::fmt;

/// Maximum instruction size in bytes
pub const MAX_INSTRUCTION_SIZE: usize = 16;

/// Semantic instruction groups reported by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsnGroup {
    /// Jumps, conditional or not
    Jump,
    /// Subroutine calls
    Call,
    /// Subroutine returns
    Ret,
    /// Software interrupts and system calls
    Int,
    /// Interrupt returns
    Iret,
    /// Branches whose target is encoded relative to the instruction pointer
    BranchRelative,
}

/// The operand a branch-like instruction transfers control through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Immediate, i.e. a statically known address
    Imm(Address),
    /// Register
    Reg,
    /// Memory reference
    Mem,
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insn {
    /// Address of the instruction
    pub addr: Address,
    /// Size of the instruction in bytes
    pub size: u8,
    /// Instruction mnemonic (e.g., "mov", "add")
    pub mnemonic: String,
    /// Instruction operands as string representation
    pub operands: String,
    /// Raw bytes of the instruction (up to MAX_INSTRUCTION_SIZE)
    pub bytes: [u8; MAX_INSTRUCTION_SIZE],
    /// Groups this instruction belongs to
    pub groups: Vec<InsnGroup>,
    /// First operand of a call or jump, if the instruction is one
    pub branch_operand: Option<Operand>,
}

impl Insn {
    /// Returns the instruction bytes, up to the actual instruction size.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.size as usize]
    }

    /// Address one past the last byte of this instruction.
    pub fn end(&self) -> Address {
        self.addr.saturating_add(self.size as Address)
    }

    /// Returns true if the decoder put this instruction in `group`.
    pub fn in_group(&self, group: InsnGroup) -> bool {
        self.groups.contains(&group)
    }

    /// Control-flow classification of this instruction.
    pub fn flow(&self) -> Flow {
        classify(self)
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.mnemonic, self.operands)
    }
}

/// Reason a single address could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// No bytes were available at the address
    #[error("no bytes available")]
    Empty,

    /// The bytes do not form a valid (or complete) instruction
    #[error("invalid or truncated instruction")]
    Invalid,

    /// The decoding engine itself failed
    #[error("decoder engine error: {0}")]
    Engine(String),
}

/// Decoder trait: architecture-specific disassembler.
pub trait Decoder: Send + Sync {
    /// Architecture this decoder understands
    fn architecture(&self) -> Architecture;

    /// Decode a single instruction located at `address`.
    ///
    /// # Arguments
    /// * `code` - Bytes starting at `address`; never extends past the end of the section
    /// * `address` - Virtual address of `code[0]`
    ///
    /// # Returns
    /// The decoded instruction, or the reason no instruction could be decoded
    fn decode(&self, code: &[u8], address: Address) -> Result<Insn, DecodeError>;
}

/// A decode failure recorded during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub address: Address,
    pub error: DecodeError,
}

/// Result of one disassembly pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disassembly {
    /// Decoded instructions in ascending address order
    pub insns: Vec<Insn>,
    /// Addresses that could not be decoded, in ascending address order
    pub failures: Vec<DecodeFailure>,
    /// Branch targets and seeds dropped because they fell outside every code section
    pub dropped_targets: usize,
    /// True if the pass stopped at the instruction limit
    pub truncated: bool,
}

impl Disassembly {
    /// Get the total number of instructions
    pub fn instruction_count(&self) -> usize {
        self.insns.len()
    }

    /// True if nothing was decoded
    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Returns true if an instruction starting at `addr` was decoded
    pub fn contains(&self, addr: Address) -> bool {
        self.get(addr).is_some()
    }

    /// Look up the instruction starting at `addr`
    pub fn get(&self, addr: Address) -> Option<&Insn> {
        self.insns
            .binary_search_by_key(&addr, |i| i.addr)
            .ok()
            .map(|idx| &self.insns[idx])
    }

    /// Start addresses of all decoded instructions
    pub fn addresses(&self) -> Vec<Address> {
        self.insns.iter().map(|i| i.addr).collect()
    }

    /// Put instructions and failures into ascending address order
    pub(crate) fn sort(&mut self) {
        self.insns.sort_by_key(|insn| insn.addr);
        self.failures.sort_by_key(|f| f.address);
    }
}

/// Supported architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// 32-bit x86
    X86_32,
    /// 64-bit x86
    X86_64,
}

impl Architecture {
    /// Word width in bits
    pub fn bits(&self) -> u32 {
        match self {
            Architecture::X86_32 => 32,
            Architecture::X86_64 => 64,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86_32 => write!(f, "x86-32"),
            Architecture::X86_64 => write!(f, "x86-64"),
        }
    }
}

/// Errors raised while turning a file into a `Binary`.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The file could not be read
    #[error("failed to open binary '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Goblin rejected the file
    #[error("file '{path}' does not look like an executable: {source}")]
    Parse {
        path: String,
        #[source]
        source: goblin::error::Error,
    },

    /// Recognised container that is not ELF or PE
    #[error("unsupported binary type ({0})")]
    UnsupportedFormat(String),

    /// Machine type other than x86
    #[error("unsupported architecture ({0})")]
    UnsupportedArchitecture(String),

    /// Section header points outside the file
    #[error("failed to read section '{0}': contents lie outside the file")]
    SectionOutOfBounds(String),

    /// Section asks for more zero padding than any real image needs
    #[error("section '{name}' claims a mapped size of {size} bytes")]
    SectionTooLarge { name: String, size: usize },

    /// An address computed from the headers does not fit in 64 bits
    #[error("address overflow: {0}")]
    InvalidAddress(String),
}

/// Error type for disassembly operations
#[derive(Debug, thiserror::Error)]
pub enum DisassemblyError {
    /// Failed to load the binary
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Decoder could not be initialised
    #[error("Decoder error: {0}")]
    Decoder(#[from] decoder::DecoderError),

    /// Requested section does not exist or holds no code
    #[error("no code section named '{0}'")]
    UnknownSection(String),

    /// Output could not be produced
    #[error("Formatting error: {0}")]
    Format(String),
}
