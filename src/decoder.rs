//! Capstone-based x86 instruction decoder.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use capstone::arch::x86::{ArchMode as X86Mode, X86OperandType};
use capstone::arch::ArchOperand;
use capstone::prelude::*;
use capstone::{InsnGroupId, InsnGroupType};

use crate::{Address, Architecture, DecodeError, Decoder, Insn, InsnGroup, Operand, MAX_INSTRUCTION_SIZE};

/// Errors that can occur while setting up a decoder
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    /// Capstone error
    #[error("Failed to open Capstone: {0}")]
    CapstoneError(#[from] capstone::Error),
}

thread_local! {
    // One detail-enabled handle per architecture and thread; a handle must never be used
    // from two threads at once.
    static CS_POOL: RefCell<HashMap<Architecture, Rc<Capstone>>> =
        RefCell::new(HashMap::new());
}

const GROUPS: [(u8, InsnGroup); 6] = [
    (InsnGroupType::CS_GRP_JUMP as u8, InsnGroup::Jump),
    (InsnGroupType::CS_GRP_CALL as u8, InsnGroup::Call),
    (InsnGroupType::CS_GRP_RET as u8, InsnGroup::Ret),
    (InsnGroupType::CS_GRP_INT as u8, InsnGroup::Int),
    (InsnGroupType::CS_GRP_IRET as u8, InsnGroup::Iret),
    (InsnGroupType::CS_GRP_BRANCH_RELATIVE as u8, InsnGroup::BranchRelative),
];

/// A Capstone-based decoder for x86.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapstoneDecoder {
    arch: Architecture,
}

impl CapstoneDecoder {
    /// Create a decoder for a specific architecture.
    ///
    /// A handle is built eagerly so that a broken Capstone installation is reported here
    /// rather than as a decode failure at every address.
    pub fn for_architecture(arch: Architecture) -> Result<Self, DecoderError> {
        let cs = Self::build(arch)?;
        CS_POOL.with(|cell| {
            cell.borrow_mut().insert(arch, Rc::new(cs));
        });
        log::debug!("Capstone ready for {}", arch);
        Ok(Self { arch })
    }

    /// Build a detail-enabled Capstone handle for `arch`
    pub fn build(arch: Architecture) -> Result<Capstone, DecoderError> {
        let mode = match arch {
            Architecture::X86_32 => X86Mode::Mode32,
            Architecture::X86_64 => X86Mode::Mode64,
        };
        Ok(Capstone::new()
            .x86()
            .mode(mode)
            .detail(true)
            .build()?)
    }

    /// Get the architecture of this decoder
    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    fn handle(&self) -> Result<Rc<Capstone>, DecodeError> {
        CS_POOL.with(|cell| {
            let mut map = cell.borrow_mut();
            if let Some(cs) = map.get(&self.arch) {
                return Ok(Rc::clone(cs));
            }
            let cs = Rc::new(Self::build(self.arch).map_err(|e| DecodeError::Engine(e.to_string()))?);
            map.insert(self.arch, Rc::clone(&cs));
            Ok(cs)
        })
    }

    fn branch_operand(&self, operands: &[ArchOperand]) -> Option<Operand> {
        match operands.first()? {
            ArchOperand::X86Operand(op) => Some(match op.op_type {
                X86OperandType::Imm(imm) => Operand::Imm(self.truncate(imm as u64)),
                X86OperandType::Mem(_) => Operand::Mem,
                _ => Operand::Reg,
            }),
            _ => None,
        }
    }

    fn truncate(&self, addr: u64) -> Address {
        match self.arch {
            Architecture::X86_32 => addr & 0xffff_ffff,
            Architecture::X86_64 => addr,
        }
    }
}

impl fmt::Display for CapstoneDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapstoneDecoder::{}", self.arch)
    }
}

impl Decoder for CapstoneDecoder {
    fn architecture(&self) -> Architecture {
        self.arch
    }

    fn decode(&self, code: &[u8], address: Address) -> Result<Insn, DecodeError> {
        if code.is_empty() {
            return Err(DecodeError::Empty);
        }
        let window = &code[..code.len().min(MAX_INSTRUCTION_SIZE)];

        let cs = self.handle()?;
        let decoded = cs
            .disasm_count(window, address, 1)
            .map_err(|e| DecodeError::Engine(e.to_string()))?;
        let i = decoded.iter().next().ok_or(DecodeError::Invalid)?;
        if i.address() != address || i.bytes().is_empty() {
            return Err(DecodeError::Invalid);
        }

        let detail = cs
            .insn_detail(&i)
            .map_err(|e| DecodeError::Engine(e.to_string()))?;
        let groups: Vec<InsnGroup> = detail
            .groups()
            .iter()
            .filter_map(|g| GROUPS.iter().find(|(id, _)| *g == InsnGroupId(*id)).map(|(_, grp)| *grp))
            .collect();
        let branch_operand = if groups.contains(&InsnGroup::Call) || groups.contains(&InsnGroup::Jump) {
            self.branch_operand(&detail.arch_detail().operands())
        } else {
            None
        };

        // Copy up to MAX_INSTRUCTION_SIZE bytes of encoding
        let mut bytes = [0u8; MAX_INSTRUCTION_SIZE];
        let raw = i.bytes();
        let len = raw.len().min(MAX_INSTRUCTION_SIZE);
        bytes[..len].copy_from_slice(&raw[..len]);

        Ok(Insn {
            addr: address,
            size: len as u8,
            mnemonic: i.mnemonic().unwrap_or("").to_string(),
            operands: i.op_str().unwrap_or("").to_string(),
            bytes,
            groups,
            branch_operand,
        })
    }
}
