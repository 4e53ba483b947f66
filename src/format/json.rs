//! JSON and JSON Lines output formatters

use serde::Serialize;
use serde_json::json;

use crate::{Binary, Disassembly, DisassemblyError, Insn};
use super::{hex_bytes, DisassemblyFormatter};

/// Serializable instruction for JSON output
#[derive(Serialize)]
struct InstructionJson {
    /// Address of the instruction
    address: String,
    /// Size of the instruction in bytes
    size: u8,
    /// Mnemonic (e.g., "mov", "add")
    mnemonic: String,
    /// Operands
    operands: String,
    /// Bytes of the instruction as hex string
    bytes: String,
    /// Control-flow class: call, cjump, jump, ret or none
    flow: String,
    /// Statically known branch target
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    /// Name of the function symbol starting here
    #[serde(skip_serializing_if = "Option::is_none")]
    symbol: Option<String>,
}

#[derive(Serialize)]
struct FailureJson {
    address: String,
    error: String,
}

/// Serializable binary header for JSON output
#[derive(Serialize)]
struct BinaryJson {
    path: String,
    format: String,
    arch: String,
    bits: u32,
    entry: String,
}

/// Serializable disassembly result for JSON output
#[derive(Serialize)]
struct DisassemblyJson {
    binary: BinaryJson,
    instructions: Vec<InstructionJson>,
    failures: Vec<FailureJson>,
    dropped_targets: usize,
    truncated: bool,
}

fn instruction_to_json(insn: &Insn, binary: &Binary) -> InstructionJson {
    let flow = insn.flow();
    InstructionJson {
        address: format!("0x{:x}", insn.addr),
        size: insn.size,
        mnemonic: insn.mnemonic.clone(),
        operands: insn.operands.clone(),
        bytes: hex_bytes(insn),
        flow: flow.name().to_string(),
        target: flow.target().map(|t| format!("0x{:x}", t)),
        symbol: binary.symbol_at(insn.addr).map(|s| s.name.clone()),
    }
}

fn json_error(e: serde_json::Error) -> DisassemblyError {
    DisassemblyError::Format(format!("JSON serialization error: {}", e))
}

impl DisassemblyFormatter for super::JsonFormatter {
    fn format(&self, disassembly: &Disassembly, binary: &Binary) -> Result<String, DisassemblyError> {
        let result = DisassemblyJson {
            binary: BinaryJson {
                path: binary.path.display().to_string(),
                format: binary.format_name.clone(),
                arch: binary.arch_name.clone(),
                bits: binary.bits(),
                entry: format!("0x{:x}", binary.entry),
            },
            instructions: disassembly
                .insns
                .iter()
                .map(|insn| instruction_to_json(insn, binary))
                .collect(),
            failures: disassembly
                .failures
                .iter()
                .map(|f| FailureJson {
                    address: format!("0x{:x}", f.address),
                    error: f.error.to_string(),
                })
                .collect(),
            dropped_targets: disassembly.dropped_targets,
            truncated: disassembly.truncated,
        };

        serde_json::to_string_pretty(&result).map_err(json_error)
    }
}

impl DisassemblyFormatter for super::JsonLinesFormatter {
    fn format(&self, disassembly: &Disassembly, binary: &Binary) -> Result<String, DisassemblyError> {
        let mut output = String::new();

        for insn in &disassembly.insns {
            let mut instruction = serde_json::to_value(instruction_to_json(insn, binary)).map_err(json_error)?;
            instruction["type"] = json!("instruction");
            output.push_str(&serde_json::to_string(&instruction).map_err(json_error)?);
            output.push('\n');
        }

        for failure in &disassembly.failures {
            let line = json!({
                "type": "failure",
                "address": format!("0x{:x}", failure.address),
                "error": failure.error.to_string(),
            });
            output.push_str(&serde_json::to_string(&line).map_err(json_error)?);
            output.push('\n');
        }

        Ok(output)
    }
}
