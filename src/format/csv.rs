//! CSV output formatter

use crate::{Binary, Disassembly, DisassemblyError};
use super::{hex_bytes, DisassemblyFormatter};

const HEADER: [&str; 8] = ["address", "size", "mnemonic", "operands", "bytes", "flow", "target", "symbol"];

fn csv_error(e: impl std::fmt::Display) -> DisassemblyError {
    DisassemblyError::Format(format!("CSV serialization error: {}", e))
}

impl DisassemblyFormatter for super::CsvFormatter {
    fn format(&self, disassembly: &Disassembly, binary: &Binary) -> Result<String, DisassemblyError> {
        let mut writer = ::csv::Writer::from_writer(Vec::new());
        writer.write_record(HEADER).map_err(csv_error)?;

        for insn in &disassembly.insns {
            let flow = insn.flow();
            let target = flow.target().map(|t| format!("0x{:x}", t)).unwrap_or_default();
            let symbol = binary.symbol_at(insn.addr).map(|s| s.name.as_str()).unwrap_or("");
            writer
                .write_record([
                    format!("0x{:x}", insn.addr).as_str(),
                    insn.size.to_string().as_str(),
                    insn.mnemonic.as_str(),
                    insn.operands.as_str(),
                    hex_bytes(insn).as_str(),
                    flow.name(),
                    target.as_str(),
                    symbol,
                ])
                .map_err(csv_error)?;
        }

        let bytes = writer.into_inner().map_err(csv_error)?;
        String::from_utf8(bytes).map_err(csv_error)
    }
}
