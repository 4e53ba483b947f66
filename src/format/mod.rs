//! Output format module implementation

mod json;
mod csv;

use crate::{Binary, Disassembly, DisassemblyError, Insn, SymbolKind, MAX_INSTRUCTION_SIZE};
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;
use clap::ValueEnum;

/// Supported output formats for disassembly results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output (default)
    Text,
    /// JSON format (hierarchical)
    Json,
    /// JSON Lines format (one JSON object per line)
    #[value(name = "jsonl")]
    JsonLines,
    /// CSV format (comma-separated values)
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Text
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[
            OutputFormat::Text,
            OutputFormat::Json,
            OutputFormat::JsonLines,
            OutputFormat::Csv,
        ]
    }

    /// Get a formatter for this output format
    pub fn get_formatter(&self) -> Box<dyn DisassemblyFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
            OutputFormat::Csv => Box::new(CsvFormatter),
        }
    }
}

/// Formatter trait for disassembly output
pub trait DisassemblyFormatter {
    /// Format a disassembly result; `binary` supplies symbols and header details.
    fn format(&self, disassembly: &Disassembly, binary: &Binary) -> Result<String, DisassemblyError>;
}

/// Format disassembly in plain text
pub struct TextFormatter;

/// Format disassembly in JSON
pub struct JsonFormatter;

/// Format disassembly in JSON Lines
pub struct JsonLinesFormatter;

/// Format disassembly in CSV
pub struct CsvFormatter;

/// Space-separated hex bytes, e.g. "48 89 e5"
pub(crate) fn hex_bytes(insn: &Insn) -> String {
    insn.bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// One listing line: address, byte column padded to the widest encoding, mnemonic, operands.
pub fn text_line(insn: &Insn) -> String {
    let mut line = format!("0x{:016x}: ", insn.addr);
    for slot in 0..MAX_INSTRUCTION_SIZE {
        match insn.bytes().get(slot) {
            Some(b) => {
                let _ = write!(line, "{:02x} ", b);
            }
            None => line.push_str("   "),
        }
    }
    let _ = write!(line, "{:<12} {}", insn.mnemonic, insn.operands);
    line.truncate(line.trim_end().len());
    line
}

impl DisassemblyFormatter for TextFormatter {
    fn format(&self, disassembly: &Disassembly, binary: &Binary) -> Result<String, DisassemblyError> {
        let mut output = String::new();

        for insn in &disassembly.insns {
            if let Some(sym) = binary.symbol_at(insn.addr) {
                output.push_str(&format!("<{}>:\n", sym.name));
            }
            output.push_str(&text_line(insn));
            output.push('\n');
        }

        Ok(output)
    }
}

/// Loader report: format, architecture, entry point, then the section and symbol tables.
pub fn summary(binary: &Binary) -> String {
    let mut output = format!(
        "loaded binary '{}' {}/{} ({} bits) entry@0x{:016x}\n",
        binary.path.display(),
        binary.format_name,
        binary.arch_name,
        binary.bits(),
        binary.entry
    );

    for sec in &binary.sections {
        output.push_str(&format!(
            "  0x{:016x} {:<8} {:<20} {}\n",
            sec.vma,
            sec.size(),
            sec.name,
            sec.kind
        ));
    }

    if !binary.symbols.is_empty() {
        output.push_str("scanned symbol tables\n");
        for sym in &binary.symbols {
            let kind = match sym.kind {
                SymbolKind::Function => "FUNC",
                SymbolKind::Other => "",
            };
            output.push_str(&format!("  {:<40} 0x{:016x} {}\n", sym.name, sym.addr, kind).trim_end());
            output.push('\n');
        }
    }

    output
}
