//! Disassembly strategies

use std::fmt;
use clap::ValueEnum;
use crate::{Binary, Decoder, Disassembly, DisassemblyError};

/// Available disassembly strategies.
#[derive(Copy, Clone, ValueEnum, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Linear sweep disassembly
    Linear,
    /// Recursive descent disassembly (follows control flow)
    Recursive,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Linear => write!(f, "Linear sweep"),
            Strategy::Recursive => write!(f, "Recursive descent"),
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Recursive
    }
}

/// Knobs shared by all strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyOptions {
    /// Stop a recursive pass after this many decoded instructions
    pub max_instructions: Option<usize>,
    /// Seed the recursive pass with function symbols as well as the entry point
    pub seed_symbols: bool,
    /// Continue after a direct call, assuming the callee returns
    pub calls_return: bool,
    /// Restrict a linear sweep to the section with this name
    pub section: Option<String>,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            max_instructions: Some(1_000_000),
            seed_symbols: true,
            calls_return: true,
            section: None,
        }
    }
}

impl Strategy {
    /// Run the selected strategy on `binary` using `decoder`.
    pub fn run(
        &self,
        binary: &Binary,
        decoder: &dyn Decoder,
        options: &StrategyOptions,
    ) -> Result<Disassembly, DisassemblyError> {
        match self {
            Strategy::Linear    => linear::run(binary, decoder, options),
            Strategy::Recursive => Ok(recursive::run(binary, decoder, options)),
        }
    }

    /// Return all available strategies
    pub fn all() -> &'static [Strategy] {
        &[Strategy::Linear, Strategy::Recursive]
    }
}

pub mod linear;
pub mod recursive;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::CapstoneDecoder;
    use crate::test_support::code_binary;
    use crate::Architecture;

    #[test]
    fn test_strategy_display() {
        assert_eq!(Strategy::Linear.to_string(), "Linear sweep");
        assert_eq!(Strategy::Recursive.to_string(), "Recursive descent");
        assert_eq!(Strategy::default(), Strategy::Recursive);
    }

    #[test]
    fn test_strategies_agree_on_straight_line_code() {
        // nop; nop; ret
        let binary = code_binary(0x1000, &[0x90, 0x90, 0xc3]);
        let decoder = CapstoneDecoder::for_architecture(Architecture::X86_64).unwrap();
        let options = StrategyOptions::default();

        let results: Vec<Disassembly> = Strategy::all()
            .iter()
            .map(|s| s.run(&binary, &decoder, &options).unwrap())
            .collect();

        assert_eq!(results[0].addresses(), vec![0x1000, 0x1001, 0x1002]);
        assert_eq!(results[0].insns, results[1].insns);
    }

    #[test]
    fn test_linear_unknown_section() {
        let binary = code_binary(0x1000, &[0xc3]);
        let decoder = CapstoneDecoder::for_architecture(Architecture::X86_64).unwrap();
        let options = StrategyOptions {
            section: Some(".nope".to_string()),
            ..Default::default()
        };

        let err = Strategy::Linear.run(&binary, &decoder, &options).unwrap_err();
        assert!(matches!(err, DisassemblyError::UnknownSection(name) if name == ".nope"));
    }
}
