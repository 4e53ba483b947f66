//! Linear-sweep disassembly, one code section at a time

use crate::{Address, Binary, DecodeFailure, Decoder, Disassembly, DisassemblyError, Section};
use super::StrategyOptions;
use std::time::Instant;
use rayon::prelude::*;

/// Linear sweep over the binary's code.
///
/// With `options.section` set only that section is swept; otherwise every code section is
/// swept in parallel and the results are merged in address order.
pub fn run(
    binary: &Binary,
    decoder: &dyn Decoder,
    options: &StrategyOptions,
) -> Result<Disassembly, DisassemblyError> {
    if let Some(name) = &options.section {
        let section = binary
            .code_sections()
            .find(|s| &s.name == name)
            .ok_or_else(|| DisassemblyError::UnknownSection(name.clone()))?;
        return Ok(run_section(section, decoder));
    }

    let sections: Vec<&Section> = binary.code_sections().collect();
    if sections.is_empty() {
        log::info!("No code sections in {}", binary.path.display());
        return Ok(Disassembly::default());
    }

    let start_time = Instant::now();
    let results: Vec<Disassembly> = sections
        .par_iter()
        .map(|section| run_section(section, decoder))
        .collect();

    let mut merged = Disassembly::default();
    for result in results {
        merged.insns.extend(result.insns);
        merged.failures.extend(result.failures);
    }
    merged.sort();

    log::debug!(
        "Linear sweep of {} sections completed in {:?}: {} instructions, {} undecodable bytes",
        sections.len(),
        start_time.elapsed(),
        merged.insns.len(),
        merged.failures.len()
    );

    Ok(merged)
}

/// Decode `section` sequentially from its first byte to its last.
///
/// Bytes that do not decode are recorded as failures and skipped one at a time.
pub fn run_section(section: &Section, decoder: &dyn Decoder) -> Disassembly {
    log::debug!(
        "Starting linear sweep of '{}' at 0x{:x} ({} bytes)",
        section.name,
        section.vma,
        section.size()
    );

    let mut disasm = Disassembly::default();
    let mut at: Address = section.vma;
    let end = section.end();

    while at < end {
        let code = match section.bytes_from(at) {
            Some(code) => code,
            None => break,
        };
        match decoder.decode(code, at) {
            Ok(insn) if insn.size > 0 => {
                at = insn.end();
                disasm.insns.push(insn);
            }
            Ok(_) => {
                // Avoid infinite loop from zero-sized instructions
                at += 1;
            }
            Err(error) => {
                log::warn!("0x{:x}: {}", at, error);
                disasm.failures.push(DecodeFailure { address: at, error });
                at += 1;
            }
        }
    }

    disasm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::CapstoneDecoder;
    use crate::test_support::code_binary;
    use crate::{Architecture, SectionKind};

    fn decoder() -> CapstoneDecoder {
        CapstoneDecoder::for_architecture(Architecture::X86_64).unwrap()
    }

    #[test]
    fn test_linear_section() {
        // push rbp; mov rbp, rsp; ret
        let section = Section::new(".text", SectionKind::Code, 0x400000, vec![0x55, 0x48, 0x89, 0xe5, 0xc3]);
        let result = run_section(&section, &decoder());

        assert_eq!(result.addresses(), vec![0x400000, 0x400001, 0x400004]);
        assert_eq!(result.insns[1].mnemonic, "mov");
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_linear_ignores_control_flow() {
        // jmp +1; int3; ret -- the int3 is unreachable but still swept
        let section = Section::new(".text", SectionKind::Code, 0x1000, vec![0xeb, 0x01, 0xcc, 0xc3]);
        let result = run_section(&section, &decoder());

        assert_eq!(result.addresses(), vec![0x1000, 0x1002, 0x1003]);
    }

    #[test]
    fn test_linear_skips_undecodable_tail() {
        // nop; <truncated call>
        let section = Section::new(".text", SectionKind::Code, 0x1000, vec![0x90, 0xe8]);
        let result = run_section(&section, &decoder());

        assert_eq!(result.addresses(), vec![0x1000]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].address, 0x1001);
    }

    #[test]
    fn test_linear_all_code_sections() {
        let mut binary = code_binary(0x2000, &[0x90, 0xc3]);
        binary.sections.push(Section::new(".init", SectionKind::Code, 0x1000, vec![0xc3]));
        binary.sections.push(Section::new(".data", SectionKind::Data, 0x3000, vec![0x90; 4]));

        let result = run(&binary, &decoder(), &StrategyOptions::default()).unwrap();
        assert_eq!(result.addresses(), vec![0x1000, 0x2000, 0x2001]);
    }

    #[test]
    fn test_linear_named_section() {
        let mut binary = code_binary(0x2000, &[0x90, 0xc3]);
        binary.sections.push(Section::new(".init", SectionKind::Code, 0x1000, vec![0xc3]));
        let options = StrategyOptions {
            section: Some(".init".to_string()),
            ..Default::default()
        };

        let result = run(&binary, &decoder(), &options).unwrap();
        assert_eq!(result.addresses(), vec![0x1000]);
    }

    #[test]
    fn test_linear_no_code() {
        let mut binary = code_binary(0x2000, &[0x90]);
        binary.sections[0].kind = SectionKind::Data;

        let result = run(&binary, &decoder(), &StrategyOptions::default()).unwrap();
        assert!(result.is_empty());
    }
}
