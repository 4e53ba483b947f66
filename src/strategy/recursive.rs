//! Recursive descent disassembly strategy

use std::collections::{HashSet, VecDeque};
use std::time::Instant;
use crate::{Address, Binary, DecodeFailure, Decoder, Disassembly, Flow, Insn, Target};
use super::StrategyOptions;

/// Recursive-descent disassembly of every code path reachable from the entry point.
///
/// The pass is an explicit worklist: a FIFO of pending addresses and a set of addresses
/// already taken off it. Targets are followed only when they are statically known and land
/// inside a code section. Decode failures end the path they occur on and nothing else.
///
/// # Arguments
/// * `binary` - The loaded binary
/// * `decoder` - The decoder to use for disassembly
/// * `options` - Seeding, call and size-limit settings
///
/// # Returns
/// The reachable instructions in ascending address order
pub fn run(binary: &Binary, decoder: &dyn Decoder, options: &StrategyOptions) -> Disassembly {
    let Some(text) = binary.text_section() else {
        log::info!("No code section in {}, nothing to disassemble", binary.path.display());
        return Disassembly::default();
    };
    log::debug!(
        "Starting recursive descent from 0x{:x} (first code section '{}')",
        binary.entry,
        text.name
    );

    let start_time = Instant::now();
    let mut walk = Walk::new(binary);

    walk.push(binary.entry);
    if options.seed_symbols {
        for sym in binary.function_symbols() {
            walk.push(sym.addr);
        }
    }

    while let Some(addr) = walk.queue.pop_front() {
        if !walk.seen.insert(addr) {
            continue;
        }
        let Some(code) = binary.code_section_containing(addr).and_then(|s| s.bytes_from(addr)) else {
            walk.result.dropped_targets += 1;
            continue;
        };
        // Only an address that would really be decoded counts against the limit
        if let Some(limit) = options.max_instructions {
            if walk.result.insns.len() >= limit {
                log::warn!("Instruction limit of {} reached, stopping traversal", limit);
                walk.result.truncated = true;
                break;
            }
        }

        let insn = match decoder.decode(code, addr) {
            Ok(insn) => insn,
            Err(error) => {
                log::debug!("0x{:x}: {}, abandoning path", addr, error);
                walk.result.failures.push(DecodeFailure { address: addr, error });
                continue;
            }
        };

        for next in successors(&insn, options) {
            walk.push(next);
        }
        walk.result.insns.push(insn);
    }

    let mut result = walk.result;
    result.sort();

    log::debug!(
        "Recursive descent complete in {:?}: {} instructions, {} decode failures, {} dropped targets",
        start_time.elapsed(),
        result.insns.len(),
        result.failures.len(),
        result.dropped_targets
    );

    result
}

/// Addresses control can reach directly after `insn`.
fn successors(insn: &Insn, options: &StrategyOptions) -> Vec<Address> {
    let fall_through = insn.end();
    match insn.flow() {
        Flow::Return => vec![],
        Flow::Jump { conditional: false, target: Target::Direct(t) } => vec![t],
        Flow::Jump { conditional: false, target: Target::Indirect } => vec![],
        Flow::Jump { conditional: true, target: Target::Direct(t) } => vec![t, fall_through],
        Flow::Jump { conditional: true, target: Target::Indirect } => vec![fall_through],
        Flow::Call(Target::Direct(t)) if options.calls_return => vec![t, fall_through],
        Flow::Call(Target::Direct(t)) => vec![t],
        Flow::Call(Target::Indirect) => vec![fall_through],
        Flow::Other => vec![fall_through],
    }
}

/// Traversal state owned by a single pass.
struct Walk<'a> {
    binary: &'a Binary,
    queue: VecDeque<Address>,
    seen: HashSet<Address>,
    result: Disassembly,
}

impl<'a> Walk<'a> {
    fn new(binary: &'a Binary) -> Self {
        Self {
            binary,
            queue: VecDeque::new(),
            seen: HashSet::new(),
            result: Disassembly::default(),
        }
    }

    /// Enqueue `addr` if it is new and lies inside a code section.
    fn push(&mut self, addr: Address) {
        if self.seen.contains(&addr) {
            return;
        }
        if self.binary.code_section_containing(addr).is_none() {
            log::trace!("Dropping target 0x{:x}: outside every code section", addr);
            self.result.dropped_targets += 1;
            return;
        }
        self.queue.push_back(addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::CapstoneDecoder;
    use crate::test_support::code_binary;
    use crate::{Architecture, Section, SectionKind, Symbol};

    fn decoder() -> CapstoneDecoder {
        CapstoneDecoder::for_architecture(Architecture::X86_64).unwrap()
    }

    fn disassemble(binary: &Binary) -> Disassembly {
        run(binary, &decoder(), &StrategyOptions::default())
    }

    #[test]
    fn test_recursive_disassembly_simple() {
        // mov eax, 1; ret
        let binary = code_binary(0x1000, &[0xb8, 0x01, 0x00, 0x00, 0x00, 0xc3]);
        let result = disassemble(&binary);

        assert_eq!(result.addresses(), vec![0x1000, 0x1005]);
        assert_eq!(result.insns[0].mnemonic, "mov");
        assert_eq!(result.insns[1].mnemonic, "ret");
    }

    #[test]
    fn test_call_visits_callee_and_fall_through() {
        // 0x00: call 0x10; 0x05: ret; int3 padding; 0x10: ret
        let mut code = vec![0xe8, 0x0b, 0x00, 0x00, 0x00, 0xc3];
        code.resize(0x10, 0xcc);
        code.push(0xc3);
        let binary = code_binary(0, &code);

        let result = disassemble(&binary);
        assert_eq!(result.addresses(), vec![0x00, 0x05, 0x10]);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_call_without_return_assumption() {
        let mut code = vec![0xe8, 0x0b, 0x00, 0x00, 0x00, 0xc3];
        code.resize(0x10, 0xcc);
        code.push(0xc3);
        let binary = code_binary(0, &code);
        let options = StrategyOptions {
            calls_return: false,
            ..Default::default()
        };

        let result = run(&binary, &decoder(), &options);
        assert_eq!(result.addresses(), vec![0x00, 0x10]);
    }

    #[test]
    fn test_conditional_jump_follows_both_paths() {
        // 0x00: jne 0x04; 0x02: nop; 0x03: ret; 0x04: ret
        let binary = code_binary(0, &[0x75, 0x02, 0x90, 0xc3, 0xc3]);
        let result = disassemble(&binary);

        assert!(result.contains(0x04), "branch target missing");
        assert!(result.contains(0x02), "fall-through missing");
        assert_eq!(result.addresses(), vec![0x00, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_unconditional_jump_skips_fall_through() {
        // 0x00: jmp 0x03; 0x02: int3; 0x03: ret
        let binary = code_binary(0, &[0xeb, 0x01, 0xcc, 0xc3]);
        let result = disassemble(&binary);

        assert_eq!(result.addresses(), vec![0x00, 0x03]);
        assert!(!result.contains(0x02));
    }

    #[test]
    fn test_indirect_jump_is_not_followed() {
        // 0x00: jmp rax; 0x02: ret
        let binary = code_binary(0, &[0xff, 0xe0, 0xc3]);
        let result = disassemble(&binary);

        assert_eq!(result.addresses(), vec![0x00]);
    }

    #[test]
    fn test_indirect_call_continues_after_call() {
        // 0x00: call rax; 0x02: ret
        let binary = code_binary(0, &[0xff, 0xd0, 0xc3]);
        let result = disassemble(&binary);

        assert_eq!(result.addresses(), vec![0x00, 0x02]);
    }

    #[test]
    fn test_decode_failure_stops_only_its_path() {
        // 0x00: jne 0x03; 0x02: ret; 0x03: <truncated call>
        let binary = code_binary(0, &[0x75, 0x01, 0xc3, 0xe8]);
        let result = disassemble(&binary);

        assert_eq!(result.addresses(), vec![0x00, 0x02]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].address, 0x03);
    }

    #[test]
    fn test_out_of_section_target_is_dropped() {
        // 0x1000: call 0x2000 (no section there); 0x1005: ret
        let binary = code_binary(0x1000, &[0xe8, 0xfb, 0x0f, 0x00, 0x00, 0xc3]);
        let result = disassemble(&binary);

        assert_eq!(result.addresses(), vec![0x1000, 0x1005]);
        assert_eq!(result.dropped_targets, 1);
    }

    #[test]
    fn test_jump_into_data_section_is_dropped() {
        // 0x1000: jmp 0x1010, which is mapped but holds data
        let mut binary = code_binary(0x1000, &[0xeb, 0x0e]);
        binary.sections.push(Section::new(".data", SectionKind::Data, 0x1010, vec![0x90; 4]));
        let result = disassemble(&binary);

        assert_eq!(result.addresses(), vec![0x1000]);
        assert_eq!(result.dropped_targets, 1);
    }

    #[test]
    fn test_decoder_never_reads_past_section_end() {
        // a mov imm32 split across two adjacent code sections must not decode
        let mut binary = code_binary(0x1000, &[0xb8, 0x01, 0x00]);
        binary.sections.push(Section::new(".text2", SectionKind::Code, 0x1003, vec![0x00, 0x00, 0xc3]));
        let result = disassemble(&binary);

        assert!(result.is_empty());
        assert_eq!(result.failures[0].address, 0x1000);
    }

    #[test]
    fn test_function_symbols_seed_traversal() {
        // 0x00: ret; 0x01: nop; 0x02: ret -- only reachable through the symbol
        let mut binary = code_binary(0, &[0xc3, 0x90, 0xc3]);
        binary.symbols.push(Symbol::function("helper", 0x01));
        binary.symbols.push(Symbol::function("import", 0x4000));

        let result = disassemble(&binary);
        assert_eq!(result.addresses(), vec![0x00, 0x01, 0x02]);
        assert_eq!(result.dropped_targets, 1);

        let options = StrategyOptions {
            seed_symbols: false,
            ..Default::default()
        };
        let result = run(&binary, &decoder(), &options);
        assert_eq!(result.addresses(), vec![0x00]);
    }

    #[test]
    fn test_overlapping_instruction_not_redecoded() {
        // 0x00: jne 0x03 (into the middle of the mov); 0x02: mov eax, 0xc3c3c3c3 ...
        let binary = code_binary(0, &[0x75, 0x01, 0xb8, 0xc3, 0xc3, 0xc3, 0xc3, 0xc3]);
        let result = disassemble(&binary);

        // the mov and the ret hidden in its immediate both appear, each once
        assert!(result.contains(0x02));
        assert!(result.contains(0x03));
        let mut addrs = result.addresses();
        addrs.dedup();
        assert_eq!(addrs.len(), result.instruction_count());
    }

    #[test]
    fn test_loop_terminates() {
        // 0x00: nop; 0x01: jmp 0x00
        let binary = code_binary(0, &[0x90, 0xeb, 0xfd]);
        let result = disassemble(&binary);

        assert_eq!(result.addresses(), vec![0x00, 0x01]);
    }

    #[test]
    fn test_instruction_limit() {
        let binary = code_binary(0, &[0x90; 64]);
        let options = StrategyOptions {
            max_instructions: Some(8),
            ..Default::default()
        };

        let result = run(&binary, &decoder(), &options);
        assert_eq!(result.instruction_count(), 8);
        assert!(result.truncated);
    }

    #[test]
    fn test_limit_equal_to_reachable_count_is_not_truncated() {
        // 0x00: jne 0x02 queues 0x02 twice; 0x02: ret
        let binary = code_binary(0, &[0x75, 0x00, 0xc3]);
        let options = StrategyOptions {
            max_instructions: Some(2),
            ..Default::default()
        };

        let full = disassemble(&binary);
        let capped = run(&binary, &decoder(), &options);
        assert_eq!(capped.addresses(), full.addresses());
        assert_eq!(capped.addresses(), vec![0x00, 0x02]);
        assert!(!capped.truncated);
    }

    #[test]
    fn test_no_code_section() {
        let mut binary = code_binary(0, &[0xc3]);
        binary.sections[0].kind = SectionKind::Data;

        let result = disassemble(&binary);
        assert!(result.is_empty());
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_idempotent() {
        let binary = code_binary(0, &[0x75, 0x02, 0x90, 0xc3, 0xe8, 0xf7, 0xff, 0xff, 0xff, 0xc3]);
        assert_eq!(disassemble(&binary), disassemble(&binary));
    }

    #[test]
    fn test_instructions_stay_inside_their_section() {
        let binary = code_binary(0x1000, &[0x75, 0x02, 0x90, 0xc3, 0x48, 0x89, 0xe5, 0xc3]);
        let result = disassemble(&binary);

        for insn in &result.insns {
            let section = binary.section_containing(insn.addr).unwrap();
            assert!(insn.end() <= section.end());
        }
    }
}
