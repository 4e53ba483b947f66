//! Control-flow classification of decoded instructions.

use crate::{Address, Insn, InsnGroup, Operand};

/// Where a call or jump goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Statically known destination
    Direct(Address),
    /// Destination depends on a register or memory value
    Indirect,
}

impl Target {
    pub fn address(&self) -> Option<Address> {
        match self {
            Target::Direct(addr) => Some(*addr),
            Target::Indirect => None,
        }
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Subroutine call
    Call(Target),
    /// Jump, conditional or not
    Jump { conditional: bool, target: Target },
    /// Ends the current path without a successor
    Return,
    /// Anything else; execution continues at the next instruction
    Other,
}

impl Flow {
    /// Short label used in reports
    pub fn name(&self) -> &'static str {
        match self {
            Flow::Call(_) => "call",
            Flow::Jump { conditional: true, .. } => "cjump",
            Flow::Jump { conditional: false, .. } => "jump",
            Flow::Return => "ret",
            Flow::Other => "none",
        }
    }

    /// Statically resolved destination, if any
    pub fn target(&self) -> Option<Address> {
        match self {
            Flow::Call(target) | Flow::Jump { target, .. } => target.address(),
            Flow::Return | Flow::Other => None,
        }
    }
}

/// Classify one instruction by its group membership and branch operand.
pub fn classify(insn: &Insn) -> Flow {
    if insn.in_group(InsnGroup::Ret) || insn.in_group(InsnGroup::Iret) {
        return Flow::Return;
    }
    if insn.in_group(InsnGroup::Call) {
        return Flow::Call(target_of(insn));
    }
    if insn.in_group(InsnGroup::Jump) {
        return Flow::Jump {
            conditional: !is_unconditional_jump(&insn.mnemonic),
            target: target_of(insn),
        };
    }
    Flow::Other
}

fn target_of(insn: &Insn) -> Target {
    match insn.branch_operand {
        Some(Operand::Imm(addr)) => Target::Direct(addr),
        Some(Operand::Reg) | Some(Operand::Mem) | None => Target::Indirect,
    }
}

fn is_unconditional_jump(mnemonic: &str) -> bool {
    matches!(mnemonic, "jmp" | "ljmp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::insn;
    use rstest::rstest;

    fn branch(mnemonic: &str, groups: &[InsnGroup], operand: Option<Operand>) -> Insn {
        let mut i = insn(0x1000, &[0x90], mnemonic, "");
        i.groups = groups.to_vec();
        i.branch_operand = operand;
        i
    }

    #[rstest]
    #[case("call", &[InsnGroup::Call, InsnGroup::BranchRelative], Some(Operand::Imm(0x1010)),
           Flow::Call(Target::Direct(0x1010)))]
    #[case("call", &[InsnGroup::Call], Some(Operand::Reg), Flow::Call(Target::Indirect))]
    #[case("call", &[InsnGroup::Call], Some(Operand::Mem), Flow::Call(Target::Indirect))]
    #[case("jmp", &[InsnGroup::Jump, InsnGroup::BranchRelative], Some(Operand::Imm(0x1020)),
           Flow::Jump { conditional: false, target: Target::Direct(0x1020) })]
    #[case("jmp", &[InsnGroup::Jump], Some(Operand::Reg),
           Flow::Jump { conditional: false, target: Target::Indirect })]
    #[case("jne", &[InsnGroup::Jump, InsnGroup::BranchRelative], Some(Operand::Imm(0x1008)),
           Flow::Jump { conditional: true, target: Target::Direct(0x1008) })]
    #[case("ret", &[InsnGroup::Ret], None, Flow::Return)]
    #[case("iretq", &[InsnGroup::Iret], None, Flow::Return)]
    #[case("int3", &[InsnGroup::Int], None, Flow::Other)]
    #[case("nop", &[], None, Flow::Other)]
    fn test_classify(
        #[case] mnemonic: &str,
        #[case] groups: &[InsnGroup],
        #[case] operand: Option<Operand>,
        #[case] expected: Flow,
    ) {
        assert_eq!(classify(&branch(mnemonic, groups, operand)), expected);
    }

    #[test]
    fn test_flow_target() {
        assert_eq!(Flow::Call(Target::Direct(0x40)).target(), Some(0x40));
        assert_eq!(Flow::Call(Target::Indirect).target(), None);
        assert_eq!(Flow::Return.target(), None);
        assert_eq!(Flow::Jump { conditional: true, target: Target::Indirect }.name(), "cjump");
    }
}
