// Stepper - Thread-plan execution engine
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Control-flow classification of decoded instructions.
//!
//! Instruction-granularity stepping needs exactly one fact about the
//! instruction under the program counter: does it transfer control into a
//! callee? The answer is architecture dependent, so decoding stays with the
//! process collaborator and the stepping plans only ever see the opaque
//! [`ControlFlowKind`] produced by an [`InstructionClassifier`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Addr;

/// A single decoded machine instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInstruction {
    /// Load address of the instruction.
    pub address: Addr,
    /// Encoded size in bytes.
    pub size: u64,
    /// Lower-case mnemonic, e.g. `call` or `b.ne`.
    pub mnemonic: String,
    /// Operand text as printed by the disassembler.
    pub operands: String,
}

impl DecodedInstruction {
    /// Address of the instruction that follows this one in memory.
    pub fn next_address(&self) -> Addr {
        self.address.offset(self.size)
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operands.is_empty() {
            write!(f, "{}: {}", self.address, self.mnemonic)
        } else {
            write!(f, "{}: {} {}", self.address, self.mnemonic, self.operands)
        }
    }
}

/// Control-flow kind of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlFlowKind {
    /// Could not be decoded or classified
    Unknown,
    /// Falls through to the next instruction
    Other,
    /// Subroutine call
    Call,
    /// Subroutine return
    Return,
    /// Unconditional branch
    Jump,
    /// Conditional branch
    CondJump,
    /// Call that changes privilege level or segment
    FarCall,
    /// Return that changes privilege level or segment
    FarReturn,
    /// Jump that changes privilege level or segment
    FarJump,
}

impl ControlFlowKind {
    /// Whether executing the instruction makes a callee frame current.
    pub fn is_call(self) -> bool {
        matches!(self, Self::Call | Self::FarCall)
    }

    /// Whether executing the instruction pops the current frame.
    pub fn is_return(self) -> bool {
        matches!(self, Self::Return | Self::FarReturn)
    }

    /// Whether the instruction may leave the sequential instruction stream.
    pub fn is_branch(self) -> bool {
        !matches!(self, Self::Other | Self::Unknown)
    }
}

/// Architecture-specific classification of decoded instructions.
pub trait InstructionClassifier: Send + Sync {
    /// Classify one decoded instruction.
    fn classify(&self, insn: &DecodedInstruction) -> ControlFlowKind;

    /// Shorthand for `classify(insn).is_call()`.
    fn is_call(&self, insn: &DecodedInstruction) -> bool {
        self.classify(insn).is_call()
    }
}

/// Instruction sets the engine knows how to classify.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Architecture {
    /// x86-64 (AT&T or Intel mnemonics)
    X86_64,
    /// 64-bit ARM
    #[serde(rename = "aarch64")]
    AArch64,
    /// The instruction set of the built-in simulator
    #[default]
    Sim,
}

impl InstructionClassifier for Architecture {
    fn classify(&self, insn: &DecodedInstruction) -> ControlFlowKind {
        let mnemonic = insn.mnemonic.trim().to_ascii_lowercase();
        if mnemonic.is_empty() {
            return ControlFlowKind::Unknown;
        }
        match self {
            Self::X86_64 => classify_x86_64(&mnemonic),
            Self::AArch64 => classify_aarch64(&mnemonic),
            Self::Sim => classify_sim(&mnemonic),
        }
    }
}

fn classify_x86_64(mnemonic: &str) -> ControlFlowKind {
    match mnemonic {
        "call" | "callq" | "callw" | "calll" => ControlFlowKind::Call,
        "lcall" | "lcallq" | "syscall" | "sysenter" | "int" | "int3" | "into" => {
            ControlFlowKind::FarCall
        }
        "ret" | "retq" | "retw" | "retl" => ControlFlowKind::Return,
        "lret" | "lretq" | "iret" | "iretd" | "iretq" | "sysret" | "sysretq" | "sysexit" => {
            ControlFlowKind::FarReturn
        }
        "jmp" | "jmpq" => ControlFlowKind::Jump,
        "ljmp" | "ljmpq" => ControlFlowKind::FarJump,
        "loop" | "loope" | "loopne" | "jcxz" | "jecxz" | "jrcxz" => ControlFlowKind::CondJump,
        m if m.starts_with('j') => ControlFlowKind::CondJump,
        _ => ControlFlowKind::Other,
    }
}

fn classify_aarch64(mnemonic: &str) -> ControlFlowKind {
    match mnemonic {
        "bl" | "blr" | "blraa" | "blraaz" | "blrab" | "blrabz" => ControlFlowKind::Call,
        "svc" | "hvc" | "smc" => ControlFlowKind::FarCall,
        "ret" | "retaa" | "retab" => ControlFlowKind::Return,
        "eret" | "eretaa" | "eretab" => ControlFlowKind::FarReturn,
        "b" | "br" | "braa" | "braaz" | "brab" | "brabz" => ControlFlowKind::Jump,
        "cbz" | "cbnz" | "tbz" | "tbnz" => ControlFlowKind::CondJump,
        m if m.starts_with("b.") => ControlFlowKind::CondJump,
        _ => ControlFlowKind::Other,
    }
}

fn classify_sim(mnemonic: &str) -> ControlFlowKind {
    match mnemonic {
        "call" => ControlFlowKind::Call,
        "ret" => ControlFlowKind::Return,
        "jmp" => ControlFlowKind::Jump,
        "jnz" => ControlFlowKind::CondJump,
        "trap" => ControlFlowKind::FarCall,
        _ => ControlFlowKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insn(mnemonic: &str) -> DecodedInstruction {
        DecodedInstruction {
            address: Addr(0x1000),
            size: 5,
            mnemonic: mnemonic.to_string(),
            operands: String::new(),
        }
    }

    #[test]
    fn test_x86_calls_and_branches() {
        let arch = Architecture::X86_64;
        assert_eq!(arch.classify(&insn("callq")), ControlFlowKind::Call);
        assert_eq!(arch.classify(&insn("CALL")), ControlFlowKind::Call);
        assert_eq!(arch.classify(&insn("retq")), ControlFlowKind::Return);
        assert_eq!(arch.classify(&insn("jne")), ControlFlowKind::CondJump);
        assert_eq!(arch.classify(&insn("jmp")), ControlFlowKind::Jump);
        assert_eq!(arch.classify(&insn("ljmp")), ControlFlowKind::FarJump);
        assert_eq!(arch.classify(&insn("movq")), ControlFlowKind::Other);
        assert_eq!(arch.classify(&insn("")), ControlFlowKind::Unknown);
    }

    #[test]
    fn test_aarch64_calls_and_branches() {
        let arch = Architecture::AArch64;
        assert!(arch.is_call(&insn("bl")));
        assert!(arch.is_call(&insn("blr")));
        assert!(!arch.is_call(&insn("b")));
        assert_eq!(arch.classify(&insn("b.ne")), ControlFlowKind::CondJump);
        assert_eq!(arch.classify(&insn("cbz")), ControlFlowKind::CondJump);
        assert_eq!(arch.classify(&insn("eret")), ControlFlowKind::FarReturn);
    }

    #[test]
    fn test_sim_classification() {
        let arch = Architecture::Sim;
        assert!(arch.is_call(&insn("call")));
        assert!(arch.classify(&insn("ret")).is_return());
        assert!(arch.classify(&insn("jnz")).is_branch());
        assert!(!arch.classify(&insn("add")).is_branch());
    }

    #[test]
    fn test_next_address_uses_size() {
        assert_eq!(insn("call").next_address(), Addr(0x1005));
    }
}
