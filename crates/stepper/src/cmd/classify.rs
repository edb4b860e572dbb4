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

//! Classify instruction mnemonics

use clap::{Args, ValueEnum};
use eyre::Result;
use stepper_common::{Addr, Architecture, DecodedInstruction, InstructionClassifier};

/// Architectures accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ArchArg {
    /// x86-64
    #[value(name = "x86-64")]
    X86_64,
    /// 64-bit ARM
    #[value(name = "aarch64")]
    AArch64,
    /// The simulator's instruction set
    Sim,
}

impl From<ArchArg> for Architecture {
    fn from(arch: ArchArg) -> Self {
        match arch {
            ArchArg::X86_64 => Self::X86_64,
            ArchArg::AArch64 => Self::AArch64,
            ArchArg::Sim => Self::Sim,
        }
    }
}

/// Arguments of `stepper classify`
#[derive(Debug, Args)]
pub struct ClassifyArgs {
    /// Instruction set the mnemonics belong to
    #[arg(long, value_enum, default_value = "x86-64")]
    pub arch: ArchArg,

    /// Mnemonics to classify
    #[arg(required = true)]
    pub mnemonics: Vec<String>,
}

/// Print the control-flow kind of each mnemonic
pub fn classify(args: &ClassifyArgs) -> Result<()> {
    let arch = Architecture::from(args.arch);
    for mnemonic in &args.mnemonics {
        let insn = DecodedInstruction {
            address: Addr(0),
            size: 1,
            mnemonic: mnemonic.clone(),
            operands: String::new(),
        };
        let kind = serde_json::to_value(arch.classify(&insn))?;
        println!("{mnemonic}\t{}", kind.as_str().unwrap_or("unknown"));
    }
    Ok(())
}
