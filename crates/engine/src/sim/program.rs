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

//! Programs for the simulated inferior.
//!
//! A program is a list of functions, each a list of statements tagged with
//! a source line. Programs can be written by hand with the builder API or
//! loaded from TOML / JSON:
//!
//! ```toml
//! [[functions]]
//! name = "main"
//! body = [
//!     { line = 10, op = "call", function = "foo" },
//!     { line = 11, op = "ret" },
//! ]
//!
//! [[threads]]
//! entry = "main"
//! ```

use std::{collections::BTreeSet, fmt, fs, path::Path};

use serde::{Deserialize, Serialize};

use super::SimError;

/// Load address of the first function.
pub const CODE_BASE: u64 = 0x1000;

/// Every function occupies one slot of this many bytes.
pub const FUNCTION_SLOT: u64 = 0x100;

/// One simulated instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Do nothing
    Nop,
    /// Assign a constant to a local
    Set {
        /// Local variable name
        var: String,
        /// New value
        value: i64,
    },
    /// Add a constant to a local (a missing local counts as zero)
    Add {
        /// Local variable name
        var: String,
        /// Amount to add
        value: i64,
    },
    /// Call a function
    Call {
        /// Callee name
        function: String,
    },
    /// Return to the caller
    Ret,
    /// Jump to a statement of the same function
    Jmp {
        /// Statement index
        to: usize,
    },
    /// Jump when a local is non-zero
    Jnz {
        /// Local variable name
        var: String,
        /// Statement index
        to: usize,
    },
    /// Raise a signal
    Trap {
        /// Signal number
        signo: i32,
    },
}

impl Op {
    /// Encoded size in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Nop | Self::Ret | Self::Trap { .. } => 1,
            Self::Jmp { .. } => 2,
            Self::Add { .. } | Self::Jnz { .. } => 3,
            Self::Set { .. } => 4,
            Self::Call { .. } => 5,
        }
    }

    /// Disassembly mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Set { .. } => "set",
            Self::Add { .. } => "add",
            Self::Call { .. } => "call",
            Self::Ret => "ret",
            Self::Jmp { .. } => "jmp",
            Self::Jnz { .. } => "jnz",
            Self::Trap { .. } => "trap",
        }
    }

    /// Disassembly operands.
    pub fn operands(&self) -> String {
        match self {
            Self::Nop | Self::Ret => String::new(),
            Self::Set { var, value } | Self::Add { var, value } => format!("{var}, {value}"),
            Self::Call { function } => function.clone(),
            Self::Jmp { to } => format!("#{to}"),
            Self::Jnz { var, to } => format!("{var}, #{to}"),
            Self::Trap { signo } => signo.to_string(),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operands = self.operands();
        if operands.is_empty() {
            write!(f, "{}", self.mnemonic())
        } else {
            write!(f, "{} {operands}", self.mnemonic())
        }
    }
}

/// An instruction with its source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    /// Source line
    pub line: u32,
    /// The instruction
    #[serde(flatten)]
    pub op: Op,
}

/// A function of the program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDef {
    /// Function name
    pub name: String,
    /// Statements in address order
    pub body: Vec<Statement>,
}

/// A thread started at launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadDef {
    /// Function the thread starts in
    pub entry: String,
}

fn default_threads() -> Vec<ThreadDef> {
    vec![ThreadDef { entry: "main".to_string() }]
}

/// A whole program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    /// Functions, laid out in this order
    pub functions: Vec<FunctionDef>,
    /// Threads started at launch; the first one is the main thread
    #[serde(default = "default_threads")]
    pub threads: Vec<ThreadDef>,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// An empty program with a single `main` thread.
    pub fn new() -> Self {
        Self { functions: Vec::new(), threads: default_threads() }
    }

    /// Add a function built with `build`.
    pub fn function(mut self, name: &str, build: impl FnOnce(FunctionBuilder) -> FunctionBuilder) -> Self {
        let builder = build(FunctionBuilder { body: Vec::new(), line: 1 });
        self.functions.push(FunctionDef { name: name.to_string(), body: builder.body });
        self
    }

    /// Add a thread starting in `entry`.
    pub fn thread(mut self, entry: &str) -> Self {
        self.threads.push(ThreadDef { entry: entry.to_string() });
        self
    }

    /// Parse a TOML program.
    pub fn from_toml_str(text: &str) -> Result<Self, SimError> {
        let program: Self = toml::from_str(text)?;
        program.validate()?;
        Ok(program)
    }

    /// Parse a JSON program.
    pub fn from_json_str(text: &str) -> Result<Self, SimError> {
        let program: Self = serde_json::from_str(text)?;
        program.validate()?;
        Ok(program)
    }

    /// Load a program file; `.json` files are read as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let text = fs::read_to_string(path)
            .map_err(|err| SimError::Io { path: path.display().to_string(), source: err })?;
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
            Self::from_json_str(&text)
        } else {
            Self::from_toml_str(&text)
        }
    }

    /// Look a function up by name.
    pub fn find_function(&self, name: &str) -> Option<(usize, &FunctionDef)> {
        self.functions.iter().enumerate().find(|(_, f)| f.name == name)
    }

    /// Check names, call and jump targets, slot sizes and thread entries.
    pub fn validate(&self) -> Result<(), SimError> {
        let mut seen = BTreeSet::new();
        for function in &self.functions {
            if !seen.insert(function.name.as_str()) {
                return Err(SimError::DuplicateFunction(function.name.clone()));
            }
            if function.body.is_empty() {
                return Err(SimError::EmptyFunction(function.name.clone()));
            }
            let size: u64 = function.body.iter().map(|s| s.op.size()).sum();
            if size > FUNCTION_SLOT {
                return Err(SimError::FunctionTooLarge(function.name.clone()));
            }
        }

        for function in &self.functions {
            for statement in &function.body {
                match &statement.op {
                    Op::Call { function: callee } if self.find_function(callee).is_none() => {
                        return Err(SimError::UnknownFunction(callee.clone()));
                    }
                    Op::Jmp { to } | Op::Jnz { to, .. } if *to >= function.body.len() => {
                        return Err(SimError::BadJumpTarget {
                            function: function.name.clone(),
                            target: *to,
                            len: function.body.len(),
                        });
                    }
                    _ => {}
                }
            }
        }

        if self.threads.is_empty() {
            return Err(SimError::NoThreads);
        }
        for thread in &self.threads {
            if self.find_function(&thread.entry).is_none() {
                return Err(SimError::UnknownFunction(thread.entry.clone()));
            }
        }
        Ok(())
    }
}

/// Builder for one function body.
#[derive(Debug)]
pub struct FunctionBuilder {
    body: Vec<Statement>,
    line: u32,
}

impl FunctionBuilder {
    /// Attribute the following statements to `line`.
    pub fn line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    /// Append `op` on the current line.
    pub fn op(mut self, op: Op) -> Self {
        self.body.push(Statement { line: self.line, op });
        self
    }

    /// `nop`
    pub fn nop(self) -> Self {
        self.op(Op::Nop)
    }

    /// `set var, value`
    pub fn set(self, var: &str, value: i64) -> Self {
        self.op(Op::Set { var: var.to_string(), value })
    }

    /// `add var, value`
    pub fn add(self, var: &str, value: i64) -> Self {
        self.op(Op::Add { var: var.to_string(), value })
    }

    /// `call function`
    pub fn call(self, function: &str) -> Self {
        self.op(Op::Call { function: function.to_string() })
    }

    /// `ret`
    pub fn ret(self) -> Self {
        self.op(Op::Ret)
    }

    /// `jmp #to`
    pub fn jmp(self, to: usize) -> Self {
        self.op(Op::Jmp { to })
    }

    /// `jnz var, #to`
    pub fn jnz(self, var: &str, to: usize) -> Self {
        self.op(Op::Jnz { var: var.to_string(), to })
    }

    /// `trap signo`
    pub fn trap(self, signo: i32) -> Self {
        self.op(Op::Trap { signo })
    }
}
