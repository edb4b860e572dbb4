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

//! A deterministic simulated inferior.
//!
//! [`SimProcess`] runs a [`Program`] on any number of threads and implements
//! [`crate::ProcessControl`] and [`crate::FrameIntrospection`], so the step
//! driver can be exercised without a real process. Threads execute one
//! statement per tick, round-robin in thread-id order.

mod process;
mod program;

pub use process::*;
pub use program::*;

use stepper_common::{Addr, BreakpointId, ThreadId};
use thiserror::Error;

/// Errors raised by the simulator.
#[derive(Debug, Error)]
pub enum SimError {
    /// A call or thread entry names a function the program lacks
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// Two functions share a name
    #[error("function '{0}' is defined more than once")]
    DuplicateFunction(String),

    /// A function has no statements
    #[error("function '{0}' has an empty body")]
    EmptyFunction(String),

    /// A function does not fit its code slot
    #[error("function '{0}' does not fit in its {FUNCTION_SLOT:#x}-byte slot")]
    FunctionTooLarge(String),

    /// A jump leaves the function body
    #[error("function '{function}' jumps to statement {target} but has only {len}")]
    BadJumpTarget {
        /// The offending function.
        function: String,
        /// Requested statement index.
        target: usize,
        /// Number of statements.
        len: usize,
    },

    /// The program starts no thread
    #[error("program defines no threads")]
    NoThreads,

    /// No statement starts at the address
    #[error("no instruction at {0}")]
    NoInstruction(Addr),

    /// No statement is attributed to the line
    #[error("no code for line {0}")]
    NoLine(u32),

    /// The thread does not exist
    #[error("unknown thread {0}")]
    UnknownThread(ThreadId),

    /// The frame does not exist
    #[error("thread {thread} has no frame #{frame}")]
    NoFrame {
        /// Thread queried.
        thread: ThreadId,
        /// Frame index requested.
        frame: usize,
    },

    /// The variable is not a local of the frame
    #[error("no variable named '{name}' in frame #{frame} of thread {thread}")]
    NoVariable {
        /// Thread queried.
        thread: ThreadId,
        /// Frame index.
        frame: usize,
        /// Variable name.
        name: String,
    },

    /// The breakpoint does not exist
    #[error("no breakpoint {0}")]
    NoBreakpoint(BreakpointId),

    /// `wait_for_stop` without a pending resume
    #[error("process is not running")]
    NotRunning,

    /// The process is gone
    #[error("process has exited with status {0}")]
    Exited(i32),

    /// A resume ran for too long without stopping
    #[error("no stop within {0} instructions")]
    BudgetExhausted(u64),

    /// A run-to helper stopped somewhere else
    #[error("expected to stop at {expected}, stopped with {stop}")]
    UnexpectedStop {
        /// Location the caller wanted to reach.
        expected: String,
        /// What happened instead.
        stop: String,
    },

    /// Reading a program file failed
    #[error("failed to read program {path}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// TOML program could not be parsed
    #[error("invalid TOML program: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON program could not be parsed
    #[error("invalid JSON program: {0}")]
    Json(#[from] serde_json::Error),
}
