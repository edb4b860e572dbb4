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

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Addr, BreakpointId, StopId, ThreadId};

/// Raw reason the inferior halted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopCause {
    /// A breakpoint site was hit.
    Breakpoint {
        /// The site that triggered.
        site: BreakpointId,
    },
    /// A single-step trap completed.
    Trace,
    /// The thread received a signal.
    Signal {
        /// Signal number.
        signo: i32,
        /// Conventional name, e.g. `SIGSEGV`.
        name: String,
    },
    /// A plan asked the process to stop.
    PlanComplete,
    /// Synthetic stop forced by an external halt request.
    Halt,
    /// The process exited.
    Exited {
        /// Exit status.
        status: i32,
    },
}

impl StopCause {
    /// Whether this cause is a single-step trap.
    pub fn is_trace(&self) -> bool {
        matches!(self, Self::Trace)
    }

    /// The breakpoint site, if this is a breakpoint stop.
    pub fn breakpoint(&self) -> Option<BreakpointId> {
        match self {
            Self::Breakpoint { site } => Some(*site),
            _ => None,
        }
    }

    /// Whether the process is gone after this stop.
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Exited { .. })
    }
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Breakpoint { site } => write!(f, "breakpoint {site}"),
            Self::Trace => write!(f, "instruction step"),
            Self::Signal { name, .. } => write!(f, "signal {name}"),
            Self::PlanComplete => write!(f, "plan complete"),
            Self::Halt => write!(f, "halted"),
            Self::Exited { status } => write!(f, "process exited with status {status}"),
        }
    }
}

/// One halt of the inferior as delivered to the step driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopEvent {
    /// Stop id of the process after this stop.
    pub stop_id: StopId,
    /// The thread that caused the halt.
    pub thread: ThreadId,
    /// Program counter of that thread.
    pub pc: Addr,
    /// Why it halted.
    pub cause: StopCause,
}

impl StopEvent {
    /// Whether the event was produced by `thread`.
    pub fn is_for(&self, thread: ThreadId) -> bool {
        self.thread == thread
    }
}

impl fmt::Display for StopEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stop #{} thread {} at {}: {}", self.stop_id, self.thread, self.pc, self.cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_cause_descriptions() {
        assert_eq!(StopCause::Breakpoint { site: BreakpointId(2) }.to_string(), "breakpoint 2");
        assert_eq!(StopCause::Halt.to_string(), "halted");
        assert_eq!(
            StopCause::Signal { signo: 11, name: "SIGSEGV".into() }.to_string(),
            "signal SIGSEGV"
        );
        assert_eq!(StopCause::Exited { status: 3 }.to_string(), "process exited with status 3");
    }

    #[test]
    fn test_stop_event_serializes_tagged_cause() {
        let event = StopEvent {
            stop_id: StopId(4),
            thread: ThreadId(1),
            pc: Addr(0x40),
            cause: StopCause::Breakpoint { site: BreakpointId(9) },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["cause"]["kind"], "breakpoint");
        assert_eq!(json["cause"]["site"], 9);
        assert!(event.is_for(ThreadId(1)));
        assert_eq!(event.cause.breakpoint(), Some(BreakpointId(9)));
    }
}
