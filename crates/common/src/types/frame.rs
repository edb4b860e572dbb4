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

use super::{Addr, AddrRange};

/// A stack frame of a stopped thread. Index 0 is the youngest frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Position in the backtrace, 0 = current frame.
    pub index: usize,
    /// Name of the function executing in this frame.
    pub function: String,
    /// Program counter (return address for older frames).
    pub pc: Addr,
    /// Call depth, 0 = outermost frame of the thread.
    pub depth: usize,
    /// Source line of `pc`, when line information exists.
    pub line: Option<u32>,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame #{}: {} {}", self.index, self.pc, self.function)?;
        if let Some(line) = self.line {
            write!(f, " at line {line}")?;
        }
        Ok(())
    }
}

/// Row of a line table: the address range generated for one source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEntry {
    /// Source line number.
    pub line: u32,
    /// Addresses belonging to this line.
    pub range: AddrRange,
}
