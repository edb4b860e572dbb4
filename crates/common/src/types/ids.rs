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

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// Stable identity of an inferior thread.
///
/// The id stays valid for the whole resume/stop cycle and is used to look up
/// the thread's plan stack and stop state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
#[display("{_0}")]
pub struct ThreadId(pub u64);

/// Monotonic counter bumped by the process on every resume/stop cycle.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
)]
#[display("{_0}")]
pub struct StopId(pub u64);

impl StopId {
    /// The id following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Identifier of a breakpoint site owned by the process collaborator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
#[display("{_0}")]
pub struct BreakpointId(pub u64);

/// A load address in the inferior.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
)]
#[display("{_0:#x}")]
pub struct Addr(pub u64);

impl Addr {
    /// Address `bytes` past this one.
    pub fn offset(self, bytes: u64) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

/// Half-open address range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddrRange {
    /// First address inside the range.
    pub start: Addr,
    /// First address past the range.
    pub end: Addr,
}

impl AddrRange {
    /// Create a range from its bounds.
    pub fn new(start: Addr, end: Addr) -> Self {
        Self { start, end }
    }

    /// Whether `addr` lies inside the range.
    pub fn contains(&self, addr: Addr) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Size of the range in bytes.
    pub fn len(&self) -> u64 {
        self.end.0.saturating_sub(self.start.0)
    }

    /// Whether the range covers no address at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_display_is_hex() {
        assert_eq!(Addr(0x1000).to_string(), "0x1000");
        assert_eq!(Addr(0x1000).offset(5), Addr(0x1005));
    }

    #[test]
    fn test_range_is_half_open() {
        let range = AddrRange::new(Addr(0x10), Addr(0x18));
        assert!(range.contains(Addr(0x10)));
        assert!(range.contains(Addr(0x17)));
        assert!(!range.contains(Addr(0x18)));
        assert_eq!(range.len(), 8);
        assert_eq!(range.to_string(), "[0x10, 0x18)");
    }

    #[test]
    fn test_stop_id_next() {
        assert_eq!(StopId(3).next(), StopId(4));
        assert_eq!(ThreadId(7).to_string(), "7");
    }
}
