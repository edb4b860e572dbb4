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

//! Collaborator interfaces the engine drives.
//!
//! The engine never talks to a real process directly. Process control,
//! frame introspection and settings are services supplied by the embedder;
//! [`crate::sim::SimProcess`] is the in-tree implementation.

use std::collections::BTreeSet;

use auto_impl::auto_impl;
use stepper_common::{
    Addr, BreakpointId, DecodedInstruction, Frame, LineEntry, StopEvent, StopId, ThreadId, Value,
};

/// How the process should be resumed for one leg of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRequest {
    /// The thread being stepped.
    pub thread: ThreadId,
    /// Threads that must stay suspended while the process runs.
    pub suspended: BTreeSet<ThreadId>,
    /// Whether `thread` should execute exactly one instruction and trap.
    pub single_step: bool,
}

impl ResumeRequest {
    /// Whether `thread` is allowed to run under this request.
    pub fn runs(&self, thread: ThreadId) -> bool {
        !self.suspended.contains(&thread)
    }
}

/// Process-control collaborator.
#[auto_impl(&mut, Box)]
pub trait ProcessControl {
    /// Live threads of the process, in a stable order.
    fn threads(&self) -> Vec<ThreadId>;

    /// Monotonic counter bumped on every resume/stop cycle.
    fn current_stop_id(&self) -> StopId;

    /// Let the process run according to `request`.
    fn resume(&mut self, request: &ResumeRequest) -> eyre::Result<()>;

    /// Block until the process stops again.
    fn wait_for_stop(&mut self) -> eyre::Result<StopEvent>;

    /// Insert a breakpoint that only triggers for `thread`.
    fn set_internal_breakpoint(&mut self, addr: Addr, thread: ThreadId)
        -> eyre::Result<BreakpointId>;

    /// Remove a breakpoint previously inserted.
    fn remove_breakpoint(&mut self, site: BreakpointId) -> eyre::Result<()>;

    /// Decode the instruction at `addr`.
    fn read_instruction(&self, addr: Addr) -> eyre::Result<DecodedInstruction>;
}

/// Read-only frame and variable introspection.
#[auto_impl(&, &mut, Box)]
pub trait FrameIntrospection {
    /// Backtrace of `thread`, youngest frame first.
    fn frames(&self, thread: ThreadId) -> eyre::Result<Vec<Frame>>;

    /// The youngest frame of `thread`.
    fn current_frame(&self, thread: ThreadId) -> eyre::Result<Frame> {
        self.frames(thread)?
            .into_iter()
            .next()
            .ok_or_else(|| eyre::eyre!("thread {thread} has no frames"))
    }

    /// Read variable `name` visible in frame `frame_index` of `thread`.
    fn read_variable(&self, thread: ThreadId, frame_index: usize, name: &str)
        -> eyre::Result<Value>;

    /// Line-table row containing `addr`.
    fn line_entry(&self, addr: Addr) -> Option<LineEntry>;
}

/// Everything the step driver needs from the inferior.
pub trait Inferior: ProcessControl + FrameIntrospection {}

impl<T: ProcessControl + FrameIntrospection + ?Sized> Inferior for T {}

/// Settings collaborator.
#[auto_impl(&, Box, Arc)]
pub trait SettingsProvider {
    /// Value of a boolean setting; unset settings read as `false`.
    fn get_bool_setting(&self, key: &str) -> bool;
}
