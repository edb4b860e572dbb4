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

//! The thread-plan protocol and the built-in plan variants.
//!
//! Every plan on a thread's stack satisfies [`ThreadPlan`]. The driver calls
//! into plans only while the inferior is stopped, serially, through a
//! [`PlanContext`] that exposes the thread being stepped, read access to its
//! frames and variables, internal breakpoints, and the ability to queue
//! child plans.

mod base;
mod step_instruction;
mod step_out;
mod step_range;

pub use base::BasePlan;
pub use step_instruction::StepInstructionPlan;
pub use step_out::StepOutPlan;
pub use step_range::StepOverRangePlan;

use std::fmt;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use stepper_common::{
    Addr, AddrRange, BreakpointId, ControlFlowKind, DecodedInstruction, Frame,
    InstructionClassifier, LineEntry, PlanArgs, StopEvent, ThreadId, Value,
};

use crate::{FrameIntrospection, Inferior, ProcessControl};

/// Identity of a plan instance on a thread's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("plan#{_0}")]
pub struct PlanId(pub u64);

/// Allocator for [`PlanId`]s, one per plan stack.
#[derive(Debug, Default)]
pub struct PlanIds {
    next: u64,
}

impl PlanIds {
    /// Hand out the next unused id.
    pub fn allocate(&mut self) -> PlanId {
        let id = PlanId(self.next);
        self.next += 1;
        id
    }
}

/// Discriminates the plan variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanKind {
    /// The implicit bottom-of-stack plan
    Base,
    /// Return to the caller frame
    StepOut,
    /// Step until the pc leaves an address range
    StepOverRange,
    /// One instruction, stepping into calls
    StepInstruction,
    /// One instruction, stepping over calls
    StepInstructionOver,
    /// Externally supplied logic
    Scripted,
}

/// How a plan wants the process resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResumeAction {
    /// Run freely until something stops the process
    Continue,
    /// Execute exactly one instruction on the stepping thread
    SingleStep,
}

/// A built-in plan variant that can be requested directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuiltinPlan {
    /// Step out of the current frame
    StepOut,
    /// Step over the given range, or the current source line when `None`
    StepOverRange {
        /// Range to step over
        range: Option<AddrRange>,
    },
    /// Single instruction, into calls
    StepInstruction,
    /// Single instruction, over calls
    StepInstructionOver,
}

impl BuiltinPlan {
    /// Instantiate the variant.
    pub fn build(self) -> Box<dyn ThreadPlan> {
        match self {
            Self::StepOut => Box::new(StepOutPlan::new()),
            Self::StepOverRange { range } => Box::new(StepOverRangePlan::new(range)),
            Self::StepInstruction => Box::new(StepInstructionPlan::new(false)),
            Self::StepInstructionOver => Box::new(StepInstructionPlan::new(true)),
        }
    }
}

impl fmt::Display for BuiltinPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StepOut => write!(f, "step-out"),
            Self::StepOverRange { .. } => write!(f, "step-over-range"),
            Self::StepInstruction => write!(f, "step-instruction"),
            Self::StepInstructionOver => write!(f, "step-instruction-over"),
        }
    }
}

/// Recipe for constructing a plan, used by step requests and child queueing.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanSpec {
    /// A built-in variant
    Builtin(BuiltinPlan),
    /// A scripted plan resolved through the registry
    Scripted {
        /// `<namespace>.<ClassName>`
        name: String,
        /// Arguments moved into the plan
        args: Option<PlanArgs>,
    },
}

impl PlanSpec {
    /// Name used in logs and error messages; scripted plans keep the exact
    /// requested string.
    pub fn display_name(&self) -> String {
        match self {
            Self::Builtin(builtin) => builtin.to_string(),
            Self::Scripted { name, .. } => name.clone(),
        }
    }
}

/// Handle a parent keeps to a child plan it queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildHandle(pub(crate) PlanId);

impl ChildHandle {
    /// The child's plan id.
    pub fn id(self) -> PlanId {
        self.0
    }
}

/// What became of a child plan once it left the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildOutcome {
    /// The child's id.
    pub id: PlanId,
    /// The child's name.
    pub name: String,
    /// Whether it completed, as opposed to being discarded.
    pub complete: bool,
    /// Its stop description at the time it was popped.
    pub description: String,
}

/// A child plan queued during a protocol call, pushed by the driver afterwards.
#[derive(Debug, Clone)]
pub struct QueuedChild {
    /// Id reserved for the child.
    pub id: PlanId,
    /// How to build it.
    pub spec: PlanSpec,
}

/// The capability contract every plan on the stack satisfies.
///
/// Protocol calls run on the control thread while the inferior is stopped.
/// Errors returned after the plan was pushed are treated as protocol
/// violations: the plan is considered complete and a generic stop is
/// surfaced.
pub trait ThreadPlan: Send {
    /// Which variant this is.
    fn kind(&self) -> PlanKind;

    /// Human-readable plan name.
    fn name(&self) -> String;

    /// Called right after the plan is pushed, before the process resumes.
    /// A failure here aborts construction.
    fn did_push(&mut self, _cx: &mut PlanContext<'_>) -> eyre::Result<()> {
        Ok(())
    }

    /// Whether this plan accounts for the stop.
    fn explains_stop(&mut self, cx: &mut PlanContext<'_>, event: &StopEvent) -> eyre::Result<bool>;

    /// Whether this plan is willing to stop the thread at this event; `false`
    /// keeps the process running under its control.
    fn should_stop(&mut self, cx: &mut PlanContext<'_>, event: &StopEvent) -> eyre::Result<bool>;

    /// Whether the plan's goal has been reached.
    fn is_plan_complete(&self) -> bool;

    /// Preference for suspending the other threads while this plan runs.
    fn should_stop_others(&self) -> bool {
        true
    }

    /// How the process should be resumed while this plan is on top.
    fn resume_action(&self) -> ResumeAction;

    /// Explanation once the plan is done.
    fn stop_description(&self, cx: &PlanContext<'_>) -> String;

    /// Called when the plan leaves the stack, completed or discarded.
    fn will_pop(&mut self, _cx: &mut PlanContext<'_>) -> eyre::Result<()> {
        Ok(())
    }
}

/// The view of the world a plan gets during one protocol call.
pub struct PlanContext<'a> {
    thread: ThreadId,
    plan: PlanId,
    stop_others: bool,
    inferior: &'a mut dyn Inferior,
    classifier: &'a dyn InstructionClassifier,
    children: &'a [ChildOutcome],
    ids: &'a mut PlanIds,
    effects: ContextEffects,
}

/// Side effects a protocol call left behind for the driver to act on.
#[derive(Debug, Default)]
pub(crate) struct ContextEffects {
    pub(crate) queued: Vec<QueuedChild>,
    pub(crate) inserted: Vec<BreakpointId>,
    pub(crate) removed: Vec<BreakpointId>,
}

impl<'a> PlanContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        thread: ThreadId,
        plan: PlanId,
        stop_others: bool,
        inferior: &'a mut dyn Inferior,
        classifier: &'a dyn InstructionClassifier,
        children: &'a [ChildOutcome],
        ids: &'a mut PlanIds,
    ) -> Self {
        Self {
            thread,
            plan,
            stop_others,
            inferior,
            classifier,
            children,
            ids,
            effects: ContextEffects::default(),
        }
    }

    /// The thread being stepped.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// The id of the plan receiving the call.
    pub fn plan_id(&self) -> PlanId {
        self.plan
    }

    /// The stop-others value resolved for the current step.
    pub fn stop_others(&self) -> bool {
        self.stop_others
    }

    /// Backtrace of the stepping thread, youngest first.
    pub fn frames(&self) -> eyre::Result<Vec<Frame>> {
        self.inferior.frames(self.thread)
    }

    /// Youngest frame of the stepping thread.
    pub fn current_frame(&self) -> eyre::Result<Frame> {
        self.inferior.current_frame(self.thread)
    }

    /// Read a variable visible in frame `frame_index`.
    pub fn read_variable(&self, frame_index: usize, name: &str) -> eyre::Result<Value> {
        self.inferior.read_variable(self.thread, frame_index, name)
    }

    /// Line-table row containing `addr`.
    pub fn line_entry(&self, addr: Addr) -> Option<LineEntry> {
        self.inferior.line_entry(addr)
    }

    /// Decode and classify the instruction at `addr`.
    pub fn instruction_at(&self, addr: Addr) -> eyre::Result<(DecodedInstruction, ControlFlowKind)> {
        let insn = self.inferior.read_instruction(addr)?;
        let kind = self.classifier.classify(&insn);
        Ok((insn, kind))
    }

    /// Insert a breakpoint that only the stepping thread triggers.
    pub fn set_breakpoint(&mut self, addr: Addr) -> eyre::Result<BreakpointId> {
        let site = self.inferior.set_internal_breakpoint(addr, self.thread)?;
        self.effects.inserted.push(site);
        Ok(site)
    }

    /// Remove an internal breakpoint.
    pub fn remove_breakpoint(&mut self, site: BreakpointId) -> eyre::Result<()> {
        self.inferior.remove_breakpoint(site)?;
        self.effects.removed.push(site);
        Ok(())
    }

    /// Queue a child plan; it is constructed and pushed above the caller
    /// once the current protocol call returns.
    pub fn queue_plan(&mut self, spec: PlanSpec) -> ChildHandle {
        let id = self.ids.allocate();
        self.effects.queued.push(QueuedChild { id, spec });
        ChildHandle(id)
    }

    /// Queue a built-in step out of the current frame.
    pub fn queue_step_out(&mut self) -> ChildHandle {
        self.queue_plan(PlanSpec::Builtin(BuiltinPlan::StepOut))
    }

    /// Queue a built-in step over `range`.
    pub fn queue_step_over_range(&mut self, range: AddrRange) -> ChildHandle {
        self.queue_plan(PlanSpec::Builtin(BuiltinPlan::StepOverRange { range: Some(range) }))
    }

    /// Queue a built-in single-instruction step.
    pub fn queue_step_instruction(&mut self, step_over: bool) -> ChildHandle {
        let builtin =
            if step_over { BuiltinPlan::StepInstructionOver } else { BuiltinPlan::StepInstruction };
        self.queue_plan(PlanSpec::Builtin(builtin))
    }

    /// Queue a scripted plan by qualified name.
    pub fn queue_scripted(&mut self, name: &str, args: Option<PlanArgs>) -> ChildHandle {
        self.queue_plan(PlanSpec::Scripted { name: name.to_string(), args })
    }

    /// Outcome of a child that already left the stack.
    pub fn child_outcome(&self, handle: ChildHandle) -> Option<&ChildOutcome> {
        self.children.iter().rev().find(|outcome| outcome.id == handle.0)
    }

    /// Whether a child finished with its goal reached.
    pub fn is_child_complete(&self, handle: ChildHandle) -> bool {
        self.child_outcome(handle).is_some_and(|outcome| outcome.complete)
    }

    /// Most recently finished child that completed.
    pub fn last_completed_child(&self) -> Option<&ChildOutcome> {
        self.children.iter().rev().find(|outcome| outcome.complete)
    }

    pub(crate) fn into_effects(self) -> ContextEffects {
        self.effects
    }
}

impl fmt::Debug for PlanContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanContext")
            .field("thread", &self.thread)
            .field("plan", &self.plan)
            .field("stop_others", &self.stop_others)
            .field("queued", &self.effects.queued.len())
            .finish()
    }
}
