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

use stepper_common::{Addr, BreakpointId, StopEvent};
use tracing::debug;

use super::{PlanContext, PlanKind, ResumeAction, ThreadPlan};

/// Execute one instruction.
///
/// Without step-over, a call leaves the callee frame current. With
/// step-over, a call under the pc is run to completion: a temporary
/// breakpoint goes on the instruction after the call and the process
/// continues until it is hit at the starting depth.
#[derive(Debug)]
pub struct StepInstructionPlan {
    step_over: bool,
    start_pc: Addr,
    start_depth: usize,
    return_site: Option<BreakpointId>,
    complete: bool,
}

impl StepInstructionPlan {
    /// A single-instruction plan, stepping over calls when `step_over`.
    pub fn new(step_over: bool) -> Self {
        Self { step_over, start_pc: Addr(0), start_depth: 0, return_site: None, complete: false }
    }

    /// Whether this plan steps over calls.
    pub fn steps_over(&self) -> bool {
        self.step_over
    }

    fn clear_breakpoint(&mut self, cx: &mut PlanContext<'_>) -> eyre::Result<()> {
        if let Some(site) = self.return_site.take() {
            cx.remove_breakpoint(site)?;
        }
        Ok(())
    }
}

impl ThreadPlan for StepInstructionPlan {
    fn kind(&self) -> PlanKind {
        if self.step_over {
            PlanKind::StepInstructionOver
        } else {
            PlanKind::StepInstruction
        }
    }

    fn name(&self) -> String {
        if self.step_over { "step-instruction-over" } else { "step-instruction" }.to_string()
    }

    fn did_push(&mut self, cx: &mut PlanContext<'_>) -> eyre::Result<()> {
        let frame = cx.current_frame()?;
        self.start_pc = frame.pc;
        self.start_depth = frame.depth;
        if self.step_over {
            let (insn, kind) = cx.instruction_at(frame.pc)?;
            if kind.is_call() {
                let next = insn.next_address();
                self.return_site = Some(cx.set_breakpoint(next)?);
                debug!(call = %insn, resume_at = %next, "stepping over call");
            }
        }
        Ok(())
    }

    fn explains_stop(&mut self, cx: &mut PlanContext<'_>, event: &StopEvent) -> eyre::Result<bool> {
        if !event.is_for(cx.thread()) {
            return Ok(false);
        }
        Ok(match self.return_site {
            Some(site) => event.cause.breakpoint() == Some(site),
            None => event.cause.is_trace(),
        })
    }

    fn should_stop(&mut self, cx: &mut PlanContext<'_>, event: &StopEvent) -> eyre::Result<bool> {
        if self.complete {
            return Ok(true);
        }
        match self.return_site {
            Some(site) if event.cause.breakpoint() == Some(site) => {
                // A recursive activation can hit the same return address deeper down.
                if cx.current_frame()?.depth == self.start_depth {
                    self.complete = true;
                    self.clear_breakpoint(cx)?;
                    return Ok(true);
                }
                Ok(false)
            }
            Some(_) => Ok(false),
            None => {
                self.complete = event.cause.is_trace() || event.pc != self.start_pc;
                Ok(self.complete)
            }
        }
    }

    fn is_plan_complete(&self) -> bool {
        self.complete
    }

    fn resume_action(&self) -> ResumeAction {
        if self.return_site.is_some() {
            ResumeAction::Continue
        } else {
            ResumeAction::SingleStep
        }
    }

    fn stop_description(&self, _cx: &PlanContext<'_>) -> String {
        if self.step_over { "Instruction step over" } else { "Instruction step into" }.to_string()
    }

    fn will_pop(&mut self, cx: &mut PlanContext<'_>) -> eyre::Result<()> {
        self.clear_breakpoint(cx)
    }
}
