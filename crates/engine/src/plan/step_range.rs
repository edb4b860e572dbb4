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

use eyre::eyre;
use stepper_common::{AddrRange, StopEvent};
use tracing::{debug, trace};

use super::{PlanContext, PlanKind, ResumeAction, ThreadPlan};

/// Single-step until the pc leaves an address range of the starting frame.
///
/// Stepping into a callee queues a [`super::StepOutPlan`] child to get back
/// to the range before stepping resumes.
#[derive(Debug)]
pub struct StepOverRangePlan {
    requested: Option<AddrRange>,
    range: Option<AddrRange>,
    function: String,
    start_depth: usize,
    complete: bool,
}

impl StepOverRangePlan {
    /// Step over `range`, or over the current source line when `None`.
    pub fn new(range: Option<AddrRange>) -> Self {
        Self { requested: range, range: None, function: String::new(), start_depth: 0, complete: false }
    }

    /// The range being stepped over, once resolved.
    pub fn range(&self) -> Option<AddrRange> {
        self.range
    }
}

impl ThreadPlan for StepOverRangePlan {
    fn kind(&self) -> PlanKind {
        PlanKind::StepOverRange
    }

    fn name(&self) -> String {
        "step-over-range".to_string()
    }

    fn did_push(&mut self, cx: &mut PlanContext<'_>) -> eyre::Result<()> {
        let frame = cx.current_frame()?;
        let range = match self.requested {
            Some(range) => range,
            None => cx
                .line_entry(frame.pc)
                .map(|entry| entry.range)
                .ok_or_else(|| eyre!("no line information for {} in '{}'", frame.pc, frame.function))?,
        };
        debug!(%range, function = %frame.function, depth = frame.depth, "stepping over range");
        self.range = Some(range);
        self.function = frame.function;
        self.start_depth = frame.depth;
        Ok(())
    }

    fn explains_stop(&mut self, cx: &mut PlanContext<'_>, event: &StopEvent) -> eyre::Result<bool> {
        Ok(event.is_for(cx.thread()) && event.cause.is_trace())
    }

    fn should_stop(&mut self, cx: &mut PlanContext<'_>, _event: &StopEvent) -> eyre::Result<bool> {
        if self.complete {
            return Ok(true);
        }
        let frame = cx.current_frame()?;
        if frame.depth > self.start_depth {
            trace!(function = %frame.function, "stepped into a callee, stepping back out");
            cx.queue_step_out();
            return Ok(false);
        }

        let left_range = self.range.is_none_or(|range| !range.contains(frame.pc));
        if frame.depth < self.start_depth || left_range {
            self.complete = true;
            return Ok(true);
        }
        Ok(false)
    }

    fn is_plan_complete(&self) -> bool {
        self.complete
    }

    fn resume_action(&self) -> ResumeAction {
        ResumeAction::SingleStep
    }

    fn stop_description(&self, _cx: &PlanContext<'_>) -> String {
        match self.range {
            Some(range) => format!("Stepping over {range} in {}", self.function),
            None => "Stepping over range".to_string(),
        }
    }
}
