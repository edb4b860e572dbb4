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

use eyre::bail;
use stepper_common::{Addr, BreakpointId, StopEvent};
use tracing::debug;

use super::{PlanContext, PlanKind, ResumeAction, ThreadPlan};

/// Run until the current frame returns to its caller.
///
/// On push an internal breakpoint, restricted to the stepping thread, is
/// placed at the caller's resume address. The plan completes when that
/// breakpoint is hit with the call depth below the starting depth, so a
/// recursive activation returning through the same address keeps it running.
#[derive(Debug, Default)]
pub struct StepOutPlan {
    function: String,
    start_depth: usize,
    return_address: Option<Addr>,
    site: Option<BreakpointId>,
    complete: bool,
}

impl StepOutPlan {
    /// A step-out plan; the frame is captured when it is pushed.
    pub fn new() -> Self {
        Self::default()
    }

    /// The function being stepped out of.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Where the caller resumes.
    pub fn return_address(&self) -> Option<Addr> {
        self.return_address
    }

    fn clear_breakpoint(&mut self, cx: &mut PlanContext<'_>) -> eyre::Result<()> {
        if let Some(site) = self.site.take() {
            cx.remove_breakpoint(site)?;
        }
        Ok(())
    }
}

impl ThreadPlan for StepOutPlan {
    fn kind(&self) -> PlanKind {
        PlanKind::StepOut
    }

    fn name(&self) -> String {
        "step-out".to_string()
    }

    fn did_push(&mut self, cx: &mut PlanContext<'_>) -> eyre::Result<()> {
        let frames = cx.frames()?;
        let Some(current) = frames.first() else {
            bail!("thread {} has no frames", cx.thread());
        };
        let Some(caller) = frames.get(1) else {
            bail!("cannot step out of '{}': it is the outermost frame", current.function);
        };

        self.function = current.function.clone();
        self.start_depth = current.depth;
        self.return_address = Some(caller.pc);
        self.site = Some(cx.set_breakpoint(caller.pc)?);
        debug!(
            function = %self.function,
            depth = self.start_depth,
            return_address = %caller.pc,
            "step-out armed"
        );
        Ok(())
    }

    fn explains_stop(&mut self, cx: &mut PlanContext<'_>, event: &StopEvent) -> eyre::Result<bool> {
        Ok(event.is_for(cx.thread()) && self.site.is_some() && event.cause.breakpoint() == self.site)
    }

    fn should_stop(&mut self, cx: &mut PlanContext<'_>, _event: &StopEvent) -> eyre::Result<bool> {
        if self.complete {
            return Ok(true);
        }
        let frame = cx.current_frame()?;
        if frame.depth < self.start_depth {
            self.complete = true;
            self.clear_breakpoint(cx)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn is_plan_complete(&self) -> bool {
        self.complete
    }

    fn resume_action(&self) -> ResumeAction {
        ResumeAction::Continue
    }

    fn stop_description(&self, _cx: &PlanContext<'_>) -> String {
        format!("Stepping out from {}", self.function)
    }

    fn will_pop(&mut self, cx: &mut PlanContext<'_>) -> eyre::Result<()> {
        self.clear_breakpoint(cx)
    }
}
