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

use stepper_common::StopEvent;

use super::{PlanContext, PlanKind, ResumeAction, ThreadPlan};

/// The implicit plan at the bottom of every thread's stack.
///
/// It lets the thread run freely, never completes and explains nothing, so
/// any stop that reaches it is surfaced to the user unchanged.
#[derive(Debug, Default)]
pub struct BasePlan;

impl ThreadPlan for BasePlan {
    fn kind(&self) -> PlanKind {
        PlanKind::Base
    }

    fn name(&self) -> String {
        "base".to_string()
    }

    fn explains_stop(&mut self, _cx: &mut PlanContext<'_>, _event: &StopEvent) -> eyre::Result<bool> {
        Ok(false)
    }

    fn should_stop(&mut self, _cx: &mut PlanContext<'_>, _event: &StopEvent) -> eyre::Result<bool> {
        Ok(true)
    }

    fn is_plan_complete(&self) -> bool {
        false
    }

    fn should_stop_others(&self) -> bool {
        false
    }

    fn resume_action(&self) -> ResumeAction {
        ResumeAction::Continue
    }

    fn stop_description(&self, _cx: &PlanContext<'_>) -> String {
        String::new()
    }
}
