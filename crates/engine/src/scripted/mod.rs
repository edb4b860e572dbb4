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

//! Scripted thread plans.
//!
//! A scripted plan is an object produced by a factory registered in the
//! [`PlanRegistry`] under `"<namespace>.<ClassName>"`. Only
//! [`ScriptedPlan::should_stop`] and [`ScriptedPlan::is_complete`] are
//! required; every other capability is optional and the
//! [`ScriptedPlanAdapter`] fills in the default when an implementation
//! returns `None`.

mod registry;
mod steps;

pub use registry::*;
pub use steps::*;

use stepper_common::StopEvent;

use crate::{PlanContext, PlanKind, ResumeAction, ThreadPlan};

/// Externally supplied stepping logic.
pub trait ScriptedPlan: Send {
    /// Whether the plan is willing to stop the thread at this event.
    fn should_stop(&mut self, cx: &mut PlanContext<'_>, event: &StopEvent) -> eyre::Result<bool>;

    /// Whether the plan has reached its goal.
    fn is_complete(&self) -> bool;

    /// Whether the plan accounts for the stop. Defaults to `false`.
    fn explains_stop(
        &mut self,
        _cx: &mut PlanContext<'_>,
        _event: &StopEvent,
    ) -> Option<eyre::Result<bool>> {
        None
    }

    /// Preference for suspending other threads. Defaults to `true`.
    fn should_stop_others(&self) -> Option<bool> {
        None
    }

    /// Whether to single-step while this plan is on top. Defaults to `true`.
    fn should_step(&self) -> Option<bool> {
        None
    }

    /// Stop description. Defaults to the empty string.
    fn stop_description(&self, _cx: &PlanContext<'_>) -> Option<String> {
        None
    }
}

/// Bridges a [`ScriptedPlan`] onto the plan stack.
pub struct ScriptedPlanAdapter {
    name: String,
    inner: Box<dyn ScriptedPlan>,
}

impl ScriptedPlanAdapter {
    /// Wrap `inner`, registered as `name`.
    pub fn new(name: impl Into<String>, inner: Box<dyn ScriptedPlan>) -> Self {
        Self { name: name.into(), inner }
    }
}

impl std::fmt::Debug for ScriptedPlanAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedPlanAdapter").field("name", &self.name).finish_non_exhaustive()
    }
}

impl ThreadPlan for ScriptedPlanAdapter {
    fn kind(&self) -> PlanKind {
        PlanKind::Scripted
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn explains_stop(&mut self, cx: &mut PlanContext<'_>, event: &StopEvent) -> eyre::Result<bool> {
        self.inner.explains_stop(cx, event).unwrap_or(Ok(false))
    }

    fn should_stop(&mut self, cx: &mut PlanContext<'_>, event: &StopEvent) -> eyre::Result<bool> {
        self.inner.should_stop(cx, event)
    }

    fn is_plan_complete(&self) -> bool {
        self.inner.is_complete()
    }

    fn should_stop_others(&self) -> bool {
        self.inner.should_stop_others().unwrap_or(true)
    }

    fn resume_action(&self) -> ResumeAction {
        if self.inner.should_step().unwrap_or(true) {
            ResumeAction::SingleStep
        } else {
            ResumeAction::Continue
        }
    }

    fn stop_description(&self, cx: &PlanContext<'_>) -> String {
        self.inner.stop_description(cx).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal {
        done: bool,
    }

    impl ScriptedPlan for Minimal {
        fn should_stop(&mut self, _cx: &mut PlanContext<'_>, _event: &StopEvent) -> eyre::Result<bool> {
            self.done = true;
            Ok(true)
        }

        fn is_complete(&self) -> bool {
            self.done
        }
    }

    struct Opinionated;

    impl ScriptedPlan for Opinionated {
        fn should_stop(&mut self, _cx: &mut PlanContext<'_>, _event: &StopEvent) -> eyre::Result<bool> {
            Ok(false)
        }

        fn is_complete(&self) -> bool {
            false
        }

        fn should_stop_others(&self) -> Option<bool> {
            Some(false)
        }

        fn should_step(&self) -> Option<bool> {
            Some(false)
        }
    }

    #[test]
    fn test_adapter_defaults() {
        let adapter = ScriptedPlanAdapter::new("Test.Minimal", Box::new(Minimal { done: false }));
        assert_eq!(adapter.kind(), PlanKind::Scripted);
        assert_eq!(adapter.name(), "Test.Minimal");
        assert!(adapter.should_stop_others());
        assert_eq!(adapter.resume_action(), ResumeAction::SingleStep);
        assert!(!adapter.is_plan_complete());
    }

    #[test]
    fn test_adapter_forwards_optional_capabilities() {
        let adapter = ScriptedPlanAdapter::new("Test.Opinionated", Box::new(Opinionated));
        assert!(!adapter.should_stop_others());
        assert_eq!(adapter.resume_action(), ResumeAction::Continue);
    }
}
