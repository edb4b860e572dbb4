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

//! The `Steps` library of scripted plans.
//!
//! Most of these plans do nothing but delegate to a single child plan queued
//! at construction and finish once that child finishes, which makes them a
//! good exercise of the parent/child machinery.

use std::sync::Arc;

use dashmap::DashMap;
use eyre::{eyre, WrapErr};
use stepper_common::{PlanArgs, StopEvent, Value};
use tracing::debug;

use super::{plan_factory, PlanRegistry};
use crate::{ChildHandle, PlanContext, ScriptedPlan};

/// Namespace the library is registered under.
pub const STEPS_NAMESPACE: &str = "Steps";

/// Caller-owned record of the stop-others value each
/// `Steps.StepReportsStopOthers` plan observed, keyed by its `token`
/// argument.
#[derive(Debug, Clone, Default)]
pub struct StopOthersLedger(Arc<DashMap<String, bool>>);

impl StopOthersLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `stop_others` under `token`, replacing any earlier entry.
    pub fn record(&self, token: &str, stop_others: bool) {
        self.0.insert(token.to_string(), stop_others);
    }

    /// The value recorded under `token`.
    pub fn get(&self, token: &str) -> Option<bool> {
        self.0.get(token).map(|entry| *entry)
    }

    /// Every recorded token and its value, sorted by token.
    pub fn entries(&self) -> Vec<(String, bool)> {
        let mut entries: Vec<_> =
            self.0.iter().map(|entry| (entry.key().clone(), *entry.value())).collect();
        entries.sort();
        entries
    }

    /// Forget every entry.
    pub fn clear(&self) {
        self.0.clear();
    }

    /// Number of recorded tokens.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Load the `Steps` namespace into `registry`.
pub fn register_steps(registry: &mut PlanRegistry, ledger: &StopOthersLedger) {
    registry.insert(STEPS_NAMESPACE, "StepOut", plan_factory(step_out));
    registry.insert(STEPS_NAMESPACE, "StepScripted", plan_factory(step_scripted));
    registry.insert(STEPS_NAMESPACE, "StepSingleInstruction", plan_factory(step_instruction));
    registry.insert(
        STEPS_NAMESPACE,
        "StepSingleInstructionWithStepOver",
        plan_factory(step_instruction_over),
    );
    registry.insert(STEPS_NAMESPACE, "StepUntil", plan_factory(StepUntil::build));

    let ledger = ledger.clone();
    registry.insert(
        STEPS_NAMESPACE,
        "StepReportsStopOthers",
        plan_factory(move |_cx, args| StepReportsStopOthers::build(args, ledger.clone())),
    );
}

fn step_out(cx: &mut PlanContext<'_>, _args: PlanArgs) -> eyre::Result<Box<dyn ScriptedPlan>> {
    Ok(Box::new(StepWithChild::new(cx.queue_step_out())))
}

fn step_scripted(cx: &mut PlanContext<'_>, _args: PlanArgs) -> eyre::Result<Box<dyn ScriptedPlan>> {
    let child = cx.queue_scripted(&format!("{STEPS_NAMESPACE}.StepOut"), None);
    Ok(Box::new(StepWithChild::new(child)))
}

fn step_instruction(
    cx: &mut PlanContext<'_>,
    _args: PlanArgs,
) -> eyre::Result<Box<dyn ScriptedPlan>> {
    Ok(Box::new(StepWithChild::new(cx.queue_step_instruction(false))))
}

fn step_instruction_over(
    cx: &mut PlanContext<'_>,
    _args: PlanArgs,
) -> eyre::Result<Box<dyn ScriptedPlan>> {
    Ok(Box::new(StepWithChild::new(cx.queue_step_instruction(true))))
}

/// Finishes when its one child finishes, and reports the child's description.
#[derive(Debug)]
struct StepWithChild {
    child: ChildHandle,
    complete: bool,
}

impl StepWithChild {
    fn new(child: ChildHandle) -> Self {
        Self { child, complete: false }
    }
}

impl ScriptedPlan for StepWithChild {
    fn should_stop(&mut self, cx: &mut PlanContext<'_>, _event: &StopEvent) -> eyre::Result<bool> {
        if !cx.is_child_complete(self.child) {
            return Ok(false);
        }
        self.complete = true;
        Ok(true)
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn explains_stop(
        &mut self,
        _cx: &mut PlanContext<'_>,
        _event: &StopEvent,
    ) -> Option<eyre::Result<bool>> {
        Some(Ok(false))
    }

    fn should_step(&self) -> Option<bool> {
        Some(false)
    }

    fn stop_description(&self, cx: &PlanContext<'_>) -> Option<String> {
        cx.child_outcome(self.child)
            .filter(|outcome| outcome.complete)
            .map(|outcome| outcome.description.clone())
    }
}

/// Steps over source lines until a local variable changes.
#[derive(Debug)]
struct StepUntil {
    variable: String,
    baseline: Value,
    depth: usize,
    child: ChildHandle,
    complete: bool,
}

impl StepUntil {
    fn build(cx: &mut PlanContext<'_>, args: PlanArgs) -> eyre::Result<Box<dyn ScriptedPlan>> {
        let variable = args
            .get_str("variable_name")
            .ok_or_else(|| eyre!("missing required argument 'variable_name'"))?
            .to_string();
        let frame = cx.current_frame()?;
        let baseline = cx
            .read_variable(0, &variable)
            .wrap_err_with(|| format!("cannot watch variable '{variable}'"))?;
        debug!(variable, %baseline, function = %frame.function, "watching variable");

        let child = queue_line_step(cx)?;
        Ok(Box::new(Self { variable, baseline, depth: frame.depth, child, complete: false }))
    }
}

fn queue_line_step(cx: &mut PlanContext<'_>) -> eyre::Result<ChildHandle> {
    let frame = cx.current_frame()?;
    let entry = cx
        .line_entry(frame.pc)
        .ok_or_else(|| eyre!("no line information for {} in '{}'", frame.pc, frame.function))?;
    Ok(cx.queue_step_over_range(entry.range))
}

impl ScriptedPlan for StepUntil {
    fn should_stop(&mut self, cx: &mut PlanContext<'_>, _event: &StopEvent) -> eyre::Result<bool> {
        if !cx.is_child_complete(self.child) {
            return Ok(false);
        }

        // The watched frame is gone.
        if cx.current_frame()?.depth < self.depth {
            self.complete = true;
            return Ok(true);
        }

        let value = cx.read_variable(0, &self.variable)?;
        if value.changed_from(&self.baseline) {
            debug!(variable = %self.variable, from = %self.baseline, to = %value, "variable changed");
            self.complete = true;
            return Ok(true);
        }

        self.child = queue_line_step(cx)?;
        Ok(false)
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn explains_stop(
        &mut self,
        _cx: &mut PlanContext<'_>,
        _event: &StopEvent,
    ) -> Option<eyre::Result<bool>> {
        Some(Ok(false))
    }

    fn should_step(&self) -> Option<bool> {
        Some(false)
    }

    fn stop_description(&self, _cx: &PlanContext<'_>) -> Option<String> {
        Some(format!("Stepped until {} changed", self.variable))
    }
}

/// Records the resolved stop-others value in a ledger and stops.
#[derive(Debug)]
struct StepReportsStopOthers {
    token: String,
    ledger: StopOthersLedger,
    complete: bool,
}

impl StepReportsStopOthers {
    fn build(args: PlanArgs, ledger: StopOthersLedger) -> eyre::Result<Box<dyn ScriptedPlan>> {
        let token = args
            .get_str("token")
            .ok_or_else(|| eyre!("missing required argument 'token'"))?
            .to_string();
        Ok(Box::new(Self { token, ledger, complete: false }))
    }
}

impl ScriptedPlan for StepReportsStopOthers {
    fn should_stop(&mut self, cx: &mut PlanContext<'_>, _event: &StopEvent) -> eyre::Result<bool> {
        self.ledger.record(&self.token, cx.stop_others());
        self.complete = true;
        Ok(true)
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn should_step(&self) -> Option<bool> {
        Some(true)
    }
}
