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

//! The step execution driver.
//!
//! One call to [`StepEngine::step`] walks the state machine
//!
//! ```text
//! Idle -> Resuming -> WaitingForStop -> Evaluating -> (Resuming | Complete | Aborted)
//! ```
//!
//! Construction of the requested plan happens in `Idle` and is atomic: if
//! resolving, instantiating or setting up any plan of the tree fails, every
//! plan pushed for the request is popped again, breakpoints inserted on its
//! behalf are removed and the process is never resumed.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
};

use serde::{Deserialize, Serialize};
use stepper_common::{BreakpointId, InstructionClassifier, PlanArgs, StopEvent, ThreadId};
use tracing::{debug, info, trace, warn};

use crate::{
    plan::ContextEffects,
    stack::{CallEnv, PlanEntry},
    BuiltinPlan, ChildOutcome, EngineConfig, Inferior, PlanId, PlanRegistry, PlanSpec,
    PlanSummary, ProcessControl, ResumeAction, ResumeRequest, RunMode, RunModeSource,
    ScriptedPlanAdapter, Settings, StepError, ThreadPlan, ThreadState,
};

/// A request to step one thread.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRequest {
    /// Thread to step.
    pub thread: ThreadId,
    /// Scripted plan name (`<namespace>.<ClassName>`); `None` selects `builtin`.
    pub implementation: Option<String>,
    /// Built-in variant used when no implementation is named.
    pub builtin: BuiltinPlan,
    /// Arguments for the scripted plan.
    pub arguments: Option<PlanArgs>,
    /// Push on top of the thread's pending plans instead of replacing them.
    pub child: bool,
    /// Explicit run mode.
    pub run_mode: Option<RunMode>,
}

impl StepRequest {
    /// Step `thread` with a built-in plan.
    pub fn builtin(thread: ThreadId, builtin: BuiltinPlan) -> Self {
        Self {
            thread,
            implementation: None,
            builtin,
            arguments: None,
            child: false,
            run_mode: None,
        }
    }

    /// Step `thread` with the scripted plan registered as `name`.
    pub fn scripted(thread: ThreadId, name: impl Into<String>) -> Self {
        Self { implementation: Some(name.into()), ..Self::builtin(thread, BuiltinPlan::StepOut) }
    }

    /// Attach plan arguments.
    pub fn with_arguments(mut self, arguments: PlanArgs) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// Force a run mode.
    pub fn with_run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = Some(run_mode);
        self
    }

    /// Keep the thread's pending plans and push above them.
    pub fn as_child(mut self) -> Self {
        self.child = true;
        self
    }

    fn spec(&self) -> PlanSpec {
        match &self.implementation {
            Some(name) => PlanSpec::Scripted { name: name.clone(), args: self.arguments.clone() },
            None => PlanSpec::Builtin(self.builtin),
        }
    }
}

/// Why a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// The requested plan completed
    PlanComplete,
    /// A plan asked to stop before it was complete; its plans stay pending
    PlanRequested,
    /// A stop no plan explains ended the step
    Aborted,
    /// A plan failed after it was pushed
    ProtocolViolation,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlanComplete => write!(f, "plan complete"),
            Self::PlanRequested => write!(f, "plan requested stop"),
            Self::Aborted => write!(f, "aborted"),
            Self::ProtocolViolation => write!(f, "plan failed"),
        }
    }
}

/// Result of one step request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// The stepped thread.
    pub thread: ThreadId,
    /// Why the step ended.
    pub reason: StopReason,
    /// Stop description attached to the thread.
    pub description: String,
    /// The stop event the step ended on.
    pub event: Option<StopEvent>,
    /// Whether other threads were suspended.
    pub stop_others: bool,
    /// What decided `stop_others`.
    pub run_mode_source: RunModeSource,
    /// Stop events processed during the step.
    pub stops: usize,
}

impl StepOutcome {
    /// Whether the requested plan reached its goal.
    pub fn is_complete(&self) -> bool {
        self.reason == StopReason::PlanComplete
    }
}

/// States of the step state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Constructing the plan; the process has not been touched
    Idle,
    /// Handing a resume request to the process
    Resuming,
    /// Blocked until the process stops
    WaitingForStop,
    /// Consulting the plan stack about a stop
    Evaluating,
    /// The requested plan finished
    Complete,
    /// The step was interrupted
    Aborted,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Resuming => "resuming",
            Self::WaitingForStop => "waiting-for-stop",
            Self::Evaluating => "evaluating",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Drives step requests against an inferior.
pub struct StepEngine<I> {
    inferior: I,
    registry: PlanRegistry,
    config: EngineConfig,
    classifier: Box<dyn InstructionClassifier>,
    threads: HashMap<ThreadId, ThreadState>,
}

impl<I> fmt::Debug for StepEngine<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepEngine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

impl<I: Inferior> StepEngine<I> {
    /// Create an engine; instructions are classified for `config.architecture`.
    pub fn new(inferior: I, registry: PlanRegistry, config: EngineConfig) -> Self {
        let classifier = Box::new(config.architecture);
        Self { inferior, registry, config, classifier, threads: HashMap::new() }
    }

    /// Replace the instruction classifier.
    pub fn with_classifier(mut self, classifier: impl InstructionClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    /// The inferior.
    pub fn inferior(&self) -> &I {
        &self.inferior
    }

    /// Mutable access to the inferior, e.g. to set user breakpoints.
    pub fn inferior_mut(&mut self) -> &mut I {
        &mut self.inferior
    }

    /// Give the inferior back.
    pub fn into_inferior(self) -> I {
        self.inferior
    }

    /// The plan registry.
    pub fn registry(&self) -> &PlanRegistry {
        &self.registry
    }

    /// Mutable access to the plan registry.
    pub fn registry_mut(&mut self) -> &mut PlanRegistry {
        &mut self.registry
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Debugger settings.
    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    /// Mutable debugger settings; changes apply from the next step request.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.config.settings
    }

    /// Stop description the last step left on `thread`.
    pub fn stop_description(&self, thread: ThreadId) -> Option<&str> {
        self.threads.get(&thread)?.stop_description.as_deref()
    }

    /// The stop event the last step of `thread` ended on.
    pub fn last_event(&self, thread: ThreadId) -> Option<&StopEvent> {
        self.threads.get(&thread)?.last_event.as_ref()
    }

    /// Plans still stacked on `thread`, bottom first, base plan excluded.
    pub fn pending_plans(&self, thread: ThreadId) -> Vec<PlanSummary> {
        self.threads.get(&thread).map(|state| state.stack.summaries()).unwrap_or_default()
    }

    /// Pop every pending plan of `thread`.
    pub fn discard_plans(&mut self, thread: ThreadId) {
        let Self { inferior, registry, classifier, threads, .. } = self;
        if let Some(state) = threads.get_mut(&thread) {
            let env = CallEnv { thread, stop_others: true, inferior, classifier: &**classifier };
            let mut session = Session { env, state, registry, sites: BTreeSet::new() };
            session.discard_down_to(1);
            session.release_leaked_sites();
        }
    }

    /// Run one step request to completion.
    pub fn step(&mut self, request: StepRequest) -> Result<StepOutcome, StepError> {
        let thread = request.thread;
        if !self.inferior.threads().contains(&thread) {
            return Err(StepError::UnknownThread(thread));
        }

        let spec = request.spec();
        let name = spec.display_name();
        let policy = crate::resolve_policy(request.run_mode, &self.config.settings);
        info!(%thread, plan = %name, child = request.child, run_mode = ?request.run_mode, "step requested");

        let Self { inferior, registry, config, classifier, threads } = self;
        let state = threads.entry(thread).or_default();
        let env = CallEnv {
            thread,
            stop_others: policy.is_none_or(|resolved| resolved.stop_others),
            inferior,
            classifier: &**classifier,
        };
        let mut session = Session { env, state, registry, sites: BTreeSet::new() };

        let pending = session.state.stack.len();
        trace!(state = %DriverState::Idle, "constructing plan");
        let root = session.construct(spec)?;
        if !request.child {
            session.discard_pending(pending);
        }

        let resolved = crate::resolve_stop_others(
            request.run_mode,
            &config.settings,
            session.root_preference(root),
        );
        session.env.stop_others = resolved.stop_others;
        debug!(stop_others = resolved.stop_others, source = ?resolved.source, "run mode resolved");

        let (reason, description, event, stops) = session.run(root, config.max_stops)?;
        session.state.stop_description = Some(description.clone());
        session.state.last_event = event.clone();

        let outcome = StepOutcome {
            thread,
            reason,
            description,
            event,
            stop_others: resolved.stop_others,
            run_mode_source: resolved.source,
            stops,
        };
        info!(%thread, reason = %outcome.reason, description = %outcome.description, stops, "step finished");
        Ok(outcome)
    }
}

enum Verdict {
    Resume,
    Stop(StopReason, String),
}

/// Borrowed view of the engine for one request on one thread.
struct Session<'a> {
    env: CallEnv<'a>,
    state: &'a mut ThreadState,
    registry: &'a PlanRegistry,
    /// Breakpoints plans inserted during this session and have not removed.
    sites: BTreeSet<BreakpointId>,
}

impl Session<'_> {
    fn track(&mut self, effects: &ContextEffects) {
        self.sites.extend(effects.inserted.iter().copied());
        for site in &effects.removed {
            self.sites.remove(site);
        }
    }

    /// Remove breakpoints whose owning plan never made it onto the stack.
    fn release_leaked_sites(&mut self) {
        for site in std::mem::take(&mut self.sites) {
            if let Err(err) = self.env.inferior.remove_breakpoint(site) {
                warn!(%site, error = %err, "failed to remove breakpoint");
            }
        }
    }

    /// Build the requested plan tree; on failure nothing of it remains.
    fn construct(&mut self, spec: PlanSpec) -> Result<PlanId, StepError> {
        let requested = spec.display_name();
        let depth = self.state.stack.len();
        let id = self.state.stack.allocate_id();

        let Err(err) = self.push_plan(id, None, spec) else {
            // The pushed plans own their breakpoints from here on.
            self.sites.clear();
            return Ok(id);
        };

        warn!(plan = %requested, error = %err, "plan construction failed, rolling back");
        self.discard_down_to(depth);
        self.release_leaked_sites();

        let names_request = matches!(
            &err,
            StepError::Resolution { name, .. } | StepError::Construction { name, .. } if *name == requested
        );
        Err(if names_request {
            err
        } else {
            StepError::Construction { name: requested, reason: err.into() }
        })
    }

    fn push_plan(&mut self, id: PlanId, owner: Option<PlanId>, spec: PlanSpec) -> Result<(), StepError> {
        let name = spec.display_name();
        let (plan, queued) = match spec {
            PlanSpec::Builtin(builtin) => (builtin.build(), Vec::new()),
            PlanSpec::Scripted { name, args } => {
                let factory = self.registry.resolve(&name)?;
                let (built, effects) = self
                    .state
                    .stack
                    .call_detached(id, &mut self.env, |cx| factory(cx, args.unwrap_or_default()));
                self.track(&effects);
                let inner =
                    built.map_err(|reason| StepError::Construction { name: name.clone(), reason })?;
                let adapter: Box<dyn ThreadPlan> = Box::new(ScriptedPlanAdapter::new(name, inner));
                (adapter, effects.queued)
            }
        };

        debug!(plan = %name, %id, ?owner, "pushing plan");
        self.state.stack.push(PlanEntry::new(id, owner, plan));
        let index = self.state.stack.top_index();
        let (result, effects) =
            self.state.stack.call(index, &mut self.env, |plan, cx| plan.did_push(cx));
        self.track(&effects);
        result.map_err(|reason| StepError::Construction { name: name.clone(), reason })?;

        for child in queued.into_iter().chain(effects.queued) {
            self.push_plan(child.id, Some(id), child.spec)?;
        }
        Ok(())
    }

    /// Stop-others preference of the requested plan.
    fn root_preference(&self, root: PlanId) -> bool {
        self.state
            .stack
            .position(root)
            .and_then(|index| self.state.stack.get(index))
            .is_none_or(|entry| entry.plan().should_stop_others())
    }

    /// Pop the top entry and report its outcome to its owner.
    fn pop_top(&mut self, complete: bool) -> Option<(PlanEntry, ChildOutcome)> {
        let index = self.state.stack.top_index();
        if index == 0 {
            return None;
        }
        let (description, _) =
            self.state.stack.call(index, &mut self.env, |plan, cx| plan.stop_description(cx));
        let (cleanup, effects) =
            self.state.stack.call(index, &mut self.env, |plan, cx| plan.will_pop(cx));
        self.track(&effects);

        let entry = self.state.stack.pop()?;
        if let Err(err) = cleanup {
            warn!(plan = %entry.plan().name(), error = %err, "plan failed to clean up");
        }
        let outcome =
            ChildOutcome { id: entry.id(), name: entry.plan().name(), complete, description };
        trace!(plan = %outcome.name, complete, "popped plan");
        self.state.stack.record_outcome(entry.owner(), outcome.clone());
        Some((entry, outcome))
    }

    /// Drop the entries between the base plan and index `above`, topmost
    /// first, leaving everything from `above` up in place.
    fn discard_pending(&mut self, above: usize) {
        for index in (1..above).rev() {
            let (cleanup, effects) =
                self.state.stack.call(index, &mut self.env, |plan, cx| plan.will_pop(cx));
            self.track(&effects);
            let Some(entry) = self.state.stack.remove(index) else {
                continue;
            };
            if let Err(err) = cleanup {
                warn!(plan = %entry.plan().name(), error = %err, "plan failed to clean up");
            }
            trace!(plan = %entry.plan().name(), "discarded pending plan");
        }
    }

    /// Pop entries, marking them incomplete, until `len` remain.
    fn discard_down_to(&mut self, len: usize) {
        while self.state.stack.len() > len.max(1) {
            if self.pop_top(false).is_none() {
                break;
            }
        }
    }

    fn run(
        &mut self,
        root: PlanId,
        max_stops: Option<usize>,
    ) -> Result<(StopReason, String, Option<StopEvent>, usize), StepError> {
        let thread = self.env.thread;
        let mut stops = 0;
        loop {
            let action = self.state.stack.top().plan().resume_action();
            let single_step = action == ResumeAction::SingleStep;
            let suspended = if self.env.stop_others {
                self.env.inferior.threads().into_iter().filter(|t| *t != thread).collect()
            } else {
                BTreeSet::new()
            };
            let request = ResumeRequest { thread, suspended, single_step };

            trace!(state = %DriverState::Resuming, ?action, "resuming");
            if let Err(err) = self.env.inferior.resume(&request) {
                self.discard_down_to(1);
                return Err(StepError::Process(err));
            }

            trace!(state = %DriverState::WaitingForStop, "waiting for stop");
            let event = match self.env.inferior.wait_for_stop() {
                Ok(event) => event,
                Err(err) => {
                    self.discard_down_to(1);
                    return Err(StepError::Process(err));
                }
            };
            stops += 1;

            trace!(state = %DriverState::Evaluating, %event, "evaluating stop");
            if let Verdict::Stop(reason, description) = self.evaluate(&event, single_step, root) {
                let state = match reason {
                    StopReason::Aborted | StopReason::ProtocolViolation => DriverState::Aborted,
                    StopReason::PlanComplete | StopReason::PlanRequested => DriverState::Complete,
                };
                trace!(%state, %reason, "step ended");
                return Ok((reason, description, Some(event), stops));
            }

            if max_stops.is_some_and(|limit| stops >= limit) {
                warn!(stops, "stop limit reached, abandoning step");
                self.discard_down_to(1);
                self.release_leaked_sites();
                let description = format!("step abandoned after {stops} stops");
                return Ok((StopReason::Aborted, description, Some(event), stops));
            }
        }
    }

    fn abort(&mut self, event: &StopEvent) -> Verdict {
        debug!(%event, "stop not explained by any plan");
        self.discard_down_to(1);
        self.release_leaked_sites();
        let description = if event.is_for(self.env.thread) {
            event.cause.to_string()
        } else {
            format!("thread {} stopped: {}", event.thread, event.cause)
        };
        Verdict::Stop(StopReason::Aborted, description)
    }

    fn violation(&mut self, index: usize, root_index: usize, err: eyre::Report) -> Verdict {
        let name = self.state.stack.get(index).map(|e| e.plan().name()).unwrap_or_default();
        warn!(plan = %name, error = %err, "plan failed after it was pushed");
        self.discard_down_to(root_index);
        self.release_leaked_sites();
        Verdict::Stop(StopReason::ProtocolViolation, format!("plan '{name}' failed: {err:#}"))
    }

    fn evaluate(&mut self, event: &StopEvent, single_step: bool, root: PlanId) -> Verdict {
        if event.cause.is_exit() || !event.is_for(self.env.thread) {
            return self.abort(event);
        }
        let Some(root_index) = self.state.stack.position(root) else {
            return self.abort(event);
        };

        // A trace after a single-step belongs to the plan that asked for it.
        let top = self.state.stack.top_index();
        let explainer = if single_step && event.cause.is_trace() {
            Some(top)
        } else {
            let mut found = None;
            for index in (root_index..=top).rev() {
                let (explains, effects) = self
                    .state
                    .stack
                    .call(index, &mut self.env, |plan, cx| plan.explains_stop(cx, event));
                self.track(&effects);
                match explains {
                    Ok(true) => {
                        found = Some(index);
                        break;
                    }
                    Ok(false) => {}
                    Err(err) => return self.violation(index, root_index, err),
                }
            }
            found
        };
        let Some(explainer) = explainer else {
            return self.abort(event);
        };
        self.discard_down_to(explainer + 1);

        loop {
            let index = self.state.stack.top_index();
            let id = self.state.stack.top().id();
            let (should_stop, effects) =
                self.state.stack.call(index, &mut self.env, |plan, cx| plan.should_stop(cx, event));
            self.track(&effects);
            let should_stop = match should_stop {
                Ok(should_stop) => should_stop,
                Err(err) => return self.violation(index, root_index, err),
            };
            debug!(plan = %self.state.stack.top().plan().name(), should_stop, "plan consulted");

            if !effects.queued.is_empty() {
                for child in effects.queued {
                    if let Err(err) = self.push_plan(child.id, Some(id), child.spec) {
                        return self.violation(index, root_index, err.into());
                    }
                }
                return Verdict::Resume;
            }

            if self.state.stack.top().plan().is_plan_complete() {
                let Some((entry, outcome)) = self.pop_top(true) else {
                    return self.abort(event);
                };
                if outcome.id == root || self.state.stack.is_idle() {
                    let description = if outcome.description.is_empty() {
                        nearest_child_description(entry.children())
                    } else {
                        outcome.description
                    };
                    return Verdict::Stop(StopReason::PlanComplete, description);
                }
                continue;
            }

            if should_stop {
                let (description, _) =
                    self.state.stack.call(index, &mut self.env, |plan, cx| plan.stop_description(cx));
                return Verdict::Stop(StopReason::PlanRequested, description);
            }
            return Verdict::Resume;
        }
    }
}

fn nearest_child_description(children: &[ChildOutcome]) -> String {
    children
        .iter()
        .rev()
        .find(|child| child.complete && !child.description.is_empty())
        .map(|child| child.description.clone())
        .unwrap_or_default()
}
