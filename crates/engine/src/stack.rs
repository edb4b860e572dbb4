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

//! Per-thread plan stacks.
//!
//! The bottom entry of every stack is a [`BasePlan`] that is never popped.
//! Entries above it are tagged with the id of the plan that queued them, so
//! a finished child can report back to its owner.

use std::fmt;

use serde::Serialize;
use stepper_common::{InstructionClassifier, StopEvent, ThreadId};

use crate::{
    plan::ContextEffects, BasePlan, ChildOutcome, Inferior, PlanContext, PlanId, PlanIds,
    PlanKind, ThreadPlan,
};

/// One plan on a stack, with its ownership bookkeeping.
pub struct PlanEntry {
    id: PlanId,
    owner: Option<PlanId>,
    plan: Box<dyn ThreadPlan>,
    children: Vec<ChildOutcome>,
}

impl PlanEntry {
    pub(crate) fn new(id: PlanId, owner: Option<PlanId>, plan: Box<dyn ThreadPlan>) -> Self {
        Self { id, owner, plan, children: Vec::new() }
    }

    /// The plan's id.
    pub fn id(&self) -> PlanId {
        self.id
    }

    /// The plan that queued this one, if any.
    pub fn owner(&self) -> Option<PlanId> {
        self.owner
    }

    /// The plan itself.
    pub fn plan(&self) -> &dyn ThreadPlan {
        self.plan.as_ref()
    }

    /// Outcomes of children that already left the stack.
    pub fn children(&self) -> &[ChildOutcome] {
        &self.children
    }
}

impl fmt::Debug for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanEntry")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("name", &self.plan.name())
            .field("complete", &self.plan.is_plan_complete())
            .finish()
    }
}

/// Read-only snapshot of a stack entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// The plan's id.
    pub id: PlanId,
    /// Its owner.
    pub owner: Option<PlanId>,
    /// Its name.
    pub name: String,
    /// Its variant.
    pub kind: PlanKind,
    /// Whether it has reached its goal.
    pub complete: bool,
}

/// Everything the protocol call needs besides the stack itself.
pub(crate) struct CallEnv<'a> {
    pub(crate) thread: ThreadId,
    pub(crate) stop_others: bool,
    pub(crate) inferior: &'a mut dyn Inferior,
    pub(crate) classifier: &'a dyn InstructionClassifier,
}

/// Ordered plans of one thread, bottom first.
#[derive(Debug)]
pub struct PlanStack {
    entries: Vec<PlanEntry>,
    ids: PlanIds,
}

impl Default for PlanStack {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanStack {
    /// A stack holding only the base plan.
    pub fn new() -> Self {
        let mut ids = PlanIds::default();
        let base = PlanEntry::new(ids.allocate(), None, Box::new(BasePlan));
        Self { entries: vec![base], ids }
    }

    /// Number of entries, base plan included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: the base plan cannot be removed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether only the base plan is left.
    pub fn is_idle(&self) -> bool {
        self.entries.len() == 1
    }

    /// The most recently pushed entry.
    pub fn top(&self) -> &PlanEntry {
        // The base entry is never popped.
        &self.entries[self.entries.len() - 1]
    }

    /// Index of the top entry.
    pub fn top_index(&self) -> usize {
        self.entries.len() - 1
    }

    /// Entry at `index`, bottom = 0.
    pub fn get(&self, index: usize) -> Option<&PlanEntry> {
        self.entries.get(index)
    }

    /// Position of the plan with `id`.
    pub fn position(&self, id: PlanId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    /// Entries above the base plan, bottom first.
    pub fn summaries(&self) -> Vec<PlanSummary> {
        self.entries
            .iter()
            .skip(1)
            .map(|entry| PlanSummary {
                id: entry.id,
                owner: entry.owner,
                name: entry.plan.name(),
                kind: entry.plan.kind(),
                complete: entry.plan.is_plan_complete(),
            })
            .collect()
    }

    pub(crate) fn allocate_id(&mut self) -> PlanId {
        self.ids.allocate()
    }

    pub(crate) fn push(&mut self, entry: PlanEntry) {
        self.entries.push(entry);
    }

    /// Remove the top entry; the base entry is never returned.
    pub(crate) fn pop(&mut self) -> Option<PlanEntry> {
        if self.is_idle() {
            return None;
        }
        self.entries.pop()
    }

    /// Take out the entry at `index`; the base entry stays.
    pub(crate) fn remove(&mut self, index: usize) -> Option<PlanEntry> {
        if index == 0 || index >= self.entries.len() {
            return None;
        }
        Some(self.entries.remove(index))
    }

    /// Record a finished child on its owner, if the owner is still stacked.
    pub(crate) fn record_outcome(&mut self, owner: Option<PlanId>, outcome: ChildOutcome) {
        if let Some(entry) = owner.and_then(|id| self.entries.iter_mut().find(|e| e.id == id)) {
            entry.children.push(outcome);
        }
    }

    /// Run one protocol call on the entry at `index`.
    pub(crate) fn call<R>(
        &mut self,
        index: usize,
        env: &mut CallEnv<'_>,
        f: impl FnOnce(&mut dyn ThreadPlan, &mut PlanContext<'_>) -> R,
    ) -> (R, ContextEffects) {
        let Self { entries, ids } = self;
        let entry = &mut entries[index];
        let mut cx = PlanContext::new(
            env.thread,
            entry.id,
            env.stop_others,
            &mut *env.inferior,
            env.classifier,
            &entry.children,
            ids,
        );
        let result = f(entry.plan.as_mut(), &mut cx);
        (result, cx.into_effects())
    }

    /// Run a protocol call on behalf of a plan that is not stacked yet.
    pub(crate) fn call_detached<R>(
        &mut self,
        id: PlanId,
        env: &mut CallEnv<'_>,
        f: impl FnOnce(&mut PlanContext<'_>) -> R,
    ) -> (R, ContextEffects) {
        let mut cx = PlanContext::new(
            env.thread,
            id,
            env.stop_others,
            &mut *env.inferior,
            env.classifier,
            &[],
            &mut self.ids,
        );
        let result = f(&mut cx);
        (result, cx.into_effects())
    }
}

/// What the engine remembers about a thread between steps.
#[derive(Debug, Default)]
pub struct ThreadState {
    /// The thread's plan stack.
    pub stack: PlanStack,
    /// Description attached by the most recent step.
    pub stop_description: Option<String>,
    /// The stop event that ended the most recent step.
    pub last_event: Option<StopEvent>,
}
