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

use std::{collections::BTreeMap, fmt, sync::Arc};

use itertools::Itertools;
use stepper_common::PlanArgs;
use tracing::debug;

use super::{register_steps, StopOthersLedger};
use crate::{PlanContext, ScriptedPlan, StepError};

/// Builds a scripted plan for one step request.
///
/// The factory runs before the plan is pushed, with a context for the
/// stepping thread. It may read frames and variables, set breakpoints and
/// queue children; any error aborts the step request before the process is
/// resumed.
pub type PlanFactory = Arc<
    dyn Fn(&mut PlanContext<'_>, PlanArgs) -> eyre::Result<Box<dyn ScriptedPlan>> + Send + Sync,
>;

/// Box a closure or function as a [`PlanFactory`].
pub fn plan_factory<F>(factory: F) -> PlanFactory
where
    F: Fn(&mut PlanContext<'_>, PlanArgs) -> eyre::Result<Box<dyn ScriptedPlan>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(factory)
}

/// A `<namespace>.<ClassName>` plan name split in two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualifiedName<'a> {
    /// The part before the last dot.
    pub namespace: &'a str,
    /// The part after the last dot.
    pub class: &'a str,
}

impl<'a> QualifiedName<'a> {
    /// Split and validate `name`.
    pub fn parse(name: &'a str) -> Result<Self, StepError> {
        let invalid = |reason: &str| StepError::Resolution {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let (namespace, class) = name
            .rsplit_once('.')
            .ok_or_else(|| invalid("expected a name of the form <namespace>.<ClassName>"))?;
        if namespace.is_empty() || class.is_empty() {
            return Err(invalid("namespace and class name must both be non-empty"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(invalid("plan names cannot contain whitespace"));
        }
        Ok(Self { namespace, class })
    }
}

impl fmt::Display for QualifiedName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.class)
    }
}

/// Loaded namespaces of scripted plan factories.
#[derive(Clone, Default)]
pub struct PlanRegistry {
    namespaces: BTreeMap<String, BTreeMap<String, PlanFactory>>,
}

impl fmt::Debug for PlanRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanRegistry").field("plans", &self.names()).finish()
    }
}

impl PlanRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `Steps` library loaded.
    pub fn with_steps(ledger: &StopOthersLedger) -> Self {
        let mut registry = Self::new();
        register_steps(&mut registry, ledger);
        registry
    }

    /// Register `factory` under `name`, replacing any previous factory.
    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<(), StepError>
    where
        F: Fn(&mut PlanContext<'_>, PlanArgs) -> eyre::Result<Box<dyn ScriptedPlan>>
            + Send
            + Sync
            + 'static,
    {
        let qualified = QualifiedName::parse(name)?;
        self.insert(qualified.namespace, qualified.class, plan_factory(factory));
        Ok(())
    }

    pub(crate) fn insert(&mut self, namespace: &str, class: &str, factory: PlanFactory) {
        let replaced = self
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(class.to_string(), factory)
            .is_some();
        debug!(namespace, class, replaced, "registered scripted plan");
    }

    /// Look up the factory for `name`.
    pub fn resolve(&self, name: &str) -> Result<PlanFactory, StepError> {
        let qualified = QualifiedName::parse(name)?;
        let Some(classes) = self.namespaces.get(qualified.namespace) else {
            return Err(StepError::Resolution {
                name: name.to_string(),
                reason: format!("no namespace named '{}' is loaded", qualified.namespace),
            });
        };
        classes.get(qualified.class).cloned().ok_or_else(|| StepError::Resolution {
            name: name.to_string(),
            reason: format!(
                "namespace '{}' has no plan class '{}' (available: {})",
                qualified.namespace,
                qualified.class,
                classes.keys().join(", ")
            ),
        })
    }

    /// Whether `name` resolves.
    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    /// Every registered qualified name, sorted.
    pub fn names(&self) -> Vec<String> {
        self.namespaces
            .iter()
            .flat_map(|(namespace, classes)| {
                classes.keys().map(move |class| format!("{namespace}.{class}"))
            })
            .collect()
    }

    /// Drop a whole namespace; returns whether it was loaded.
    pub fn unload(&mut self, namespace: &str) -> bool {
        self.namespaces.remove(namespace).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qualified_names() {
        let q = QualifiedName::parse("Steps.StepOut").unwrap();
        assert_eq!(q.namespace, "Steps");
        assert_eq!(q.class, "StepOut");
        assert_eq!(q.to_string(), "Steps.StepOut");

        let nested = QualifiedName::parse("pkg.mod.Plan").unwrap();
        assert_eq!(nested.namespace, "pkg.mod");
        assert_eq!(nested.class, "Plan");

        for bad in ["", "NoDot", ".Plan", "Steps.", "Steps. StepOut"] {
            let err = QualifiedName::parse(bad).unwrap_err();
            assert!(err.to_string().contains(&format!("'{bad}'")), "{err}");
        }
    }

    #[test]
    fn test_resolution_errors_name_the_request() {
        let registry = PlanRegistry::with_steps(&StopOthersLedger::new());

        let err = registry.resolve("NoSuchModule.NoSuchPlan").err().unwrap();
        assert!(err.to_string().contains("NoSuchModule.NoSuchPlan"));
        assert!(err.to_string().contains("no namespace named 'NoSuchModule'"));

        let err = registry.resolve("Steps.NoSuchPlan").err().unwrap();
        assert!(err.to_string().contains("Steps.NoSuchPlan"));
        assert!(err.to_string().contains("StepUntil"));
    }

    #[test]
    fn test_names_and_unload() {
        let mut registry = PlanRegistry::with_steps(&StopOthersLedger::new());
        let names = registry.names();
        assert!(names.contains(&"Steps.StepOut".to_string()));
        assert!(names.contains(&"Steps.StepReportsStopOthers".to_string()));
        assert!(registry.contains("Steps.StepScripted"));

        assert!(registry.unload("Steps"));
        assert!(!registry.contains("Steps.StepScripted"));
        assert!(registry.names().is_empty());
    }
}
