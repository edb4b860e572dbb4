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

//! Resolution of the "stop other threads" flag for one step.
//!
//! Precedence, highest first:
//! 1. an explicit run mode on the step request,
//! 2. the `process.run-all-threads` setting (only when it is `true`),
//! 3. the constructed plan's own preference.
//!
//! The result is computed once per step request and never re-evaluated
//! while the step is in flight.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{SettingsProvider, RUN_ALL_THREADS};

/// Explicit run mode given with a step request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Let every thread run while stepping
    AllThreads,
    /// Suspend every other thread while stepping
    ThisThread,
}

impl RunMode {
    /// The stop-others value this mode stands for.
    pub fn stop_others(self) -> bool {
        matches!(self, Self::ThisThread)
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all-threads" => Ok(Self::AllThreads),
            "this-thread" => Ok(Self::ThisThread),
            other => Err(format!(
                "invalid run mode '{other}': expected 'all-threads' or 'this-thread'"
            )),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllThreads => write!(f, "all-threads"),
            Self::ThisThread => write!(f, "this-thread"),
        }
    }
}

/// Which source decided the stop-others value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunModeSource {
    /// The step request carried an explicit run mode
    Explicit,
    /// `process.run-all-threads` was set
    Setting,
    /// The plan's own preference
    Plan,
}

/// A resolved run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRunMode {
    /// Whether other threads stay suspended during the step.
    pub stop_others: bool,
    /// What decided it.
    pub source: RunModeSource,
}

/// Resolve the parts of the policy that do not depend on the plan.
///
/// Returns `None` when the plan's preference decides.
pub fn resolve_policy(
    explicit: Option<RunMode>,
    settings: &dyn SettingsProvider,
) -> Option<ResolvedRunMode> {
    if let Some(mode) = explicit {
        return Some(ResolvedRunMode {
            stop_others: mode.stop_others(),
            source: RunModeSource::Explicit,
        });
    }
    if settings.get_bool_setting(RUN_ALL_THREADS) {
        return Some(ResolvedRunMode { stop_others: false, source: RunModeSource::Setting });
    }
    None
}

/// Resolve the stop-others flag for one step.
pub fn resolve_stop_others(
    explicit: Option<RunMode>,
    settings: &dyn SettingsProvider,
    plan_preference: bool,
) -> ResolvedRunMode {
    resolve_policy(explicit, settings).unwrap_or(ResolvedRunMode {
        stop_others: plan_preference,
        source: RunModeSource::Plan,
    })
}
