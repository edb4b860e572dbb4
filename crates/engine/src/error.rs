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

//! Errors reported synchronously to whoever issued a step request.
//!
//! Only failures that happen *before* the process is resumed, plus failures
//! of the process collaborator itself, travel through [`StepError`]. A plan
//! that misbehaves after it has been pushed is reported through the step
//! outcome instead (see [`crate::StopReason::ProtocolViolation`]).

use stepper_common::ThreadId;
use thiserror::Error;

/// Errors that can occur while issuing a step request.
#[derive(Debug, Error)]
pub enum StepError {
    /// The named implementation could not be found
    #[error("could not resolve scripted thread plan '{name}': {reason}")]
    Resolution {
        /// The implementation name exactly as requested.
        name: String,
        /// Why resolution failed.
        reason: String,
    },

    /// The implementation was found but instantiating or setting it up failed
    #[error("failed to construct thread plan '{name}': {reason:#}")]
    Construction {
        /// The plan name exactly as requested.
        name: String,
        /// The underlying failure.
        reason: eyre::Report,
    },

    /// The request names a thread the process does not have
    #[error("thread {0} does not exist in the process")]
    UnknownThread(ThreadId),

    /// A setting could not be parsed or does not exist
    #[error("invalid setting: {0}")]
    Setting(String),

    /// The process collaborator failed while the step was in flight
    #[error("process control failed: {0:#}")]
    Process(eyre::Report),
}

impl StepError {
    /// Whether this error happened while building the plan, i.e. the process
    /// was provably not resumed.
    pub fn is_construction_failure(&self) -> bool {
        matches!(self, Self::Resolution { .. } | Self::Construction { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_the_requested_name() {
        let err = StepError::Resolution {
            name: "NoSuchModule.NoSuchPlan".into(),
            reason: "no namespace named 'NoSuchModule' is loaded".into(),
        };
        assert!(err.to_string().contains("NoSuchModule.NoSuchPlan"));
        assert!(err.is_construction_failure());

        let err = StepError::Construction {
            name: "Steps.StepUntil".into(),
            reason: eyre::eyre!("missing argument"),
        };
        assert!(err.to_string().contains("Steps.StepUntil"));
        assert!(err.to_string().contains("missing argument"));

        assert!(!StepError::UnknownThread(ThreadId(9)).is_construction_failure());
    }
}
