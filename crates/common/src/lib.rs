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

//! Stepper Common - Shared functionality for Stepper components
//!
//! This crate provides the vocabulary shared by the stepping engine and its
//! front-ends: thread and stop identifiers, stop events, frames, values,
//! structured plan arguments, instruction control-flow classification and
//! logging setup.

/// Common types used throughout Stepper including stop events, frames, values and plan arguments
pub mod types;

/// Instruction control-flow classification used for instruction-granularity stepping
pub mod instruction;
/// Logging setup and utilities for consistent logging across Stepper components
pub mod logging;

pub use instruction::*;
pub use logging::*;
pub use types::*;
