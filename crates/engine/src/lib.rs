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

//! Stepper Engine - thread-plan execution for a stopped inferior
//!
//! A step request becomes a *plan* pushed onto the target thread's plan
//! stack. The step driver resumes the process, waits for each stop event and
//! asks the stack whether the stop is explained, whether the plan is done
//! and whether to keep running. Plans are either built in (step out, step
//! over a range, single instruction) or scripted: supplied by a factory in
//! the [`PlanRegistry`] and bridged onto the stack by the scripted plan
//! adapter.

pub mod config;
pub use config::*;

pub mod driver;
pub use driver::*;

pub mod error;
pub use error::*;

pub mod plan;
pub use plan::*;

pub mod process;
pub use process::*;

pub mod run_mode;
pub use run_mode::*;

pub mod scripted;
pub use scripted::*;

pub mod sim;

pub mod stack;
pub use stack::*;
