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

//! List scripted plans

use eyre::Result;
use stepper_engine::{PlanRegistry, StopOthersLedger};

/// Print every registered scripted plan name, one per line
pub fn list_plans() -> Result<()> {
    let registry = PlanRegistry::with_steps(&StopOthersLedger::new());
    for name in registry.names() {
        println!("{name}");
    }
    Ok(())
}
