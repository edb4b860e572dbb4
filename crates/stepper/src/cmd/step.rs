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

//! Run one step plan against a simulated program

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use eyre::{bail, Result};
use serde_json::json;
use stepper_common::{PlanArgs, ThreadId};
use stepper_engine::{
    sim::{Program, SimProcess},
    BuiltinPlan, EngineConfig, FrameIntrospection, PlanRegistry, RunMode, StepEngine,
    StepOutcome, StepRequest, StopOthersLedger,
};
use tracing::{info, warn};

/// Built-in plans selectable with `--builtin`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BuiltinArg {
    /// Run until the current function returns
    Out,
    /// Step over the current source line
    Over,
    /// Execute one instruction, entering calls
    Instruction,
    /// Execute one instruction, running calls to completion
    InstructionOver,
}

impl From<BuiltinArg> for BuiltinPlan {
    fn from(arg: BuiltinArg) -> Self {
        match arg {
            BuiltinArg::Out => Self::StepOut,
            BuiltinArg::Over => Self::StepOverRange { range: None },
            BuiltinArg::Instruction => Self::StepInstruction,
            BuiltinArg::InstructionOver => Self::StepInstructionOver,
        }
    }
}

/// Arguments of `stepper step`
#[derive(Debug, Args)]
pub struct StepArgs {
    /// Program to load (TOML, or JSON with a .json extension)
    #[arg(long)]
    pub program: PathBuf,

    /// Engine configuration file
    #[arg(long, env = "STEPPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run until this function is entered before stepping
    #[arg(long = "break", value_name = "FUNCTION")]
    pub break_at: Option<String>,

    /// Run until this source line is reached before stepping
    #[arg(long, value_name = "LINE", conflicts_with = "break_at")]
    pub break_line: Option<u32>,

    /// Thread to step
    #[arg(long, default_value = "1")]
    pub thread: u64,

    /// Scripted plan to run, as <namespace>.<ClassName>
    #[arg(short = 'C', long = "class", value_name = "NAME")]
    pub class: Option<String>,

    /// Built-in plan to run when no --class is given
    #[arg(long, value_enum, default_value = "out", conflicts_with = "class")]
    pub builtin: BuiltinArg,

    /// Plan argument key; pair each with a -v
    #[arg(short = 'k', long = "key", requires = "class")]
    pub keys: Vec<String>,

    /// Plan argument value; pair each with a -k
    #[arg(short = 'v', long = "value", requires = "class")]
    pub values: Vec<String>,

    /// Plan arguments as a JSON object
    #[arg(long, requires = "class", conflicts_with_all = ["keys", "values"])]
    pub json_args: Option<String>,

    /// Force all-threads or this-thread execution
    #[arg(long, value_name = "MODE")]
    pub run_mode: Option<RunMode>,

    /// Apply a setting before stepping, e.g. process.run-all-threads=true
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub settings: Vec<String>,

    /// Give up after this many stop events
    #[arg(long)]
    pub max_stops: Option<usize>,

    /// Instructions a single resume may execute
    #[arg(long)]
    pub budget: Option<u64>,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

impl StepArgs {
    fn arguments(&self) -> Result<Option<PlanArgs>> {
        if let Some(text) = &self.json_args {
            return Ok(Some(PlanArgs::from_json(text)?));
        }
        if self.keys.is_empty() && self.values.is_empty() {
            return Ok(None);
        }
        Ok(Some(PlanArgs::from_key_value_pairs(&self.keys, &self.values)?))
    }

    fn request(&self) -> Result<StepRequest> {
        let thread = ThreadId(self.thread);
        let mut request = match &self.class {
            Some(name) => StepRequest::scripted(thread, name.clone()),
            None => StepRequest::builtin(thread, self.builtin.into()),
        };
        if let Some(arguments) = self.arguments()? {
            request = request.with_arguments(arguments);
        }
        if let Some(run_mode) = self.run_mode {
            request = request.with_run_mode(run_mode);
        }
        Ok(request)
    }

    fn config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        for assignment in &self.settings {
            config.settings.apply_assignment(assignment)?;
        }
        if let Some(max_stops) = self.max_stops {
            config.max_stops = Some(max_stops);
        }
        Ok(config)
    }
}

/// Execute `stepper step`
pub async fn run_step(args: StepArgs) -> Result<()> {
    let request = args.request()?;
    let config = args.config()?;
    let program = Program::load(&args.program)?;

    let mut process = SimProcess::launch(&program)?;
    if let Some(budget) = args.budget {
        process = process.with_budget(budget);
    }
    if let Some(function) = &args.break_at {
        let event = process.run_to_function(function)?;
        info!(%event, "stopped at breakpoint");
    }
    if let Some(line) = args.break_line {
        let event = process.run_to_line(line)?;
        info!(%event, "stopped at breakpoint");
    }

    let halt = process.halt_handle();
    let ledger = StopOthersLedger::new();
    let mut engine = StepEngine::new(process, PlanRegistry::with_steps(&ledger), config);

    // The engine blocks until the step ends; Ctrl+C halts the inferior.
    let mut task = tokio::task::spawn_blocking(move || {
        let outcome = engine.step(request);
        (engine, outcome)
    });
    let finished = tokio::select! {
        joined = &mut task => Some(joined),
        _ = tokio::signal::ctrl_c() => {
            warn!("Received Ctrl+C, halting the inferior...");
            halt.halt();
            None
        }
    };
    let (engine, outcome) = match finished {
        Some(joined) => joined?,
        None => task.await?,
    };
    let outcome = outcome?;

    report(&engine, &outcome, &ledger, args.json)
}

fn report(
    engine: &StepEngine<SimProcess>,
    outcome: &StepOutcome,
    ledger: &StopOthersLedger,
    as_json: bool,
) -> Result<()> {
    let frames = engine.inferior().frames(outcome.thread).unwrap_or_default();
    let recorded = ledger.entries();

    if as_json {
        let recorded: serde_json::Map<_, _> =
            recorded.into_iter().map(|(token, stop_others)| (token, stop_others.into())).collect();
        let document = json!({
            "outcome": outcome,
            "frame": frames.first(),
            "exit_status": engine.inferior().exit_status(),
            "stop_others_ledger": recorded,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    println!("* thread #{}, stop reason = {}", outcome.thread, outcome.reason);
    if !outcome.description.is_empty() {
        println!("    {}", outcome.description);
    }
    match (frames.first(), engine.inferior().exit_status()) {
        (Some(frame), _) => println!("  {frame}"),
        (None, Some(status)) => println!("  process exited with status {status}"),
        (None, None) => bail!("thread {} has no frames", outcome.thread),
    }
    println!(
        "  stops: {}, other threads {}",
        outcome.stops,
        if outcome.stop_others { "suspended" } else { "running" }
    );
    for (token, stop_others) in recorded {
        println!("  recorded stop-others [{token}]: {stop_others}");
    }
    Ok(())
}
