use stepper_common::{PlanArgs, ThreadId};
use stepper_engine::{
    sim::{FunctionBuilder, Program, SimProcess},
    BuiltinPlan, EngineConfig, PlanRegistry, RunMode, RunModeSource, StepEngine, StepRequest,
    StopOthersLedger, StopReason, RUN_ALL_THREADS,
};
use tracing::info;

const MAIN: ThreadId = ThreadId(1);
const WORKER: ThreadId = ThreadId(2);

fn program(worker: fn(FunctionBuilder) -> FunctionBuilder) -> Program {
    Program::new()
        .function("main", |f| {
            f.line(10).set("foo", 10).line(11).call("bar").line(12).add("foo", 1).line(13).ret()
        })
        .function("bar", |f| f.line(20).nop().nop().line(21).ret())
        .function("worker", worker)
        .thread("worker")
}

fn counting_worker(f: FunctionBuilder) -> FunctionBuilder {
    f.line(40).add("count", 1).line(41).jmp(0)
}

fn crashing_worker(f: FunctionBuilder) -> FunctionBuilder {
    f.line(40).nop().line(41).trap(6).line(42).jmp(0)
}

fn reporting(token: &str) -> StepRequest {
    StepRequest::scripted(MAIN, "Steps.StepReportsStopOthers")
        .with_arguments(PlanArgs::new().with("token", token))
}

fn setup(worker: fn(FunctionBuilder) -> FunctionBuilder) -> (StepEngine<SimProcess>, StopOthersLedger) {
    let ledger = StopOthersLedger::new();
    let process = SimProcess::launch(&program(worker)).unwrap();
    let engine = StepEngine::new(process, PlanRegistry::with_steps(&ledger), EngineConfig::default());
    (engine, ledger)
}

#[test]
fn test_plan_preference_suspends_other_threads() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (mut engine, ledger) = setup(counting_worker);
    let outcome = engine.step(reporting("default")).unwrap();

    assert!(outcome.is_complete());
    assert!(outcome.stop_others);
    assert_eq!(outcome.run_mode_source, RunModeSource::Plan);
    assert_eq!(ledger.get("default"), Some(true));
    assert_eq!(engine.inferior().executed(WORKER), 0);
}

#[test]
fn test_explicit_all_threads_lets_others_run() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (mut engine, ledger) = setup(counting_worker);
    let outcome = engine.step(reporting("all").with_run_mode(RunMode::AllThreads)).unwrap();

    assert!(!outcome.stop_others);
    assert_eq!(outcome.run_mode_source, RunModeSource::Explicit);
    assert_eq!(ledger.get("all"), Some(false));
    assert_eq!(engine.inferior().executed(WORKER), 1);
    assert_eq!(engine.inferior().executed(MAIN), 1);
}

#[test]
fn test_run_all_threads_setting() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (mut engine, ledger) = setup(counting_worker);
    engine.settings_mut().set(RUN_ALL_THREADS, "true").unwrap();

    let outcome = engine.step(reporting("setting")).unwrap();
    assert_eq!(outcome.run_mode_source, RunModeSource::Setting);
    assert_eq!(ledger.get("setting"), Some(false));

    // An explicit mode still beats the setting.
    let outcome = engine.step(reporting("explicit").with_run_mode(RunMode::ThisThread)).unwrap();
    assert_eq!(outcome.run_mode_source, RunModeSource::Explicit);
    assert_eq!(ledger.get("explicit"), Some(true));

    // Turning the setting off hands the decision back to the plan.
    engine.settings_mut().set(RUN_ALL_THREADS, "false").unwrap();
    engine.step(reporting("off")).unwrap();
    assert_eq!(ledger.get("off"), Some(true));
    assert_eq!(ledger.len(), 3);
}

#[test]
fn test_settings_from_config() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let ledger = StopOthersLedger::new();
    let config = EngineConfig::from_toml_str("[settings]\n\"process.run-all-threads\" = true\n")
        .unwrap();
    let process = SimProcess::launch(&program(counting_worker)).unwrap();
    let mut engine = StepEngine::new(process, PlanRegistry::with_steps(&ledger), config);

    engine.step(reporting("config")).unwrap();
    assert_eq!(ledger.get("config"), Some(false));
}

#[test]
fn test_other_thread_event_aborts_step() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    // Running all threads lets the worker's signal interrupt the step.
    let (mut engine, _) = setup(crashing_worker);
    engine.inferior_mut().run_to_function("bar").unwrap();
    let outcome = engine
        .step(StepRequest::builtin(MAIN, BuiltinPlan::StepOut).with_run_mode(RunMode::AllThreads))
        .unwrap();
    assert_eq!(outcome.reason, StopReason::Aborted);
    assert_eq!(outcome.description, format!("thread {WORKER} stopped: signal SIGABRT"));
    assert!(engine.pending_plans(MAIN).is_empty());
    assert_eq!(engine.inferior().internal_breakpoint_count(), 0);

    // Suspending the worker keeps the step clean.
    let (mut engine, _) = setup(crashing_worker);
    engine.inferior_mut().run_to_function("bar").unwrap();
    let outcome = engine
        .step(StepRequest::builtin(MAIN, BuiltinPlan::StepOut).with_run_mode(RunMode::ThisThread))
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.description, "Stepping out from bar");
}
