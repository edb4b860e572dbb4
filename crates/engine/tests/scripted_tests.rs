use eyre::eyre;
use stepper_common::{Addr, PlanArgs, StopEvent, ThreadId};
use stepper_engine::{
    sim::{Program, SimProcess},
    BuiltinPlan, EngineConfig, FrameIntrospection, PlanContext, PlanKind, PlanRegistry,
    ProcessControl, ScriptedPlan, StepEngine, StepError, StepOutcome, StepRequest,
    StopOthersLedger, StopReason,
};
use tracing::info;

// main:  0x1000 set foo 10 (10) | 0x1004 call bar (11) | 0x1009 nop (12)
//        0x100a add foo 1 (13)  | 0x100d ret (14)
// bar:   0x1100 nop (20)        | 0x1101 nop (20)      | 0x1102 ret (21)
fn program() -> Program {
    Program::new()
        .function("main", |f| {
            f.line(10)
                .set("foo", 10)
                .line(11)
                .call("bar")
                .line(12)
                .nop()
                .line(13)
                .add("foo", 1)
                .line(14)
                .ret()
        })
        .function("bar", |f| f.line(20).nop().nop().line(21).ret())
}

/// Stops when asked, never completes.
struct Pause;

impl ScriptedPlan for Pause {
    fn should_stop(&mut self, _cx: &mut PlanContext<'_>, _event: &StopEvent) -> eyre::Result<bool> {
        Ok(true)
    }

    fn is_complete(&self) -> bool {
        false
    }
}

/// Fails the first time it is consulted.
struct Failing;

impl ScriptedPlan for Failing {
    fn should_stop(&mut self, _cx: &mut PlanContext<'_>, _event: &StopEvent) -> eyre::Result<bool> {
        Err(eyre!("boom"))
    }

    fn is_complete(&self) -> bool {
        false
    }
}

fn registry() -> PlanRegistry {
    let mut registry = PlanRegistry::with_steps(&StopOthersLedger::new());
    registry.register("Test.Pause", |_cx, _args| Ok(Box::new(Pause))).unwrap();
    registry.register("Test.Failing", |_cx, _args| Ok(Box::new(Failing))).unwrap();
    registry
        .register("Test.Leaky", |cx, _args| {
            cx.set_breakpoint(Addr(0x1009))?;
            Err(eyre!("refusing to step"))
        })
        .unwrap();
    registry
        .register("Test.BadChild", |cx, _args| {
            cx.queue_step_out();
            cx.queue_scripted("Nope.Missing", None);
            Ok(Box::new(Pause))
        })
        .unwrap();
    registry
}

fn engine_at_line(program: &Program, line: u32) -> StepEngine<SimProcess> {
    let mut process = SimProcess::launch(program).unwrap();
    process.run_to_line(line).unwrap();
    StepEngine::new(process, registry(), EngineConfig::default())
}

fn step_until(variable: &str) -> StepRequest {
    StepRequest::scripted(ThreadId(1), "Steps.StepUntil")
        .with_arguments(PlanArgs::new().with("variable_name", variable))
}

#[test]
fn test_step_until_variable_changes() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let mut engine = engine_at_line(&program(), 11);
    let outcome = engine.step(step_until("foo")).unwrap();

    assert_eq!(outcome.reason, StopReason::PlanComplete);
    assert_eq!(outcome.description, "Stepped until foo changed");
    assert_eq!(outcome.event.as_ref().unwrap().pc, Addr(0x100d));
    assert_eq!(engine.inferior().local(ThreadId(1), "foo"), Some(11));
    assert!(engine.pending_plans(ThreadId(1)).is_empty());
    assert_eq!(engine.inferior().internal_breakpoint_count(), 0);
}

#[test]
fn test_step_until_stops_when_frame_returns() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let program = Program::new()
        .function("main", |f| f.line(1).call("baz").line(2).ret())
        .function("baz", |f| f.line(30).set("x", 1).line(31).nop().line(32).ret());
    let mut engine = engine_at_line(&program, 31);

    let outcome = engine.step(step_until("x")).unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.description, "Stepped until x changed");
    assert_eq!(engine.inferior().frames(ThreadId(1)).unwrap()[0].function, "main");
}

#[test]
fn test_step_until_rejects_bad_arguments() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let mut engine = engine_at_line(&program(), 11);
    let stop_id = engine.inferior().current_stop_id();

    let err = engine.step(step_until("nope")).unwrap_err();
    match &err {
        StepError::Construction { name, .. } => assert_eq!(name, "Steps.StepUntil"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("cannot watch variable 'nope'"));

    let err = engine.step(StepRequest::scripted(ThreadId(1), "Steps.StepUntil")).unwrap_err();
    assert!(err.to_string().contains("variable_name"));

    assert_eq!(engine.inferior().current_stop_id(), stop_id);
    assert_eq!(engine.inferior().breakpoint_count(), 0);
}

#[test]
fn test_step_until_is_repeatable() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let run = || -> StepOutcome {
        let mut engine = engine_at_line(&program(), 11);
        engine.step(step_until("foo")).unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_failing_plan_is_discarded() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let mut engine = engine_at_line(&program(), 11);
    let outcome = engine.step(StepRequest::scripted(ThreadId(1), "Test.Failing")).unwrap();

    assert_eq!(outcome.reason, StopReason::ProtocolViolation);
    assert_eq!(outcome.description, "plan 'Test.Failing' failed: boom");
    assert!(engine.pending_plans(ThreadId(1)).is_empty());

    // The thread is still usable afterwards.
    let outcome =
        engine.step(StepRequest::builtin(ThreadId(1), BuiltinPlan::StepInstruction)).unwrap();
    assert!(outcome.is_complete());
}

#[test]
fn test_construction_failure_releases_breakpoints() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let mut engine = engine_at_line(&program(), 11);
    let stop_id = engine.inferior().current_stop_id();

    let err = engine.step(StepRequest::scripted(ThreadId(1), "Test.Leaky")).unwrap_err();
    assert!(matches!(&err, StepError::Construction { name, .. } if name == "Test.Leaky"));
    assert!(err.to_string().contains("refusing to step"));
    assert_eq!(engine.inferior().breakpoint_count(), 0);
    assert_eq!(engine.inferior().current_stop_id(), stop_id);
}

#[test]
fn test_failed_child_rolls_back_whole_tree() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let mut process = SimProcess::launch(&program()).unwrap();
    process.run_to_function("bar").unwrap();
    let mut engine = StepEngine::new(process, registry(), EngineConfig::default());
    let stop_id = engine.inferior().current_stop_id();

    let err = engine.step(StepRequest::scripted(ThreadId(1), "Test.BadChild")).unwrap_err();
    assert!(matches!(&err, StepError::Construction { name, .. } if name == "Test.BadChild"));
    assert!(err.to_string().contains("Nope.Missing"));
    assert!(engine.pending_plans(ThreadId(1)).is_empty());
    assert_eq!(engine.inferior().breakpoint_count(), 0);
    assert_eq!(engine.inferior().current_stop_id(), stop_id);
}

#[test]
fn test_requested_stop_keeps_plan_pending() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let mut engine = engine_at_line(&program(), 11);
    let outcome = engine.step(StepRequest::scripted(ThreadId(1), "Test.Pause")).unwrap();
    assert_eq!(outcome.reason, StopReason::PlanRequested);

    let pending = engine.pending_plans(ThreadId(1));
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name, "Test.Pause");
    assert_eq!(pending[0].kind, PlanKind::Scripted);
    assert!(!pending[0].complete);

    // A child request runs above the pending plan and leaves it alone.
    let outcome = engine
        .step(StepRequest::builtin(ThreadId(1), BuiltinPlan::StepInstruction).as_child())
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(engine.pending_plans(ThreadId(1)).len(), 1);

    // A regular request replaces it.
    let outcome =
        engine.step(StepRequest::builtin(ThreadId(1), BuiltinPlan::StepInstruction)).unwrap();
    assert!(outcome.is_complete());
    assert!(engine.pending_plans(ThreadId(1)).is_empty());
}

#[test]
fn test_failed_request_keeps_pending_plans() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let mut engine = engine_at_line(&program(), 11);
    engine.step(StepRequest::scripted(ThreadId(1), "Test.Pause")).unwrap();
    assert_eq!(engine.pending_plans(ThreadId(1)).len(), 1);
    let stop_id = engine.inferior().current_stop_id();

    for name in ["NoSuchModule.NoSuchPlan", "Test.Leaky"] {
        let err = engine.step(StepRequest::scripted(ThreadId(1), name)).unwrap_err();
        assert!(err.is_construction_failure(), "{name}: {err:?}");
        assert!(err.to_string().contains(name), "{err}");

        let pending = engine.pending_plans(ThreadId(1));
        assert_eq!(pending.len(), 1, "{name}");
        assert_eq!(pending[0].name, "Test.Pause");
        assert_eq!(engine.inferior().breakpoint_count(), 0);
        assert_eq!(engine.inferior().current_stop_id(), stop_id);
    }

    // The next successful request still replaces the pending plan.
    let outcome =
        engine.step(StepRequest::builtin(ThreadId(1), BuiltinPlan::StepInstruction)).unwrap();
    assert!(outcome.is_complete());
    assert!(engine.pending_plans(ThreadId(1)).is_empty());
}

#[test]
fn test_discard_plans_clears_pending() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let mut engine = engine_at_line(&program(), 11);
    engine.step(StepRequest::scripted(ThreadId(1), "Test.Pause")).unwrap();
    assert_eq!(engine.pending_plans(ThreadId(1)).len(), 1);
    engine.discard_plans(ThreadId(1));
    assert!(engine.pending_plans(ThreadId(1)).is_empty());
}

#[test]
fn test_registry_lists_steps_library() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");

    let registry = registry();
    for name in [
        "Steps.StepOut",
        "Steps.StepScripted",
        "Steps.StepSingleInstruction",
        "Steps.StepSingleInstructionWithStepOver",
        "Steps.StepUntil",
        "Steps.StepReportsStopOthers",
    ] {
        assert!(registry.contains(name), "{name} missing");
    }
    assert!(registry.names().contains(&"Test.Pause".to_string()));
    assert!(!registry.contains("Steps.NoSuchPlan"));
}
