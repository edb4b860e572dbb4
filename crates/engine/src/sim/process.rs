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

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use stepper_common::{
    Addr, AddrRange, BreakpointId, DecodedInstruction, Frame, LineEntry, StopCause, StopEvent,
    StopId, ThreadId, Value,
};
use tracing::{debug, trace};

use super::{Op, Program, SimError, Statement, CODE_BASE, FUNCTION_SLOT};
use crate::{FrameIntrospection, ProcessControl, ResumeRequest};

/// Instructions a single resume may execute before giving up.
pub const DEFAULT_BUDGET: u64 = 1_000_000;

/// Requests a halt of a running [`SimProcess`] from any thread.
#[derive(Debug, Clone, Default)]
pub struct HaltHandle(Arc<AtomicBool>);

impl HaltHandle {
    /// Ask the process to stop as soon as possible.
    pub fn halt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a halt is pending.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct LaidOutFunction {
    name: String,
    start: Addr,
    statements: Vec<(Addr, Statement)>,
}

impl LaidOutFunction {
    fn contains(&self, addr: Addr) -> bool {
        AddrRange::new(self.start, self.start.offset(FUNCTION_SLOT)).contains(addr)
    }

    fn statement_at(&self, addr: Addr) -> Option<usize> {
        self.statements.iter().position(|(start, _)| *start == addr)
    }

    fn statement_containing(&self, addr: Addr) -> Option<usize> {
        self.statements.iter().position(|(start, statement)| {
            AddrRange::new(*start, start.offset(statement.op.size())).contains(addr)
        })
    }
}

#[derive(Debug, Clone)]
struct SimFrame {
    function: usize,
    pc: Addr,
    locals: BTreeMap<String, i64>,
}

#[derive(Debug)]
struct SimThread {
    /// Outermost frame first.
    frames: Vec<SimFrame>,
    last_pc: Addr,
    executed: u64,
}

impl SimThread {
    fn pc(&self) -> Addr {
        self.frames.last().map_or(self.last_pc, |frame| frame.pc)
    }
}

#[derive(Debug, Clone)]
struct SimBreakpoint {
    addr: Addr,
    thread: Option<ThreadId>,
    internal: bool,
    hits: u64,
}

/// A running instance of a [`Program`].
#[derive(Debug)]
pub struct SimProcess {
    functions: Vec<LaidOutFunction>,
    by_name: HashMap<String, usize>,
    threads: BTreeMap<ThreadId, SimThread>,
    breakpoints: BTreeMap<BreakpointId, SimBreakpoint>,
    next_breakpoint: u64,
    stop_id: StopId,
    pending: Option<ResumeRequest>,
    exit_status: Option<i32>,
    halt: HaltHandle,
    budget: u64,
}

impl SimProcess {
    /// Lay out `program` and start its threads, stopped at their entry points.
    pub fn launch(program: &Program) -> Result<Self, SimError> {
        program.validate()?;

        let mut functions = Vec::with_capacity(program.functions.len());
        let mut by_name = HashMap::new();
        for (index, def) in program.functions.iter().enumerate() {
            let start = Addr(CODE_BASE + index as u64 * FUNCTION_SLOT);
            let mut addr = start;
            let statements = def
                .body
                .iter()
                .map(|statement| {
                    let at = addr;
                    addr = addr.offset(statement.op.size());
                    (at, statement.clone())
                })
                .collect();
            by_name.insert(def.name.clone(), index);
            functions.push(LaidOutFunction { name: def.name.clone(), start, statements });
        }

        let mut threads = BTreeMap::new();
        for (index, def) in program.threads.iter().enumerate() {
            let function = by_name
                .get(&def.entry)
                .copied()
                .ok_or_else(|| SimError::UnknownFunction(def.entry.clone()))?;
            let pc = functions[function].start;
            threads.insert(
                ThreadId(index as u64 + 1),
                SimThread {
                    frames: vec![SimFrame { function, pc, locals: BTreeMap::new() }],
                    last_pc: pc,
                    executed: 0,
                },
            );
        }

        debug!(functions = functions.len(), threads = threads.len(), "launched simulated process");
        Ok(Self {
            functions,
            by_name,
            threads,
            breakpoints: BTreeMap::new(),
            next_breakpoint: 1,
            stop_id: StopId(1),
            pending: None,
            exit_status: None,
            halt: HaltHandle::default(),
            budget: DEFAULT_BUDGET,
        })
    }

    /// Limit the instructions a single resume may execute.
    pub fn with_budget(mut self, budget: u64) -> Self {
        self.budget = budget;
        self
    }

    /// Handle for halting the process from another thread.
    pub fn halt_handle(&self) -> HaltHandle {
        self.halt.clone()
    }

    /// The first thread of the program.
    pub fn main_thread(&self) -> ThreadId {
        ThreadId(1)
    }

    /// Exit status, once the process has exited.
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    /// Entry address of `name`.
    pub fn function_address(&self, name: &str) -> Option<Addr> {
        self.by_name.get(name).map(|index| self.functions[*index].start)
    }

    /// Name of the function containing `addr`.
    pub fn function_at(&self, addr: Addr) -> Option<&str> {
        self.functions.iter().find(|f| f.contains(addr)).map(|f| f.name.as_str())
    }

    /// Address of the first statement attributed to `line`.
    pub fn line_address(&self, line: u32) -> Option<Addr> {
        self.functions
            .iter()
            .flat_map(|f| f.statements.iter())
            .find(|(_, statement)| statement.line == line)
            .map(|(addr, _)| *addr)
    }

    /// Value of a local in the youngest frame of `thread`.
    pub fn local(&self, thread: ThreadId, name: &str) -> Option<i64> {
        self.threads.get(&thread)?.frames.last()?.locals.get(name).copied()
    }

    /// Instructions `thread` has executed so far.
    pub fn executed(&self, thread: ThreadId) -> u64 {
        self.threads.get(&thread).map_or(0, |t| t.executed)
    }

    /// Breakpoints currently inserted, internal ones included.
    pub fn breakpoint_count(&self) -> usize {
        self.breakpoints.len()
    }

    /// Internal (plan-owned) breakpoints currently inserted.
    pub fn internal_breakpoint_count(&self) -> usize {
        self.breakpoints.values().filter(|bp| bp.internal).count()
    }

    /// Times breakpoint `site` has been hit.
    pub fn hit_count(&self, site: BreakpointId) -> Option<u64> {
        self.breakpoints.get(&site).map(|bp| bp.hits)
    }

    /// Insert a breakpoint every thread triggers.
    pub fn set_user_breakpoint(&mut self, addr: Addr) -> Result<BreakpointId, SimError> {
        self.insert_breakpoint(addr, None, false)
    }

    /// Insert a user breakpoint at the entry of `function`.
    pub fn set_user_breakpoint_at_function(&mut self, function: &str) -> Result<BreakpointId, SimError> {
        let addr = self
            .function_address(function)
            .ok_or_else(|| SimError::UnknownFunction(function.to_string()))?;
        self.set_user_breakpoint(addr)
    }

    /// Let every thread run until one of them enters `function`.
    pub fn run_to_function(&mut self, function: &str) -> Result<StopEvent, SimError> {
        let addr = self
            .function_address(function)
            .ok_or_else(|| SimError::UnknownFunction(function.to_string()))?;
        self.run_to_address(addr, function)
    }

    /// Let every thread run until one of them reaches the first statement of `line`.
    pub fn run_to_line(&mut self, line: u32) -> Result<StopEvent, SimError> {
        let addr = self.line_address(line).ok_or(SimError::NoLine(line))?;
        self.run_to_address(addr, &format!("line {line}"))
    }

    fn run_to_address(&mut self, addr: Addr, target: &str) -> Result<StopEvent, SimError> {
        let site = self.set_user_breakpoint(addr)?;
        let request = ResumeRequest {
            thread: self.main_thread(),
            suspended: Default::default(),
            single_step: false,
        };
        let result = self.resume_internal(&request).and_then(|()| self.wait_internal());
        self.delete_breakpoint(site)?;

        let event = result?;
        if event.cause.breakpoint() == Some(site) {
            Ok(event)
        } else {
            Err(SimError::UnexpectedStop { expected: target.to_string(), stop: event.to_string() })
        }
    }

    fn insert_breakpoint(
        &mut self,
        addr: Addr,
        thread: Option<ThreadId>,
        internal: bool,
    ) -> Result<BreakpointId, SimError> {
        if self.locate(addr).is_none() {
            return Err(SimError::NoInstruction(addr));
        }
        let site = BreakpointId(self.next_breakpoint);
        self.next_breakpoint += 1;
        self.breakpoints.insert(site, SimBreakpoint { addr, thread, internal, hits: 0 });
        trace!(%site, %addr, ?thread, internal, "breakpoint inserted");
        Ok(site)
    }

    fn delete_breakpoint(&mut self, site: BreakpointId) -> Result<(), SimError> {
        self.breakpoints.remove(&site).map(|_| ()).ok_or(SimError::NoBreakpoint(site))
    }

    /// `(function, statement)` starting exactly at `addr`.
    fn locate(&self, addr: Addr) -> Option<(usize, usize)> {
        let function = self.functions.iter().position(|f| f.contains(addr))?;
        Some((function, self.functions[function].statement_at(addr)?))
    }

    fn line_of(&self, addr: Addr) -> Option<u32> {
        let function = self.functions.iter().find(|f| f.contains(addr))?;
        let index = function.statement_containing(addr)?;
        Some(function.statements[index].1.line)
    }

    fn thread(&self, thread: ThreadId) -> Result<&SimThread, SimError> {
        self.threads.get(&thread).ok_or(SimError::UnknownThread(thread))
    }

    fn resume_internal(&mut self, request: &ResumeRequest) -> Result<(), SimError> {
        if let Some(status) = self.exit_status {
            return Err(SimError::Exited(status));
        }
        if !self.threads.contains_key(&request.thread) {
            return Err(SimError::UnknownThread(request.thread));
        }
        self.stop_id = self.stop_id.next();
        self.pending = Some(request.clone());
        trace!(stop_id = %self.stop_id, ?request, "resumed");
        Ok(())
    }

    fn wait_internal(&mut self) -> Result<StopEvent, SimError> {
        let request = self.pending.take().ok_or(SimError::NotRunning)?;
        let mut runnable: Vec<ThreadId> =
            self.threads.keys().copied().filter(|thread| request.runs(*thread)).collect();
        if request.single_step {
            // Everyone else gets their instruction in before the trap.
            runnable.sort_by_key(|thread| *thread == request.thread);
        }

        let mut executed = 0u64;
        loop {
            if self.halt.take() {
                return Ok(self.stop_event(request.thread, StopCause::Halt));
            }
            for &thread in &runnable {
                let cause = self.execute(thread)?;
                if request.single_step && thread == request.thread {
                    return Ok(self.stop_event(thread, cause.unwrap_or(StopCause::Trace)));
                }
                if let Some(cause) = cause {
                    return Ok(self.stop_event(thread, cause));
                }
                executed += 1;
                if executed >= self.budget {
                    return Err(SimError::BudgetExhausted(self.budget));
                }
            }
        }
    }

    fn stop_event(&self, thread: ThreadId, cause: StopCause) -> StopEvent {
        let pc = self.threads.get(&thread).map_or(Addr(0), SimThread::pc);
        let event = StopEvent { stop_id: self.stop_id, thread, pc, cause };
        debug!(%event, "simulated process stopped");
        event
    }

    /// Run one statement on `thread`; returns the stop it caused, if any.
    fn execute(&mut self, thread_id: ThreadId) -> Result<Option<StopCause>, SimError> {
        let Self { functions, by_name, threads, breakpoints, exit_status, .. } = self;
        let thread = threads.get_mut(&thread_id).ok_or(SimError::UnknownThread(thread_id))?;
        let Some(frame) = thread.frames.last_mut() else {
            return Ok(None);
        };

        let function = &functions[frame.function];
        let index = function.statement_at(frame.pc).ok_or(SimError::NoInstruction(frame.pc))?;
        let op = function.statements[index].1.op.clone();
        let next = frame.pc.offset(op.size());
        thread.last_pc = frame.pc;
        thread.executed += 1;

        let mut cause = None;
        match op {
            Op::Nop => frame.pc = next,
            Op::Set { var, value } => {
                frame.locals.insert(var, value);
                frame.pc = next;
            }
            Op::Add { var, value } => {
                *frame.locals.entry(var).or_insert(0) += value;
                frame.pc = next;
            }
            Op::Call { function: callee } => {
                let callee =
                    by_name.get(&callee).copied().ok_or(SimError::UnknownFunction(callee))?;
                frame.pc = next;
                let pc = functions[callee].start;
                thread.frames.push(SimFrame { function: callee, pc, locals: BTreeMap::new() });
            }
            Op::Ret => {
                thread.frames.pop();
                if thread.frames.is_empty() {
                    *exit_status = Some(0);
                    return Ok(Some(StopCause::Exited { status: 0 }));
                }
            }
            Op::Jmp { to } => frame.pc = function.statements[to].0,
            Op::Jnz { var, to } => {
                let taken = frame.locals.get(&var).copied().unwrap_or(0) != 0;
                frame.pc = if taken { function.statements[to].0 } else { next };
            }
            Op::Trap { signo } => {
                frame.pc = next;
                cause = Some(StopCause::Signal { signo, name: signal_name(signo) });
            }
        }

        if cause.is_none() {
            let pc = thread.pc();
            // Every site at the pc counts the hit; a stepping plan's own site is reported first.
            let mut reported: Option<(BreakpointId, bool)> = None;
            for (site, bp) in breakpoints
                .iter_mut()
                .filter(|(_, bp)| bp.addr == pc && bp.thread.is_none_or(|only| only == thread_id))
            {
                bp.hits += 1;
                let owned = bp.internal && bp.thread == Some(thread_id);
                if reported.is_none_or(|(_, best)| owned && !best) {
                    reported = Some((*site, owned));
                }
            }
            cause = reported.map(|(site, _)| StopCause::Breakpoint { site });
        }
        Ok(cause)
    }
}

fn signal_name(signo: i32) -> String {
    match signo {
        2 => "SIGINT".to_string(),
        4 => "SIGILL".to_string(),
        5 => "SIGTRAP".to_string(),
        6 => "SIGABRT".to_string(),
        8 => "SIGFPE".to_string(),
        11 => "SIGSEGV".to_string(),
        other => format!("SIG{other}"),
    }
}

impl ProcessControl for SimProcess {
    fn threads(&self) -> Vec<ThreadId> {
        if self.exit_status.is_some() {
            return Vec::new();
        }
        self.threads.keys().copied().collect()
    }

    fn current_stop_id(&self) -> StopId {
        self.stop_id
    }

    fn resume(&mut self, request: &ResumeRequest) -> eyre::Result<()> {
        Ok(self.resume_internal(request)?)
    }

    fn wait_for_stop(&mut self) -> eyre::Result<StopEvent> {
        Ok(self.wait_internal()?)
    }

    fn set_internal_breakpoint(&mut self, addr: Addr, thread: ThreadId) -> eyre::Result<BreakpointId> {
        Ok(self.insert_breakpoint(addr, Some(thread), true)?)
    }

    fn remove_breakpoint(&mut self, site: BreakpointId) -> eyre::Result<()> {
        Ok(self.delete_breakpoint(site)?)
    }

    fn read_instruction(&self, addr: Addr) -> eyre::Result<DecodedInstruction> {
        let (function, index) = self.locate(addr).ok_or(SimError::NoInstruction(addr))?;
        let op = &self.functions[function].statements[index].1.op;
        Ok(DecodedInstruction {
            address: addr,
            size: op.size(),
            mnemonic: op.mnemonic().to_string(),
            operands: op.operands(),
        })
    }
}

impl FrameIntrospection for SimProcess {
    fn frames(&self, thread: ThreadId) -> eyre::Result<Vec<Frame>> {
        let sim = self.thread(thread)?;
        let count = sim.frames.len();
        Ok(sim
            .frames
            .iter()
            .rev()
            .enumerate()
            .map(|(index, frame)| {
                // Older frames hold a return address; attribute them to the call.
                let lookup = if index == 0 { frame.pc } else { Addr(frame.pc.0.saturating_sub(1)) };
                Frame {
                    index,
                    function: self.functions[frame.function].name.clone(),
                    pc: frame.pc,
                    depth: count - 1 - index,
                    line: self.line_of(lookup),
                }
            })
            .collect())
    }

    fn read_variable(&self, thread: ThreadId, frame_index: usize, name: &str) -> eyre::Result<Value> {
        let sim = self.thread(thread)?;
        let frame = sim
            .frames
            .iter()
            .rev()
            .nth(frame_index)
            .ok_or(SimError::NoFrame { thread, frame: frame_index })?;
        let value = frame.locals.get(name).copied().ok_or_else(|| SimError::NoVariable {
            thread,
            frame: frame_index,
            name: name.to_string(),
        })?;
        Ok(Value::Integer(value))
    }

    fn line_entry(&self, addr: Addr) -> Option<LineEntry> {
        let function = self.functions.iter().find(|f| f.contains(addr))?;
        let index = function.statement_containing(addr)?;
        let statements = &function.statements;
        let line = statements[index].1.line;

        let first = statements[..index]
            .iter()
            .rposition(|(_, statement)| statement.line != line)
            .map_or(0, |position| position + 1);
        let last = statements[index..]
            .iter()
            .position(|(_, statement)| statement.line != line)
            .map_or(statements.len(), |offset| index + offset)
            - 1;

        let (start, _) = &statements[first];
        let (end_start, end_statement) = &statements[last];
        Some(LineEntry { line, range: AddrRange::new(*start, end_start.offset(end_statement.op.size())) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepper_common::ensure_test_logging;

    fn program() -> Program {
        Program::new()
            .function("main", |f| {
                f.line(10).set("foo", 10).line(11).call("bar").line(12).add("foo", 1).line(13).ret()
            })
            .function("bar", |f| f.line(20).nop().nop().line(21).ret())
    }

    fn step(process: &mut SimProcess, thread: ThreadId) -> StopEvent {
        let request = ResumeRequest { thread, suspended: Default::default(), single_step: true };
        process.resume(&request).unwrap();
        process.wait_for_stop().unwrap()
    }

    #[test]
    fn test_layout_and_decoding() {
        ensure_test_logging(None);
        let process = SimProcess::launch(&program()).unwrap();
        assert_eq!(process.function_address("main"), Some(Addr(0x1000)));
        assert_eq!(process.function_address("bar"), Some(Addr(0x1100)));
        assert_eq!(process.function_at(Addr(0x1104)), Some("main"));

        let call = process.read_instruction(Addr(0x1004)).unwrap();
        assert_eq!(call.mnemonic, "call");
        assert_eq!(call.operands, "bar");
        assert_eq!(call.next_address(), Addr(0x1009));
        assert!(process.read_instruction(Addr(0x1005)).is_err());
    }

    #[test]
    fn test_line_entries_group_statements() {
        let process = SimProcess::launch(&program()).unwrap();
        let entry = process.line_entry(Addr(0x1101)).unwrap();
        assert_eq!(entry.line, 20);
        assert_eq!(entry.range, AddrRange::new(Addr(0x1100), Addr(0x1102)));
        assert_eq!(process.line_entry(Addr(0x1000)).unwrap().line, 10);
        assert!(process.line_entry(Addr(0x5000)).is_none());
    }

    #[test]
    fn test_call_and_return_frames() {
        let mut process = SimProcess::launch(&program()).unwrap();
        let main = process.main_thread();
        let first_stop = process.current_stop_id();

        step(&mut process, main);
        assert_eq!(process.local(main, "foo"), Some(10));
        let event = step(&mut process, main);
        assert_eq!(event.cause, StopCause::Trace);
        assert_eq!(event.pc, Addr(0x1100));
        assert!(process.current_stop_id() > first_stop);

        let frames = process.frames(main).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].function, "bar");
        assert_eq!(frames[0].depth, 1);
        assert_eq!(frames[1].function, "main");
        assert_eq!(frames[1].pc, Addr(0x1009));
        assert_eq!(frames[1].line, Some(11));
        assert_eq!(process.read_variable(main, 1, "foo").unwrap(), Value::Integer(10));
        assert!(process.read_variable(main, 0, "foo").is_err());
    }

    #[test]
    fn test_breakpoints_respect_thread_filter() {
        let program = program().thread("main");
        let mut process = SimProcess::launch(&program).unwrap();
        let bar = process.function_address("bar").unwrap();
        let site = process.set_internal_breakpoint(bar, ThreadId(2)).unwrap();

        let request = ResumeRequest {
            thread: ThreadId(1),
            suspended: Default::default(),
            single_step: false,
        };
        process.resume(&request).unwrap();
        let event = process.wait_for_stop().unwrap();
        assert_eq!(event.thread, ThreadId(2));
        assert_eq!(event.cause, StopCause::Breakpoint { site });
        assert_eq!(process.hit_count(site), Some(1));
        assert_eq!(process.internal_breakpoint_count(), 1);
        process.remove_breakpoint(site).unwrap();
        assert!(process.remove_breakpoint(site).is_err());
    }

    #[test]
    fn test_run_to_function_and_exit() {
        let mut process = SimProcess::launch(&program()).unwrap();
        let event = process.run_to_function("bar").unwrap();
        assert_eq!(event.pc, Addr(0x1100));
        assert_eq!(process.breakpoint_count(), 0);

        let request = ResumeRequest {
            thread: process.main_thread(),
            suspended: Default::default(),
            single_step: false,
        };
        process.resume(&request).unwrap();
        let event = process.wait_for_stop().unwrap();
        assert_eq!(event.cause, StopCause::Exited { status: 0 });
        assert_eq!(process.exit_status(), Some(0));
        assert!(process.threads().is_empty());
        assert!(process.resume(&request).is_err());
    }

    #[test]
    fn test_trap_halt_and_budget() {
        let trapping = Program::new().function("main", |f| f.line(1).nop().trap(11).ret());
        let mut process = SimProcess::launch(&trapping).unwrap();
        let request = ResumeRequest {
            thread: process.main_thread(),
            suspended: Default::default(),
            single_step: false,
        };
        process.resume(&request).unwrap();
        let event = process.wait_for_stop().unwrap();
        assert_eq!(event.cause, StopCause::Signal { signo: 11, name: "SIGSEGV".into() });

        let spinning = Program::new().function("main", |f| f.line(1).nop().jmp(0));
        let mut process = SimProcess::launch(&spinning).unwrap().with_budget(100);
        process.halt_handle().halt();
        process.resume(&request).unwrap();
        assert_eq!(process.wait_for_stop().unwrap().cause, StopCause::Halt);

        process.resume(&request).unwrap();
        let err = process.wait_for_stop().unwrap_err();
        assert!(err.to_string().contains("100 instructions"));
        assert!(process.wait_for_stop().is_err());
    }
}
