//! Threaded-dispatch bytecode executor.
//!
//! One central loop reads the current frame's instruction and matches on its
//! opcode, mirroring the host project's "one executor, one big match" core
//! loop rather than a table of function pointers — the match compiles down
//! to the same jump table and stays far more readable. Baseline execution
//! and hot-loop trace recording share this one loop: a live [`Trace`] is
//! just an optional side channel fed from the same opcode handlers, so
//! there is no second copy of the arithmetic/comparison semantics to drift
//! out of sync with the first.

use crate::bytecode::Opcode;
use crate::error::{Error, Location, Result};
use crate::ir::IrOp;
use crate::jit;
use crate::trace::{AbortReason, Trace};
use crate::value::{Primitive, Value};
use crate::vm::{FuncId, Vm};

macro_rules! dispatch_event {
    ($($arg:tt)*) => {
        #[cfg(feature = "trace-dispatch")]
        tracing::trace!($($arg)*);
    };
}

/// One activated function call: where to resume in the caller, and where
/// this frame's locals begin on the shared stack.
///
/// `base` is the absolute stack index of local slot 0 — for a `CALL
/// fn_slot, first_arg_slot, argc`, the callee's `base` is the caller's
/// `base + first_arg_slot`, since the compiler already places the callee's
/// arguments in the consecutive slots starting there (design §4.3/§9).
/// `dest` is the absolute slot the return value is written back into: the
/// caller's `base + fn_slot`, i.e. the call expression's own node.
struct Frame {
    func: FuncId,
    ip: usize,
    base: usize,
    dest: usize,
}

/// Per-`LOOP`-target hit counters, hashed into a fixed power-of-two table
/// the way the design specifies, so the table never grows with program
/// size. Scoped to one [`run`] call rather than persisted on the [`Vm`]:
/// each host embedding call compiles and runs a whole program in one shot
/// (§6), so there is no cross-call state worth keeping.
struct LoopCounters {
    table: Vec<u32>,
}

impl LoopCounters {
    fn new(size: usize) -> Self {
        Self { table: vec![0; size.max(1)] }
    }

    fn slot(&self, target_ip: usize) -> usize {
        (target_ip >> 2) & (self.table.len() - 1)
    }

    /// Bump the counter for `target_ip`, returning `true` the first time it
    /// crosses `threshold`.
    fn tick(&mut self, target_ip: usize, threshold: u32) -> bool {
        let slot = self.slot(target_ip);
        self.table[slot] = self.table[slot].saturating_add(1);
        self.table[slot] == threshold
    }
}

struct Interp<'a> {
    vm: &'a mut Vm,
    frames: Vec<Frame>,
    loop_counters: LoopCounters,
    trace: Option<Trace>,
}

/// Execute `func` (typically a package's `main`) to completion and return
/// its implicit result.
///
/// Every function body ends in an implicit, valueless `RET` (no `return`
/// keyword exists in the source language — see §6), so `func`'s own result
/// is always `nil`; this entry point exists for symmetry with `CALL`'s
/// result and so embedders always get a [`Value`] back regardless of what
/// `func` happens to be.
pub fn run(vm: &mut Vm, func: FuncId) -> Result<Value> {
    let table_size = vm.config().loop_counter_table_size;
    let mut interp = Interp {
        vm,
        frames: vec![Frame { func, ip: 0, base: 0, dest: 0 }],
        loop_counters: LoopCounters::new(table_size),
        trace: None,
    };
    interp.dispatch()
}

impl Interp<'_> {
    fn stack_get(&self, base: usize, slot: u8) -> Value {
        self.vm.stack()[base + slot as usize]
    }

    fn stack_set(&mut self, base: usize, slot: u8, value: Value) {
        self.vm.stack_mut()[base + slot as usize] = value;
    }

    fn as_number(&self, value: Value) -> Result<f64> {
        value
            .as_number()
            .ok_or_else(|| Error::runtime("expected a number", Location::unknown()))
    }

    fn dispatch(&mut self) -> Result<Value> {
        loop {
            let frame_base = self.frames.last().unwrap().base;
            let frame_func = self.frames.last().unwrap().func;
            let ip = self.frames.last().unwrap().ip;
            let instr = self.vm.function(frame_func).code()[ip];
            let op = instr.opcode();
            dispatch_event!(ip, func = frame_func.0, op = %op, "dispatch");

            let mut next_ip = ip + 1;

            match op {
                Opcode::MOV => {
                    let (a, b, _) = instr.args_abc();
                    let v = self.stack_get(frame_base, b);
                    self.stack_set(frame_base, a, v);
                    if let Some(t) = &mut self.trace {
                        t.record_mov(a, b);
                    }
                }
                Opcode::SET_N => {
                    let (a, d) = instr.args_ad();
                    let v = Value::number(self.vm.constant(d));
                    self.stack_set(frame_base, a, v);
                    if let Some(t) = &mut self.trace {
                        t.record_set_const(a, d);
                    }
                }
                Opcode::SET_P => {
                    let (a, b, _) = instr.args_abc();
                    let prim = Primitive::from_code(b).expect("invalid primitive code in bytecode");
                    self.stack_set(frame_base, a, Value::from_primitive(prim));
                    self.abort_trace(AbortReason::UnsupportedOpcode);
                }
                Opcode::SET_F => {
                    let (a, d) = instr.args_ad();
                    self.stack_set(frame_base, a, Value::function(d as u32));
                    self.abort_trace(AbortReason::UnsupportedOpcode);
                }
                Opcode::ADD_LL | Opcode::SUB_LL | Opcode::MUL_LL | Opcode::DIV_LL => {
                    let (a, b, c) = instr.args_abc();
                    let left = self.as_number(self.stack_get(frame_base, b))?;
                    let right = self.as_number(self.stack_get(frame_base, c))?;
                    let left_ref = self.trace.as_mut().map(|t| t.ref_for_slot(b));
                    let right_ref = self.trace.as_mut().map(|t| t.ref_for_slot(c));
                    let result = arith(op, left, right)?;
                    self.stack_set(frame_base, a, Value::number(result));
                    self.record_arith(a, op, left_ref, right_ref);
                }
                Opcode::ADD_LN | Opcode::SUB_LN | Opcode::MUL_LN | Opcode::DIV_LN => {
                    let (a, b, c) = instr.args_abc();
                    let left = self.as_number(self.stack_get(frame_base, b))?;
                    let right = self.vm.constant(c as u16);
                    let left_ref = self.trace.as_mut().map(|t| t.ref_for_slot(b));
                    let right_ref = self.trace.as_mut().map(|t| t.ref_for_const(c as u16));
                    let result = arith(op, left, right)?;
                    self.stack_set(frame_base, a, Value::number(result));
                    self.record_arith(a, op, left_ref, right_ref);
                }
                Opcode::SUB_NL | Opcode::DIV_NL => {
                    let (a, b, c) = instr.args_abc();
                    let left = self.vm.constant(b as u16);
                    let right = self.as_number(self.stack_get(frame_base, c))?;
                    let left_ref = self.trace.as_mut().map(|t| t.ref_for_const(b as u16));
                    let right_ref = self.trace.as_mut().map(|t| t.ref_for_slot(c));
                    let result = arith(op, left, right)?;
                    self.stack_set(frame_base, a, Value::number(result));
                    self.record_arith(a, op, left_ref, right_ref);
                }
                Opcode::NEG => {
                    let (a, b, _) = instr.args_abc();
                    let operand = self.as_number(self.stack_get(frame_base, b))?;
                    let operand_ref = self.trace.as_mut().map(|t| t.ref_for_slot(b));
                    self.stack_set(frame_base, a, Value::number(-operand));
                    if let (Some(t), Some(r)) = (&mut self.trace, operand_ref) {
                        t.record_neg(a, r);
                    }
                }
                Opcode::EQ_LL
                | Opcode::NEQ_LL
                | Opcode::LT_LL
                | Opcode::LE_LL
                | Opcode::GT_LL
                | Opcode::GE_LL
                | Opcode::EQ_LN
                | Opcode::NEQ_LN
                | Opcode::LT_LN
                | Opcode::LE_LN
                | Opcode::GT_LN
                | Opcode::GE_LN => {
                    // Comparisons pack as (left_slot, right_slot_or_const, 0) —
                    // unlike arithmetic's three-field shapes, the third byte
                    // is always unused here (see `emit_cmp_jmp`).
                    let (a, b, _) = instr.args_abc();
                    let left = self.stack_get(frame_base, a);
                    let is_ln = matches!(
                        op,
                        Opcode::EQ_LN | Opcode::NEQ_LN | Opcode::LT_LN | Opcode::LE_LN | Opcode::GT_LN | Opcode::GE_LN
                    );
                    let (left_n, right_n) = if is_ln {
                        (self.as_number(left)?, self.vm.constant(b as u16))
                    } else {
                        (self.as_number(left)?, self.as_number(self.stack_get(frame_base, b))?)
                    };
                    let truth = compare(op, left_n, right_n);
                    if let Some(t) = &mut self.trace {
                        let left_ref = t.ref_for_slot(a);
                        let right_ref = if is_ln { t.ref_for_const(b as u16) } else { t.ref_for_slot(b) };
                        t.record_guard(guard_op(op), left_ref, right_ref);
                    }
                    next_ip = ip + if truth { 1 } else { 2 };
                }
                Opcode::EQ_LP | Opcode::NEQ_LP => {
                    let (a, b, _) = instr.args_abc();
                    let left = self.stack_get(frame_base, a);
                    let prim = Primitive::from_code(b).expect("invalid primitive code in bytecode");
                    let equal = left == Value::from_primitive(prim);
                    let truth = if op == Opcode::EQ_LP { equal } else { !equal };
                    self.abort_trace(AbortReason::UnsupportedOpcode);
                    next_ip = ip + if truth { 1 } else { 2 };
                }
                Opcode::JMP => {
                    next_ip = (ip as i64 + 1 + instr.jump_offset() as i64) as usize;
                }
                Opcode::LOOP => {
                    let target = (ip as i64 + 1 + instr.jump_offset() as i64) as usize;
                    self.on_loop_back_edge(target);
                    next_ip = target;
                }
                Opcode::CALL => {
                    let (fn_slot, first_arg_slot, _argc) = instr.args_abc();
                    let callee_val = self.stack_get(frame_base, fn_slot);
                    let Some(callee_idx) = callee_val.as_function() else {
                        return Err(Error::runtime("called value is not a function", Location::unknown()));
                    };
                    if callee_idx as usize >= self.vm.function_count() {
                        return Err(Error::runtime("call to out-of-range function index", Location::unknown()));
                    }
                    if self.frames.len() >= self.vm.config().max_call_depth {
                        return Err(Error::runtime("maximum call depth exceeded", Location::unknown()));
                    }
                    self.abort_trace(AbortReason::Recursion);
                    self.frames.last_mut().unwrap().ip = ip + 1;
                    self.frames.push(Frame {
                        func: FuncId(callee_idx),
                        ip: 0,
                        base: frame_base + first_arg_slot as usize,
                        dest: frame_base + fn_slot as usize,
                    });
                    continue;
                }
                Opcode::RET => {
                    let (has_value, value_slot, _) = instr.args_abc();
                    let value = if has_value != 0 {
                        self.stack_get(frame_base, value_slot)
                    } else {
                        Value::NIL
                    };
                    self.abort_trace(AbortReason::LeftTrace);
                    let dest = self.frames.pop().unwrap().dest;
                    match self.frames.last_mut() {
                        Some(_) => {
                            self.vm.stack_mut()[dest] = value;
                            continue;
                        }
                        None => return Ok(value),
                    }
                }
            }

            self.frames.last_mut().unwrap().ip = next_ip;
        }
    }

    fn record_arith(&mut self, dest: u8, op: Opcode, left: Option<crate::ir::IrRef>, right: Option<crate::ir::IrRef>) {
        if let (Some(t), Some(l), Some(r)) = (&mut self.trace, left, right) {
            t.record_arith(ir_arith_op(op), dest, l, r);
        }
    }

    /// Abort the live trace (if any) and finalize it immediately: there is
    /// no later point at which an abandoned trace would otherwise get
    /// logged and dropped, since closing only happens on a matching `LOOP`.
    fn abort_trace(&mut self, reason: AbortReason) {
        if let Some(mut trace) = self.trace.take() {
            trace.abort(reason);
            tracing::warn!(start_ip = trace.start_ip(), reason = %trace.abort_reason().unwrap(), "trace aborted");
        }
    }

    /// `LOOP` reached its target: bump the hot-loop counter; on the
    /// threshold crossing, start recording a trace there (if one isn't
    /// already live); if a trace is live and this is its own back edge,
    /// try to close it. A `LOOP` belonging to some other loop while a trace
    /// is live means control diverged from the traced loop; abort it.
    fn on_loop_back_edge(&mut self, target_ip: usize) {
        if let Some(trace) = &mut self.trace {
            if trace.start_ip() == target_ip {
                if trace.try_close(target_ip) {
                    let trace = self.trace.take().unwrap();
                    self.finish_trace(trace);
                }
                return;
            }
            self.abort_trace(AbortReason::LeftTrace);
        }

        if self.trace.is_none() && cfg!(feature = "jit") {
            let threshold = self.vm.config().jit_threshold;
            if self.loop_counters.tick(target_ip, threshold) {
                tracing::info!(target_ip, "promoting hot loop, starting trace recording");
                self.trace = Some(Trace::new(target_ip, self.vm.config().max_trace_instructions));
            }
        }
    }

    /// A trace closed cleanly (its own back edge was taken): try to turn it
    /// into machine code purely to exercise that path; never executed (see
    /// `crate::jit`), so baseline interpretation simply continues either way.
    fn finish_trace(&mut self, trace: Trace) {
        match jit::compile(&trace, self.vm.config()) {
            Ok(compiled) => {
                tracing::info!(
                    start_ip = trace.start_ip(),
                    bytes = compiled.code.len(),
                    "trace closed and compiled; execution continues in the interpreter \
                     (compiled code is never mapped executable, see crate::jit)"
                );
            }
            Err(err) => {
                tracing::warn!(start_ip = trace.start_ip(), %err, "trace compiled but discarded");
            }
        }
    }
}

fn arith(op: Opcode, left: f64, right: f64) -> Result<f64> {
    Ok(match op {
        Opcode::ADD_LL | Opcode::ADD_LN => left + right,
        Opcode::SUB_LL | Opcode::SUB_LN | Opcode::SUB_NL => left - right,
        Opcode::MUL_LL | Opcode::MUL_LN => left * right,
        Opcode::DIV_LL | Opcode::DIV_LN | Opcode::DIV_NL => left / right,
        _ => unreachable!("arith called with a non-arithmetic opcode"),
    })
}

fn ir_arith_op(op: Opcode) -> IrOp {
    match op {
        Opcode::ADD_LL | Opcode::ADD_LN => IrOp::ADD,
        Opcode::SUB_LL | Opcode::SUB_LN | Opcode::SUB_NL => IrOp::SUB,
        Opcode::MUL_LL | Opcode::MUL_LN => IrOp::MUL,
        Opcode::DIV_LL | Opcode::DIV_LN | Opcode::DIV_NL => IrOp::DIV,
        _ => unreachable!("ir_arith_op called with a non-arithmetic opcode"),
    }
}

fn guard_op(op: Opcode) -> IrOp {
    match op {
        Opcode::EQ_LL | Opcode::EQ_LN => IrOp::GUARD_EQ,
        Opcode::NEQ_LL | Opcode::NEQ_LN => IrOp::GUARD_NEQ,
        Opcode::LT_LL | Opcode::LT_LN => IrOp::GUARD_LT,
        Opcode::LE_LL | Opcode::LE_LN => IrOp::GUARD_LE,
        Opcode::GT_LL | Opcode::GT_LN => IrOp::GUARD_GT,
        Opcode::GE_LL | Opcode::GE_LN => IrOp::GUARD_GE,
        _ => unreachable!("guard_op called with a non-relational opcode"),
    }
}

fn compare(op: Opcode, left: f64, right: f64) -> bool {
    match op {
        Opcode::EQ_LL | Opcode::EQ_LN => left == right,
        Opcode::NEQ_LL | Opcode::NEQ_LN => left != right,
        Opcode::LT_LL | Opcode::LT_LN => left < right,
        Opcode::LE_LL | Opcode::LE_LN => left <= right,
        Opcode::GT_LL | Opcode::GT_LN => left > right,
        Opcode::GE_LL | Opcode::GE_LN => left >= right,
        _ => unreachable!("compare called with a non-relational opcode"),
    }
}
