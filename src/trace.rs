//! Trace recorder: turns one pass through a hot loop's bytecode into a
//! linear SSA [`IrInstr`] buffer.
//!
//! The recorder never re-reads bytecode itself — the recording interpreter
//! dispatch (see [`crate::interpreter`]) calls one of these hooks per
//! instruction it executes, mirroring the host project's pattern of a
//! central executor invoking per-opcode side hooks rather than the hook
//! re-deriving state from the instruction stream.

use std::collections::HashMap;

use crate::ir::{IrInstr, IrOp, IrRef};

/// Why a trace stopped recording without closing into a usable loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    Recursion,
    UnsupportedOpcode,
    UnknownFunction,
    BufferExhausted,
    /// Control left the loop this trace is anchored to without taking its
    /// own back edge: a `RET` out of the function, or a `LOOP` belonging to
    /// a different, unrelated loop.
    LeftTrace,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Recursion => "recursion",
            Self::UnsupportedOpcode => "unsupported opcode",
            Self::UnknownFunction => "call to unknown function",
            Self::BufferExhausted => "IR buffer exhausted",
            Self::LeftTrace => "control left the traced loop",
        };
        write!(f, "{s}")
    }
}

/// State of a live trace. `instrs[0]` is never populated; indices are
/// 1-based so `IrRef::NONE` (0) unambiguously means "no operand" (design §4.4).
pub struct Trace {
    start_ip: usize,
    max_instrs: usize,
    instrs: Vec<IrInstr>,
    /// Most recent IR reference producing the value currently held in a
    /// bytecode stack slot.
    last_modified: HashMap<u8, IrRef>,
    /// The `LOAD_STACK` reference recorded the *first* time a slot was read
    /// on this trace — the PHI's "initial" operand at loop close.
    initial_loads: HashMap<u8, IrRef>,
    const_loads: HashMap<u16, IrRef>,
    aborted: Option<AbortReason>,
}

impl Trace {
    pub fn new(start_ip: usize, max_instrs: usize) -> Self {
        Self {
            start_ip,
            max_instrs,
            instrs: vec![IrInstr::load(IrOp::LOAD_STACK, 0)], // index 0, never read
            last_modified: HashMap::new(),
            initial_loads: HashMap::new(),
            const_loads: HashMap::new(),
            aborted: None,
        }
    }

    pub fn start_ip(&self) -> usize {
        self.start_ip
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        self.aborted.as_ref()
    }

    pub fn instructions(&self) -> &[IrInstr] {
        &self.instrs[1..]
    }

    pub fn abort(&mut self, reason: AbortReason) {
        if self.aborted.is_none() {
            self.aborted = Some(reason);
        }
    }

    fn push(&mut self, instr: IrInstr) -> IrRef {
        if self.instrs.len() >= self.max_instrs {
            self.abort(AbortReason::BufferExhausted);
            return IrRef::NONE;
        }
        let r = IrRef(self.instrs.len() as u16);
        self.instrs.push(instr);
        r
    }

    /// The reference producing slot `slot`'s current value, emitting a
    /// fresh `LOAD_STACK` the first time the slot is read on this trace.
    pub fn ref_for_slot(&mut self, slot: u8) -> IrRef {
        if let Some(r) = self.last_modified.get(&slot) {
            return *r;
        }
        let r = self.push(IrInstr::load(IrOp::LOAD_STACK, slot as u16));
        self.initial_loads.insert(slot, r);
        self.last_modified.insert(slot, r);
        r
    }

    /// The reference producing constant `idx`'s value, caching across the
    /// whole trace (design §4.5: `const_loads[const_idx]`).
    pub fn ref_for_const(&mut self, idx: u16) -> IrRef {
        if let Some(r) = self.const_loads.get(&idx) {
            return *r;
        }
        let r = self.push(IrInstr::load(IrOp::LOAD_CONST, idx));
        self.const_loads.insert(idx, r);
        r
    }

    /// `MOV a,b`: pure alias update, no IR emitted.
    pub fn record_mov(&mut self, dest: u8, src: u8) {
        let r = self.ref_for_slot(src);
        self.last_modified.insert(dest, r);
    }

    /// `SET_N a,k`: alias `a` to the (cached) constant load.
    pub fn record_set_const(&mut self, dest: u8, const_idx: u16) {
        let r = self.ref_for_const(const_idx);
        self.last_modified.insert(dest, r);
    }

    /// Arithmetic `OP a,b,c` (any operand shape): resolve `left`/`right` to
    /// refs first, emit the binary op, and alias `dest` to its result.
    pub fn record_arith(&mut self, op: IrOp, dest: u8, left: IrRef, right: IrRef) {
        let result = self.push(IrInstr::binary(op, left, right));
        self.last_modified.insert(dest, result);
    }

    pub fn record_neg(&mut self, dest: u8, operand: IrRef) {
        let result = self.push(IrInstr::unary(IrOp::NEG, operand));
        self.last_modified.insert(dest, result);
    }

    /// A comparison instruction whose `JMP` was taken or fell through: emit
    /// a guard reflecting the branch actually taken, so a future run of the
    /// trace that disagrees can side-exit (contract-level; see module docs
    /// on [`crate::jit`]).
    pub fn record_guard(&mut self, op: IrOp, left: IrRef, right: IrRef) {
        self.push(IrInstr::binary(op, left, right));
    }

    /// `LOOP` back to this trace's start: close it, inserting a `PHI` for
    /// every slot whose value changed during the loop body. Returns `false`
    /// (and does *not* close) if `target_ip` isn't this trace's anchor —
    /// the recording dispatch keeps running in that case.
    pub fn try_close(&mut self, target_ip: usize) -> bool {
        if target_ip != self.start_ip {
            return false;
        }
        let changed: Vec<(u8, IrRef, IrRef)> = self
            .initial_loads
            .iter()
            .filter_map(|(&slot, &initial)| {
                let current = *self.last_modified.get(&slot)?;
                (current != initial).then_some((slot, initial, current))
            })
            .collect();
        for (slot, initial, current) in changed {
            let phi = self.push(IrInstr::binary(IrOp::PHI, initial, current));
            self.last_modified.insert(slot, phi);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_constant_loads_are_cached() {
        let mut t = Trace::new(0, 4096);
        let a = t.ref_for_const(3);
        let b = t.ref_for_const(3);
        let c = t.ref_for_const(4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn repeated_stack_loads_are_cached_until_overwritten() {
        let mut t = Trace::new(0, 4096);
        let a = t.ref_for_slot(2);
        let b = t.ref_for_slot(2);
        assert_eq!(a, b);
        t.record_mov(2, 5);
        let c = t.ref_for_slot(2);
        assert_ne!(a, c);
    }

    #[test]
    fn mov_emits_no_ir_and_aliases_the_source() {
        let mut t = Trace::new(0, 4096);
        let src_ref = t.ref_for_slot(0);
        let before = t.instructions().len();
        t.record_mov(1, 0);
        assert_eq!(t.instructions().len(), before, "MOV must not emit an IR instruction");
        assert_eq!(t.ref_for_slot(1), src_ref);
    }

    #[test]
    fn closing_inserts_phi_only_for_changed_slots() {
        let mut t = Trace::new(10, 4096);
        let untouched_initial = t.ref_for_slot(0);
        let changed_initial = t.ref_for_slot(1);
        let c = t.ref_for_const(0);
        t.record_arith(IrOp::ADD, 1, changed_initial, c);
        let before = t.instructions().len();
        assert!(t.try_close(10));
        assert_eq!(t.instructions().len(), before + 1, "exactly one PHI for the one changed slot");
        assert_eq!(t.ref_for_slot(0), untouched_initial);
    }

    #[test]
    fn closing_at_the_wrong_target_does_not_close() {
        let mut t = Trace::new(10, 4096);
        assert!(!t.try_close(99));
        assert!(!t.is_aborted());
    }

    #[test]
    fn buffer_exhaustion_aborts() {
        let mut t = Trace::new(0, 2);
        t.ref_for_const(0);
        t.ref_for_const(1);
        assert_eq!(t.abort_reason(), Some(&AbortReason::BufferExhausted));
    }
}
