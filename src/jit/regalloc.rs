//! Linear-scan register allocation over a closed trace's IR.
//!
//! Two passes, as in the design: a reverse walk records each operand's last
//! use, then a forward walk assigns the lowest free register to each
//! instruction's result, freeing registers whose value is no longer live.

use crate::ir::IrInstr;

/// One instruction's assigned register, or `None` if allocation ran out of
/// registers for it (a spill — not implemented, see [`Allocation::spilled`]).
pub type Register = Option<u16>;

pub struct Allocation {
    /// Per-instruction assigned register, indexed the same as the IR slice
    /// passed to [`allocate`].
    pub registers: Vec<Register>,
    /// Set once any instruction couldn't get a free register. The spec
    /// leaves spilling unimplemented; callers must refuse to assemble a
    /// spilled trace rather than emit incorrect code.
    pub spilled: bool,
}

impl Allocation {
    pub fn num_registers_used(&self, total: usize) -> usize {
        let highest = self.registers.iter().flatten().copied().max();
        match highest {
            Some(r) => (r as usize + 1).min(total),
            None => 0,
        }
    }
}

/// `instrs` is a closed trace's instruction buffer (1-based [`crate::ir::IrRef`]
/// values map to `instrs[ref.0 as usize - 1]`).
pub fn allocate(instrs: &[IrInstr], num_registers: usize) -> Allocation {
    let n = instrs.len();

    // Pass 1 (reverse): live_end[i] = index of the last instruction that
    // reads instruction i's result, or None if it is never read.
    let mut live_end: Vec<Option<usize>> = vec![None; n];
    for i in (0..n).rev() {
        let ins = instrs[i];
        if !ins.op().takes_refs() {
            continue;
        }
        let (a, b) = ins.operands();
        for r in [a, b] {
            if r.is_none() {
                continue;
            }
            let idx = r.0 as usize - 1;
            if live_end[idx].is_none() {
                live_end[idx] = Some(i);
            }
        }
    }

    // Pass 2 (forward): a register is live from the instruction that
    // defines it through (and including) the instruction recorded in
    // `live_end`; a result that is never read dies at the instruction that
    // produced it, i.e. `live_end[i].unwrap_or(i)`.
    let mut end_of_reg: Vec<Option<usize>> = vec![None; num_registers];
    let mut registers = vec![None; n];
    let mut spilled = false;

    for i in 0..n {
        for end in end_of_reg.iter_mut() {
            if end.is_some_and(|e| e < i) {
                *end = None;
            }
        }
        match (0..num_registers).find(|&r| end_of_reg[r].is_none()) {
            Some(r) => {
                registers[i] = Some(r as u16);
                end_of_reg[r] = Some(live_end[i].unwrap_or(i));
            }
            None => spilled = true,
        }
    }

    Allocation { registers, spilled }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::ir::{IrOp, IrRef};
    use quickcheck_macros::quickcheck;

    /// Build a synthetic chain trace of `n` arithmetic instructions, each
    /// reading the previous result plus a fresh load, and check allocation
    /// never assigns the same register to overlapping live ranges.
    #[quickcheck]
    fn no_overlap_on_synthetic_chains(seed: u8) -> bool {
        let n = 3 + (seed % 12) as usize;
        let mut instrs = vec![IrInstr::load(IrOp::LOAD_STACK, 0)];
        for i in 1..n {
            let prev = IrRef(i as u16);
            let fresh = instrs.len() + 1;
            instrs.push(IrInstr::load(IrOp::LOAD_CONST, i as u16));
            instrs.push(IrInstr::binary(IrOp::ADD, prev, IrRef(fresh as u16)));
        }
        let num_registers = 1 + (seed % 7) as usize;
        let alloc = allocate(&instrs, num_registers);

        let mut live_end = vec![None; instrs.len()];
        for i in (0..instrs.len()).rev() {
            let ins = instrs[i];
            if !ins.op().takes_refs() {
                continue;
            }
            let (a, b) = ins.operands();
            for r in [a, b] {
                if !r.is_none() {
                    let idx = r.0 as usize - 1;
                    if live_end[idx].is_none() {
                        live_end[idx] = Some(i);
                    }
                }
            }
        }
        for i in 0..instrs.len() {
            let Some(ri) = alloc.registers[i] else { continue };
            let end_i = live_end[i].unwrap_or(i);
            for j in (i + 1)..instrs.len() {
                let Some(rj) = alloc.registers[j] else { continue };
                if ri == rj && j <= end_i {
                    return false;
                }
            }
        }
        true
    }
}
