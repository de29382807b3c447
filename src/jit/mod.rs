//! Tracing JIT driver: turns a closed [`crate::trace::Trace`] into machine
//! code, contract-level only (see module docs on [`assembler`] for why
//! nothing here is ever mapped executable).
//!
//! Three stages, each its own submodule: [`regalloc`] assigns one of a small
//! set of SSE registers to every IR instruction's result; [`assembler`]
//! turns an allocation into x86-64 bytes. This module is the glue that runs
//! them over a trace and reports why a trace can't be compiled when it
//! can't.

pub mod assembler;
pub mod regalloc;

use crate::ir::{IrInstr, IrOp};
use crate::trace::Trace;
use assembler::x64::{self, Gpr, Xmm};
use assembler::CodeBuffer;

/// Number of SSE registers this backend's allocator is allowed to hand out.
/// Kept small and fixed rather than probing the host CPU, matching the
/// interpreter's own fixed-size tables.
pub const NUM_REGISTERS: usize = 8;

/// Why a closed trace could not be turned into machine code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The register allocator ran out of the fixed register budget;
    /// spilling to memory is unimplemented (design §4.6 leaves it as a
    /// known limitation rather than a required feature).
    RegisterPressure,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RegisterPressure => write!(f, "trace needs more registers than the JIT backend provides"),
        }
    }
}

/// The output of compiling one trace: raw bytes plus the offsets of every
/// guard's side-exit displacement, for a future revision to patch once it
/// actually links traces together. Never mapped executable or called —
/// produced for its byte-level contract alone.
pub struct CompiledTrace {
    pub code: Vec<u8>,
    pub side_exits: Vec<usize>,
    pub registers_used: usize,
}

/// Compile a closed, non-aborted trace. Returns `Err` if the allocator can't
/// fit the trace's live ranges into [`NUM_REGISTERS`] registers.
pub fn compile(trace: &Trace, config: &crate::config::VmConfig) -> Result<CompiledTrace, CompileError> {
    let instrs = trace.instructions();
    let alloc = regalloc::allocate(instrs, NUM_REGISTERS);
    if alloc.spilled {
        tracing::warn!(start_ip = trace.start_ip(), "trace needs register spilling, not compiling");
        return Err(CompileError::RegisterPressure);
    }

    let mut buf = CodeBuffer::new();
    let mut side_exits = Vec::new();

    let reg_of = |idx_1based: u16| -> Xmm {
        let idx = idx_1based as usize - 1;
        Xmm(alloc.registers[idx].expect("every live operand was assigned a register") as u8)
    };

    for (i, instr) in instrs.iter().enumerate() {
        let Some(dst_reg) = alloc.registers[i] else {
            continue; // dead instruction, nothing reads it; skip emission
        };
        let dst = Xmm(dst_reg as u8);
        emit_one(&mut buf, *instr, dst, reg_of, &mut side_exits);
    }

    tracing::info!(
        start_ip = trace.start_ip(),
        bytes = buf.len(),
        registers_used = alloc.num_registers_used(NUM_REGISTERS),
        max_trace_instructions = config.max_trace_instructions,
        "compiled trace"
    );

    Ok(CompiledTrace {
        registers_used: alloc.num_registers_used(NUM_REGISTERS),
        code: buf.into_vec(),
        side_exits,
    })
}

fn emit_one(
    buf: &mut CodeBuffer,
    instr: IrInstr,
    dst: Xmm,
    reg_of: impl Fn(u16) -> Xmm,
    side_exits: &mut Vec<usize>,
) {
    let op = instr.op();
    match op {
        IrOp::LOAD_STACK => {
            x64::movsd_load(buf, dst, Gpr::RBX, instr.immediate() as i32 * 8);
        }
        IrOp::LOAD_CONST => {
            // Constants live in a second, immutable table; `Gpr(1)` (rcx) is
            // this backend's conventional constant-table base, distinct
            // from `Gpr::RBX`'s stack base.
            x64::movsd_load(buf, dst, Gpr(1), instr.immediate() as i32 * 8);
        }
        IrOp::ADD | IrOp::SUB | IrOp::MUL | IrOp::DIV | IrOp::PHI => {
            let (a, b) = instr.operands();
            let src_a = reg_of(a.0);
            let src_b = reg_of(b.0);
            if dst != src_a {
                x64::movsd_reg_reg(buf, dst, src_a);
            }
            match op {
                IrOp::ADD => x64::addsd(buf, dst, src_b),
                IrOp::SUB => x64::subsd(buf, dst, src_b),
                IrOp::MUL => x64::mulsd(buf, dst, src_b),
                IrOp::DIV => x64::divsd(buf, dst, src_b),
                // A PHI just picks the loop-carried value: since both
                // operands were already forced to the same kind of register
                // by the allocator, moving the "updated" operand in is
                // correct on every iteration but the first.
                IrOp::PHI => x64::movsd_reg_reg(buf, dst, src_b),
                _ => unreachable!(),
            }
        }
        IrOp::NEG => {
            let (a, _) = instr.operands();
            let src = reg_of(a.0);
            x64::xorpd_zero(buf, dst);
            x64::subsd(buf, dst, src);
        }
        IrOp::GUARD_EQ | IrOp::GUARD_NEQ | IrOp::GUARD_LT | IrOp::GUARD_LE | IrOp::GUARD_GT | IrOp::GUARD_GE => {
            let (a, b) = instr.operands();
            x64::ucomisd(buf, reg_of(a.0), reg_of(b.0));
            let condition = side_exit_condition(op);
            let at = x64::jcc_rel32_placeholder(buf, condition);
            side_exits.push(at);
        }
    }
}

/// The `Jcc` condition code that fires when a guard's asserted relation did
/// *not* hold, i.e. when the trace must side-exit.
fn side_exit_condition(op: IrOp) -> u8 {
    const JE: u8 = 0x4;
    const JNE: u8 = 0x5;
    const JB: u8 = 0x2;
    const JBE: u8 = 0x6;
    const JA: u8 = 0x7;
    const JAE: u8 = 0x3;
    match op {
        IrOp::GUARD_EQ => JNE,
        IrOp::GUARD_NEQ => JE,
        IrOp::GUARD_LT => JAE,
        IrOp::GUARD_LE => JA,
        IrOp::GUARD_GT => JBE,
        IrOp::GUARD_GE => JB,
        _ => unreachable!("not a guard opcode"),
    }
}
