//! Tunable VM limits.
//!
//! Mirrors the host project's convention of a small `*Parameters` struct
//! threaded through construction, rather than scattering `const`s through
//! the codebase — the difference being these are genuinely configurable per
//! embedding, not consensus-critical constants.

/// Construction-time limits and tunables for a [`crate::vm::Vm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Number of times a `LOOP` instruction's target must be crossed before
    /// the interpreter starts recording a trace for it.
    pub jit_threshold: u32,
    /// Size, in slots, of the power-of-two hot-loop counter table that
    /// `LOOP` hashes its instruction pointer into.
    pub loop_counter_table_size: usize,
    /// Maximum number of locals (named + temporaries) a single function may
    /// use; bounded by the 8-bit slot field in every instruction.
    pub max_locals_per_function: usize,
    /// Maximum number of deduplicated constants a VM may hold; bounded by
    /// the 16-bit constant-index field in `SET_N`/arithmetic `_LN` shapes.
    pub max_constants: usize,
    /// Fixed size, in [`crate::value::Value`] slots, of the runtime value
    /// stack shared by all calls in a VM.
    pub stack_size: usize,
    /// Maximum nested call depth before a `CALL` raises a `RuntimeError`.
    pub max_call_depth: usize,
    /// Maximum number of IR instructions a single trace may record before
    /// it aborts as "buffer exhausted".
    pub max_trace_instructions: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            jit_threshold: 50,
            loop_counter_table_size: 1024,
            max_locals_per_function: 256,
            max_constants: 65_535,
            stack_size: 64 * 1024,
            max_call_depth: 256,
            max_trace_instructions: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design_constants() {
        let cfg = VmConfig::default();
        assert_eq!(cfg.jit_threshold, 50);
        assert_eq!(cfg.max_locals_per_function, 256);
        assert_eq!(cfg.max_constants, 65_535);
    }
}
