//! Property-style tests for the two testable properties named in the design
//! (beyond the six exact-bytecode scenarios in `scenarios.rs`): short-circuit
//! correctness of `&&`/`||`/`!`, and jump-target validity.

use quickcheck_macros::quickcheck;
use tracelang::{Opcode, Vm};

/// A tiny xorshift32 generator, so a single `u32` seed deterministically
/// reproduces both the generated expression and its expected value (mirrors
/// the seed-driven synthetic-chain generator in `jit::regalloc`'s own
/// property test).
fn next(state: &mut u32) -> u32 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    *state = x;
    x
}

fn leaf(state: &mut u32, vars: (bool, bool, bool)) -> (String, bool) {
    match next(state) % 3 {
        0 => ("a".to_string(), vars.0),
        1 => ("b".to_string(), vars.1),
        _ => ("c".to_string(), vars.2),
    }
}

/// Build a random Boolean expression over `a`, `b`, `c` together with the
/// value it evaluates to. Leaves are plain identifiers with no side effects,
/// so short-circuit evaluation and ordinary Boolean logic agree on the final
/// value — only the set of sub-expressions actually touched would differ,
/// which this crate's bytecode has no way to observe from the outside.
fn build(state: &mut u32, depth: u32, vars: (bool, bool, bool)) -> (String, bool) {
    if depth == 0 {
        return leaf(state, vars);
    }
    match next(state) % 4 {
        0 => leaf(state, vars),
        1 => {
            let (s, v) = build(state, depth - 1, vars);
            (format!("!({s})"), !v)
        }
        2 => {
            let (ls, lv) = build(state, depth - 1, vars);
            let (rs, rv) = build(state, depth - 1, vars);
            (format!("({ls} && {rs})"), lv && rv)
        }
        _ => {
            let (ls, lv) = build(state, depth - 1, vars);
            let (rs, rv) = build(state, depth - 1, vars);
            (format!("({ls} || {rs})"), lv || rv)
        }
    }
}

#[quickcheck]
fn short_circuit_matches_boolean_semantics(seed: u32) -> bool {
    let mut state = seed | 1;
    let a = next(&mut state) % 2 == 0;
    let b = next(&mut state) % 2 == 0;
    let c = next(&mut state) % 2 == 0;
    let (expr_src, expected) = build(&mut state, 3, (a, b, c));

    let src = format!("let a={a}; let b={b}; let c={c}; let r = {expr_src};");
    let mut vm = Vm::new();
    let pkg = vm.new_package("main");
    vm.run_string(pkg, src.as_bytes()).unwrap();
    // a, b, c and r are bound in that order at the top level, one slot each.
    vm.stack_value(3).is_truthy() == expected
}

fn assert_all_targets_valid(src: &str) {
    let mut vm = Vm::new();
    let pkg = vm.new_package("main");
    vm.parse(pkg, None, src.as_bytes()).unwrap();
    for i in 0..vm.function_count() {
        let func = vm.function(tracelang::FuncId(i as u32));
        let code = func.code();
        for (pc, instr) in code.iter().enumerate() {
            if matches!(instr.opcode(), Opcode::JMP | Opcode::LOOP) {
                let target = pc as i32 + 1 + instr.jump_offset();
                assert!(
                    target >= 0 && (target as usize) < code.len(),
                    "function {i} pc {pc}: jump target {target} out of range (len {})",
                    code.len()
                );
            }
        }
    }
}

#[test]
fn every_jump_and_loop_targets_a_valid_instruction() {
    assert_all_targets_valid("let a=3; let b=4; let c = a==3 && b==4;");
    assert_all_targets_valid("let a=0; while a<100 { a = a + 1; }");
    assert_all_targets_valid("let a=3; fn hello() { let b=4; } let c=5;");
    assert_all_targets_valid(
        "let a=1; if a==1 { a=2; } elseif a==2 { a=3; } else { a=4; }",
    );
    assert_all_targets_valid("let a=0; loop { a=a+1; if a==10 { a=0; } }");
    assert_all_targets_valid("let a=true; let b=false; let c = a || b && !a;");
    assert_all_targets_valid("let a=1; let b = a==1 || a==2 || a==3;");
}
