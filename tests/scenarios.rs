//! End-to-end scenarios: compile a small program and assert the exact
//! instruction sequence emitted into its package's `main` function.

use tracelang::{FuncId, Instruction, Opcode, Primitive, Vm};

fn compile(src: &str) -> (Vm, FuncId) {
    let mut vm = Vm::new();
    let pkg = vm.new_package("main");
    vm.parse(pkg, None, src.as_bytes()).unwrap();
    let main = vm.package(pkg).main().expect("parse always sets main on success");
    (vm, main)
}

/// The absolute instruction index a jump at `pc` targets, given its stored
/// (unbiased) offset — matches the `to - (from + 1)` convention in
/// `parser::jumplist` and the runtime's own `ip + 1 + offset` dispatch.
fn target(pc: usize, instr: Instruction) -> usize {
    (pc as i32 + 1 + instr.jump_offset()) as usize
}

#[test]
fn scenario_1_a_single_float_let() {
    let (vm, main) = compile("let a = 3.1415926535;");
    let code = vm.function(main).code();
    assert_eq!(code.len(), 2);
    assert_eq!(code[0].opcode(), Opcode::SET_N);
    assert_eq!(code[0].args_ad(), (0, 0));
    assert_eq!(code[1].opcode(), Opcode::RET);
    assert_eq!(code[1].args_abc(), (0, 0, 0));
    assert_eq!(vm.constant_count(), 1);
    assert_eq!(vm.constant(0), 3.1415926535);
}

#[test]
fn scenario_2_repeated_lets_dedup_a_shared_constant() {
    let (vm, main) = compile("let a=3; let b=4; let c=10; let d=3;");
    let code = vm.function(main).code();
    let sets: Vec<_> = code[..4].iter().map(|i| i.args_ad()).collect();
    assert!(code[..4].iter().all(|i| i.opcode() == Opcode::SET_N));
    assert_eq!(sets, vec![(0, 0), (1, 1), (2, 2), (3, 0)]);
    assert_eq!(code[4].opcode(), Opcode::RET);
    assert_eq!(vm.constant_count(), 3);
}

#[test]
fn scenario_3_assignment_mov_and_arithmetic_reuse_slots() {
    let (vm, main) = compile("let a=3; let b=4; a=5; b=6; b=a; a=b+7; a=-b;");
    let code = vm.function(main).code();
    let ops: Vec<_> = code.iter().map(|i| i.opcode()).collect();
    assert_eq!(
        ops,
        vec![
            Opcode::SET_N,
            Opcode::SET_N,
            Opcode::SET_N,
            Opcode::SET_N,
            Opcode::MOV,
            Opcode::ADD_LN,
            Opcode::NEG,
            Opcode::RET,
        ]
    );
    assert_eq!(code[0].args_ad(), (0, 0)); // a=3
    assert_eq!(code[1].args_ad(), (1, 1)); // b=4
    assert_eq!(code[2].args_ad(), (0, 2)); // a=5
    assert_eq!(code[3].args_ad(), (1, 3)); // b=6
    assert_eq!(code[4].args_abc(), (1, 0, 0)); // b=a
    assert_eq!(code[5].args_abc(), (0, 1, 4)); // a=b+7
    assert_eq!(code[6].args_abc(), (0, 1, 0)); // a=-b
    assert_eq!(code[7].args_abc(), (0, 0, 0));
    assert_eq!(vm.constant_count(), 5); // 3,4,5,6,7
}

#[test]
fn scenario_4_short_circuit_and_materializes_to_a_boolean_slot() {
    let (vm, main) = compile("let a=3; let b=4; let c = a==3 && b==4;");
    let code = vm.function(main).code();
    let ops: Vec<_> = code.iter().map(|i| i.opcode()).collect();
    // The first conjunct's comparison is negated so its true case (a==3
    // holding) falls straight through into the second conjunct, instead of
    // jumping — see `Parser::goiftrue` / `jumplist::negate_comparisons`.
    // The second (last) conjunct keeps its natural polarity: its own
    // true-list is what the materialization step patches to the `true`
    // branch below.
    assert_eq!(
        ops,
        vec![
            Opcode::SET_N,
            Opcode::SET_N,
            Opcode::NEQ_LN,
            Opcode::JMP,
            Opcode::EQ_LN,
            Opcode::JMP,
            Opcode::SET_P,
            Opcode::JMP,
            Opcode::SET_P,
            Opcode::RET,
        ]
    );
    assert_eq!(code[2].args_abc().0, 0); // a
    assert_eq!(code[4].args_abc().0, 1); // b

    // pc3 (negated first conjunct) exits straight to the `false` branch.
    assert_eq!(target(3, code[3]), 8);
    // pc5 (second conjunct's own true-list) lands on the `true` branch.
    assert_eq!(target(5, code[5]), 6);
    // the unconditional jump after `SET_P true` skips over `SET_P false`.
    assert_eq!(target(7, code[7]), 9);

    assert_eq!(code[6].opcode(), Opcode::SET_P);
    assert_eq!(code[6].args_abc(), (2, Primitive::True.code(), 0));
    assert_eq!(code[8].args_abc(), (2, Primitive::False.code(), 0));
    assert_eq!(code[9].opcode(), Opcode::RET);
}

#[test]
fn scenario_5_a_while_loop_compiles_with_an_inverted_guard_and_runs_to_completion() {
    let (vm, main) = compile("let a=0; while a<100 { a = a + 1; }");
    let code = vm.function(main).code();
    let ops: Vec<_> = code.iter().map(|i| i.opcode()).collect();
    assert_eq!(
        ops,
        vec![
            Opcode::SET_N,
            Opcode::GE_LN, // `a<100` negated, so the exit jump fires on `a>=100`
            Opcode::JMP,
            Opcode::ADD_LN,
            Opcode::LOOP,
            Opcode::RET,
        ]
    );
    assert_eq!(code[1].args_abc(), (0, 1, 0));
    assert_eq!(target(2, code[2]), 5); // exits to RET
    assert_eq!(target(4, code[4]), 1); // loops back to the guard

    let mut vm = vm;
    let pkg = vm.new_package("run");
    vm.run_string(pkg, b"let a=0; while a<100 { a = a + 1; }").unwrap();
    assert_eq!(vm.stack_value(0).as_number(), Some(100.0));
}

#[test]
fn scenario_6_a_named_function_gets_its_own_code_and_a_set_f_in_main() {
    let (vm, main) = compile("let a=3; fn hello() { let b=4; } let c=5;");
    let code = vm.function(main).code();
    let ops: Vec<_> = code.iter().map(|i| i.opcode()).collect();
    assert_eq!(ops, vec![Opcode::SET_N, Opcode::SET_F, Opcode::SET_N, Opcode::RET]);
    assert_eq!(code[0].args_ad(), (0, 0));
    let (slot, func_idx) = code[1].args_ad();
    assert_eq!(slot, 1);
    assert_eq!(code[2].args_ad(), (2, 2));

    let hello = vm.function(FuncId(func_idx as u32));
    let hello_code = hello.code();
    assert_eq!(hello_code.len(), 2);
    assert_eq!(hello_code[0].opcode(), Opcode::SET_N);
    assert_eq!(hello_code[0].args_ad(), (0, 1));
    assert_eq!(hello_code[1].opcode(), Opcode::RET);
}
