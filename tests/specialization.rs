//! Integration coverage for profile-guided specialization: a function
//! promoted to a typed chunk once hot enough, and the deoptimization path
//! that falls back to the generic chunk when a guard observes the wrong
//! shape.

use orus_vm::{
    chunk::{
        Chunk,
        Loc,
    },
    error::VmError,
    interpreter::{
        Interpreter,
        VmConfig,
    },
    opcode::Opcode,
    value::Value,
};

const LOC: Loc = Loc {
    line: 1,
    column: 1,
    file: 0,
};

/// `f(a, b) = a + b`, arity 2, a single qualifying `ADD_I32_R`.
fn add_chunk() -> Chunk {
    let mut chunk = Chunk::new();
    chunk.append_opcode(Opcode::ADD_I32_R, LOC);
    chunk.append_byte(2, LOC);
    chunk.append_byte(0, LOC);
    chunk.append_byte(1, LOC);
    chunk.append_opcode(Opcode::RETURN, LOC);
    chunk.append_byte(2, LOC);
    chunk
}

/// Caller that invokes `callee` once per loop iteration with two i32
/// arguments (the loop counter and the constant 1, held in adjacent
/// registers so `CALL`'s contiguous-argument window picks both up),
/// `bound` times, summing the results into r0.
///
/// Register layout: r0 sum, r1 bound, r2 comparison scratch, r3 loop
/// counter / arg0, r4 constant 1 / arg1, r5 call result.
fn caller_chunk(callee: u32, bound: i32) -> Chunk {
    let mut chunk = Chunk::new();
    let zero = chunk.append_constant(Value::I32(0));
    let one = chunk.append_constant(Value::I32(1));
    let bound_const = chunk.append_constant(Value::I32(bound));

    chunk.append_opcode(Opcode::LOAD_CONST, LOC);
    chunk.append_byte(0, LOC);
    chunk.append_short(zero, LOC); // sum = 0
    chunk.append_opcode(Opcode::LOAD_CONST, LOC);
    chunk.append_byte(3, LOC);
    chunk.append_short(zero, LOC); // i = 0
    chunk.append_opcode(Opcode::LOAD_CONST, LOC);
    chunk.append_byte(1, LOC);
    chunk.append_short(bound_const, LOC); // bound
    chunk.append_opcode(Opcode::LOAD_CONST, LOC);
    chunk.append_byte(4, LOC);
    chunk.append_short(one, LOC); // arg b, constant 1

    let loop_start = chunk.len();
    chunk.append_opcode(Opcode::LT_I32_R, LOC);
    chunk.append_byte(2, LOC);
    chunk.append_byte(3, LOC);
    chunk.append_byte(1, LOC); // r2 = i < bound
    chunk.append_opcode(Opcode::JUMP_IF_FALSE_LONG, LOC);
    chunk.append_byte(2, LOC);
    let exit_patch = chunk.open_forward_patch(LOC);

    chunk.append_opcode(Opcode::CALL, LOC);
    chunk.append_byte(5, LOC); // dst
    chunk.append_byte(3, LOC); // first_arg: r3 (i), r4 (one)
    chunk.append_byte(callee as u8, LOC);
    chunk.append_opcode(Opcode::ADD_I32_R, LOC);
    chunk.append_byte(0, LOC);
    chunk.append_byte(0, LOC);
    chunk.append_byte(5, LOC); // sum += call result
    chunk.append_opcode(Opcode::INC_CHECKED, LOC);
    chunk.append_byte(3, LOC); // i += 1

    let back_distance = chunk.len() + 3 - loop_start;
    chunk.append_opcode(Opcode::LOOP_LONG, LOC);
    chunk.append_short(back_distance as u16, LOC);

    chunk.close_patch(exit_patch);
    chunk.append_opcode(Opcode::HALT, LOC);
    chunk
}

#[test]
fn a_function_becomes_specialized_once_call_counts_cross_threshold() {
    let mut vm = Interpreter::with_config(VmConfig::new().with_specialization_hit_threshold(5));
    vm.profiler_mut().set_active(true);
    let callee = vm.load_chunk(add_chunk(), 2).unwrap();
    let entry = vm.load_chunk(caller_chunk(callee, 10), 0).unwrap();

    assert!(!vm.is_specialized(callee));
    let result = vm.run(entry).unwrap();
    // sum of (i + 1) for i in 0..10 = 0+1 + 1+1 + ... + 9+1 = 55
    assert_eq!(result, Value::I32(55));
    assert!(vm.is_specialized(callee), "10 calls should cross a threshold of 5");
}

#[test]
fn specialization_never_triggers_below_threshold() {
    let mut vm = Interpreter::with_config(VmConfig::new().with_specialization_hit_threshold(1000));
    vm.profiler_mut().set_active(true);
    let callee = vm.load_chunk(add_chunk(), 2).unwrap();
    let entry = vm.load_chunk(caller_chunk(callee, 3), 0).unwrap();

    let result = vm.run(entry).unwrap();
    // sum of (i + 1) for i in 0..3 = 1 + 2 + 3 = 6
    assert_eq!(result, Value::I32(6));
    assert!(!vm.is_specialized(callee));
}

/// Builds a direct single-call chunk invoking `callee` with the two given
/// constants as arguments, returning whatever the call returns.
fn direct_call_chunk(callee: u32, a: Value, b: Value) -> Chunk {
    let mut chunk = Chunk::new();
    let ca = chunk.append_constant(a);
    let cb = chunk.append_constant(b);
    chunk.append_opcode(Opcode::LOAD_CONST, LOC);
    chunk.append_byte(0, LOC);
    chunk.append_short(ca, LOC);
    chunk.append_opcode(Opcode::LOAD_CONST, LOC);
    chunk.append_byte(1, LOC);
    chunk.append_short(cb, LOC);
    chunk.append_opcode(Opcode::CALL, LOC);
    chunk.append_byte(2, LOC);
    chunk.append_byte(0, LOC);
    chunk.append_byte(callee as u8, LOC);
    chunk.append_opcode(Opcode::MOVE, LOC);
    chunk.append_byte(0, LOC);
    chunk.append_byte(2, LOC);
    chunk.append_opcode(Opcode::HALT, LOC);
    chunk
}

/// Once specialized, `MOVE_I32_TYPED`'s guard prologue sees a non-i32
/// argument on a later call and deoptimizes to the generic chunk instead of
/// panicking. `add_chunk`'s generic form is itself i32-only, so the
/// now-unboxed f64 still fails its own type check there — the guard's job
/// is only to route the call correctly, not to make an ill-typed call
/// succeed.
#[test]
fn a_guard_failure_on_a_specialized_chunk_deoptimizes_and_the_generic_path_then_reports_its_own_type_error() {
    let mut vm = Interpreter::with_config(VmConfig::new().with_specialization_hit_threshold(2));
    vm.profiler_mut().set_active(true);
    let callee = vm.load_chunk(add_chunk(), 2).unwrap();

    // Warm the callee up with all-i32 calls until it specializes.
    let warm_entry = vm.load_chunk(caller_chunk(callee, 5), 0).unwrap();
    vm.run(warm_entry).unwrap();
    assert!(vm.is_specialized(callee));

    // Call it directly with one i32 and one f64 argument: the specialized
    // chunk's MOVE_I32_TYPED guard prologue observes the mismatch and
    // deoptimizes rather than panicking, but the generic chunk it falls
    // back to is the same i32-only bytecode and rejects the f64 operand.
    let entry = vm.load_chunk(direct_call_chunk(callee, Value::I32(40), Value::F64(2.5)), 0).unwrap();
    let err = vm.run(entry).unwrap_err();
    assert!(
        matches!(err, VmError::Runtime(_)),
        "the generic ADD_I32_R path still rejects an f64 operand after falling back"
    );
}

/// The deopt stub only routes a bad call to the generic chunk; it does not
/// leave the function broken. A later call with valid i32 arguments still
/// completes cleanly, whether by re-passing the specialized chunk's guards
/// or by falling through to the generic path again.
#[test]
fn a_valid_call_after_a_guard_failure_still_completes_without_error() {
    let mut vm = Interpreter::with_config(VmConfig::new().with_specialization_hit_threshold(2));
    vm.profiler_mut().set_active(true);
    let callee = vm.load_chunk(add_chunk(), 2).unwrap();

    let warm_entry = vm.load_chunk(caller_chunk(callee, 5), 0).unwrap();
    vm.run(warm_entry).unwrap();
    assert!(vm.is_specialized(callee));

    // First, provoke a guard failure and deoptimization.
    let bad_entry = vm.load_chunk(direct_call_chunk(callee, Value::I32(40), Value::F64(2.5)), 0).unwrap();
    vm.run(bad_entry).unwrap_err();

    // Then call again with valid i32 arguments: this must succeed, not
    // stay wedged in whatever state the deoptimized frame left behind.
    let good_entry = vm.load_chunk(direct_call_chunk(callee, Value::I32(40), Value::I32(2)), 0).unwrap();
    let result = vm.run(good_entry).unwrap();
    assert_eq!(result, Value::I32(42));
}
