use criterion::{
    Criterion,
    black_box,
    criterion_group,
    criterion_main,
};
use orus_vm::{
    chunk::{
        Chunk,
        Loc,
    },
    interpreter::Interpreter,
    opcode::Opcode,
    value::Value,
};

const LOC: Loc = Loc {
    line: 1,
    column: 1,
    file: 0,
};

fn counted_loop_chunk(bound: i32) -> Chunk {
    let mut chunk = Chunk::new();
    let zero = chunk.append_constant(Value::I32(0));
    let bound_const = chunk.append_constant(Value::I32(bound));

    chunk.append_opcode(Opcode::LOAD_CONST, LOC);
    chunk.append_byte(0, LOC);
    chunk.append_short(zero, LOC); // sum = 0
    chunk.append_opcode(Opcode::LOAD_CONST, LOC);
    chunk.append_byte(1, LOC);
    chunk.append_short(zero, LOC); // i = 0
    chunk.append_opcode(Opcode::LOAD_CONST, LOC);
    chunk.append_byte(2, LOC);
    chunk.append_short(bound_const, LOC); // bound

    let loop_start = chunk.len();
    chunk.append_opcode(Opcode::LT_I32_R, LOC);
    chunk.append_byte(3, LOC);
    chunk.append_byte(1, LOC);
    chunk.append_byte(2, LOC);
    chunk.append_opcode(Opcode::JUMP_IF_FALSE_LONG, LOC);
    chunk.append_byte(3, LOC);
    let exit_patch = chunk.open_forward_patch(LOC);

    chunk.append_opcode(Opcode::ADD_I32_R, LOC);
    chunk.append_byte(0, LOC);
    chunk.append_byte(0, LOC);
    chunk.append_byte(1, LOC);
    chunk.append_opcode(Opcode::INC_CHECKED, LOC);
    chunk.append_byte(1, LOC);

    let back_distance = chunk.len() + 3 - loop_start;
    chunk.append_opcode(Opcode::LOOP_LONG, LOC);
    chunk.append_short(back_distance as u16, LOC);

    chunk.close_patch(exit_patch);
    chunk.append_opcode(Opcode::HALT, LOC);
    chunk
}

fn bench_dispatch(c: &mut Criterion) {
    c.bench_function("counted_loop_10k", |b| {
        b.iter(|| {
            let mut vm = Interpreter::new();
            let entry = vm.load_chunk(counted_loop_chunk(10_000), 0).unwrap();
            black_box(vm.run(entry).unwrap());
        });
    });
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
