use basalt_bytecode::{InstructionSeq, IseqBuilder, Opcode, Value};
use basalt_jit::analysis::block_starts;
use basalt_jit::{compile, CompileOptions, ExternTable, StandardLowering};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// `arms` chained ternaries whose results are summed
fn ternary_chain(arms: usize) -> InstructionSeq {
    let mut b = IseqBuilder::new("chain").frame(1, 1);
    b.putobject(Value::fixnum(0));
    for i in 0..arms {
        let else_ = b.new_label();
        let done = b.new_label();
        b.getlocal(0).branch_unless(else_);
        b.putobject(Value::fixnum(i as i64)).jump(done);
        b.mark_label(else_).unwrap();
        b.putobject(Value::fixnum(-(i as i64)));
        b.mark_label(done).unwrap();
        b.emit(Opcode::OptPlus, &[]);
    }
    b.leave();
    b.build().unwrap()
}

fn counting_loop() -> InstructionSeq {
    let mut b = IseqBuilder::new("count").frame(0, 1);
    let top = b.new_label();
    let done = b.new_label();
    b.putobject(Value::fixnum(0)).setlocal(0);
    b.mark_label(top).unwrap();
    b.getlocal(0)
        .putobject(Value::fixnum(1000))
        .emit(Opcode::OptLt, &[])
        .branch_unless(done);
    b.getlocal(0)
        .putobject(Value::fixnum(1))
        .emit(Opcode::OptPlus, &[])
        .setlocal(0)
        .jump(top);
    b.mark_label(done).unwrap();
    b.getlocal(0).leave();
    b.build().unwrap()
}

fn bench_block_starts(c: &mut Criterion) {
    let iseq = ternary_chain(64);
    c.bench_function("block_starts_chain_64", |b| {
        b.iter(|| block_starts(black_box(&iseq)));
    });
}

fn bench_cfg_compile(c: &mut Criterion) {
    let externs = ExternTable::standard();
    let options = CompileOptions::default();
    let mut group = c.benchmark_group("cfg_compile");

    for arms in [4usize, 32, 128] {
        let iseq = ternary_chain(arms);
        group.bench_with_input(BenchmarkId::new("ternary_chain", arms), &iseq, |b, iseq| {
            b.iter(|| compile(black_box(iseq), &externs, &StandardLowering, &options).unwrap());
        });
    }

    let iseq = counting_loop();
    group.bench_function("counting_loop", |b| {
        b.iter(|| compile(black_box(&iseq), &externs, &StandardLowering, &options).unwrap());
    });

    group.finish();
}

#[cfg(feature = "jit")]
fn bench_native(c: &mut Criterion) {
    let engine = basalt_jit::JitEngine::new().unwrap();
    let iseq = counting_loop();

    c.bench_function("native_compile_counting_loop", |b| {
        b.iter(|| engine.compile(black_box(&iseq)).unwrap());
    });

    let method = engine.compile(&iseq).unwrap();
    c.bench_function("native_run_counting_loop", |b| {
        b.iter(|| method.invoke(black_box(Value::NIL), &[]).unwrap());
    });
}

#[cfg(not(feature = "jit"))]
fn bench_native(_c: &mut Criterion) {}

criterion_group!(benches, bench_block_starts, bench_cfg_compile, bench_native);
criterion_main!(benches);
