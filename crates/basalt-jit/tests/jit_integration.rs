//! End-to-end tests: assemble, compile to native code, and run.

#![cfg(feature = "jit")]

use basalt_bytecode::{method_id, InstructionSeq, IseqBuilder, Opcode, Value};
use basalt_jit::{take_pending_exception, CompileError, JitEngine, JitError};

fn engine() -> JitEngine {
    JitEngine::new().unwrap()
}

fn run(iseq: &InstructionSeq, recv: Value, args: &[Value]) -> Value {
    let method = engine().compile(iseq).unwrap();
    method.invoke(recv, args).unwrap()
}

#[test]
fn test_straight_line_add() {
    let mut b = IseqBuilder::new("add");
    b.putobject(Value::fixnum(1))
        .putobject(Value::fixnum(2))
        .emit(Opcode::OptPlus, &[])
        .leave();
    assert_eq!(run(&b.build().unwrap(), Value::NIL, &[]), Value::fixnum(3));
}

#[test]
fn test_ternary_on_argument() {
    let mut b = IseqBuilder::new("pick").frame(1, 1);
    let else_ = b.new_label();
    let done = b.new_label();
    b.getlocal(0).branch_unless(else_);
    b.putobject(Value::fixnum(10)).jump(done);
    b.mark_label(else_).unwrap();
    b.putobject(Value::fixnum(20));
    b.mark_label(done).unwrap();
    b.leave();
    let method = engine().compile(&b.build().unwrap()).unwrap();

    let pick = |arg: Value| method.invoke(Value::NIL, &[arg]).unwrap();
    assert_eq!(pick(Value::TRUE), Value::fixnum(10));
    assert_eq!(pick(Value::fixnum(0)), Value::fixnum(10));
    assert_eq!(pick(Value::NIL), Value::fixnum(20));
    assert_eq!(pick(Value::FALSE), Value::fixnum(20));
}

#[test]
fn test_short_circuit_and() {
    // a && b
    let mut b = IseqBuilder::new("and").frame(2, 2);
    let done = b.new_label();
    b.getlocal(0).dup().branch_unless(done);
    b.pop().getlocal(1);
    b.mark_label(done).unwrap();
    b.leave();
    let method = engine().compile(&b.build().unwrap()).unwrap();

    let five = Value::fixnum(5);
    assert_eq!(method.invoke(Value::NIL, &[Value::TRUE, five]).unwrap(), five);
    assert_eq!(
        method.invoke(Value::NIL, &[Value::NIL, five]).unwrap(),
        Value::NIL
    );
    assert_eq!(
        method.invoke(Value::NIL, &[Value::FALSE, five]).unwrap(),
        Value::FALSE
    );
}

#[test]
fn test_counting_loop() {
    let mut b = IseqBuilder::new("count").frame(0, 1);
    let top = b.new_label();
    let done = b.new_label();
    b.putobject(Value::fixnum(0)).setlocal(0);
    b.mark_label(top).unwrap();
    b.getlocal(0)
        .putobject(Value::fixnum(10))
        .emit(Opcode::OptLt, &[])
        .branch_unless(done);
    b.getlocal(0)
        .putobject(Value::fixnum(1))
        .emit(Opcode::OptPlus, &[])
        .setlocal(0)
        .jump(top);
    b.mark_label(done).unwrap();
    b.getlocal(0).leave();
    assert_eq!(run(&b.build().unwrap(), Value::NIL, &[]), Value::fixnum(10));
}

#[test]
fn test_case_dispatch() {
    let mut b = IseqBuilder::new("case").frame(1, 1);
    let one = b.new_label();
    let two = b.new_label();
    let other = b.new_label();
    b.getlocal(0).case_dispatch(
        &[(Value::fixnum(1), one), (Value::fixnum(2), two)],
        other,
    );
    b.mark_label(other).unwrap();
    b.putnil().leave();
    b.mark_label(one).unwrap();
    b.putobject(Value::fixnum(100)).leave();
    b.mark_label(two).unwrap();
    b.putobject(Value::fixnum(200)).leave();
    let method = engine().compile(&b.build().unwrap()).unwrap();

    let case = |arg: Value| method.invoke(Value::NIL, &[arg]).unwrap();
    assert_eq!(case(Value::fixnum(1)), Value::fixnum(100));
    assert_eq!(case(Value::fixnum(2)), Value::fixnum(200));
    assert_eq!(case(Value::fixnum(3)), Value::NIL);
    assert_eq!(case(Value::TRUE), Value::NIL);
}

#[test]
fn test_branch_nil() {
    let mut b = IseqBuilder::new("is_nil").frame(1, 1);
    let is_nil = b.new_label();
    b.getlocal(0).branch_nil(is_nil);
    b.putobject(Value::FALSE).leave();
    b.mark_label(is_nil).unwrap();
    b.putobject(Value::TRUE).leave();
    let method = engine().compile(&b.build().unwrap()).unwrap();

    assert_eq!(method.invoke(Value::NIL, &[Value::NIL]).unwrap(), Value::TRUE);
    assert_eq!(
        method.invoke(Value::NIL, &[Value::FALSE]).unwrap(),
        Value::FALSE
    );
}

#[test]
fn test_send_uses_receiver() {
    // self * arg
    let mut b = IseqBuilder::new("mul").frame(1, 1);
    b.putself().getlocal(0).send(method_id::MULT, 1).leave();
    let method = engine().compile(&b.build().unwrap()).unwrap();
    assert_eq!(
        method
            .invoke(Value::fixnum(6), &[Value::fixnum(7)])
            .unwrap(),
        Value::fixnum(42)
    );

    // Unknown receivers answer nil
    assert_eq!(
        method.invoke(Value::TRUE, &[Value::fixnum(7)]).unwrap(),
        Value::NIL
    );
}

#[test]
fn test_throw_sets_pending_exception() {
    let mut b = IseqBuilder::new("raise");
    b.putobject(Value::fixnum(42)).throw(0);
    let result = run(&b.build().unwrap(), Value::NIL, &[]);

    assert_eq!(result, Value::UNDEF);
    assert_eq!(take_pending_exception(), Some(Value::fixnum(42)));
    assert_eq!(take_pending_exception(), None);
}

#[test]
fn test_compile_errors_surface() {
    let mut b = IseqBuilder::new("arr");
    b.putnil().newarray(1).leave();
    let err = engine().compile(&b.build().unwrap()).unwrap_err();
    assert!(matches!(
        err,
        JitError::Compile(CompileError::UnsupportedInstruction {
            opcode: Opcode::NewArray,
            ..
        })
    ));
}
