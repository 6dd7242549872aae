//! End-to-end resolution scenarios: constant folding, generic
//! instantiation memoization, wrapper synthesis, ambiguity reporting, and
//! try-frame recovery.

use weft::{
    ast::{verify, Flags, Immediate, Intent, RetTag},
    Config, Prim, Program,
};

fn program() -> Program {
    Program::new(Config::default())
}

#[test]
fn param_arithmetic_folds_and_def_is_pruned() {
    // param x = 2 + 3 * 4;
    let mut prog = program();
    let module = prog.add_module("m", false);
    let block = prog.arena.module_data(module).block;

    let (x, x_def) = prog.new_param_var("x", Immediate::Int(0));
    prog.arena.block_push_tail(block, x_def);
    let three = prog.int_lit(3);
    let four = prog.int_lit(4);
    let mul = prog.prim_call(Prim::Mul, vec![three, four]);
    let two = prog.int_lit(2);
    let add = prog.prim_call(Prim::Add, vec![two, mul]);
    let mv = prog.move_to(x, add);
    prog.arena.block_push_tail(block, mv);

    weft::resolve::resolve_program(&mut prog);

    assert_eq!(prog.arena.sym(x).immediate(), Some(Immediate::Int(14)));
    assert!(!prog.arena.expr(x_def).in_tree(), "param def should be pruned");
    assert!(!prog.reporter.has_errors());
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}

#[test]
fn generic_instantiation_is_memoized_across_call_sites() {
    // proc f(x: ?T) { } ... f(1); f(2);
    let mut prog = program();
    let module = prog.add_module("m", false);

    let f = prog.new_fn("f", prog.core.void, RetTag::Value);
    prog.add_formal(f, "x", prog.core.any, Intent::Blank);
    let ret = prog.ret_void();
    prog.fn_push(f, ret);
    prog.insert_fn_in_module(f, module);

    let block = prog.arena.module_data(module).block;
    let one = prog.int_lit(1);
    let call1 = prog.named_call("f", vec![one]);
    prog.arena.block_push_tail(block, call1);
    let two = prog.int_lit(2);
    let call2 = prog.named_call("f", vec![two]);
    prog.arena.block_push_tail(block, call2);

    weft::resolve::resolve_program(&mut prog);

    assert!(!prog.reporter.has_errors());
    let instances: Vec<_> = prog
        .arena
        .all_fns()
        .into_iter()
        .filter(|&g| prog.arena.fn_data(g).instantiated_from == Some(f))
        .collect();
    assert_eq!(instances.len(), 1, "both call sites share one instantiation");
    let instance = instances[0];
    assert_eq!(prog.arena.resolved_callee(call1), Some(instance));
    assert_eq!(prog.arena.resolved_callee(call2), Some(instance));
    // The generic original is unreached after resolution.
    assert!(prog.arena.sym(f).def_point.is_none() || !prog.arena.expr(prog.arena.sym(f).def_point.unwrap()).in_tree());
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}

#[test]
fn missing_trailing_argument_goes_through_a_default_wrapper() {
    // proc h(a: int, b: int = 5) { } ... h(1);
    let mut prog = program();
    let module = prog.add_module("m", false);

    let h = prog.new_fn("h", prog.core.void, RetTag::Value);
    prog.add_formal(h, "a", prog.core.int64, Intent::Blank);
    let b = prog.add_formal(h, "b", prog.core.int64, Intent::Blank);
    let five = prog.int_lit(5);
    prog.set_formal_default(b, five);
    let ret = prog.ret_void();
    prog.fn_push(h, ret);
    prog.insert_fn_in_module(h, module);

    let block = prog.arena.module_data(module).block;
    let one = prog.int_lit(1);
    let call = prog.named_call("h", vec![one]);
    prog.arena.block_push_tail(block, call);

    weft::resolve::resolve_program(&mut prog);

    assert!(!prog.reporter.has_errors());
    let target = prog.arena.resolved_callee(call).expect("call resolves");
    assert!(prog.arena.sym(target).flags.contains(Flags::DEFAULT_WRAPPER));
    assert_ne!(target, h);
    // The wrapper's single formal matches the provided actual.
    assert_eq!(prog.arena.formals(target).len(), 1);
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}

#[test]
fn int_actual_against_real_formal_goes_through_a_coercion_wrapper() {
    // proc k(x: real) { } ... k(3);  (3 widens to real64)
    let mut prog = program();
    let module = prog.add_module("m", false);

    let k = prog.new_fn("k", prog.core.void, RetTag::Value);
    prog.add_formal(k, "x", prog.core.real64, Intent::Blank);
    let ret = prog.ret_void();
    prog.fn_push(k, ret);
    prog.insert_fn_in_module(k, module);

    let block = prog.arena.module_data(module).block;
    let three = prog.int_lit(3);
    let call = prog.named_call("k", vec![three]);
    prog.arena.block_push_tail(block, call);

    weft::resolve::resolve_program(&mut prog);

    assert!(!prog.reporter.has_errors());
    let target = prog.arena.resolved_callee(call).expect("call resolves");
    assert!(prog.arena.sym(target).flags.contains(Flags::COERCE_WRAPPER));
    // The wrapper body carries an explicit cast.
    let body = prog.arena.fn_data(target).body;
    let has_cast = prog
        .arena
        .collect_calls(body)
        .into_iter()
        .any(|c| prog.arena.is_prim(c, Prim::Cast));
    assert!(has_cast, "coercion wrapper casts its actual");
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}

#[test]
fn keyword_actuals_out_of_order_go_through_an_order_wrapper() {
    // proc p(a: int, b: real) { } ... p(b = 1.5, a = 2);
    let mut prog = program();
    let module = prog.add_module("m", false);

    let p = prog.new_fn("p", prog.core.void, RetTag::Value);
    prog.add_formal(p, "a", prog.core.int64, Intent::Blank);
    prog.add_formal(p, "b", prog.core.real64, Intent::Blank);
    let ret = prog.ret_void();
    prog.fn_push(p, ret);
    prog.insert_fn_in_module(p, module);

    let block = prog.arena.module_data(module).block;
    let b_val = prog.real_lit(1.5);
    let b_actual = prog.named_actual("b", b_val);
    let a_val = prog.int_lit(2);
    let a_actual = prog.named_actual("a", a_val);
    let call = prog.named_call("p", vec![b_actual, a_actual]);
    prog.arena.block_push_tail(block, call);

    weft::resolve::resolve_program(&mut prog);

    assert!(!prog.reporter.has_errors());
    let target = prog.arena.resolved_callee(call).expect("call resolves");
    assert!(prog.arena.sym(target).flags.contains(Flags::ORDER_WRAPPER));
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}

#[test]
fn identical_candidates_are_reported_ambiguous() {
    let mut prog = program();
    let module = prog.add_module("m", false);

    for _ in 0..2 {
        let f = prog.new_fn("dup", prog.core.void, RetTag::Value);
        prog.add_formal(f, "x", prog.core.int64, Intent::Blank);
        let ret = prog.ret_void();
        prog.fn_push(f, ret);
        prog.insert_fn_in_module(f, module);
    }

    let block = prog.arena.module_data(module).block;
    let one = prog.int_lit(1);
    let call = prog.named_call("dup", vec![one]);
    prog.arena.block_push_tail(block, call);

    weft::resolve::resolve_program(&mut prog);

    assert!(prog.reporter.has_errors());
    let rendered = format!("{}", prog.reporter.errors()[0]);
    assert!(rendered.contains("ambiguous"), "got: {rendered}");
}

#[test]
fn unresolved_call_is_reported_but_resolution_continues() {
    let mut prog = program();
    let module = prog.add_module("m", false);

    let g = prog.new_fn("g", prog.core.void, RetTag::Value);
    let ret = prog.ret_void();
    prog.fn_push(g, ret);
    prog.insert_fn_in_module(g, module);

    let block = prog.arena.module_data(module).block;
    let bad = prog.named_call("nosuch", vec![]);
    prog.arena.block_push_tail(block, bad);
    let good = prog.named_call("g", vec![]);
    prog.arena.block_push_tail(block, good);

    weft::resolve::resolve_program(&mut prog);

    // The bad call is reported; the good one still resolves.
    assert_eq!(prog.reporter.errors().len(), 1);
    assert!(prog.arena.resolved_callee(good).is_some());
}

#[test]
fn try_frame_substitutes_the_else_branch_on_failure() {
    let mut prog = program();
    let module = prog.add_module("m", false);

    let g = prog.new_fn("g", prog.core.void, RetTag::Value);
    let ret = prog.ret_void();
    prog.fn_push(g, ret);
    prog.insert_fn_in_module(g, module);

    let bad = prog.named_call("nosuch", vec![]);
    let then_block = prog.block_of(vec![bad]);
    let good = prog.named_call("g", vec![]);
    let else_block = prog.block_of(vec![good]);
    let try_ref = prog.sym_ref(prog.try_token);
    let try_cond = prog.cond(try_ref, then_block, Some(else_block));
    let block = prog.arena.module_data(module).block;
    prog.arena.block_push_tail(block, try_cond);

    weft::resolve::resolve_program(&mut prog);

    // Recovered: no user error, the else branch is in the tree, the failed
    // branch is not.
    assert!(!prog.reporter.has_errors());
    assert!(prog.arena.expr(else_block).in_tree());
    assert!(!prog.arena.expr(then_block).in_tree());
    assert!(prog.arena.resolved_callee(good).is_some());
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}
