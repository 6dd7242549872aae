//! Virtual dispatch construction: root detection, table completeness, and
//! the conditional class-id chain at call sites.

use weft::{
    ast::{verify, ExprKind, Flags, Intent, RetTag},
    Config, Prim, Program,
};

/// Two classes `A` and `B <: A`, each with a `value` method, plus a caller
/// invoking `value` on a statically-`A` receiver.
fn build(limit: u32) -> (Program, weft::ast::TypeId, weft::ast::TypeId, weft::ast::SymId, weft::ast::SymId, weft::ast::SymId) {
    let mut prog = Program::new(Config {
        conditional_dynamic_dispatch_limit: limit,
        ..Config::default()
    });
    let module = prog.add_module("m", false);

    let class_a = prog.new_class("A");
    let class_b = prog.new_class("B");
    // Rebuild B's parent edge to A instead of object.
    prog.arena.ty_mut(class_b).dispatch_parents.clear();
    prog.add_dispatch_parent(class_b, class_a);

    let method = |prog: &mut Program, receiver, result: i64| {
        let f = prog.new_fn("value", prog.core.int64, RetTag::Value);
        prog.arena.sym_mut(f).flags |= Flags::METHOD;
        prog.add_formal(f, "this", receiver, Intent::Blank);
        let lit = prog.int_lit(result);
        let ret = prog.ret(lit);
        prog.fn_push(f, ret);
        prog.insert_fn_in_module(f, module);
        f
    };
    let value_a = method(&mut prog, class_a, 1);
    let value_b = method(&mut prog, class_b, 2);

    let main = prog.new_fn("main", prog.core.void, RetTag::Value);
    let (obj, obj_def) = prog.new_var("obj", class_a, Flags::empty());
    prog.fn_push(main, obj_def);
    let call = {
        let receiver = prog.sym_ref(obj);
        prog.fn_call(value_a, vec![receiver])
    };
    let (r, r_def) = prog.new_var("r", prog.core.int64, Flags::empty());
    prog.fn_push(main, r_def);
    let mv = prog.move_to(r, call);
    prog.fn_push(main, mv);
    let ret = prog.ret_void();
    prog.fn_push(main, ret);
    prog.insert_fn_in_module(main, module);
    prog.main_fn = Some(main);

    (prog, class_a, class_b, value_a, value_b, main)
}

#[test]
fn vmt_entries_resolve_to_the_most_specific_override() {
    let (mut prog, class_a, class_b, value_a, value_b, _main) = build(3);
    let virt = weft::resolve::resolve_program(&mut prog);

    assert!(!prog.reporter.has_errors());
    assert!(virt.roots.contains(&value_a), "A.value is an override root");
    // (A, value) -> A.value, (B, value) -> B.value.
    assert_eq!(virt.entry(class_a, value_a), Some(value_a));
    assert_eq!(virt.entry(class_b, value_a), Some(value_b));
    assert!(prog.arena.sym(value_a).flags.contains(Flags::VIRTUAL));
    assert!(prog.arena.sym(value_b).flags.contains(Flags::VIRTUAL));
}

#[test]
fn few_overrides_lower_to_a_class_id_test_chain() {
    let (mut prog, _a, _b, _va, value_b, main) = build(3);
    weft::resolve::resolve_program(&mut prog);

    // The call statement became an if-chain on class ids with a direct call
    // to the override in the taken branch.
    let body = prog.arena.fn_data(main).body;
    let cond = prog
        .arena
        .collect_exprs(body)
        .into_iter()
        .find(|&e| matches!(prog.arena.expr(e).kind, ExprKind::Cond { .. }))
        .expect("dispatch chain conditional exists");
    let ExprKind::Cond { cond: test, then_block, .. } = prog.arena.expr(cond).kind else {
        unreachable!()
    };
    assert!(prog.arena.is_prim(test, Prim::TestCid));
    let calls_override = prog
        .arena
        .collect_calls(then_block)
        .into_iter()
        .any(|c| prog.arena.resolved_callee(c) == Some(value_b));
    assert!(calls_override, "the taken branch calls the override directly");
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}

#[test]
fn many_overrides_stay_an_indirect_vmt_call() {
    let (mut prog, _a, _b, _va, _vb, main) = build(0);
    weft::resolve::resolve_program(&mut prog);

    let body = prog.arena.fn_data(main).body;
    let has_vmt_call = prog
        .arena
        .collect_calls(body)
        .into_iter()
        .any(|c| prog.arena.is_prim(c, Prim::VmtCall));
    assert!(has_vmt_call, "above the limit the call goes through the table");
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}
