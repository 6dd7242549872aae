//! Promotion-wrapper synthesis: a scalar function applied to an aggregate
//! actual, serial and parallel variants.

use weft::{
    ast::{verify, Flags, Intent, RetTag},
    Config, Prim, Program,
};

/// `proc g(x: int): int { return x + 1; }` plus `var A: [3] int; g(A);`
fn build(config: Config) -> (Program, weft::ast::SymId, weft::ast::ExprId) {
    let mut prog = Program::new(config);
    let module = prog.add_module("m", false);

    let g = prog.new_fn("g", prog.core.int64, RetTag::Value);
    let x = prog.add_formal(g, "x", prog.core.int64, Intent::Blank);
    let (t, t_def) = prog.new_var("t", prog.core.int64, Flags::TEMP);
    prog.fn_push(g, t_def);
    let add = {
        let lhs = prog.sym_ref(x);
        let one = prog.int_lit(1);
        prog.prim_call(Prim::Add, vec![lhs, one])
    };
    let mv = prog.move_to(t, add);
    prog.fn_push(g, mv);
    let value = prog.sym_ref(t);
    let ret = prog.ret(value);
    prog.fn_push(g, ret);
    prog.insert_fn_in_module(g, module);

    let arr = prog.new_array_type("arr3_int", prog.core.int64);
    let (a, a_def) = prog.new_var("A", arr, Flags::empty());
    let block = prog.arena.module_data(module).block;
    prog.arena.block_push_tail(block, a_def);

    let (b, b_def) = prog.new_var("B", prog.core.unknown, Flags::empty());
    prog.arena.block_push_tail(block, b_def);
    let call = {
        let actual = prog.sym_ref(a);
        prog.named_call("g", vec![actual])
    };
    let mv = prog.move_to(b, call);
    prog.arena.block_push_tail(block, mv);

    weft::resolve::resolve_program(&mut prog);
    (prog, g, call)
}

#[test]
fn serial_promotion_emits_a_for_loop() {
    let (prog, g, call) = build(Config {
        serial: true,
        ..Config::default()
    });

    assert!(!prog.reporter.has_errors());
    let wrapper = prog.arena.resolved_callee(call).expect("promoted call resolves");
    assert_ne!(wrapper, g);
    assert!(prog.arena.sym(wrapper).flags.contains(Flags::PROMOTION_WRAPPER));

    // The wrapper body is a for-loop applying g pointwise.
    let body = prog.arena.fn_data(wrapper).body;
    let loops: Vec<_> = prog
        .arena
        .collect_exprs(body)
        .into_iter()
        .filter(|&e| prog.arena.block_tagged(e, Prim::BlockForLoop))
        .collect();
    assert_eq!(loops.len(), 1);
    let calls_g = prog
        .arena
        .collect_calls(loops[0])
        .into_iter()
        .any(|c| prog.arena.resolved_callee(c) == Some(g));
    assert!(calls_g, "the loop body applies the scalar function");
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}

#[test]
fn parallel_promotion_materializes_a_leader_follower_pair() {
    let (prog, g, call) = build(Config::default());

    assert!(!prog.reporter.has_errors());
    let wrapper = prog.arena.resolved_callee(call).expect("promoted call resolves");
    assert!(prog.arena.sym(wrapper).flags.contains(Flags::PROMOTION_WRAPPER));
    assert_ne!(wrapper, g);

    let fn_names: Vec<String> = prog
        .arena
        .all_fns()
        .into_iter()
        .map(|f| prog.sym_name(f).to_owned())
        .collect();
    assert!(fn_names.iter().any(|n| n == "g_promo_leader"));
    assert!(fn_names.iter().any(|n| n == "g_promo_follower"));

    // The iterator protocol quintuple exists on the synthesized class.
    for method in ["advance", "hasMore", "getValue", "zip1", "zip2", "zip3", "zip4", "_getIterator"] {
        assert!(
            fn_names.iter().any(|n| n == method),
            "missing iterator protocol member {method}"
        );
    }

    // An iterator class was synthesized and tagged.
    let has_iterator_class = prog.arena.type_ids().any(|t| {
        prog.arena.ty_has_flag(t, Flags::ITERATOR_CLASS)
    });
    assert!(has_iterator_class);

    // Promotion is a quietable warning.
    assert!(!prog.reporter.warnings().is_empty());
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}
