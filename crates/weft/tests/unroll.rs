//! Param-for unrolling: a loop with compile-time bounds is replaced by one
//! substituted body copy per iteration.

use weft::{
    ast::{verify, ExprKind, Immediate, Intent, RetTag},
    Config, Prim, Program,
};

#[test]
fn param_for_unrolls_to_three_substituted_copies() {
    // for param i in 1..3 do writeln(i);
    let mut prog = Program::new(Config::default());
    let module = prog.add_module("m", false);

    let writeln = prog.new_fn("writeln", prog.core.void, RetTag::Value);
    prog.add_formal(writeln, "x", prog.core.any, Intent::Blank);
    let ret = prog.ret_void();
    prog.fn_push(writeln, ret);
    prog.insert_fn_in_module(writeln, module);

    let block = prog.arena.module_data(module).block;
    let (i, i_def) = prog.new_param_var("i", Immediate::Int(0));
    prog.arena.block_push_tail(block, i_def);

    let loop_block = prog.block();
    let call = {
        let arg = prog.sym_ref(i);
        prog.named_call("writeln", vec![arg])
    };
    prog.arena.block_push_tail(loop_block, call);
    prog.arena.block_push_tail(block, loop_block);
    let info = {
        let idx = prog.sym_ref(i);
        let lo = prog.int_lit(1);
        let hi = prog.int_lit(3);
        let stride = prog.int_lit(1);
        prog.prim_call(Prim::BlockParamLoop, vec![idx, lo, hi, stride])
    };
    prog.set_block_info(loop_block, info);

    weft::resolve::resolve_program(&mut prog);

    assert!(!prog.reporter.has_errors());
    assert!(!prog.arena.expr(loop_block).in_tree(), "the loop block is replaced");

    // Three copies, each calling writeln with the substituted literal.
    let copies: Vec<_> = prog
        .arena
        .items(prog.arena.block_body(block))
        .into_iter()
        .filter(|&e| matches!(prog.arena.expr(e).kind, ExprKind::Block { .. }))
        .collect();
    assert_eq!(copies.len(), 3);
    let mut seen = Vec::new();
    for copy in copies {
        let calls = prog.arena.collect_calls(copy);
        let call = calls
            .into_iter()
            .find(|&c| prog.arena.resolved_callee(c).is_some())
            .expect("each copy calls writeln");
        let actual = prog.arena.actual(call, 0);
        let sym = prog.arena.sym_ref(actual).expect("literal actual");
        seen.push(prog.arena.sym(sym).immediate());
    }
    assert_eq!(
        seen,
        vec![
            Some(Immediate::Int(1)),
            Some(Immediate::Int(2)),
            Some(Immediate::Int(3))
        ]
    );

    // One shared instantiation serves all three copies.
    let instances: Vec<_> = prog
        .arena
        .all_fns()
        .into_iter()
        .filter(|&g| prog.arena.fn_data(g).instantiated_from == Some(writeln))
        .collect();
    assert_eq!(instances.len(), 1);
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}
