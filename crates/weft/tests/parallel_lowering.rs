//! Begin-block lowering: nested function extraction, heap promotion of
//! captured variables, argument bundling, and task dispatch.

use weft::{
    ast::{verify, ExprKind, Flags, RetTag},
    Config, Prim, Program,
};

#[test]
fn begin_block_lowers_to_bundle_wrapper_and_task_dispatch() {
    // var x = 0; begin { x = 1; }
    let mut prog = Program::new(Config::default());
    let module = prog.add_module("m", false);

    let main = prog.new_fn("main", prog.core.void, RetTag::Value);
    let (x, x_def) = prog.new_var("x", prog.core.int64, Flags::empty());
    prog.fn_push(main, x_def);
    let zero = prog.int_lit(0);
    let init = prog.move_to(x, zero);
    prog.fn_push(main, init);

    let begin_block = prog.block();
    let one = prog.int_lit(1);
    let assign = prog.move_to(x, one);
    prog.arena.block_push_tail(begin_block, assign);
    prog.fn_push(main, begin_block);
    let info = prog.prim_call(Prim::BlockBegin, vec![]);
    prog.set_block_info(begin_block, info);

    let ret = prog.ret_void();
    prog.fn_push(main, ret);
    prog.insert_fn_in_module(main, module);
    prog.main_fn = Some(main);

    weft::resolve::resolve_program(&mut prog);
    assert!(!prog.reporter.has_errors());
    weft::passes::parallel::parallel(&mut prog);

    // A nested task function flagged for its construct.
    let begin_fn = prog
        .arena
        .all_fns()
        .into_iter()
        .find(|&f| prog.sym_name(f) == "begin_fn")
        .expect("nested begin function exists");
    assert!(prog.arena.sym(begin_fn).flags.contains(Flags::BEGIN));

    // The captured variable moved to a heap wrapper class.
    let x_ty = prog.arena.sym(x).ty;
    assert!(
        prog.arena.ty_has_flag(x_ty, Flags::HEAP),
        "captured-and-assigned variable is heap promoted"
    );

    // The bundle class carries the live-ins as fields, x first.
    let bundle_ty = prog
        .arena
        .type_ids()
        .find(|&t| prog.type_name(t) == "_class_locals_begin_fn")
        .expect("bundle class exists");
    let fields = prog.arena.fields(bundle_ty);
    assert!(!fields.is_empty());
    assert_eq!(prog.sym_name(fields[0]), "_1_x");
    assert_eq!(prog.arena.sym(fields[0]).ty, x_ty);
    // The end count travels in the bundle too.
    assert!(
        fields
            .iter()
            .any(|&f| prog.sym_name(f).contains("_endCount")),
        "end count is threaded through the bundle"
    );

    // The wrapper is marked as a begin block.
    let wrapper = prog
        .arena
        .all_fns()
        .into_iter()
        .find(|&f| prog.sym_name(f) == "wrapbegin_fn")
        .expect("unpacking wrapper exists");
    assert!(prog.arena.sym(wrapper).flags.contains(Flags::BEGIN_BLOCK));

    // The begin site dispatches onto the runtime task list.
    let body = prog.arena.fn_data(main).body;
    let dispatches = prog
        .arena
        .collect_calls(body)
        .into_iter()
        .filter(|&c| prog.arena.is_prim(c, Prim::TaskListAddBegin))
        .count();
    assert_eq!(dispatches, 1);

    // No free was inserted for the escaping variable.
    let frees = prog
        .arena
        .collect_calls(body)
        .into_iter()
        .filter(|&c| {
            prog.arena.is_prim(c, Prim::ChplFree)
                && prog
                    .arena
                    .actuals(c)
                    .first()
                    .and_then(|&a| prog.arena.sym_ref(a))
                    == Some(x)
        })
        .count();
    assert_eq!(frees, 0, "task-captured variables are not freed locally");

    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}

#[test]
fn non_escaping_heap_variable_is_freed_in_its_defining_function() {
    // A cobegin (blocking) capture that mutates: promoted but freed.
    let mut prog = Program::new(Config::default());
    let module = prog.add_module("m", false);

    let main = prog.new_fn("main", prog.core.void, RetTag::Value);
    let (x, x_def) = prog.new_var("x", prog.core.int64, Flags::HEAP_ALLOCATE);
    prog.fn_push(main, x_def);
    let zero = prog.int_lit(0);
    let init = prog.move_to(x, zero);
    prog.fn_push(main, init);

    let block = prog.block();
    let one = prog.int_lit(1);
    let assign = prog.move_to(x, one);
    prog.arena.block_push_tail(block, assign);
    prog.fn_push(main, block);
    let info = prog.prim_call(Prim::BlockCobegin, vec![]);
    prog.set_block_info(block, info);

    let ret = prog.ret_void();
    prog.fn_push(main, ret);
    prog.insert_fn_in_module(main, module);
    prog.main_fn = Some(main);

    weft::resolve::resolve_program(&mut prog);
    weft::passes::parallel::parallel(&mut prog);

    // Promoted (HEAP_ALLOCATE is a standing request) and freed before the
    // function returns, since a cobegin joins before leaving scope.
    let x_ty = prog.arena.sym(x).ty;
    assert!(prog.arena.ty_has_flag(x_ty, Flags::HEAP));
    let body = prog.arena.fn_data(main).body;
    let frees = prog
        .arena
        .collect_calls(body)
        .into_iter()
        .filter(|&c| prog.arena.is_prim(c, Prim::ChplFree))
        .filter(|&c| {
            prog.arena
                .actuals(c)
                .first()
                .and_then(|&a| prog.arena.sym_ref(a))
                == Some(x)
        })
        .count();
    assert_eq!(frees, 1, "a joined capture frees its heap cell");
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}

#[test]
fn on_block_forks_to_the_target_locale() {
    // on 1 { x = 1; }
    let mut prog = Program::new(Config::default());
    let module = prog.add_module("m", false);

    let main = prog.new_fn("main", prog.core.void, RetTag::Value);
    let (x, x_def) = prog.new_var("x", prog.core.int64, Flags::empty());
    prog.fn_push(main, x_def);

    let block = prog.block();
    let one = prog.int_lit(1);
    let assign = prog.move_to(x, one);
    prog.arena.block_push_tail(block, assign);
    prog.fn_push(main, block);
    let info = {
        let locale = prog.int_lit(1);
        prog.prim_call(Prim::BlockOn, vec![locale])
    };
    prog.set_block_info(block, info);

    let ret = prog.ret_void();
    prog.fn_push(main, ret);
    prog.insert_fn_in_module(main, module);
    prog.main_fn = Some(main);

    weft::resolve::resolve_program(&mut prog);
    weft::passes::parallel::parallel(&mut prog);

    let on_fn = prog
        .arena
        .all_fns()
        .into_iter()
        .find(|&f| prog.sym_name(f) == "on_fn")
        .expect("on function exists");
    assert!(prog.arena.sym(on_fn).flags.contains(Flags::ON));
    // The dummy locale formal comes first.
    let formals = prog.arena.formals(on_fn);
    assert_eq!(prog.sym_name(formals[0]), "_dummy_locale_arg");

    let body = prog.arena.fn_data(main).body;
    let forks = prog
        .arena
        .collect_calls(body)
        .into_iter()
        .filter(|&c| prog.arena.is_prim(c, Prim::OnFork))
        .count();
    assert_eq!(forks, 1);

    // Blocking forks free the bundle at the call site.
    let has_bundle_free = prog
        .arena
        .collect_calls(body)
        .into_iter()
        .any(|c| prog.arena.is_prim(c, Prim::ChplFree));
    assert!(has_bundle_free);
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}

#[test]
fn lowering_output_survives_integrity_checks_with_nested_constructs() {
    // begin { on 1 { x = 1; } }
    let mut prog = Program::new(Config::default());
    let module = prog.add_module("m", false);

    let main = prog.new_fn("main", prog.core.void, RetTag::Value);
    let (x, x_def) = prog.new_var("x", prog.core.int64, Flags::empty());
    prog.fn_push(main, x_def);

    let on_block = prog.block();
    let one = prog.int_lit(1);
    let assign = prog.move_to(x, one);
    prog.arena.block_push_tail(on_block, assign);
    let on_info = {
        let locale = prog.int_lit(1);
        prog.prim_call(Prim::BlockOn, vec![locale])
    };

    let begin_block = prog.block();
    prog.arena.block_push_tail(begin_block, on_block);
    prog.fn_push(main, begin_block);
    prog.set_block_info(on_block, on_info);
    let begin_info = prog.prim_call(Prim::BlockBegin, vec![]);
    prog.set_block_info(begin_block, begin_info);

    let ret = prog.ret_void();
    prog.fn_push(main, ret);
    prog.insert_fn_in_module(main, module);
    prog.main_fn = Some(main);

    weft::resolve::resolve_program(&mut prog);
    weft::passes::parallel::parallel(&mut prog);

    // Both constructs extracted.
    let names: Vec<String> = prog
        .arena
        .all_fns()
        .into_iter()
        .map(|f| prog.sym_name(f).to_owned())
        .collect();
    assert!(names.iter().any(|n| n == "begin_fn"));
    assert!(names.iter().any(|n| n == "on_fn"));
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}
