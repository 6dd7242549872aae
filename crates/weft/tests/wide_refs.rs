//! Wide-reference insertion and `local`-block narrowing.

use weft::{
    ast::{verify, ExprKind, Flags, RetTag},
    Config, Prim, Program,
};

/// `var c = new C(); on 1 { local { var y = c; } }`
fn build() -> (Program, weft::ast::SymId) {
    let mut prog = Program::new(Config::default());
    let module = prog.add_module("m", false);
    let class_c = prog.new_class("C");

    let main = prog.new_fn("main", prog.core.void, RetTag::Value);
    let (c, c_def) = prog.new_var("c", class_c, Flags::empty());
    prog.fn_push(main, c_def);
    let alloc = {
        let c_sym = prog.arena.ty(class_c).symbol.unwrap();
        let ty_ref = prog.sym_ref(c_sym);
        prog.prim_call(Prim::ChplAlloc, vec![ty_ref])
    };
    let init = prog.move_to(c, alloc);
    prog.fn_push(main, init);

    let local_block = prog.block();
    let (y, y_def) = prog.new_var("y", class_c, Flags::empty());
    prog.arena.block_push_tail(local_block, y_def);
    let assign = {
        let src = prog.sym_ref(c);
        let dst = prog.sym_ref(y);
        prog.prim_call(Prim::Move, vec![dst, src])
    };
    prog.arena.block_push_tail(local_block, assign);
    let local_info = prog.prim_call(Prim::BlockLocal, vec![]);

    let on_block = prog.block();
    prog.arena.block_push_tail(on_block, local_block);
    prog.set_block_info(local_block, local_info);
    prog.fn_push(main, on_block);
    let on_info = {
        let locale = prog.int_lit(1);
        prog.prim_call(Prim::BlockOn, vec![locale])
    };
    prog.set_block_info(on_block, on_info);

    let ret = prog.ret_void();
    prog.fn_push(main, ret);
    prog.insert_fn_in_module(main, module);
    prog.main_fn = Some(main);

    weft::resolve::resolve_program(&mut prog);
    assert!(!prog.reporter.has_errors());
    weft::passes::parallel::parallel(&mut prog);
    weft::passes::widen::insert_wide_references(&mut prog);
    (prog, c)
}

#[test]
fn class_values_widen_outside_local_blocks() {
    let (prog, c) = build();

    // Outside the local block the variable is a (locale, addr) record.
    let c_ty = prog.arena.sym(c).ty;
    assert!(
        prog.arena.ty_has_flag(c_ty, Flags::WIDE_CLASS),
        "class-typed variable carries the wide record type"
    );
    // The wide record has the contract fields.
    let field_names: Vec<&str> = prog
        .arena
        .fields(c_ty)
        .into_iter()
        .map(|f| prog.sym_name(f))
        .collect();
    assert_eq!(field_names, vec!["locale", "addr"]);
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}

#[test]
fn local_blocks_narrow_wide_uses_through_checked_temps() {
    let (prog, _c) = build();

    // Find the local block (now inside the extracted on function).
    let local_block = prog
        .arena
        .all_blocks()
        .into_iter()
        .find(|&b| prog.arena.block_tagged(b, Prim::BlockLocal))
        .expect("local block survives lowering");

    // A locale check guards the narrowed temp.
    let has_check = prog
        .arena
        .collect_calls(local_block)
        .into_iter()
        .any(|call| prog.arena.is_prim(call, Prim::LocalCheck));
    assert!(has_check, "narrowing emits a locale check");

    // The narrow temp is named after the wide variable and carries the
    // narrow class type.
    let narrow_temp = prog
        .arena
        .collect_exprs(local_block)
        .into_iter()
        .filter_map(|e| match prog.arena.expr(e).kind {
            ExprKind::Def { sym, .. } => Some(sym),
            _ => None,
        })
        .find(|&s| prog.sym_name(s).starts_with("local_"))
        .expect("narrow temp defined in the local block");
    let narrow_ty = prog.arena.sym(narrow_temp).ty;
    assert!(prog.arena.is_class_like(narrow_ty));
    assert!(!prog.arena.ty_has_flag(narrow_ty, Flags::WIDE_CLASS));
    assert_eq!(verify::check_program(&prog), Vec::<String>::new());
}

#[test]
fn single_locale_compilation_skips_widening() {
    let mut prog = Program::new(Config {
        local: true,
        ..Config::default()
    });
    let module = prog.add_module("m", false);
    let class_c = prog.new_class("C");
    let main = prog.new_fn("main", prog.core.void, RetTag::Value);
    let (c, c_def) = prog.new_var("c", class_c, Flags::empty());
    prog.fn_push(main, c_def);
    let ret = prog.ret_void();
    prog.fn_push(main, ret);
    prog.insert_fn_in_module(main, module);
    prog.main_fn = Some(main);

    weft::resolve::resolve_program(&mut prog);
    weft::passes::parallel::parallel(&mut prog);
    weft::passes::widen::insert_wide_references(&mut prog);

    assert_eq!(prog.arena.sym(c).ty, class_c, "no widening under -local");
}
