//! The emitted file set: stable layout, header tables, and the
//! heterogeneous type-structure file.

use weft::{
    ast::{Flags, RetTag},
    pipeline, Config, Program,
};

fn simple_program(config: Config) -> Program {
    let mut prog = Program::new(config);
    let module = prog.add_module("demo", false);

    let main = prog.new_fn("main", prog.core.void, RetTag::Value);
    let (x, x_def) = prog.new_var("x", prog.core.int64, Flags::empty());
    prog.fn_push(main, x_def);
    let seven = prog.int_lit(7);
    let init = prog.move_to(x, seven);
    prog.fn_push(main, init);
    let ret = prog.ret_void();
    prog.fn_push(main, ret);
    prog.insert_fn_in_module(main, module);
    prog.main_fn = Some(main);
    prog
}

#[test]
fn file_set_has_the_contract_layout() {
    let mut prog = simple_program(Config::default());
    let files = match pipeline::compile(&mut prog) {
        pipeline::CompileOutcome::Success(files) => files,
        pipeline::CompileOutcome::Errors(errors) => panic!("unexpected errors: {errors:?}"),
    };

    // Header carries every contract table.
    for needle in [
        "chpl__class_id",
        "chpl_ftable",
        "chpl_vmtable",
        "chpl_private_broadcast_table",
    ] {
        assert!(files.header.contains(needle), "header missing {needle}");
    }

    // One file per module plus the synthesized-code module.
    let names: Vec<&str> = files.modules.iter().map(|(n, _)| n.as_str()).collect();
    assert!(names.contains(&"demo.c"));
    assert!(names.contains(&"_Program.c"));

    // The module file defines its init function and the main function body.
    let demo = &files.modules.iter().find(|(n, _)| n == "demo.c").unwrap().1;
    assert!(demo.contains("chpl__init_demo"));
    assert!(demo.contains("= INT64(7);"));

    // _main.c wires runtime startup, module inits, and the entry point.
    assert!(files.main.contains("chpl_rt_init"));
    assert!(files.main.contains("chpl__init_demo();"));
    assert!(files.main.contains("chpl_exit_all(0);"));

    // _config.c installs flag values.
    assert!(files.config.contains("chpl_config_set"));

    // No type-structure file unless heterogeneous.
    assert!(files.type_structure.is_none());
}

#[test]
fn heterogeneous_targets_get_type_structure_tables() {
    let mut prog = simple_program(Config {
        heterogeneous: true,
        ..Config::default()
    });
    let files = match pipeline::compile(&mut prog) {
        pipeline::CompileOutcome::Success(files) => files,
        pipeline::CompileOutcome::Errors(errors) => panic!("unexpected errors: {errors:?}"),
    };
    let ts = files.type_structure.expect("heterogeneous emits _type_structure.c");
    for needle in [
        "CHPL_MAX_FIELDS_PER_TYPE",
        "chpl_structType",
        "chpl_sizeType",
        "chpl_getFieldType",
        "chpl_getFieldOffset",
        "chpl_getFieldSize",
    ] {
        assert!(ts.contains(needle), "_type_structure.c missing {needle}");
    }
}

#[test]
fn resolution_errors_stop_before_emission() {
    let mut prog = Program::new(Config::default());
    let module = prog.add_module("demo", false);
    let block = prog.arena.module_data(module).block;
    let bad = prog.named_call("missing", vec![]);
    prog.arena.block_push_tail(block, bad);

    match pipeline::compile(&mut prog) {
        pipeline::CompileOutcome::Errors(errors) => {
            assert_eq!(errors.len(), 1);
        }
        pipeline::CompileOutcome::Success(_) => panic!("expected failure"),
    }
}
