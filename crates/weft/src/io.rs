//! Serialized program interchange with the front end.
//!
//! The external parser hands the middle end a normalized AST as one JSON
//! document: the node arenas, the interner, and the program roots. The
//! snapshot round-trips losslessly; hash-side state (the interner's lookup
//! table, the literal cache) is rebuilt on load.

use serde::{Deserialize, Serialize};

use crate::{
    ast::{
        arena::{Arena, SymId},
        sym::{Flags, SubstVal, SymKind},
    },
    config::Config,
    intern::Interner,
    program::{CoreTypes, Program},
};

/// The on-disk form of a normalized program.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProgramSnapshot {
    pub arena: Arena,
    pub interner: Interner,
    pub core: CoreTypes,
    pub root_module: SymId,
    pub program_module: SymId,
    pub modules: Vec<SymId>,
    pub main_fn: Option<SymId>,
    pub try_token: SymId,
}

/// Borrowed mirror of [`ProgramSnapshot`] so saving never clones arenas.
#[derive(Serialize)]
struct SnapshotRef<'a> {
    arena: &'a Arena,
    interner: &'a Interner,
    core: CoreTypes,
    root_module: SymId,
    program_module: SymId,
    modules: &'a [SymId],
    main_fn: Option<SymId>,
    try_token: SymId,
}

/// Serializes a program for hand-off (tests and tooling).
pub fn save(prog: &Program) -> serde_json::Result<String> {
    serde_json::to_string(&SnapshotRef {
        arena: &prog.arena,
        interner: &prog.interner,
        core: prog.core,
        root_module: prog.root_module,
        program_module: prog.program_module,
        modules: &prog.modules,
        main_fn: prog.main_fn,
        try_token: prog.try_token,
    })
}

/// Loads a front-end snapshot under the given configuration.
pub fn load(json: &str, config: Config) -> serde_json::Result<Program> {
    let snapshot: ProgramSnapshot = serde_json::from_str(json)?;
    Ok(from_snapshot(snapshot, config))
}

fn from_snapshot(snapshot: ProgramSnapshot, config: Config) -> Program {
    let ProgramSnapshot {
        arena,
        mut interner,
        core,
        root_module,
        program_module,
        modules,
        main_fn,
        try_token,
    } = snapshot;
    interner.rebuild_lookup();

    let mut prog = Program {
        arena,
        interner,
        config,
        reporter: crate::diag::Reporter::new(),
        core,
        root_module,
        program_module,
        modules,
        main_fn,
        literal_cache: ahash::AHashMap::new(),
        void_value: None,
        try_token,
    };
    rebuild_caches(&mut prog);
    prog
}

/// Re-derives the literal cache and void symbol from the loaded arena.
fn rebuild_caches(prog: &mut Program) {
    let void_name = prog.interner.intern("_void");
    for sym in prog.arena.sym_ids().collect::<Vec<_>>() {
        let node = prog.arena.sym(sym);
        if node.name == void_name && node.ty == prog.core.void {
            prog.void_value = Some(sym);
        }
        if node.flags.contains(Flags::PARAM) && node.flags.contains(Flags::CONST) {
            if let SymKind::Var { immediate: Some(imm) } = node.kind {
                prog.literal_cache.insert(SubstVal::from_immediate(imm), sym);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Immediate;

    #[test]
    fn snapshot_round_trips() {
        let mut prog = Program::new(Config::default());
        let module = prog.add_module("demo", false);
        let lit = prog.literal(Immediate::Int(42));
        let _ = module;

        let json = save(&prog).unwrap();
        let loaded = load(&json, Config::default()).unwrap();
        assert_eq!(loaded.modules.len(), 1);
        assert_eq!(loaded.arena.sym(lit).immediate(), Some(Immediate::Int(42)));
        // The literal cache is rebuilt, so the same immediate reuses the
        // loaded symbol.
        let mut loaded = loaded;
        assert_eq!(loaded.literal(Immediate::Int(42)), lit);
    }
}
