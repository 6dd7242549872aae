//! Function resolution: the fixpoint over candidate lookup, generic
//! instantiation, wrapper synthesis, and folding.
//!
//! Resolution walks function bodies demand-driven: resolving a call may
//! instantiate a generic, synthesize wrappers, and recursively resolve the
//! chosen callee. New functions extend the visibility map incrementally.
//! Unresolved and ambiguous calls unwind to the innermost `try` frame when
//! one is active (explicit stack, never unwinding through the host
//! language); outside a `try` they are reported and resolution continues so
//! one compile surfaces as many errors as it can.
//!
//! After the tree quiesces, pruning removes unreached functions, unused
//! generics, pinned param definitions, and dead param formals; virtual
//! dispatch tables are built last.

pub mod candidate;
pub mod dispatch;
pub mod fold;
pub mod instantiate;
pub mod visible;
pub mod wrappers;

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::{
        arena::{ExprId, SymId, TypeId},
        expr::ExprKind,
        sym::{Flags, Substitutions, SymKind},
    },
    diag::{Loc, ResolveFailure, ResolveResult, UserError},
    prim::Prim,
    program::Program,
};
use candidate::{CallInfo, Candidate, Disambiguation};
use dispatch::VirtualInfo;
use visible::VisibleFns;
use wrappers::{IteratorInfo, PromotionShape};

/// All resolution-phase caches, threaded explicitly through the pass.
#[derive(Debug, Default)]
pub struct ResolveCtx {
    pub visible: VisibleFns,
    pub instantiation_cache: AHashMap<(SymId, Substitutions), SymId>,
    pub varargs_cache: AHashMap<(SymId, u32), SymId>,
    pub default_wrap_cache: AHashMap<(SymId, Vec<bool>), SymId>,
    pub order_wrap_cache: AHashMap<(SymId, Vec<usize>), SymId>,
    pub coerce_wrap_cache: AHashMap<(SymId, Vec<TypeId>), SymId>,
    pub promotion_wrap_cache: AHashMap<(SymId, PromotionShape), SymId>,
    pub iterator_cache: AHashMap<TypeId, IteratorInfo>,
    /// Functions whose bodies are resolved (inserted before the body walk so
    /// recursion terminates).
    pub resolved_fns: AHashSet<SymId>,
    /// Number of `try` frames currently on the resolution stack.
    try_depth: usize,
    /// Resolution frames for error attribution: (function, call location).
    frames: Vec<(SymId, Loc)>,
}

impl ResolveCtx {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resolves the whole program and builds the dispatch tables.
///
/// Entry points are the user `main` (when identified) plus every concrete
/// function defined directly in a user module, and each user module's
/// top-level statements.
pub fn resolve_program(prog: &mut Program) -> VirtualInfo {
    let mut ctx = ResolveCtx::new();

    let modules: Vec<SymId> = prog
        .modules
        .iter()
        .copied()
        .filter(|&m| !prog.arena.sym(m).flags.contains(Flags::INTERNAL_MODULE))
        .collect();

    // Top-level module statements first: they pin params and globals.
    for &module in &modules {
        let block = prog.arena.module_data(module).block;
        let stmts = prog.arena.items(prog.arena.block_body(block));
        for stmt in stmts {
            let _ = resolve_expr(prog, &mut ctx, stmt);
        }
    }

    let mut seeds: Vec<SymId> = Vec::new();
    if let Some(main) = prog.main_fn {
        seeds.push(main);
    }
    for &module in &modules {
        let block = prog.arena.module_data(module).block;
        for stmt in prog.arena.items(prog.arena.block_body(block)) {
            if let ExprKind::Def { sym, .. } = prog.arena.expr(stmt).kind {
                if prog.arena.sym(sym).is_fn() && !candidate::is_generic_fn(prog, sym) {
                    seeds.push(sym);
                }
            }
        }
    }
    for seed in seeds {
        let _ = resolve_fns(prog, &mut ctx, seed);
    }

    prune_resolved_tree(prog, &ctx);
    dispatch::build_virtual_dispatch(prog)
}

/// Resolves a function's body once; recursion hits the memo.
pub fn resolve_fns(prog: &mut Program, ctx: &mut ResolveCtx, func: SymId) -> ResolveResult<()> {
    if !ctx.resolved_fns.insert(func) {
        return Ok(());
    }
    let body = prog.arena.fn_data(func).body;
    let stmts = prog.arena.items(prog.arena.block_body(body));
    for stmt in stmts {
        resolve_expr(prog, ctx, stmt)?;
    }
    infer_return_type(prog, func);
    Ok(())
}

/// Establishes an unknown return type from the final return's value.
fn infer_return_type(prog: &mut Program, func: SymId) {
    let data = prog.arena.fn_data(func);
    if data.ret_type != prog.core.unknown {
        return;
    }
    let body = prog.arena.block_body(data.body);
    let Some(tail) = prog.arena.list(body).tail else { return };
    if !prog.arena.is_prim(tail, Prim::Return) {
        return;
    }
    let value = prog.arena.actual(tail, 0);
    let inferred = prog.expr_val_type(value);
    prog.arena.fn_data_mut(func).ret_type = inferred;
}

/// Resolves one expression tree: pre-fold, children, calls, post-fold.
pub fn resolve_expr(prog: &mut Program, ctx: &mut ResolveCtx, e: ExprId) -> ResolveResult<ExprId> {
    if !prog.arena.expr(e).in_tree() && prog.arena.expr(e).parent_sym.is_none() {
        return Ok(e);
    }

    // `try` frames: a conditional on the try token resolves its then-branch
    // speculatively and substitutes the else-branch on failure.
    if let ExprKind::Cond { cond, then_block, else_block } = prog.arena.expr(e).kind {
        if prog.arena.sym_ref(cond) == Some(prog.try_token) {
            return resolve_try(prog, ctx, e, then_block, else_block);
        }
    }

    // Param-for loops unroll before their copies resolve.
    if let ExprKind::Block { info: Some(info), .. } = prog.arena.expr(e).kind {
        if prog.arena.is_prim(info, Prim::BlockParamLoop) {
            for bound in prog.arena.actuals(info) {
                resolve_expr(prog, ctx, bound)?;
            }
            let anchor_prev = prog.arena.expr(e).prev;
            let anchor_list = prog.arena.expr(e).list;
            if fold::unroll_param_loop(prog, e) {
                // Resolve the freshly inserted copies.
                let copies = match (anchor_list, anchor_prev) {
                    (Some(list), Some(prev)) => {
                        let items = prog.arena.items(list);
                        let start = items.iter().position(|&x| x == prev).map_or(0, |i| i + 1);
                        items[start..].to_vec()
                    }
                    (Some(list), None) => prog.arena.items(list),
                    _ => Vec::new(),
                };
                for copy in copies {
                    resolve_expr(prog, ctx, copy)?;
                }
                return Ok(e);
            }
        }
    }

    let e = fold::pre_fold(prog, e);

    for child in prog.arena.children(e) {
        resolve_expr(prog, ctx, child)?;
    }

    if matches!(prog.arena.expr(e).kind, ExprKind::Call(_)) {
        resolve_call(prog, ctx, e)?;
    }

    Ok(fold::post_fold(prog, e))
}

fn resolve_try(
    prog: &mut Program,
    ctx: &mut ResolveCtx,
    cond: ExprId,
    then_block: ExprId,
    else_block: Option<ExprId>,
) -> ResolveResult<ExprId> {
    ctx.try_depth += 1;
    let attempt = resolve_expr(prog, ctx, then_block);
    ctx.try_depth -= 1;
    match attempt {
        Ok(_) => {
            let placeholder = prog.block();
            prog.arena.replace(then_block, placeholder);
            prog.arena.replace(cond, then_block);
            Ok(then_block)
        }
        Err(_) => match else_block {
            Some(else_block) => {
                let placeholder = prog.block();
                prog.arena.replace(else_block, placeholder);
                prog.arena.replace(cond, else_block);
                resolve_expr(prog, ctx, else_block)
            }
            None => {
                let replacement = prog.prim_call(Prim::Noop, Vec::new());
                prog.arena.replace(cond, replacement);
                Ok(replacement)
            }
        },
    }
}

/// Resolves one call: candidate collection, generic handling,
/// disambiguation, wrapping, and recursive resolution of the target.
pub fn resolve_call(prog: &mut Program, ctx: &mut ResolveCtx, call: ExprId) -> ResolveResult<()> {
    if prog.arena.call(call).prim.is_some() {
        return Ok(());
    }
    // Calls constructed directly against a concrete function (synthesized
    // bodies) just descend.
    if let Some(callee) = prog.arena.resolved_callee(call) {
        if !candidate::is_generic_fn(prog, callee) {
            let loc = prog.arena.expr(call).loc;
            ctx.frames.push((callee, loc));
            let result = resolve_fns(prog, ctx, callee);
            ctx.frames.pop();
            return result;
        }
    }

    let Some(info) = CallInfo::digest(prog, call) else { return Ok(()) };

    let explain = explain_match(prog, call);
    let visible = ctx.visible.lookup(prog, info.name, call);
    if explain {
        let rendered = format!(
            "call '{}({})' at line {}: {} visible candidate(s)",
            prog.interner.resolve(info.name),
            info.describe_actuals(prog),
            prog.arena.expr(call).loc.line,
            visible.len()
        );
        prog.reporter.explain(rendered);
    }

    let mut candidates: Vec<Candidate> = Vec::new();
    for func in visible {
        add_candidate(prog, ctx, func, &info, &mut candidates);
    }

    match candidate::disambiguate(prog, &candidates, &info, call) {
        Disambiguation::Best(index) => {
            let chosen = candidates.swap_remove(index);
            if explain {
                let line = format!("  best match: {}", prog.sym_name(chosen.func));
                prog.reporter.explain(line);
            }
            let target = wrappers::wrap_and_resolve(prog, ctx, &chosen, &info);
            retarget(prog, call, target);
            let loc = prog.arena.expr(call).loc;
            ctx.frames.push((target, loc));
            let result = resolve_fns(prog, ctx, target);
            ctx.frames.pop();
            result
        }
        Disambiguation::Ambiguous => {
            let error = UserError::AmbiguousCall {
                name: prog.interner.resolve(info.name).to_owned(),
                candidates: candidates.iter().map(|c| prog.sym_name(c.func).to_owned()).collect(),
                loc: user_loc(prog, ctx, call),
            };
            fail(prog, ctx, error)
        }
        Disambiguation::None => {
            let error = UserError::UnresolvedCall {
                name: prog.interner.resolve(info.name).to_owned(),
                args: info.describe_actuals(prog),
                loc: user_loc(prog, ctx, call),
            };
            fail(prog, ctx, error)
        }
    }
}

/// Expands variadics, instantiates generics, and filters one visible
/// function into the candidate list.
fn add_candidate(
    prog: &mut Program,
    ctx: &mut ResolveCtx,
    func: SymId,
    info: &CallInfo,
    candidates: &mut Vec<Candidate>,
) {
    let has_variadic = prog
        .arena
        .formals(func)
        .iter()
        .any(|&f| prog.arena.arg_data(f).variadic.is_some());
    let func = if has_variadic {
        match instantiate::expand_varargs(prog, ctx, func, info.actuals.len()) {
            Some(expanded) => expanded,
            None => return,
        }
    } else {
        func
    };

    if candidate::is_generic_fn(prog, func) {
        let Some((formal_of_actual, missing)) = candidate::actual_formal_map(prog, func, info) else {
            return;
        };
        let shell = Candidate {
            func,
            formal_of_actual,
            missing,
            promotes: false,
        };
        let Some(substs) = instantiate::compute_substitutions(prog, &shell, info) else {
            return;
        };
        if substs.is_empty() {
            return;
        }
        let instance = instantiate::instantiate(prog, ctx, func, &substs, info.call);
        if matches!(fold::evaluate_where(prog, instance), Some(false)) {
            return;
        }
        if let Some(cand) = candidate::filter_candidate(prog, instance, info) {
            candidates.push(cand);
        }
        return;
    }

    if matches!(fold::evaluate_where(prog, func), Some(false)) {
        return;
    }
    if let Some(cand) = candidate::filter_candidate(prog, func, info) {
        candidates.push(cand);
    }
}

/// Binds the call's base to the resolved target function.
fn retarget(prog: &mut Program, call: ExprId, target: SymId) {
    let base = prog.arena.call(call).base.expect("named call without base");
    match &mut prog.arena.expr_mut(base).kind {
        ExprKind::SymRef { sym } => *sym = target,
        kind @ ExprKind::Unresolved { .. } => {
            *kind = ExprKind::SymRef { sym: target };
        }
        other => panic!("{base}: call base is neither a name nor a symbol: {other:?}"),
    }
}

/// Reports or unwinds a resolution failure, depending on whether a `try`
/// frame is active.
fn fail(prog: &mut Program, ctx: &ResolveCtx, error: UserError) -> ResolveResult<()> {
    if ctx.try_depth > 0 {
        return Err(ResolveFailure::new(error));
    }
    prog.reporter.error(error);
    Ok(())
}

/// The surface location of an error: the call's own location unless it sits
/// in compiler-internal code, in which case the frames walk back to the
/// first user-attributable call site.
fn user_loc(prog: &Program, ctx: &ResolveCtx, call: ExprId) -> Loc {
    let loc = prog.arena.expr(call).loc;
    let internal = prog
        .arena
        .enclosing_fn(call)
        .is_some_and(|f| prog.arena.sym(f).flags.contains(Flags::COMPILER_INTERNAL));
    if !internal && loc != Loc::UNKNOWN {
        return loc;
    }
    for &(func, frame_loc) in ctx.frames.iter().rev() {
        if !prog.arena.sym(func).flags.contains(Flags::COMPILER_INTERNAL) && frame_loc != Loc::UNKNOWN {
            return frame_loc;
        }
    }
    loc
}

fn explain_match(prog: &Program, call: ExprId) -> bool {
    let line = prog.config.explain_call_line;
    if line == 0 {
        return false;
    }
    prog.arena.expr(call).loc.line == line
}

// ---- pruning ----

/// The single deletion point at end of resolution: unreached and
/// never-resolved functions, leftover generics, pinned param definitions,
/// noop statements, and dead (instantiated-param) formals all go.
fn prune_resolved_tree(prog: &mut Program, ctx: &ResolveCtx) {
    prune_dead_param_formals(prog, ctx);
    prune_unreached_fns(prog, ctx);
    prune_param_defs(prog);
    prune_noops(prog);
}

/// Formals bound to instantiated params carry no runtime value: drop them
/// and the corresponding actuals.
fn prune_dead_param_formals(prog: &mut Program, ctx: &ResolveCtx) {
    prog.arena.compute_call_sites();
    for &func in &ctx.resolved_fns.iter().copied().collect::<Vec<_>>() {
        if prog.arena.sym(func).def_point.is_none() {
            continue;
        }
        let formals = prog.arena.formals(func);
        let dead: Vec<usize> = formals
            .iter()
            .enumerate()
            .filter(|&(_, &f)| prog.arena.arg_data(f).instantiated_param)
            .map(|(i, _)| i)
            .collect();
        if dead.is_empty() {
            continue;
        }
        let call_sites = prog.arena.fn_data(func).called_by.clone();
        for call in call_sites {
            if !prog.arena.expr(call).in_tree() {
                continue;
            }
            let actuals = prog.arena.actuals(call);
            for &index in dead.iter().rev() {
                if let Some(&actual) = actuals.get(index) {
                    prog.arena.remove(actual);
                    prog.arena.retire_expr(actual);
                }
            }
        }
        for &index in dead.iter().rev() {
            let def = prog.arena.sym(formals[index]).def_point.expect("formal without def");
            prog.arena.remove(def);
            prog.arena.retire_expr(def);
            prog.arena.retire_sym(formals[index]);
        }
    }
}

/// Functions that were never resolved (including generic originals) are
/// unreached; their defs leave the tree.
fn prune_unreached_fns(prog: &mut Program, ctx: &ResolveCtx) {
    for func in prog.arena.all_fns() {
        let sym = prog.arena.sym(func);
        let Some(def) = sym.def_point else { continue };
        if !prog.arena.expr(def).in_tree() {
            continue;
        }
        if ctx.resolved_fns.contains(&func) {
            continue;
        }
        if sym.flags.contains(Flags::EXTERN) {
            continue;
        }
        // Iterator-protocol members are reached through the iterator
        // lowering contract even when no direct call names them.
        if sym.flags.contains(Flags::ITERATOR_FN) {
            continue;
        }
        if Some(func) == prog.main_fn {
            continue;
        }
        // Detach the function's internals too, so no later pass mistakes
        // its body for live code.
        let data = prog.arena.fn_data(func).clone();
        prog.arena.orphan(data.body);
        for formal in prog.arena.items(data.formals) {
            prog.arena.orphan(formal);
        }
        if let Some(where_clause) = data.where_clause {
            prog.arena.orphan(where_clause);
        }
        prog.arena.remove(def);
        prog.arena.retire_expr(def);
        prog.arena.retire_sym(func);
    }
}

/// Pinned params fold to literals everywhere; their definitions go.
fn prune_param_defs(prog: &mut Program) {
    for e in prog.arena.all_in_tree() {
        let ExprKind::Def { sym, .. } = prog.arena.expr(e).kind else { continue };
        let node = prog.arena.sym(sym);
        if !node.flags.contains(Flags::PARAM) || node.flags.contains(Flags::CONST) {
            continue;
        }
        if !matches!(node.kind, SymKind::Var { immediate: Some(_) }) {
            continue;
        }
        // Any surviving reference means the substitution missed a use.
        let referenced = prog
            .arena
            .all_in_tree()
            .into_iter()
            .any(|r| prog.arena.sym_ref(r) == Some(sym) && r != e);
        if referenced {
            continue;
        }
        prog.arena.remove(e);
        prog.arena.retire_expr(e);
        prog.arena.retire_sym(sym);
    }
}

/// Noop statements left by folding disappear from block bodies.
fn prune_noops(prog: &mut Program) {
    for e in prog.arena.all_in_tree() {
        if prog.arena.is_prim(e, Prim::Noop) && prog.arena.expr(e).list.is_some() {
            prog.arena.remove(e);
            prog.arena.retire_expr(e);
        }
    }
}
