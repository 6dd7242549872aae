//! Virtual dispatch construction.
//!
//! Runs once resolution has quiesced (no instantiation in flight). Every
//! root virtual method (the top of an override chain) is paired with its
//! overriders; each class gets a method-table row holding the most specific
//! override reachable from it. Call sites with few enough overrides are
//! lowered to class-id test chains; the rest stay indirect through the
//! two-dimensional table the emitter prints.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    ast::{
        arena::{ExprId, SymId, TypeId},
        expr::ExprKind,
        sym::Flags,
    },
    prim::Prim,
    program::Program,
};

/// The quiesced dispatch structure handed to the emitter.
#[derive(Debug, Default)]
pub struct VirtualInfo {
    /// Root virtual methods in discovery order; the row index of the VMT.
    pub roots: Vec<SymId>,
    /// All overrides of each root (the root itself excluded).
    pub overrides: AHashMap<SymId, Vec<SymId>>,
    /// Per-class method table: one entry per root, `None` where the class
    /// does not participate in that root's subtree.
    pub vmt: IndexMap<TypeId, Vec<Option<SymId>>>,
}

impl VirtualInfo {
    /// The table entry for `(class, root)`.
    #[must_use]
    pub fn entry(&self, class: TypeId, root: SymId) -> Option<SymId> {
        let row = self.vmt.get(&class)?;
        let index = self.roots.iter().position(|&r| r == root)?;
        row.get(index).copied().flatten()
    }
}

/// Builds the virtual-method structure and rewrites dynamically dispatched
/// call sites.
pub fn build_virtual_dispatch(prog: &mut Program) -> VirtualInfo {
    let mut info = VirtualInfo::default();

    // The instantiation set must be stable before tables are built; a
    // changing type count here means resolution did not quiesce.
    let type_count = prog.arena.type_count();

    let methods = collect_methods(prog);
    for &(method, receiver) in &methods {
        let root = find_root(prog, &methods, method, receiver);
        if root == method {
            continue;
        }
        prog.arena.sym_mut(root).flags |= Flags::VIRTUAL;
        prog.arena.sym_mut(method).flags |= Flags::VIRTUAL;
        let root = root_of(prog, &methods, root);
        if !info.roots.contains(&root) {
            info.roots.push(root);
        }
        let entry = info.overrides.entry(root).or_default();
        if !entry.contains(&method) {
            entry.push(method);
        }
    }

    build_tables(prog, &mut info);
    rewrite_call_sites(prog, &info);

    assert_eq!(
        type_count,
        prog.arena.type_count(),
        "instantiation observed during virtual-table construction"
    );
    info
}

/// Methods paired with their receiver class.
fn collect_methods(prog: &Program) -> Vec<(SymId, TypeId)> {
    let mut out = Vec::new();
    for func in prog.arena.all_fns() {
        if !prog.arena.sym(func).flags.contains(Flags::METHOD) {
            continue;
        }
        if prog.arena.sym(func).def_point.is_none() {
            continue;
        }
        let formals = prog.arena.formals(func);
        let Some(&this) = formals.first() else { continue };
        let receiver = prog.arena.value_type(prog.arena.sym(this).ty);
        if prog.arena.is_class_like(receiver) {
            out.push((func, receiver));
        }
    }
    out
}

/// Walks parent classes for a method with a matching signature; returns the
/// topmost match (or `method` itself when nothing is overridden).
fn find_root(prog: &Program, methods: &[(SymId, TypeId)], method: SymId, receiver: TypeId) -> SymId {
    let mut best = method;
    let mut cursor = receiver;
    loop {
        let parents = prog.arena.ty(cursor).dispatch_parents.clone();
        let Some(&parent) = parents.first() else { break };
        for &(candidate, candidate_receiver) in methods {
            if candidate_receiver == parent && signatures_match(prog, method, candidate) {
                best = candidate;
            }
        }
        cursor = parent;
    }
    best
}

fn root_of(prog: &Program, methods: &[(SymId, TypeId)], method: SymId) -> SymId {
    let receiver = methods
        .iter()
        .find(|&&(m, _)| m == method)
        .map(|&(_, r)| r)
        .unwrap_or(prog.core.object);
    find_root(prog, methods, method, receiver)
}

/// Signature match up to type-parameter substitution: same name, same
/// arity, and same non-receiver formal types after stripping instantiation.
fn signatures_match(prog: &Program, a: SymId, b: SymId) -> bool {
    if prog.arena.sym(a).name != prog.arena.sym(b).name {
        return false;
    }
    let formals_a = prog.arena.formals(a);
    let formals_b = prog.arena.formals(b);
    if formals_a.len() != formals_b.len() {
        return false;
    }
    formals_a.iter().zip(&formals_b).skip(1).all(|(&fa, &fb)| {
        let ta = generic_origin(prog, fa);
        let tb = generic_origin(prog, fb);
        ta == tb
    })
}

fn generic_origin(prog: &Program, formal: SymId) -> TypeId {
    prog.arena
        .arg_data(formal)
        .instantiated_from
        .unwrap_or_else(|| prog.arena.value_type(prog.arena.sym(formal).ty))
}

/// Fills the per-class rows: entry (C, R) is the most specific override of R
/// reachable from C.
fn build_tables(prog: &Program, info: &mut VirtualInfo) {
    let classes: Vec<TypeId> = prog
        .arena
        .type_ids()
        .filter(|&t| prog.arena.is_class_like(t) && !prog.arena.ty_has_flag(t, Flags::NO_OBJECT))
        .collect();
    for class in classes {
        let mut row = Vec::with_capacity(info.roots.len());
        for &root in &info.roots {
            row.push(most_specific(prog, info, class, root));
        }
        info.vmt.insert(class, row);
    }
}

fn most_specific(prog: &Program, info: &VirtualInfo, class: TypeId, root: SymId) -> Option<SymId> {
    let root_receiver = receiver_of(prog, root)?;
    if !prog.arena.dispatches_to(class, root_receiver) {
        return None;
    }
    let mut best = root;
    let mut best_distance = prog.arena.dispatch_distance(class, root_receiver)?;
    for &over in info.overrides.get(&root).map_or(&[][..], Vec::as_slice) {
        let Some(receiver) = receiver_of(prog, over) else { continue };
        if let Some(distance) = prog.arena.dispatch_distance(class, receiver) {
            if distance < best_distance {
                best = over;
                best_distance = distance;
            }
        }
    }
    Some(best)
}

fn receiver_of(prog: &Program, method: SymId) -> Option<TypeId> {
    let formals = prog.arena.formals(method);
    formals
        .first()
        .map(|&this| prog.arena.value_type(prog.arena.sym(this).ty))
}

/// Rewrites calls to virtual roots: a class-id test chain when the override
/// count is at or under the configured limit, an indirect VMT call
/// otherwise.
fn rewrite_call_sites(prog: &mut Program, info: &VirtualInfo) {
    let limit = prog.config.conditional_dynamic_dispatch_limit as usize;
    for call in prog.arena.all_calls() {
        if !prog.arena.expr(call).in_tree() {
            continue;
        }
        let Some(callee) = prog.arena.resolved_callee(call) else { continue };
        if !info.roots.contains(&callee) {
            continue;
        }
        let overrides = info.overrides.get(&callee).map_or(&[][..], Vec::as_slice);
        // Only overrides below the receiver's static type can fire.
        let receiver_expr = match prog.arena.actuals(call).first() {
            Some(&r) => r,
            None => continue,
        };
        let static_ty = prog.expr_val_type(receiver_expr);
        let applicable: Vec<SymId> = overrides
            .iter()
            .copied()
            .filter(|&over| {
                receiver_of(prog, over)
                    .is_some_and(|r| prog.arena.dispatches_to(r, static_ty) && r != static_ty)
            })
            .collect();
        if applicable.is_empty() {
            continue;
        }
        if applicable.len() <= limit {
            lower_to_cid_chain(prog, call, callee, &applicable);
        } else {
            lower_to_vmt_call(prog, call, callee);
        }
    }
}

/// `if testcid(obj, C1) then f_C1(...) else if ... else f_root(...)`,
/// replacing the whole statement containing the call.
fn lower_to_cid_chain(prog: &mut Program, call: ExprId, root: SymId, overrides: &[SymId]) {
    let stmt = prog.arena.stmt_of(call);
    let receiver = prog.arena.actual(call, 0);

    // The fallback branch is the original statement (direct call to the
    // root); each override gets a copy with the callee swapped.
    let mut else_arm: Option<ExprId> = None;
    for &over in overrides.iter().rev() {
        let Some(receiver_ty) = receiver_of(prog, over) else { continue };
        let Some(receiver_ty_sym) = prog.arena.ty(receiver_ty).symbol else { continue };

        let mut map = crate::ast::edit::CopyMap::new();
        let arm_stmt = prog.arena.copy_expr(stmt, &mut map);
        retarget_call(prog, arm_stmt, root, over);
        let then_block = prog.block_of(vec![arm_stmt]);

        let test = {
            let obj = {
                let mut obj_map = crate::ast::edit::CopyMap::new();
                prog.arena.copy_expr(receiver, &mut obj_map)
            };
            let cid = prog.sym_ref(receiver_ty_sym);
            prog.prim_call(Prim::TestCid, vec![obj, cid])
        };
        let cond = prog.cond(test, then_block, else_arm);
        else_arm = Some(prog.block_of(vec![cond]));
    }

    if let Some(chain) = else_arm {
        // The final fallback: the original direct call.
        if !matches!(prog.arena.expr(chain).kind, ExprKind::Block { .. }) {
            return;
        }
        let placeholder = prog.prim_call(Prim::Noop, Vec::new());
        prog.arena.replace(stmt, placeholder);
        // Re-root the chain so the original statement becomes the last else.
        attach_fallback(prog, chain, stmt);
        prog.arena.replace(placeholder, chain);
    }
}

/// Walks to the innermost conditional of the chain and installs the
/// original statement as its else branch.
fn attach_fallback(prog: &mut Program, chain: ExprId, original: ExprId) {
    let mut cursor = chain;
    loop {
        let body = prog.arena.items(prog.arena.block_body(cursor));
        let Some(&cond) = body.first() else { break };
        let ExprKind::Cond { else_block, .. } = prog.arena.expr(cond).kind else { break };
        match else_block {
            Some(next) => cursor = next,
            None => {
                let fallback = prog.block_of(vec![original]);
                prog.arena.adopt(fallback, Some(cond), prog.arena.expr(cond).parent_sym);
                if let ExprKind::Cond { else_block, .. } = &mut prog.arena.expr_mut(cond).kind {
                    *else_block = Some(fallback);
                }
                break;
            }
        }
    }
}

fn retarget_call(prog: &mut Program, root_stmt: ExprId, root: SymId, replacement: SymId) {
    for call in prog.arena.collect_calls(root_stmt) {
        if let Some(base) = prog.arena.call(call).base {
            if prog.arena.sym_ref(base) == Some(root) {
                if let ExprKind::SymRef { sym } = &mut prog.arena.expr_mut(base).kind {
                    *sym = replacement;
                }
            }
        }
    }
}

/// Turns the call indirect: `vmt_call(root, receiver, args...)`.
fn lower_to_vmt_call(prog: &mut Program, call: ExprId, root: SymId) {
    let base = prog.arena.call(call).base.expect("resolved call without base");
    prog.arena.remove(base);
    let root_ref = prog.sym_ref(root);
    let actuals = prog.arena.call(call).actuals;
    prog.arena.push_head(actuals, root_ref);
    {
        let data = prog.arena.call_mut(call);
        data.base = None;
        data.prim = Some(Prim::VmtCall);
    }
    prog.arena.retire_expr(base);
}
