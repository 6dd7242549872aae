//! Pre- and post-order folding.
//!
//! The pre-order pass normalizes call shapes (method-partial recombination,
//! redundant casts, compile-time type queries, user diagnostics) before
//! candidate matching sees them; the post-order pass folds constants once
//! actuals are resolved: arithmetic, comparisons, string concatenation, enum
//! ordinals, casts of immediates, `param` moves, `param` conditionals, and
//! param-for loops (unrolled copy-per-iteration).

use crate::{
    ast::{
        arena::{ExprId, SymId},
        edit::CopyMap,
        expr::{CallData, ExprKind},
        immediate::{fold_binary, fold_unary, Immediate},
        sym::{Flags, SymKind},
    },
    diag::{UserError, Warning},
    prim::Prim,
    program::Program,
};

/// Pre-order normalization of one expression. Returns the node occupying the
/// original position (the same id, or its replacement).
pub fn pre_fold(prog: &mut Program, e: ExprId) -> ExprId {
    if !matches!(prog.arena.expr(e).kind, ExprKind::Call(_)) {
        return e;
    }

    // Recombine a method-partial: the outer call applies arguments to an
    // inner partial call that already bound the receiver.
    if let Some(inner) = partial_base(prog, e) {
        return recombine_partial(prog, e, inner);
    }

    let Some(prim) = prog.arena.call(e).prim else { return e };
    match prim {
        Prim::Cast => drop_unnecessary_cast(prog, e),
        Prim::TypeOf => {
            let operand = prog.arena.actual(e, 0);
            let ty = prog.expr_val_type(operand);
            match prog.arena.ty(ty).symbol {
                Some(sym) if ty != prog.core.unknown => {
                    let replacement = prog.sym_ref(sym);
                    prog.arena.replace(e, replacement);
                    replacement
                }
                _ => e,
            }
        }
        Prim::IsSubtype => {
            let sub = prog.expr_val_type(prog.arena.actual(e, 1));
            let sup = prog.expr_val_type(prog.arena.actual(e, 0));
            if sub == prog.core.unknown || sup == prog.core.unknown {
                return e;
            }
            let result = prog.arena.dispatches_to(sub, sup);
            replace_with_immediate(prog, e, Immediate::Bool(result))
        }
        Prim::CompilerError | Prim::CompilerWarning => {
            let loc = prog.arena.expr(e).loc;
            let message = prog
                .arena
                .actuals(e)
                .first()
                .and_then(|&a| eval_const(prog, a))
                .and_then(|imm| match imm {
                    Immediate::String(name) => Some(prog.interner.resolve(name).to_owned()),
                    _ => None,
                })
                .unwrap_or_else(|| "<non-constant diagnostic>".to_owned());
            if prim == Prim::CompilerError {
                prog.reporter.error(UserError::UserDiagnostic { message, loc });
            } else {
                prog.reporter.warning(Warning::UserDiagnostic { message, loc });
            }
            let replacement = prog.prim_call(Prim::Noop, Vec::new());
            prog.arena.replace(e, replacement);
            replacement
        }
        _ => e,
    }
}

fn partial_base(prog: &Program, e: ExprId) -> Option<ExprId> {
    let base = prog.arena.call(e).base?;
    match &prog.arena.expr(base).kind {
        ExprKind::Call(inner) if inner.partial => Some(base),
        _ => None,
    }
}

fn recombine_partial(prog: &mut Program, outer: ExprId, inner: ExprId) -> ExprId {
    let inner_data = prog.arena.call(inner).clone();
    let mut actuals: Vec<ExprId> = Vec::new();
    for a in prog.arena.items(inner_data.actuals) {
        prog.arena.remove(a);
        actuals.push(a);
    }
    for a in prog.arena.actuals(outer) {
        prog.arena.remove(a);
        actuals.push(a);
    }
    let base = inner_data.base.map(|b| {
        prog.arena.remove(b);
        b
    });
    let merged = {
        let call = prog.arena.alloc_expr(
            ExprKind::Call(CallData {
                prim: inner_data.prim,
                base: None,
                actuals: crate::ast::arena::ListId(u32::MAX),
                partial: false,
                method_tag: inner_data.method_tag,
                square: inner_data.square,
            }),
            prog.arena.expr(outer).loc,
        );
        let list = prog.arena.alloc_list(crate::ast::arena::ListOwner::CallActuals(call));
        prog.arena.call_mut(call).actuals = list;
        for a in actuals {
            prog.arena.push_tail(list, a);
        }
        if let Some(b) = base {
            prog.arena.call_mut(call).base = Some(b);
            prog.arena.adopt(b, Some(call), None);
        }
        call
    };
    prog.arena.replace(outer, merged);
    merged
}

/// Removes a cast whose operand already has the target type.
fn drop_unnecessary_cast(prog: &mut Program, e: ExprId) -> ExprId {
    let actuals = prog.arena.actuals(e);
    let [ty_ref, operand] = actuals[..] else { return e };
    let Some(ty_sym) = prog.arena.sym_ref(ty_ref) else { return e };
    if !prog.arena.sym(ty_sym).is_type() {
        return e;
    }
    let target = prog.arena.sym(ty_sym).ty;
    if prog.expr_val_type(operand) == target {
        prog.arena.remove(operand);
        prog.arena.replace(e, operand);
        return operand;
    }
    e
}

/// Post-order folding of one expression. Returns the node occupying the
/// original position.
pub fn post_fold(prog: &mut Program, e: ExprId) -> ExprId {
    match &prog.arena.expr(e).kind {
        ExprKind::Call(_) => post_fold_call(prog, e),
        ExprKind::Cond { .. } => fold_param_cond(prog, e),
        _ => e,
    }
}

fn post_fold_call(prog: &mut Program, e: ExprId) -> ExprId {
    let Some(prim) = prog.arena.call(e).prim else { return e };

    if let Some(op) = prim.fold_binary_op() {
        let actuals = prog.arena.actuals(e);
        if let [lhs, rhs] = actuals[..] {
            if let (Some(a), Some(b)) = (eval_const(prog, lhs), eval_const(prog, rhs)) {
                // String concatenation folds through the interner.
                if prim == Prim::Add {
                    if let (Immediate::String(sa), Immediate::String(sb)) = (a, b) {
                        let joined = format!("{}{}", prog.interner.resolve(sa), prog.interner.resolve(sb));
                        let name = prog.interner.intern(&joined);
                        return replace_with_immediate(prog, e, Immediate::String(name));
                    }
                }
                if let Some(folded) = fold_binary(op, a, b) {
                    return replace_with_immediate(prog, e, folded);
                }
            }
        }
        return e;
    }
    if let Some(op) = prim.fold_unary_op() {
        let actuals = prog.arena.actuals(e);
        if let [operand] = actuals[..] {
            if let Some(a) = eval_const(prog, operand) {
                if let Some(folded) = fold_unary(op, a) {
                    return replace_with_immediate(prog, e, folded);
                }
            }
        }
        return e;
    }

    match prim {
        Prim::StringConcat => {
            let actuals = prog.arena.actuals(e);
            if let [lhs, rhs] = actuals[..] {
                if let (Some(Immediate::String(a)), Some(Immediate::String(b))) =
                    (eval_const(prog, lhs), eval_const(prog, rhs))
                {
                    let joined = format!("{}{}", prog.interner.resolve(a), prog.interner.resolve(b));
                    let name = prog.interner.intern(&joined);
                    return replace_with_immediate(prog, e, Immediate::String(name));
                }
            }
            e
        }
        Prim::Cast => fold_immediate_cast(prog, e),
        Prim::Move => fold_param_move(prog, e),
        _ => e,
    }
}

/// Casts of immediates fold at compile time.
fn fold_immediate_cast(prog: &mut Program, e: ExprId) -> ExprId {
    let actuals = prog.arena.actuals(e);
    let [ty_ref, operand] = actuals[..] else { return e };
    let Some(ty_sym) = prog.arena.sym_ref(ty_ref) else { return e };
    if !prog.arena.sym(ty_sym).is_type() {
        return e;
    }
    let target = prog.arena.sym(ty_sym).ty;
    let Some(imm) = eval_const(prog, operand) else { return e };
    let folded = if prog.is_int_type(target) {
        imm.as_int().map(Immediate::Int)
    } else if prog.is_uint_type(target) {
        imm.as_int().and_then(|v| u64::try_from(v).ok()).map(Immediate::Uint)
    } else if prog.is_real_type(target) {
        imm.as_real().map(Immediate::Real)
    } else if target == prog.core.bool_ {
        Some(Immediate::Bool(imm.is_true()))
    } else {
        None
    };
    match folded {
        Some(folded) => replace_with_immediate(prog, e, folded),
        None => e,
    }
}

/// A move of a constant into a `param` variable pins the param's value and
/// substitutes it through the tree; the move itself disappears.
fn fold_param_move(prog: &mut Program, e: ExprId) -> ExprId {
    let actuals = prog.arena.actuals(e);
    let [dst, src] = actuals[..] else { return e };
    let Some(dst_sym) = prog.arena.sym_ref(dst) else { return e };
    if !prog.arena.sym(dst_sym).flags.contains(Flags::PARAM) {
        return e;
    }
    if prog.arena.sym(dst_sym).immediate().is_some() {
        return e;
    }
    let Some(imm) = eval_const(prog, src) else { return e };
    if let SymKind::Var { immediate } = &mut prog.arena.sym_mut(dst_sym).kind {
        *immediate = Some(imm);
    } else {
        return e;
    }
    substitute_param_uses(prog, dst_sym, imm);
    let replacement = prog.prim_call(Prim::Noop, Vec::new());
    prog.arena.replace(e, replacement);
    replacement
}

/// Rewrites every in-tree use of a pinned param variable to the shared
/// literal of its value. The definition stays for pruning to remove.
fn substitute_param_uses(prog: &mut Program, sym: SymId, imm: Immediate) {
    let literal = prog.literal(imm);
    if literal == sym {
        return;
    }
    for site in prog.arena.expr_ids().collect::<Vec<_>>() {
        if !prog.arena.expr(site).in_tree() {
            continue;
        }
        if let ExprKind::SymRef { sym: s } = &mut prog.arena.expr_mut(site).kind {
            if *s == sym {
                *s = literal;
            }
        }
    }
}

/// A conditional over a param condition folds to the taken branch.
fn fold_param_cond(prog: &mut Program, e: ExprId) -> ExprId {
    let ExprKind::Cond { cond, then_block, else_block } = prog.arena.expr(e).kind else {
        return e;
    };
    let Some(imm) = eval_const(prog, cond) else { return e };
    let taken = if imm.is_true() { Some(then_block) } else { else_block };
    match taken {
        Some(block) => {
            // Detach the branch by swapping a placeholder into its slot, so
            // the conditional stays well-formed until it is replaced.
            let placeholder = prog.block();
            prog.arena.replace(block, placeholder);
            prog.arena.replace(e, block);
            block
        }
        None => {
            let replacement = prog.prim_call(Prim::Noop, Vec::new());
            prog.arena.replace(e, replacement);
            replacement
        }
    }
}

/// Compile-time value of an expression, when it has one.
#[must_use]
pub fn eval_const(prog: &Program, e: ExprId) -> Option<Immediate> {
    match &prog.arena.expr(e).kind {
        ExprKind::SymRef { sym } => prog.arena.sym(*sym).immediate(),
        ExprKind::NamedActual { actual, .. } => eval_const(prog, *actual),
        ExprKind::Call(call) => {
            let prim = call.prim?;
            let actuals = prog.arena.items(call.actuals);
            if let Some(op) = prim.fold_binary_op() {
                let [lhs, rhs] = actuals[..] else { return None };
                return fold_binary(op, eval_const(prog, lhs)?, eval_const(prog, rhs)?);
            }
            if let Some(op) = prim.fold_unary_op() {
                let [operand] = actuals[..] else { return None };
                return fold_unary(op, eval_const(prog, operand)?);
            }
            None
        }
        _ => None,
    }
}

/// Evaluates a where clause after instantiation: it must fold to a param
/// bool. `None` means the clause does not fold (treated as a failed
/// candidate by the caller).
#[must_use]
pub fn evaluate_where(prog: &Program, func: SymId) -> Option<bool> {
    let clause = prog.arena.fn_data(func).where_clause?;
    eval_const(prog, clause).map(Immediate::is_true)
}

/// Unrolls a param-for loop whose bounds and stride are compile-time
/// constants: the loop block is replaced by one body copy per iteration with
/// the induction variable substituted by that iteration's literal.
///
/// Returns true when the loop was unrolled.
pub fn unroll_param_loop(prog: &mut Program, block: ExprId) -> bool {
    let Some(info) = prog.arena.block_info(block) else { return false };
    if !prog.arena.is_prim(info, Prim::BlockParamLoop) {
        return false;
    }
    let actuals = prog.arena.actuals(info);
    let [index_ref, lo_e, hi_e, stride_e] = actuals[..] else { return false };
    let Some(index) = prog.arena.sym_ref(index_ref) else { return false };
    let (Some(lo), Some(hi), Some(stride)) = (
        eval_const(prog, lo_e).and_then(Immediate::as_int),
        eval_const(prog, hi_e).and_then(Immediate::as_int),
        eval_const(prog, stride_e).and_then(Immediate::as_int),
    ) else {
        return false;
    };
    if stride == 0 {
        return false;
    }

    // Strip the marker so the copies are plain blocks.
    prog.arena.remove(info);

    let mut value = lo;
    while (stride > 0 && value <= hi) || (stride < 0 && value >= hi) {
        let mut map = CopyMap::new();
        let copy = prog.arena.copy_expr(block, &mut map);
        let literal = prog.literal(Immediate::Int(value));
        for site in prog.arena.collect_sym_refs(copy) {
            if let ExprKind::SymRef { sym } = &mut prog.arena.expr_mut(site).kind {
                if *sym == index {
                    *sym = literal;
                }
            }
        }
        prog.arena.insert_before(block, copy);
        value += stride;
    }
    prog.arena.remove(block);
    true
}

/// Replaces `e` with a reference to the shared literal for `imm`.
fn replace_with_immediate(prog: &mut Program, e: ExprId, imm: Immediate) -> ExprId {
    let literal = prog.literal(imm);
    let loc = prog.arena.expr(e).loc;
    let replacement = prog.sym_ref_at(literal, loc);
    prog.arena.replace(e, replacement);
    replacement
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn arithmetic_folds_to_a_literal() {
        let mut prog = Program::new(Config::default());
        let module = prog.add_module("m", false);
        let three = prog.int_lit(3);
        let four = prog.int_lit(4);
        let mul = prog.prim_call(Prim::Mul, vec![three, four]);
        let two = prog.int_lit(2);
        let add = prog.prim_call(Prim::Add, vec![two, mul]);
        let block = prog.arena.module_data(module).block;
        prog.arena.block_push_tail(block, add);

        let inner = post_fold(&mut prog, mul);
        assert_eq!(eval_const(&prog, inner), Some(Immediate::Int(12)));
        let outer = post_fold(&mut prog, add);
        assert_eq!(eval_const(&prog, outer), Some(Immediate::Int(14)));
    }

    #[test]
    fn string_equality_folds() {
        let mut prog = Program::new(Config::default());
        let module = prog.add_module("m", false);
        let a = prog.string_lit("abc");
        let b = prog.string_lit("abc");
        let eq = prog.prim_call(Prim::Eq, vec![a, b]);
        let block = prog.arena.module_data(module).block;
        prog.arena.block_push_tail(block, eq);
        let folded = post_fold(&mut prog, eq);
        assert_eq!(eval_const(&prog, folded), Some(Immediate::Bool(true)));
    }

    #[test]
    fn unnecessary_cast_is_dropped() {
        let mut prog = Program::new(Config::default());
        let module = prog.add_module("m", false);
        let int_sym = prog.arena.ty(prog.core.int64).symbol.unwrap();
        let ty_ref = prog.sym_ref(int_sym);
        let value = prog.int_lit(7);
        let cast = prog.prim_call(Prim::Cast, vec![ty_ref, value]);
        let block = prog.arena.module_data(module).block;
        prog.arena.block_push_tail(block, cast);

        let folded = pre_fold(&mut prog, cast);
        assert_eq!(eval_const(&prog, folded), Some(Immediate::Int(7)));
        assert!(!prog.arena.expr(cast).in_tree());
    }
}
