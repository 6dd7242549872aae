//! Candidate filtering and best-match disambiguation.
//!
//! Given a call and the visible functions of its name, candidates are kept
//! when an actual-to-formal bijection exists and every actual can dispatch
//! to its formal (directly, by reference relaxation, subtyping, coercion, or
//! promotion). The survivors are ranked pairwise: the best candidate is the
//! unique one that is no worse than every rival and strictly better on at
//! least one criterion.

use crate::{
    ast::{
        arena::{ExprId, SymId, TypeId},
        expr::ExprKind,
        immediate::Immediate,
        sym::{Flags, Intent, SymKind},
        ty::PrimTy,
    },
    intern::NameId,
    program::Program,
    resolve::visible::is_more_visible,
};

/// A call site digested for matching: name plus per-actual facts.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub call: ExprId,
    pub name: NameId,
    pub actuals: Vec<ActualInfo>,
}

/// One actual argument, unwrapped from any keyword wrapper.
#[derive(Debug, Clone, Copy)]
pub struct ActualInfo {
    /// The expression passed (the payload for keyword actuals).
    pub expr: ExprId,
    /// Keyword name, for `f(x = 3)` style passing.
    pub keyword: Option<NameId>,
    pub ty: TypeId,
    /// The referenced symbol when the actual is a symbol reference; used by
    /// param-coercion checks.
    pub sym: Option<SymId>,
}

impl CallInfo {
    /// Digests a named call. Returns `None` for calls whose base is not a
    /// name (already-resolved or primitive calls).
    #[must_use]
    pub fn digest(prog: &Program, call: ExprId) -> Option<Self> {
        let data = prog.arena.call(call);
        let base = data.base?;
        let name = match prog.arena.expr(base).kind {
            ExprKind::Unresolved { name } => name,
            ExprKind::SymRef { sym } => prog.arena.sym(sym).name,
            _ => return None,
        };
        let mut actuals = Vec::new();
        for actual in prog.arena.actuals(call) {
            let (keyword, payload) = match prog.arena.expr(actual).kind {
                ExprKind::NamedActual { name, actual } => (Some(name), actual),
                _ => (None, actual),
            };
            actuals.push(ActualInfo {
                expr: payload,
                keyword,
                ty: prog.expr_type(payload),
                sym: prog.arena.sym_ref(payload),
            });
        }
        Some(Self { call, name, actuals })
    }

    /// Comma-separated actual types, for diagnostics.
    #[must_use]
    pub fn describe_actuals(&self, prog: &Program) -> String {
        self.actuals
            .iter()
            .map(|a| prog.type_name(a.ty))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A candidate that survived arity and dispatch filtering.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub func: SymId,
    /// Matched formal for each actual, in actual order.
    pub formal_of_actual: Vec<SymId>,
    /// Formals with no actual; each has a default (or the candidate would
    /// have been discarded).
    pub missing: Vec<SymId>,
    /// True when any actual reaches its formal only through promotion.
    pub promotes: bool,
}

/// Computes the actual-to-formal bijection for one function.
///
/// Keyword actuals must name a formal; positional actuals fill the remaining
/// formals in declaration order; unbound formals must carry defaults.
#[must_use]
pub fn actual_formal_map(prog: &Program, func: SymId, info: &CallInfo) -> Option<(Vec<SymId>, Vec<SymId>)> {
    let formals = prog.arena.formals(func);
    if info.actuals.len() > formals.len() {
        return None;
    }
    let mut taken = vec![false; formals.len()];
    let mut formal_of_actual: Vec<Option<SymId>> = vec![None; info.actuals.len()];

    // Keyword actuals bind by name first.
    for (i, actual) in info.actuals.iter().enumerate() {
        let Some(keyword) = actual.keyword else { continue };
        let (position, &formal) = formals
            .iter()
            .enumerate()
            .find(|&(idx, &f)| prog.arena.sym(f).name == keyword && !taken[idx])?;
        taken[position] = true;
        formal_of_actual[i] = Some(formal);
    }

    // Positional actuals fill remaining formals in order.
    let mut next_formal = 0usize;
    for (i, actual) in info.actuals.iter().enumerate() {
        if actual.keyword.is_some() {
            continue;
        }
        while next_formal < formals.len() && taken[next_formal] {
            next_formal += 1;
        }
        if next_formal >= formals.len() {
            return None;
        }
        taken[next_formal] = true;
        formal_of_actual[i] = Some(formals[next_formal]);
    }

    // Unbound formals need defaults.
    let mut missing = Vec::new();
    for (position, &formal) in formals.iter().enumerate() {
        if !taken[position] {
            let def = prog.arena.sym(formal).def_point?;
            let has_default = matches!(prog.arena.expr(def).kind, ExprKind::Def { init: Some(_), .. });
            if !has_default {
                return None;
            }
            missing.push(formal);
        }
    }

    Some((formal_of_actual.into_iter().map(Option::unwrap).collect(), missing))
}

/// Filters `func` against the call: arity map plus per-actual dispatch.
#[must_use]
pub fn filter_candidate(prog: &Program, func: SymId, info: &CallInfo) -> Option<Candidate> {
    let (formal_of_actual, missing) = actual_formal_map(prog, func, info)?;
    let mut promotes = false;
    for (actual, &formal) in info.actuals.iter().zip(&formal_of_actual) {
        let formal_ty = prog.arena.sym(formal).ty;
        let mut arg_promotes = false;
        if !can_dispatch(prog, actual.ty, actual.sym, formal_ty, &mut arg_promotes) {
            return None;
        }
        promotes |= arg_promotes;
    }
    Some(Candidate {
        func,
        formal_of_actual,
        missing,
        promotes,
    })
}

/// The dispatch relation: can a value of `actual_ty` be passed where
/// `formal_ty` is expected?
///
/// `promotes` is set when the only path is pointwise promotion over the
/// actual's scalar-promotion type.
#[must_use]
pub fn can_dispatch(
    prog: &Program,
    actual_ty: TypeId,
    actual_sym: Option<SymId>,
    formal_ty: TypeId,
    promotes: &mut bool,
) -> bool {
    let arena = &prog.arena;
    if actual_ty == formal_ty {
        return true;
    }
    // A generic (any) formal accepts everything; instantiation pins it.
    if formal_ty == prog.core.any {
        return true;
    }
    // nil dispatches to any class.
    if actual_ty == prog.core.nil && arena.is_class_like(arena.value_type(formal_ty)) {
        return true;
    }
    // Reference-to-value relaxation.
    let actual_val = arena.value_type(actual_ty);
    if actual_val == formal_ty {
        return true;
    }
    // Subtyping through the dispatch hierarchy.
    if arena.dispatches_to(actual_val, formal_ty) {
        return true;
    }
    if can_coerce(prog, actual_val, actual_sym, formal_ty) {
        return true;
    }
    // Promotion: the actual's element type reaches the formal.
    if let Some(promo) = arena.ty(actual_val).scalar_promotion {
        let mut inner = false;
        if promo == formal_ty || can_dispatch(prog, promo, None, formal_ty, &mut inner) {
            *promotes = true;
            return true;
        }
    }
    false
}

/// Legal implicit conversions: numeric widening, param-value narrowing, and
/// sync/single value projection.
#[must_use]
pub fn can_coerce(prog: &Program, actual_ty: TypeId, actual_sym: Option<SymId>, formal_ty: TypeId) -> bool {
    let arena = &prog.arena;
    // Sync/single variables project their base value.
    let actual_flags = arena.ty_flags(actual_ty);
    if actual_flags.contains(Flags::SYNC) || actual_flags.contains(Flags::SINGLE) {
        if let Some(base) = arena.ty(actual_ty).val_type {
            if base == formal_ty || can_coerce(prog, base, None, formal_ty) {
                return true;
            }
        }
    }
    let (Some(a), Some(f)) = (arena.ty(actual_ty).as_primitive(), arena.ty(formal_ty).as_primitive()) else {
        return false;
    };
    if numeric_widens(a, f) {
        return true;
    }
    // Param values narrow when they fit the formal's range.
    if let Some(sym) = actual_sym {
        if prog.arena.sym(sym).is_param() {
            if let Some(imm) = prog.arena.sym(sym).immediate() {
                return param_fits(imm, f);
            }
        }
    }
    false
}

/// The widening ladder of the numeric tower.
fn numeric_widens(a: PrimTy, f: PrimTy) -> bool {
    let (aw, fw) = (a.bit_width().unwrap_or(0), f.bit_width().unwrap_or(0));
    match (a, f) {
        (PrimTy::Bool, _) if f.is_int() || f.is_uint() => true,
        _ if a.is_int() && f.is_int() => fw > aw,
        _ if a.is_uint() && f.is_uint() => fw > aw,
        _ if a.is_uint() && f.is_int() => fw > aw,
        _ if (a.is_int() || a.is_uint()) && f.is_real() => true,
        _ if a.is_real() && f.is_real() => fw > aw,
        _ if (a.is_int() || a.is_uint() || a.is_real()) && f.is_complex() => true,
        _ if a.is_complex() && f.is_complex() => fw > aw,
        _ => false,
    }
}

/// Whether a known param value fits in a (possibly narrower) numeric type.
fn param_fits(imm: Immediate, f: PrimTy) -> bool {
    let Some(bits) = f.bit_width() else { return false };
    match imm {
        Immediate::Int(v) => {
            if f.is_int() {
                let min = -(1i128 << (bits - 1));
                let max = (1i128 << (bits - 1)) - 1;
                (i128::from(v) >= min) && (i128::from(v) <= max)
            } else if f.is_uint() {
                v >= 0 && (bits == 64 || u128::try_from(v).is_ok_and(|u| u < (1u128 << bits)))
            } else {
                f.is_real() || f.is_complex()
            }
        }
        Immediate::Uint(v) => {
            if f.is_uint() {
                bits == 64 || u128::from(v) < (1u128 << bits)
            } else if f.is_int() {
                u128::from(v) < (1u128 << (bits - 1))
            } else {
                f.is_real() || f.is_complex()
            }
        }
        Immediate::Real(_) => f.is_real() || f.is_complex(),
        Immediate::Bool(_) => f == PrimTy::Bool || f.is_int() || f.is_uint(),
        Immediate::String(_) => f == PrimTy::String,
    }
}

/// Outcome of disambiguation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disambiguation {
    Best(usize),
    Ambiguous,
    None,
}

/// Ranks candidates pairwise and picks the unique best, mirroring the
/// criteria order of the dispatch relation:
/// instantiated-param beats plain on equal formal types, no-promotion beats
/// promotion, concrete beats instantiated, constrained generic beats `any`,
/// exact actual-type match, dispatch-distance specificity, signed-over-
/// unsigned on integer actuals; then whole-function tie breaks: promotion-
/// free, visibility, presence of a where clause.
#[must_use]
pub fn disambiguate(prog: &Program, candidates: &[Candidate], info: &CallInfo, scope: ExprId) -> Disambiguation {
    if candidates.is_empty() {
        return Disambiguation::None;
    }
    'outer: for (i, cand1) in candidates.iter().enumerate() {
        for (j, cand2) in candidates.iter().enumerate() {
            if i == j {
                continue;
            }
            if !is_better(prog, cand1, cand2, info, scope) {
                continue 'outer;
            }
        }
        return Disambiguation::Best(i);
    }
    Disambiguation::Ambiguous
}

/// True when `cand1` is no worse than `cand2` and strictly better somewhere.
fn is_better(prog: &Program, cand1: &Candidate, cand2: &Candidate, info: &CallInfo, scope: ExprId) -> bool {
    let arena = &prog.arena;
    let mut worse = false;
    let mut equal = true;

    for (k, actual) in info.actuals.iter().enumerate() {
        let formal1 = cand1.formal_of_actual[k];
        let formal2 = cand2.formal_of_actual[k];
        let ty1 = arena.sym(formal1).ty;
        let ty2 = arena.sym(formal2).ty;
        let arg1 = arena.arg_data(formal1);
        let arg2 = arena.arg_data(formal2);

        let mut promotes1 = false;
        can_dispatch(prog, actual.ty, actual.sym, ty1, &mut promotes1);
        let mut promotes2 = false;
        can_dispatch(prog, actual.ty, actual.sym, ty2, &mut promotes2);

        if ty1 == ty2 && arg1.instantiated_param && !arg2.instantiated_param {
            equal = false;
        } else if ty1 == ty2 && !arg1.instantiated_param && arg2.instantiated_param {
            worse = true;
        } else if !promotes1 && promotes2 {
            equal = false;
        } else if promotes1 && !promotes2 {
            worse = true;
        } else if ty1 == ty2 && arg1.instantiated_from.is_none() && arg2.instantiated_from.is_some() {
            equal = false;
        } else if ty1 == ty2 && arg1.instantiated_from.is_some() && arg2.instantiated_from.is_none() {
            worse = true;
        } else if !arg1.instantiated_from_any && arg2.instantiated_from_any {
            equal = false;
        } else if arg1.instantiated_from_any && !arg2.instantiated_from_any {
            worse = true;
        } else if actual.ty == ty1 && actual.ty != ty2 {
            equal = false;
        } else if actual.ty == ty2 && actual.ty != ty1 {
            worse = true;
        } else if ty1 != ty2 && arena.dispatches_to(ty1, ty2) {
            equal = false;
        } else if ty1 != ty2 && arena.dispatches_to(ty2, ty1) {
            worse = true;
        } else if prog.is_int_type(ty1) && prog.is_uint_type(ty2) {
            equal = false;
        } else if prog.is_int_type(ty2) && prog.is_uint_type(ty1) {
            worse = true;
        }
    }

    // A promotion-free rival always survives a promoting candidate.
    if !cand1.promotes && cand2.promotes {
        return true;
    }
    if cand1.promotes && !cand2.promotes {
        return false;
    }

    if !worse && equal {
        if is_more_visible(prog, scope, cand1.func, cand2.func) {
            equal = false;
        } else if is_more_visible(prog, scope, cand2.func, cand1.func) {
            worse = true;
        } else {
            let where1 = arena.fn_data(cand1.func).where_clause.is_some();
            let where2 = arena.fn_data(cand2.func).where_clause.is_some();
            if where1 && !where2 {
                equal = false;
            } else if !where1 && where2 {
                worse = true;
            }
        }
    }

    !worse && !equal
}

/// True when a function still has unbound generic structure and must be
/// instantiated before it can be a real candidate.
#[must_use]
pub fn is_generic_fn(prog: &Program, func: SymId) -> bool {
    if prog.arena.sym(func).flags.contains(Flags::GENERIC) {
        return true;
    }
    prog.arena.formals(func).iter().any(|&formal| {
        let sym = prog.arena.sym(formal);
        let SymKind::Arg(arg) = &sym.kind else { return false };
        if arg.instantiated_param || arg.instantiated_from.is_some() {
            return false;
        }
        sym.ty == prog.core.any
            || prog.arena.ty_has_flag(sym.ty, Flags::GENERIC)
            || matches!(arg.intent, Intent::Type | Intent::Param)
    })
}
