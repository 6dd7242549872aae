//! Generic instantiation.
//!
//! An instantiation substitutes concrete types and param values into a
//! generic function's formals and body. Instantiations are memoized by the
//! (function, ordered substitution) fingerprint so every call site with an
//! equivalent substitution shares one copy, and each instantiation records
//! the block it was first demanded from as its instantiation point.

use crate::{
    ast::{
        arena::{ExprId, SymId, TypeId},
        expr::ExprKind,
        sym::{Flags, Intent, SubstVal, Substitutions, SymKind},
        ty::StructuralTag,
    },
    program::Program,
    resolve::{
        candidate::{CallInfo, Candidate},
        visible::visibility_block_of,
        ResolveCtx,
    },
};

/// Infers the substitution map binding a generic candidate's formals from
/// the call's actuals. Returns `None` when a param formal is fed a
/// non-param actual (the candidate cannot be instantiated for this call).
#[must_use]
pub fn compute_substitutions(
    prog: &Program,
    candidate: &Candidate,
    info: &CallInfo,
) -> Option<Substitutions> {
    let arena = &prog.arena;
    let mut substs = Substitutions::new();
    for (actual, &formal) in info.actuals.iter().zip(&candidate.formal_of_actual) {
        let sym = arena.sym(formal);
        let SymKind::Arg(arg) = &sym.kind else { continue };
        if arg.instantiated_param || arg.instantiated_from.is_some() {
            continue;
        }
        match arg.intent {
            Intent::Param => {
                // An instantiated param wins over any default on the same
                // formal: the actual's value is the binding.
                let imm = actual.sym.and_then(|s| arena.sym(s).immediate())?;
                substs.push((formal, SubstVal::from_immediate(imm)));
            }
            Intent::Type => {
                substs.push((formal, SubstVal::Ty(arena.value_type(actual.ty))));
            }
            _ => {
                let is_generic_formal = sym.ty == prog.core.any
                    || arena.ty_has_flag(sym.ty, Flags::GENERIC);
                if is_generic_formal {
                    substs.push((formal, SubstVal::Ty(arena.value_type(actual.ty))));
                }
            }
        }
    }
    // Keep the fingerprint in formal order so equivalent call sites agree.
    let formals = arena.formals(candidate.func);
    substs.sort_by_key(|(formal, _)| formals.iter().position(|f| f == formal));
    Some(substs)
}

/// Instantiates `generic` under `substs`, memoized. The returned function
/// has concrete formal types, param references substituted in its body, and
/// its instantiation point set to the demanding call's block.
pub fn instantiate(
    prog: &mut Program,
    ctx: &mut ResolveCtx,
    generic: SymId,
    substs: &Substitutions,
    call: ExprId,
) -> SymId {
    let key = (generic, substs.clone());
    if let Some(&instance) = ctx.instantiation_cache.get(&key) {
        return instance;
    }

    let (instance, map) = prog.arena.copy_fn(generic);
    let point = visibility_block_of(prog, call);
    {
        let data = prog.arena.fn_data_mut(instance);
        data.instantiated_from = Some(generic);
        data.instantiation_point = point;
        data.substitutions = substs.clone();
    }
    let suffix = ctx.instantiation_cache.len();
    let base_name = prog.arena.sym(generic).name;
    prog.arena.sym_mut(instance).cname = {
        let name = prog.interner.resolve(base_name).to_owned();
        prog.interner.intern(&format!("{name}_{suffix}"))
    };

    for (old_formal, val) in substs {
        let formal = map.get(*old_formal).unwrap_or(*old_formal);
        let generic_ty = prog.arena.sym(formal).ty;
        match *val {
            SubstVal::Ty(ty) => {
                let from_any = generic_ty == prog.core.any;
                prog.arena.sym_mut(formal).ty = ty;
                let arg = prog.arena.arg_data_mut(formal);
                arg.instantiated_from = Some(generic_ty);
                arg.instantiated_from_any = from_any;
            }
            _ => {
                let imm = val.as_immediate().expect("param substitution holds a value");
                let literal = prog.literal(imm);
                let literal_ty = prog.arena.sym(literal).ty;
                prog.arena.sym_mut(formal).ty = literal_ty;
                prog.arena.arg_data_mut(formal).instantiated_param = true;
                substitute_sym(prog, instance, formal, literal);
            }
        }
    }

    // Genericity is now a property of the remaining formals alone.
    prog.arena.sym_mut(instance).flags.remove(Flags::GENERIC);

    // Define the instantiation next to its generic so they share visibility.
    let def = prog.def_of(instance);
    match prog.arena.sym(generic).def_point {
        Some(generic_def) if prog.arena.expr(generic_def).list.is_some() => {
            prog.arena.insert_after(generic_def, def);
        }
        _ => {
            let block = prog.program_block();
            prog.arena.block_push_tail(block, def);
        }
    }

    ctx.instantiation_cache.insert(key, instance);
    instance
}

/// Replaces body/where references to `formal` with references to `value`.
fn substitute_sym(prog: &mut Program, func: SymId, formal: SymId, value: SymId) {
    let data = prog.arena.fn_data(func).clone();
    let mut targets = prog.arena.collect_sym_refs(data.body);
    if let Some(w) = data.where_clause {
        targets.extend(prog.arena.collect_sym_refs(w));
    }
    for site in targets {
        if let ExprKind::SymRef { sym } = &mut prog.arena.expr_mut(site).kind {
            if *sym == formal {
                *sym = value;
            }
        }
    }
}

/// Expands a variadic formal to a concrete shape for a call of
/// `num_actuals` arguments, memoized per (function, expanded count).
///
/// The expanded formals feed a star-tuple temp built at the head of the
/// body, and body references to the variadic formal are redirected to the
/// tuple, so a declared count and an arity-matched count produce the same
/// body shape.
pub fn expand_varargs(
    prog: &mut Program,
    ctx: &mut ResolveCtx,
    func: SymId,
    num_actuals: usize,
) -> Option<SymId> {
    let formals = prog.arena.formals(func);
    let variadic_at = formals
        .iter()
        .position(|&f| prog.arena.arg_data(f).variadic.is_some())?;
    let fixed = formals.len() - 1;
    let count = match prog.arena.arg_data(formals[variadic_at]).variadic.unwrap() {
        crate::ast::sym::Variadic::Fixed(n) => {
            if num_actuals != fixed + n as usize {
                return None;
            }
            n as usize
        }
        crate::ast::sym::Variadic::Queried => num_actuals.checked_sub(fixed)?,
    };

    let key = (func, count as u32);
    if let Some(&expanded) = ctx.varargs_cache.get(&key) {
        return Some(expanded);
    }

    let (expanded, map) = prog.arena.copy_fn(func);
    let new_formals = prog.arena.formals(expanded);
    let variadic_formal = new_formals[variadic_at];
    let variadic_def = prog.arena.sym(variadic_formal).def_point.expect("formal without def");
    let elem_ty = prog.arena.sym(variadic_formal).ty;

    // The tuple the body sees in place of the variadic formal.
    let tuple_ty = star_tuple_type(prog, elem_ty, count);
    let var_name = prog.sym_name(variadic_formal).to_owned();
    let (tuple_var, tuple_def) = prog.new_var(&var_name, tuple_ty, Flags::TEMP);

    let mut element_formals = Vec::with_capacity(count);
    for i in 0..count {
        let name = format!("_e{i}_{var_name}");
        let intent = prog.arena.arg_data(variadic_formal).intent;
        let formal = prog.add_formal(expanded, &name, elem_ty, intent);
        prog.arena.sym_mut(formal).flags |= Flags::EXPANDED_VARARGS;
        let def = prog.arena.sym(formal).def_point.expect("formal without def");
        prog.arena.remove(def);
        prog.arena.insert_before(variadic_def, def);
        element_formals.push(formal);
    }
    prog.arena.remove(variadic_def);

    let body = prog.arena.fn_data(expanded).body;
    for (i, &formal) in element_formals.iter().enumerate().rev() {
        let tuple_ref = prog.sym_ref(tuple_var);
        let field = prog.int_lit(i as i64 + 1);
        let elem = prog.sym_ref(formal);
        let store = prog.prim_call(crate::prim::Prim::SetSvecMember, vec![tuple_ref, field, elem]);
        prog.arena.block_push_head(body, store);
    }
    prog.arena.block_push_head(body, tuple_def);
    substitute_sym(prog, expanded, variadic_formal, tuple_var);

    // Still generic if the element formals are: instantiation pins them
    // next, keyed off the formal types rather than the flag.
    prog.arena.sym_mut(expanded).flags.remove(Flags::GENERIC);

    let def = prog.def_of(expanded);
    match prog.arena.sym(func).def_point {
        Some(fn_def) if prog.arena.expr(fn_def).list.is_some() => prog.arena.insert_after(fn_def, def),
        _ => {
            let block = prog.program_block();
            prog.arena.block_push_tail(block, def);
        }
    }

    ctx.varargs_cache.insert(key, expanded);
    Some(expanded)
}

/// A star tuple: a record of `count` same-typed fields `x1..xN`.
fn star_tuple_type(prog: &mut Program, elem: TypeId, count: usize) -> TypeId {
    let name = {
        let elem_name = prog.type_name(elem);
        prog.interner.intern(&format!("_tuple_{count}_{elem_name}"))
    };
    let ty = prog.new_structural_type(name, StructuralTag::Record, Flags::TUPLE | Flags::STAR_TUPLE);
    for i in 1..=count {
        let field = prog.interner.intern(&format!("x{i}"));
        prog.new_field(ty, field, elem);
    }
    if elem == prog.core.any {
        if let Some(sym) = prog.arena.ty(ty).symbol {
            prog.arena.sym_mut(sym).flags |= Flags::GENERIC;
        }
    }
    ty
}
