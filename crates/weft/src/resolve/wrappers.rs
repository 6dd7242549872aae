//! Wrapper synthesis: adapter functions layered around a callee.
//!
//! Wrappers compose inside-out in a fixed order: default-argument filling,
//! argument reordering, coercion, then promotion. Each wrapper is itself a
//! function in the IR, memoized by its (callee, shape) key so repeated call
//! sites share one wrapper, and marked inline unless inlining is disabled.
//!
//! The promotion wrapper is the interesting one: under serial compilation it
//! emits a for-loop applying the callee pointwise; otherwise it materializes
//! an iterator class implementing the iterator protocol (`advance`,
//! `hasMore`, `getValue`, `zip1..zip4`, plus a `_getIterator` factory) and a
//! leader/follower function pair driving it.

use crate::{
    ast::{
        arena::{ExprId, SymId, TypeId},
        expr::ExprKind,
        sym::{Flags, Intent, RetTag},
        ty::StructuralTag,
    },
    diag::Warning,
    intern::WellKnown,
    prim::Prim,
    program::Program,
    resolve::{
        candidate::{CallInfo, Candidate},
        ResolveCtx,
    },
};

/// The synthesized iterator-protocol members for one aggregate type.
#[derive(Debug, Clone, Copy)]
pub struct IteratorInfo {
    pub class_ty: TypeId,
    pub record_ty: TypeId,
    pub advance: SymId,
    pub has_more: SymId,
    pub get_value: SymId,
    pub zips: [SymId; 4],
    pub get_iterator: SymId,
}

/// Applies the wrapper layers required by `candidate` for `info`, in the
/// canonical order, returning the function the call should target.
pub fn wrap_and_resolve(
    prog: &mut Program,
    ctx: &mut ResolveCtx,
    candidate: &Candidate,
    info: &CallInfo,
) -> SymId {
    let mut func = candidate.func;

    // 1. Defaults: formals with no matching actual.
    if !candidate.missing.is_empty() {
        func = default_wrapper(prog, ctx, func, candidate);
    }

    // 2. Order: keyword actuals arriving out of declaration order.
    if let Some(order) = actual_order(prog, func, candidate, info) {
        func = order_wrapper(prog, ctx, func, &order);
    }

    // 3. Coercion: actual types that only reach the formal via conversion.
    if let Some(coerced) = coercion_shape(prog, func, info) {
        func = coercion_wrapper(prog, ctx, func, &coerced);
    }

    // 4. Promotion: aggregate actuals applied pointwise.
    if candidate.promotes {
        let shape = promotion_shape(prog, func, info);
        prog.reporter.warning(Warning::Promotion {
            callee: prog.sym_name(candidate.func).to_owned(),
            loc: prog.arena.expr(info.call).loc,
        });
        func = promotion_wrapper(prog, ctx, func, &shape);
    }

    func
}

/// Creates the empty shell shared by all wrapper kinds.
fn empty_wrapper(prog: &mut Program, callee: SymId, flag: Flags, cname_tag: &str, serial: usize) -> SymId {
    let name = prog.arena.sym(callee).name;
    let data = prog.arena.fn_data(callee);
    let (ret_type, ret_tag) = (data.ret_type, data.ret_tag);
    let wrapper = prog.new_fn_named(name, ret_type, ret_tag);
    let mut flags = flag | Flags::COMPILER_INTERNAL;
    if !prog.config.no_inline {
        flags |= Flags::INLINE;
    }
    if prog.arena.sym(callee).flags.contains(Flags::METHOD) {
        flags |= Flags::METHOD;
    }
    prog.arena.sym_mut(wrapper).flags |= flags;
    prog.arena.sym_mut(wrapper).cname = {
        let base = prog.interner.resolve(prog.arena.sym(callee).cname).to_owned();
        prog.interner.intern(&format!("{base}{cname_tag}{serial}"))
    };
    wrapper
}

/// Defines a wrapper next to its callee so they are equally visible.
fn define_wrapper(prog: &mut Program, wrapper: SymId, callee: SymId) {
    let def = prog.def_of(wrapper);
    match prog.arena.sym(callee).def_point {
        Some(callee_def) if prog.arena.expr(callee_def).list.is_some() => {
            prog.arena.insert_after(callee_def, def);
        }
        _ => {
            let block = prog.program_block();
            prog.arena.block_push_tail(block, def);
        }
    }
}

/// Appends `call the callee; return its value` to a wrapper body.
fn finish_wrapper_body(prog: &mut Program, wrapper: SymId, callee: SymId, args: Vec<ExprId>) {
    let ret_type = prog.arena.fn_data(callee).ret_type;
    let call = prog.fn_call(callee, args);
    if ret_type == prog.core.void || ret_type == prog.core.unknown {
        prog.fn_push(wrapper, call);
        let ret = prog.ret_void();
        prog.fn_push(wrapper, ret);
    } else {
        let (ret_var, ret_def) = prog.new_var("_wrap_ret", ret_type, Flags::TEMP);
        prog.fn_push(wrapper, ret_def);
        let mv = {
            let dst = prog.sym_ref(ret_var);
            prog.prim_call(Prim::Move, vec![dst, call])
        };
        prog.fn_push(wrapper, mv);
        let value = prog.sym_ref(ret_var);
        let ret = prog.ret(value);
        prog.fn_push(wrapper, ret);
    }
}

// ---- default-argument wrapper ----

/// Fills unbound formals with their default expressions (or a type
/// default-init), honoring each formal's intent.
pub fn default_wrapper(prog: &mut Program, ctx: &mut ResolveCtx, callee: SymId, candidate: &Candidate) -> SymId {
    let formals = prog.arena.formals(callee);
    let present: Vec<bool> = formals
        .iter()
        .map(|f| !candidate.missing.contains(f))
        .collect();
    let key = (callee, present.clone());
    if let Some(&wrapper) = ctx.default_wrap_cache.get(&key) {
        return wrapper;
    }

    let wrapper = empty_wrapper(prog, callee, Flags::DEFAULT_WRAPPER, "_dflt", ctx.default_wrap_cache.len());
    let mut map = crate::ast::edit::CopyMap::new();
    let mut args: Vec<ExprId> = Vec::with_capacity(formals.len());

    for (&formal, &is_present) in formals.iter().zip(&present) {
        let name = prog.sym_name(formal).to_owned();
        let ty = prog.arena.sym(formal).ty;
        let intent = prog.arena.arg_data(formal).intent;
        if is_present {
            let new_formal = prog.add_formal(wrapper, &name, ty, intent);
            map.syms.insert(formal, new_formal);
            args.push(prog.sym_ref(new_formal));
        } else {
            // Substituted formal: a temp initialized from the default
            // expression, or default-initialized from the formal's type.
            let (temp, temp_def) = prog.new_var(&name, ty, Flags::TEMP);
            map.syms.insert(formal, temp);
            prog.fn_push(wrapper, temp_def);
            let def = prog.arena.sym(formal).def_point.expect("formal without def");
            let init = match prog.arena.expr(def).kind {
                ExprKind::Def { init: Some(default), .. } => {
                    let copy = prog.arena.copy_expr(default, &mut map);
                    // Defaults may refer to earlier formals.
                    prog.arena.update_sym_refs(copy, &map);
                    if intent == Intent::In || intent == Intent::Const {
                        prog.prim_call(Prim::InitCopy, vec![copy])
                    } else {
                        copy
                    }
                }
                _ => {
                    let ty_sym = prog.arena.ty(ty).symbol.expect("formal type without symbol");
                    let ty_ref = prog.sym_ref(ty_sym);
                    prog.prim_call(Prim::Init, vec![ty_ref])
                }
            };
            let mv = prog.move_to(temp, init);
            prog.fn_push(wrapper, mv);
            args.push(prog.sym_ref(temp));
        }
    }

    finish_wrapper_body(prog, wrapper, callee, args);
    define_wrapper(prog, wrapper, callee);
    ctx.default_wrap_cache.insert(key, wrapper);
    wrapper
}

// ---- argument-order wrapper ----

/// The declared-order position of each actual, when keyword passing put any
/// actual out of order.
fn actual_order(prog: &Program, func: SymId, candidate: &Candidate, info: &CallInfo) -> Option<Vec<usize>> {
    if info.actuals.iter().all(|a| a.keyword.is_none()) {
        return None;
    }
    if !candidate.missing.is_empty() {
        // The default wrapper already rebuilt the call in declared order.
        return None;
    }
    let formals = prog.arena.formals(func);
    let order: Vec<usize> = candidate
        .formal_of_actual
        .iter()
        .map(|f| formals.iter().position(|x| x == f).expect("formal of another function"))
        .collect();
    if order.windows(2).all(|w| w[0] < w[1]) {
        None
    } else {
        Some(order)
    }
}

/// Permutes positional arguments into the callee's declared order.
pub fn order_wrapper(prog: &mut Program, ctx: &mut ResolveCtx, callee: SymId, order: &[usize]) -> SymId {
    let key = (callee, order.to_vec());
    if let Some(&wrapper) = ctx.order_wrap_cache.get(&key) {
        return wrapper;
    }
    let wrapper = empty_wrapper(prog, callee, Flags::ORDER_WRAPPER, "_ord", ctx.order_wrap_cache.len());
    let formals = prog.arena.formals(callee);

    // Wrapper formals appear in actual order.
    let mut wrapper_formals = Vec::with_capacity(order.len());
    for &declared in order {
        let formal = formals[declared];
        let name = prog.sym_name(formal).to_owned();
        let ty = prog.arena.sym(formal).ty;
        let intent = prog.arena.arg_data(formal).intent;
        wrapper_formals.push(prog.add_formal(wrapper, &name, ty, intent));
    }

    // The inner call restores declared order.
    let mut args = vec![None; order.len()];
    for (actual_pos, &declared) in order.iter().enumerate() {
        args[declared] = Some(wrapper_formals[actual_pos]);
    }
    let args = args
        .into_iter()
        .map(|f| {
            let formal = f.expect("order permutation is a bijection");
            prog.sym_ref(formal)
        })
        .collect();

    finish_wrapper_body(prog, wrapper, callee, args);
    define_wrapper(prog, wrapper, callee);
    ctx.order_wrap_cache.insert(key, wrapper);
    wrapper
}

// ---- coercion wrapper ----

/// Actual types per formal when at least one formal needs a conversion;
/// `None` when everything matches exactly (or only via promotion, handled
/// later).
fn coercion_shape(prog: &Program, func: SymId, info: &CallInfo) -> Option<Vec<TypeId>> {
    let formals = prog.arena.formals(func);
    if formals.len() != info.actuals.len() {
        return None;
    }
    let mut any = false;
    let mut shape = Vec::with_capacity(formals.len());
    for (actual, &formal) in info.actuals.iter().zip(&formals) {
        let formal_ty = prog.arena.sym(formal).ty;
        let actual_val = prog.arena.value_type(actual.ty);
        let needs = actual_val != formal_ty
            && !prog.arena.dispatches_to(actual_val, formal_ty)
            && super::candidate::can_coerce(prog, actual_val, actual.sym, formal_ty);
        if needs {
            any = true;
            shape.push(actual_val);
        } else {
            shape.push(formal_ty);
        }
    }
    any.then_some(shape)
}

/// Inserts explicit casts (or sync projections) for each converted formal.
pub fn coercion_wrapper(prog: &mut Program, ctx: &mut ResolveCtx, callee: SymId, shape: &[TypeId]) -> SymId {
    let key = (callee, shape.to_vec());
    if let Some(&wrapper) = ctx.coerce_wrap_cache.get(&key) {
        return wrapper;
    }
    let wrapper = empty_wrapper(prog, callee, Flags::COERCE_WRAPPER, "_coerce", ctx.coerce_wrap_cache.len());
    let formals = prog.arena.formals(callee);
    let mut args = Vec::with_capacity(formals.len());

    for (&formal, &actual_ty) in formals.iter().zip(shape) {
        let name = prog.sym_name(formal).to_owned();
        let formal_ty = prog.arena.sym(formal).ty;
        let intent = prog.arena.arg_data(formal).intent;
        let new_formal = prog.add_formal(wrapper, &name, actual_ty, intent);
        if actual_ty == formal_ty {
            args.push(prog.sym_ref(new_formal));
            continue;
        }
        let flags = prog.arena.ty_flags(actual_ty);
        let converted = if flags.contains(Flags::SYNC) || flags.contains(Flags::SINGLE) {
            let arg = prog.sym_ref(new_formal);
            prog.prim_call(Prim::SyncValue, vec![arg])
        } else {
            let ty_sym = prog.arena.ty(formal_ty).symbol.expect("formal type without symbol");
            let ty_ref = prog.sym_ref(ty_sym);
            let arg = prog.sym_ref(new_formal);
            prog.prim_call(Prim::Cast, vec![ty_ref, arg])
        };
        let (temp, temp_def) = prog.new_var(&name, formal_ty, Flags::TEMP);
        prog.fn_push(wrapper, temp_def);
        let mv = prog.move_to(temp, converted);
        prog.fn_push(wrapper, mv);
        args.push(prog.sym_ref(temp));
    }

    finish_wrapper_body(prog, wrapper, callee, args);
    define_wrapper(prog, wrapper, callee);
    ctx.coerce_wrap_cache.insert(key, wrapper);
    wrapper
}

// ---- promotion wrapper ----

/// Per-formal promotion shape: the aggregate type for promoted positions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PromotionShape {
    /// For each formal: `Some(aggregate type)` when promoted.
    pub promoted: Vec<Option<TypeId>>,
}

fn promotion_shape(prog: &Program, func: SymId, info: &CallInfo) -> PromotionShape {
    let formals = prog.arena.formals(func);
    let promoted = formals
        .iter()
        .zip(&info.actuals)
        .map(|(&formal, actual)| {
            let formal_ty = prog.arena.sym(formal).ty;
            let actual_val = prog.arena.value_type(actual.ty);
            let mut promotes = false;
            if actual_val != formal_ty {
                super::candidate::can_dispatch(prog, actual.ty, actual.sym, formal_ty, &mut promotes);
            }
            promotes.then_some(actual_val)
        })
        .collect();
    PromotionShape { promoted }
}

/// Builds the pointwise-application wrapper.
///
/// Serial configuration gets a for-loop; otherwise the wrapper drives a
/// leader/follower pair over a synthesized iterator class.
pub fn promotion_wrapper(prog: &mut Program, ctx: &mut ResolveCtx, callee: SymId, shape: &PromotionShape) -> SymId {
    let key = (callee, shape.clone());
    if let Some(&wrapper) = ctx.promotion_wrap_cache.get(&key) {
        return wrapper;
    }
    let serial = prog.config.serial || prog.config.serial_forall;
    let wrapper = empty_wrapper(prog, callee, Flags::PROMOTION_WRAPPER, "_promo", ctx.promotion_wrap_cache.len());
    // Promotion wrappers yield their pointwise results.
    prog.arena.sym_mut(wrapper).flags |= Flags::ITERATOR_FN;
    prog.arena.sym_mut(wrapper).flags.remove(Flags::INLINE);
    prog.arena.fn_data_mut(wrapper).ret_type = prog.arena.fn_data(callee).ret_type;

    let formals = prog.arena.formals(callee);
    let mut wrapper_formals = Vec::with_capacity(formals.len());
    let mut first_aggregate: Option<(SymId, TypeId)> = None;
    for (&formal, promo) in formals.iter().zip(&shape.promoted) {
        let name = prog.sym_name(formal).to_owned();
        let intent = prog.arena.arg_data(formal).intent;
        let ty = promo.unwrap_or_else(|| prog.arena.sym(formal).ty);
        let new_formal = prog.add_formal(wrapper, &name, ty, intent);
        if promo.is_some() && first_aggregate.is_none() {
            first_aggregate = Some((new_formal, ty));
        }
        wrapper_formals.push(new_formal);
    }
    let (lead_formal, lead_ty) = first_aggregate.expect("promotion wrapper without an aggregate");

    if serial {
        build_serial_promotion(prog, wrapper, callee, &wrapper_formals, shape, lead_formal);
    } else {
        build_parallel_promotion(prog, ctx, wrapper, callee, &wrapper_formals, shape, lead_formal, lead_ty);
    }

    define_wrapper(prog, wrapper, callee);
    ctx.promotion_wrap_cache.insert(key, wrapper);
    wrapper
}

/// `for i in 1..size do yield callee(A(i), ...)`.
fn build_serial_promotion(
    prog: &mut Program,
    wrapper: SymId,
    callee: SymId,
    wrapper_formals: &[SymId],
    shape: &PromotionShape,
    lead_formal: SymId,
) {
    let int64 = prog.core.int64;
    let (index, index_def) = prog.new_var("_i", int64, Flags::TEMP);
    prog.fn_push(wrapper, index_def);

    let loop_body = prog.block();
    let info = {
        let idx = prog.sym_ref(index);
        let aggr = prog.sym_ref(lead_formal);
        prog.prim_call(Prim::BlockForLoop, vec![idx, aggr])
    };

    let args = promoted_element_args(prog, loop_body, wrapper_formals, shape, index);
    let call = prog.fn_call(callee, args);
    let yielded = yield_result(prog, callee, call);
    for stmt in yielded {
        prog.arena.block_push_tail(loop_body, stmt);
    }

    prog.fn_push(wrapper, loop_body);
    prog.set_block_info(loop_body, info);
    let ret = prog.ret_void();
    prog.fn_push(wrapper, ret);
}

/// Leader/follower structure: the wrapper takes one chunk from the leader,
/// obtains the follower's iterator, and drives the protocol loop.
#[allow(clippy::too_many_arguments)]
fn build_parallel_promotion(
    prog: &mut Program,
    ctx: &mut ResolveCtx,
    wrapper: SymId,
    callee: SymId,
    wrapper_formals: &[SymId],
    shape: &PromotionShape,
    lead_formal: SymId,
    lead_ty: TypeId,
) {
    let iter_info = proto_iterator_class(prog, ctx, lead_ty);
    let leader = build_leader(prog, callee, lead_ty);
    let follower = build_follower(prog, callee, lead_ty, iter_info);

    // chunk = leader(A)
    let (chunk, chunk_def) = prog.new_var("_chunk", lead_ty, Flags::TEMP);
    prog.fn_push(wrapper, chunk_def);
    let lead_call = {
        let a = prog.sym_ref(lead_formal);
        prog.fn_call(leader, vec![a])
    };
    let mv = prog.move_to(chunk, lead_call);
    prog.fn_push(wrapper, mv);

    // it = follower(chunk)
    let (it, it_def) = prog.new_var("_it", iter_info.class_ty, Flags::TEMP);
    prog.fn_push(wrapper, it_def);
    let follow_call = {
        let c = prog.sym_ref(chunk);
        prog.fn_call(follower, vec![c])
    };
    let mv = prog.move_to(it, follow_call);
    prog.fn_push(wrapper, mv);

    // while hasMore(it) { x = getValue(it); yield callee(...); advance(it) }
    let loop_body = prog.block();
    let cond_call = {
        let itr = prog.sym_ref(it);
        prog.fn_call(iter_info.has_more, vec![itr])
    };
    let info = prog.prim_call(Prim::BlockWhileDo, vec![cond_call]);

    let (cursor_val, cursor_def) = prog.new_var("_x", prog.core.unknown, Flags::TEMP);
    {
        let elem_ty = prog
            .arena
            .ty(prog.arena.value_type(lead_ty))
            .scalar_promotion
            .unwrap_or(prog.core.unknown);
        prog.arena.sym_mut(cursor_val).ty = elem_ty;
    }
    prog.arena.block_push_tail(loop_body, cursor_def);
    let get_call = {
        let itr = prog.sym_ref(it);
        prog.fn_call(iter_info.get_value, vec![itr])
    };
    let mv = prog.move_to(cursor_val, get_call);
    prog.arena.block_push_tail(loop_body, mv);

    let mut args = Vec::with_capacity(wrapper_formals.len());
    for (&formal, promo) in wrapper_formals.iter().zip(&shape.promoted) {
        if formal == lead_formal {
            args.push(prog.sym_ref(cursor_val));
        } else if promo.is_some() {
            // Secondary promoted aggregates index by the shared cursor.
            let cursor = {
                let name = prog.interner.intern("cursor");
                let field = prog
                    .arena
                    .field_named(iter_info.class_ty, name, false)
                    .expect("iterator class without cursor");
                let itr = prog.sym_ref(it);
                let fref = prog.sym_ref(field);
                prog.prim_call(Prim::GetMemberValue, vec![itr, fref])
            };
            let aggr = prog.sym_ref(formal);
            args.push(prog.prim_call(Prim::ArrayGetValue, vec![aggr, cursor]));
        } else {
            args.push(prog.sym_ref(formal));
        }
    }
    let call = prog.fn_call(callee, args);
    for stmt in yield_result(prog, callee, call) {
        prog.arena.block_push_tail(loop_body, stmt);
    }
    let advance_call = {
        let itr = prog.sym_ref(it);
        prog.fn_call(iter_info.advance, vec![itr])
    };
    prog.arena.block_push_tail(loop_body, advance_call);

    prog.fn_push(wrapper, loop_body);
    prog.set_block_info(loop_body, info);
    let ret = prog.ret_void();
    prog.fn_push(wrapper, ret);
}

/// Element loads for each promoted formal inside a serial loop body; other
/// formals pass through.
fn promoted_element_args(
    prog: &mut Program,
    loop_body: ExprId,
    wrapper_formals: &[SymId],
    shape: &PromotionShape,
    index: SymId,
) -> Vec<ExprId> {
    let mut args = Vec::with_capacity(wrapper_formals.len());
    for (&formal, promo) in wrapper_formals.iter().zip(&shape.promoted) {
        match promo {
            Some(aggregate_ty) => {
                let elem_ty = prog
                    .arena
                    .ty(*aggregate_ty)
                    .scalar_promotion
                    .unwrap_or(prog.core.unknown);
                let name = format!("_elt_{}", prog.sym_name(formal));
                let (elem, elem_def) = prog.new_var(&name, elem_ty, Flags::TEMP);
                prog.arena.block_push_tail(loop_body, elem_def);
                let load = {
                    let aggr = prog.sym_ref(formal);
                    let idx = prog.sym_ref(index);
                    prog.prim_call(Prim::ArrayGetValue, vec![aggr, idx])
                };
                let mv = prog.move_to(elem, load);
                prog.arena.block_push_tail(loop_body, mv);
                args.push(prog.sym_ref(elem));
            }
            None => args.push(prog.sym_ref(formal)),
        }
    }
    args
}

/// `yield` statements for a pointwise result (or just the call when the
/// callee returns nothing).
fn yield_result(prog: &mut Program, callee: SymId, call: ExprId) -> Vec<ExprId> {
    let ret_type = prog.arena.fn_data(callee).ret_type;
    if ret_type == prog.core.void || ret_type == prog.core.unknown {
        return vec![call];
    }
    let (result, result_def) = prog.new_var("_r", ret_type, Flags::TEMP);
    let mv = prog.move_to(result, call);
    let value = prog.sym_ref(result);
    let yield_stmt = prog.prim_call(Prim::Yield, vec![value]);
    vec![result_def, mv, yield_stmt]
}

/// The leader yields the whole aggregate as a single chunk.
fn build_leader(prog: &mut Program, callee: SymId, aggregate_ty: TypeId) -> SymId {
    let name = format!("{}_promo_leader", prog.sym_name(callee));
    let leader = prog.new_fn(&name, aggregate_ty, RetTag::Value);
    prog.arena.sym_mut(leader).flags |= Flags::COMPILER_INTERNAL | Flags::ITERATOR_FN;
    let formal = prog.add_formal(leader, "chunk", aggregate_ty, Intent::Blank);
    let value = prog.sym_ref(formal);
    let ret = prog.ret(value);
    prog.fn_push(leader, ret);
    prog.insert_fn_at_program(leader);
    leader
}

/// The follower allocates the iterator for one chunk.
fn build_follower(prog: &mut Program, callee: SymId, aggregate_ty: TypeId, info: IteratorInfo) -> SymId {
    let name = format!("{}_promo_follower", prog.sym_name(callee));
    let follower = prog.new_fn(&name, info.class_ty, RetTag::Value);
    prog.arena.sym_mut(follower).flags |= Flags::COMPILER_INTERNAL | Flags::ITERATOR_FN;
    let formal = prog.add_formal(follower, "chunk", aggregate_ty, Intent::Blank);
    let call = {
        let chunk = prog.sym_ref(formal);
        prog.fn_call(info.get_iterator, vec![chunk])
    };
    let (it, it_def) = prog.new_var("_it", info.class_ty, Flags::TEMP);
    prog.fn_push(follower, it_def);
    let mv = prog.move_to(it, call);
    prog.fn_push(follower, mv);
    let value = prog.sym_ref(it);
    let ret = prog.ret(value);
    prog.fn_push(follower, ret);
    prog.insert_fn_at_program(follower);
    follower
}

/// Synthesizes (or returns) the iterator class pair for an aggregate type:
/// the class holding `{aggregate, cursor, limit}`, its wrapping record, the
/// protocol methods, and the `_getIterator` factory.
pub fn proto_iterator_class(prog: &mut Program, ctx: &mut ResolveCtx, aggregate_ty: TypeId) -> IteratorInfo {
    if let Some(&info) = ctx.iterator_cache.get(&aggregate_ty) {
        return info;
    }

    let elem_ty = prog
        .arena
        .ty(prog.arena.value_type(aggregate_ty))
        .scalar_promotion
        .unwrap_or(prog.core.unknown);
    let base = prog.type_name(aggregate_ty);

    let class_ty = {
        let name = prog.interner.intern(&format!("_ic_{base}"));
        prog.new_structural_type(name, StructuralTag::Class, Flags::ITERATOR_CLASS)
    };
    let aggregate_field = {
        let name = prog.interner.intern("aggregate");
        prog.new_field(class_ty, name, aggregate_ty)
    };
    let cursor_field = {
        let name = prog.interner.intern("cursor");
        prog.new_field(class_ty, name, prog.core.int64)
    };
    let limit_field = {
        let name = prog.interner.intern("limit");
        prog.new_field(class_ty, name, prog.core.int64)
    };
    let object = prog.core.object;
    prog.arena.ty_mut(class_ty).dispatch_parents.push(object);
    prog.arena.ty_mut(object).dispatch_children.push(class_ty);

    let record_ty = {
        let name = prog.interner.intern(&format!("_ir_{base}"));
        let ty = prog.new_structural_type(name, StructuralTag::Record, Flags::ITERATOR_RECORD);
        let field = prog.interner.intern("_ic");
        prog.new_field(ty, field, class_ty);
        ty
    };

    // advance: this.cursor = this.cursor + 1
    let advance = iterator_method(prog, WellKnown::Advance.id(), class_ty, prog.core.void, |prog, func, this| {
        let (cur, cur_def) = prog.new_var("_cur", prog.core.int64, Flags::TEMP);
        prog.fn_push(func, cur_def);
        let load = {
            let obj = prog.sym_ref(this);
            let fld = prog.sym_ref(cursor_field);
            prog.prim_call(Prim::GetMemberValue, vec![obj, fld])
        };
        let mv = prog.move_to(cur, load);
        prog.fn_push(func, mv);
        let (next, next_def) = prog.new_var("_next", prog.core.int64, Flags::TEMP);
        prog.fn_push(func, next_def);
        let add = {
            let lhs = prog.sym_ref(cur);
            let one = prog.int_lit(1);
            prog.prim_call(Prim::Add, vec![lhs, one])
        };
        let mv = prog.move_to(next, add);
        prog.fn_push(func, mv);
        let store = {
            let obj = prog.sym_ref(this);
            let fld = prog.sym_ref(cursor_field);
            let val = prog.sym_ref(next);
            prog.prim_call(Prim::SetMember, vec![obj, fld, val])
        };
        prog.fn_push(func, store);
        let ret = prog.ret_void();
        prog.fn_push(func, ret);
    });

    // hasMore: return this.cursor <= this.limit
    let has_more = iterator_method(prog, WellKnown::HasMore.id(), class_ty, prog.core.bool_, |prog, func, this| {
        let (cur, cur_def) = prog.new_var("_cur", prog.core.int64, Flags::TEMP);
        prog.fn_push(func, cur_def);
        let load = {
            let obj = prog.sym_ref(this);
            let fld = prog.sym_ref(cursor_field);
            prog.prim_call(Prim::GetMemberValue, vec![obj, fld])
        };
        let mv = prog.move_to(cur, load);
        prog.fn_push(func, mv);
        let (lim, lim_def) = prog.new_var("_lim", prog.core.int64, Flags::TEMP);
        prog.fn_push(func, lim_def);
        let load = {
            let obj = prog.sym_ref(this);
            let fld = prog.sym_ref(limit_field);
            prog.prim_call(Prim::GetMemberValue, vec![obj, fld])
        };
        let mv = prog.move_to(lim, load);
        prog.fn_push(func, mv);
        let (more, more_def) = prog.new_var("_more", prog.core.bool_, Flags::TEMP);
        prog.fn_push(func, more_def);
        let cmp = {
            let lhs = prog.sym_ref(cur);
            let rhs = prog.sym_ref(lim);
            prog.prim_call(Prim::Le, vec![lhs, rhs])
        };
        let mv = prog.move_to(more, cmp);
        prog.fn_push(func, mv);
        let value = prog.sym_ref(more);
        let ret = prog.ret(value);
        prog.fn_push(func, ret);
    });

    // getValue: return this.aggregate(this.cursor)
    let get_value = iterator_method(prog, WellKnown::GetValue.id(), class_ty, elem_ty, |prog, func, this| {
        let aggregate_val_ty = prog.arena.sym(aggregate_field).ty;
        let (aggr, aggr_def) = prog.new_var("_aggr", aggregate_val_ty, Flags::TEMP);
        prog.fn_push(func, aggr_def);
        let load = {
            let obj = prog.sym_ref(this);
            let fld = prog.sym_ref(aggregate_field);
            prog.prim_call(Prim::GetMemberValue, vec![obj, fld])
        };
        let mv = prog.move_to(aggr, load);
        prog.fn_push(func, mv);
        let (cur, cur_def) = prog.new_var("_cur", prog.core.int64, Flags::TEMP);
        prog.fn_push(func, cur_def);
        let load = {
            let obj = prog.sym_ref(this);
            let fld = prog.sym_ref(cursor_field);
            prog.prim_call(Prim::GetMemberValue, vec![obj, fld])
        };
        let mv = prog.move_to(cur, load);
        prog.fn_push(func, mv);
        let (value, value_def) = prog.new_var("_v", elem_ty, Flags::TEMP);
        prog.fn_push(func, value_def);
        let get = {
            let a = prog.sym_ref(aggr);
            let i = prog.sym_ref(cur);
            prog.prim_call(Prim::ArrayGetValue, vec![a, i])
        };
        let mv = prog.move_to(value, get);
        prog.fn_push(func, mv);
        let v = prog.sym_ref(value);
        let ret = prog.ret(v);
        prog.fn_push(func, ret);
    });

    // zip1..zip4: the zippered-iteration steps; each advances the cursor.
    let zip_names = [WellKnown::Zip1, WellKnown::Zip2, WellKnown::Zip3, WellKnown::Zip4];
    let zips = zip_names.map(|zip| {
        iterator_method(prog, zip.id(), class_ty, prog.core.void, |prog, func, this| {
            let call = {
                let obj = prog.sym_ref(this);
                prog.fn_call(advance, vec![obj])
            };
            prog.fn_push(func, call);
            let ret = prog.ret_void();
            prog.fn_push(func, ret);
        })
    });

    // _getIterator: allocate, tag, and prime an instance.
    let get_iterator = {
        let get_iterator = prog.new_fn_named(WellKnown::GetIterator.id(), class_ty, RetTag::Value);
        prog.arena.sym_mut(get_iterator).flags |= Flags::COMPILER_INTERNAL;
        let aggr_formal = prog.add_formal(get_iterator, "aggregate", aggregate_ty, Intent::Blank);
        let (ic, ic_def) = prog.new_var("_ic", class_ty, Flags::TEMP);
        prog.fn_push(get_iterator, ic_def);
        let class_sym = prog.arena.ty(class_ty).symbol.expect("class without symbol");
        let alloc = {
            let ty_ref = prog.sym_ref(class_sym);
            prog.prim_call(Prim::ChplAlloc, vec![ty_ref])
        };
        let mv = prog.move_to(ic, alloc);
        prog.fn_push(get_iterator, mv);
        let tag = {
            let obj = prog.sym_ref(ic);
            prog.prim_call(Prim::SetCid, vec![obj])
        };
        prog.fn_push(get_iterator, tag);
        let store_aggr = {
            let obj = prog.sym_ref(ic);
            let fld = prog.sym_ref(aggregate_field);
            let val = prog.sym_ref(aggr_formal);
            prog.prim_call(Prim::SetMember, vec![obj, fld, val])
        };
        prog.fn_push(get_iterator, store_aggr);
        let store_cursor = {
            let obj = prog.sym_ref(ic);
            let fld = prog.sym_ref(cursor_field);
            let one = prog.int_lit(1);
            prog.prim_call(Prim::SetMember, vec![obj, fld, one])
        };
        prog.fn_push(get_iterator, store_cursor);
        // limit comes from the aggregate's element count.
        let size_field = {
            let size_name = prog.interner.intern("_size");
            prog.arena.field_named(prog.arena.value_type(aggregate_ty), size_name, false)
        };
        if let Some(size_field) = size_field {
            let (sz, sz_def) = prog.new_var("_sz", prog.core.int64, Flags::TEMP);
            prog.fn_push(get_iterator, sz_def);
            let load = {
                let a = prog.sym_ref(aggr_formal);
                let fld = prog.sym_ref(size_field);
                prog.prim_call(Prim::GetMemberValue, vec![a, fld])
            };
            let mv = prog.move_to(sz, load);
            prog.fn_push(get_iterator, mv);
            let store = {
                let obj = prog.sym_ref(ic);
                let fld = prog.sym_ref(limit_field);
                let val = prog.sym_ref(sz);
                prog.prim_call(Prim::SetMember, vec![obj, fld, val])
            };
            prog.fn_push(get_iterator, store);
        }
        let value = prog.sym_ref(ic);
        let ret = prog.ret(value);
        prog.fn_push(get_iterator, ret);
        prog.insert_fn_at_program(get_iterator);
        get_iterator
    };

    let info = IteratorInfo {
        class_ty,
        record_ty,
        advance,
        has_more,
        get_value,
        zips,
        get_iterator,
    };
    ctx.iterator_cache.insert(aggregate_ty, info);
    info
}

/// Shell for one iterator-protocol method: `name(this: class) : ret`.
fn iterator_method(
    prog: &mut Program,
    name: crate::intern::NameId,
    class_ty: TypeId,
    ret_ty: TypeId,
    build_body: impl FnOnce(&mut Program, SymId, SymId),
) -> SymId {
    let func = prog.new_fn_named(name, ret_ty, RetTag::Value);
    prog.arena.sym_mut(func).flags |= Flags::METHOD | Flags::ITERATOR_FN | Flags::COMPILER_INTERNAL;
    let this = {
        let this_name = prog.interner.resolve(WellKnown::This.id()).to_owned();
        prog.add_formal(func, &this_name, class_ty, Intent::Blank)
    };
    build_body(prog, func, this);
    prog.insert_fn_at_program(func);
    func
}
