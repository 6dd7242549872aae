//! Wide-reference insertion and `local`-block narrowing.
//!
//! Under multi-locale compilation every class pointer and reference that
//! might point at a remote locale becomes a `(locale, addr)` record. The
//! pass synthesizes the wide wrapper types, retypes definitions, formals,
//! fields, and return types (with the documented exclusions), and rewrites
//! member and class-id traffic onto the wide primitives. Inside blocks the
//! user asserted `local`, wide values are narrowed through locale-checked
//! temps, and resolved callees are cloned into `_local_` variants with their
//! own narrowed types.

use ahash::AHashMap;

use crate::{
    ast::{
        arena::{ExprId, SymId, TypeId},
        expr::ExprKind,
        sym::{Flags, SymKind},
        ty::StructuralTag,
    },
    intern::WellKnown,
    prim::Prim,
    program::Program,
};

/// Wide-type tables built by the pass and consumed by the emitter.
#[derive(Debug, Default)]
pub struct WideInfo {
    /// Class (or string) type to its wide-class record.
    pub wide_class_map: AHashMap<TypeId, TypeId>,
    /// Reference type to its wide-reference record.
    pub wide_ref_map: AHashMap<TypeId, TypeId>,
}

/// Runs wide-reference insertion. A no-op under single-locale compilation.
pub fn insert_wide_references(prog: &mut Program) -> WideInfo {
    let mut info = WideInfo::default();
    if !prog.config.widens() {
        handle_local_blocks(prog, &info);
        return info;
    }

    build_wide_types(prog, &mut info);
    retype_symbols(prog, &info);
    rewrite_wide_accesses(prog);
    handle_local_blocks(prog, &info);
    info
}

// ---- wide type synthesis ----

/// A wide wrapper: `{locale: int32, addr: T}` (strings carry their length
/// too, so remote gets can size the copy).
fn build_wide_wrapper(prog: &mut Program, base: TypeId, flag: Flags) -> TypeId {
    let name = {
        let base_name = prog.type_name(base);
        prog.interner.intern(&format!("__wide_{base_name}"))
    };
    let wide = prog.new_structural_type(name, StructuralTag::Record, flag);
    let locale_ty = prog.core.locale_id();
    prog.new_field(wide, WellKnown::Locale.id(), locale_ty);
    prog.new_field(wide, WellKnown::Addr.id(), base);
    if base == prog.core.string {
        prog.new_field(wide, WellKnown::Size.id(), prog.core.int32);
    }
    prog.arena.ty_mut(wide).val_type = Some(base);
    prog.arena.ty_mut(base).wide_type = Some(wide);
    // The wide wrapper is addressed through the same reference type.
    if let Some(ref_ty) = prog.arena.ty(base).ref_type {
        prog.arena.ty_mut(wide).ref_type = Some(ref_ty);
    }
    wide
}

fn build_wide_types(prog: &mut Program, info: &mut WideInfo) {
    let candidates: Vec<TypeId> = prog.arena.type_ids().collect();
    for ty in candidates {
        if prog.arena.ty(ty).wide_type.is_some() {
            continue;
        }
        let flags = prog.arena.ty_flags(ty);
        if flags.contains(Flags::WIDE) || flags.contains(Flags::WIDE_CLASS) {
            continue;
        }
        if flags.contains(Flags::NO_WIDE_CLASS) || flags.contains(Flags::EXTERN) {
            continue;
        }
        if prog.arena.is_class_like(ty) || ty == prog.core.string {
            let wide = build_wide_wrapper(prog, ty, Flags::WIDE_CLASS);
            info.wide_class_map.insert(ty, wide);
        } else if flags.contains(Flags::REF) {
            let wide = build_wide_wrapper(prog, ty, Flags::WIDE);
            info.wide_ref_map.insert(ty, wide);
        }
    }
}

fn wide_of(prog: &Program, ty: TypeId) -> Option<TypeId> {
    prog.arena.ty(ty).wide_type
}

// ---- retyping ----

/// Widens the types of definitions, formals, fields, and function returns.
///
/// Exclusions: literals, type-only symbols, `super` fields, extern symbols,
/// and the fields of the wide wrappers themselves (the `addr` slot must stay
/// narrow).
fn retype_symbols(prog: &mut Program, _info: &WideInfo) {
    for sym in prog.arena.sym_ids().collect::<Vec<_>>() {
        let node = prog.arena.sym(sym);
        match &node.kind {
            SymKind::Var { immediate: Some(_) } => continue,
            SymKind::Var { .. } | SymKind::Arg(_) => {}
            SymKind::Fn(_) => {
                let ret = prog.arena.fn_data(sym).ret_type;
                if let Some(wide) = wide_of(prog, ret) {
                    prog.arena.fn_data_mut(sym).ret_type = wide;
                }
                continue;
            }
            _ => continue,
        }
        let flags = node.flags;
        if flags.contains(Flags::SUPER_CLASS)
            || flags.contains(Flags::TYPE_VARIABLE)
            || flags.contains(Flags::EXTERN)
        {
            continue;
        }
        // Fields of a wide wrapper stay as built.
        if let Some(def) = node.def_point {
            if let Some(owner) = owning_type(prog, def) {
                let owner_flags = prog.arena.ty_flags(owner);
                if owner_flags.contains(Flags::WIDE) || owner_flags.contains(Flags::WIDE_CLASS) {
                    continue;
                }
            }
        }
        if let Some(wide) = wide_of(prog, node.ty) {
            prog.arena.sym_mut(sym).ty = wide;
        }
    }
}

/// The structural type owning a field definition, if the def is a field.
fn owning_type(prog: &Program, def: ExprId) -> Option<TypeId> {
    let list = prog.arena.expr(def).list?;
    match prog.arena.list(list).owner {
        crate::ast::arena::ListOwner::Fields(ty) => Some(ty),
        _ => None,
    }
}

// ---- access rewriting ----

fn is_wide_ty(prog: &Program, ty: TypeId) -> bool {
    let flags = prog.arena.ty_flags(ty);
    flags.contains(Flags::WIDE) || flags.contains(Flags::WIDE_CLASS)
}

/// Member and class-id traffic through a wide base moves onto the wide
/// primitives; narrow values stored into wide slots are wrapped first.
fn rewrite_wide_accesses(prog: &mut Program) {
    for call in prog.arena.all_calls() {
        if !prog.arena.expr(call).in_tree() {
            continue;
        }
        let Some(prim) = prog.arena.call(call).prim else { continue };
        match prim {
            Prim::GetMemberValue | Prim::GetMember => {
                let obj = prog.arena.actual(call, 0);
                if is_wide_ty(prog, prog.expr_type(obj)) && !is_super_access(prog, call) {
                    prog.arena.call_mut(call).prim = Some(Prim::WideGet);
                }
            }
            Prim::SetMember => {
                let obj = prog.arena.actual(call, 0);
                if is_wide_ty(prog, prog.expr_type(obj)) && !is_super_access(prog, call) {
                    prog.arena.call_mut(call).prim = Some(Prim::WidePut);
                }
            }
            Prim::GetCid | Prim::TestCid => {
                let obj = prog.arena.actual(call, 0);
                if is_wide_ty(prog, prog.expr_type(obj)) {
                    prog.arena.call_mut(call).prim = Some(Prim::WideClassGetCid);
                }
            }
            Prim::Move => {
                // Narrow source into a wide destination: wrap with the local
                // locale id.
                let actuals = prog.arena.actuals(call);
                let [dst, src] = actuals[..] else { continue };
                let dst_ty = prog.expr_type(dst);
                let src_ty = prog.expr_type(src);
                if is_wide_ty(prog, dst_ty)
                    && !is_wide_ty(prog, src_ty)
                    && prog.arena.ty(dst_ty).val_type == Some(prog.arena.value_type(src_ty))
                {
                    prog.arena.remove(src);
                    let wrapped = prog.prim_call(Prim::WideMake, vec![src]);
                    let dst_copy = {
                        let mut map = crate::ast::edit::CopyMap::new();
                        prog.arena.copy_expr(dst, &mut map)
                    };
                    let replacement = prog.prim_call(Prim::Move, vec![dst_copy, wrapped]);
                    prog.arena.replace(call, replacement);
                }
            }
            _ => {}
        }
    }
}

/// `super` fields embed the parent object and are never read wide.
fn is_super_access(prog: &Program, call: ExprId) -> bool {
    prog.arena
        .actuals(call)
        .get(1)
        .and_then(|&f| prog.arena.sym_ref(f))
        .is_some_and(|f| prog.arena.sym(f).flags.contains(Flags::SUPER_CLASS))
}

// ---- local blocks ----

/// Breadth-first narrowing of `local`-tagged blocks.
///
/// Calls that would communicate get their wide operands replaced by
/// locale-checked narrow temps; resolved callees are cloned into `_local_`
/// copies (memoized, with the memo seeded before recursing so recursive
/// functions terminate) whose wide return types are narrowed.
fn handle_local_blocks(prog: &mut Program, _info: &WideInfo) {
    let mut cache: AHashMap<SymId, SymId> = AHashMap::new();
    let mut queue: Vec<ExprId> = prog
        .arena
        .all_blocks()
        .into_iter()
        .filter(|&b| prog.arena.block_tagged(b, Prim::BlockLocal))
        .collect();

    let mut index = 0;
    while index < queue.len() {
        let block = queue[index];
        index += 1;
        for call in prog.arena.collect_calls(block) {
            if !prog.arena.expr(call).in_tree() {
                continue;
            }
            localize_call(prog, call);
            let Some(callee) = prog.arena.resolved_callee(call) else { continue };
            if prog.arena.sym(callee).flags.contains(Flags::EXTERN) {
                continue;
            }
            let local = if let Some(&local) = cache.get(&callee) {
                local
            } else {
                let (local, _) = prog.arena.copy_fn(callee);
                let name = prog.arena.sym(callee).name;
                prog.arena.sym_mut(local).name = prog.interner.intern_prefixed("_local_", name);
                let cname = prog.arena.sym(callee).cname;
                prog.arena.sym_mut(local).cname = prog.interner.intern_prefixed("_local_", cname);
                let def = prog.def_of(local);
                match prog.arena.sym(callee).def_point {
                    Some(callee_def) if prog.arena.expr(callee_def).list.is_some() => {
                        prog.arena.insert_before(callee_def, def);
                    }
                    _ => {
                        let at = prog.program_block();
                        prog.arena.block_push_tail(at, def);
                    }
                }
                // Seed before queueing the body: recursion must hit the
                // memo, not clone forever.
                cache.insert(callee, local);
                cache.insert(local, local);
                narrow_return(prog, local);
                queue.push(prog.arena.fn_data(local).body);
                local
            };
            if local != callee {
                let base = prog.arena.call(call).base.expect("resolved call without base");
                if let ExprKind::SymRef { sym } = &mut prog.arena.expr_mut(base).kind {
                    *sym = local;
                }
            }
        }
    }
}

/// Replaces one wide operand with a locale-checked narrow temp.
fn insert_local_temp(prog: &mut Program, operand: ExprId) {
    let stmt = prog.arena.stmt_of(operand);
    let wide_ty = prog.expr_type(operand);
    let Some(narrow_ty) = prog.arena.ty(wide_ty).val_type else { return };
    let base_name = match prog.arena.sym_ref(operand) {
        Some(sym) => prog.sym_name(sym).to_owned(),
        None => "tmp".to_owned(),
    };
    let (var, def) = prog.new_var(&format!("local_{base_name}"), narrow_ty, Flags::TEMP);

    if !prog.config.no_local_checks {
        let checked = {
            let mut map = crate::ast::edit::CopyMap::new();
            prog.arena.copy_expr(operand, &mut map)
        };
        let check = prog.prim_call(Prim::LocalCheck, vec![checked]);
        prog.arena.insert_before(stmt, check);
    }
    prog.arena.insert_before(stmt, def);
    let source = {
        let mut map = crate::ast::edit::CopyMap::new();
        prog.arena.copy_expr(operand, &mut map)
    };
    let dst = prog.sym_ref(var);
    let mv = prog.prim_call(Prim::Move, vec![dst, source]);
    prog.arena.insert_before(stmt, mv);
    let replacement = prog.sym_ref(var);
    prog.arena.replace(operand, replacement);
}

/// Narrows the wide operands of a call that would otherwise communicate,
/// mirroring the emitter's communication points.
fn localize_call(prog: &mut Program, call: ExprId) {
    let Some(prim) = prog.arena.call(call).prim else { return };
    match prim {
        Prim::WideGet | Prim::GetMember | Prim::GetMemberValue | Prim::GetSvecMember | Prim::GetSvecMemberValue => {
            let obj = prog.arena.actual(call, 0);
            if is_wide_ty(prog, prog.expr_type(obj)) && !is_super_access(prog, call) {
                insert_local_temp(prog, obj);
                prog.arena.call_mut(call).prim = Some(narrowed_prim(prim));
            }
        }
        Prim::WidePut | Prim::SetMember | Prim::SetSvecMember => {
            let obj = prog.arena.actual(call, 0);
            if is_wide_ty(prog, prog.expr_type(obj)) {
                insert_local_temp(prog, obj);
                prog.arena.call_mut(call).prim = Some(if prim == Prim::SetSvecMember {
                    Prim::SetSvecMember
                } else {
                    Prim::SetMember
                });
            }
        }
        Prim::WideClassGetCid | Prim::GetCid | Prim::TestCid | Prim::SetCid => {
            let obj = prog.arena.actual(call, 0);
            if is_wide_ty(prog, prog.expr_type(obj)) {
                insert_local_temp(prog, obj);
                if prim == Prim::WideClassGetCid {
                    prog.arena.call_mut(call).prim = Some(Prim::GetCid);
                }
            }
        }
        Prim::ArrayGet | Prim::ArrayGetValue | Prim::ArraySet | Prim::ArraySetFirst => {
            let arr = prog.arena.actual(call, 0);
            if is_wide_ty(prog, prog.expr_type(arr)) {
                insert_local_temp(prog, arr);
            }
        }
        Prim::DynamicCast => {
            let obj = prog.arena.actual(call, 1);
            if is_wide_ty(prog, prog.expr_type(obj)) {
                insert_local_temp(prog, obj);
            }
        }
        Prim::GetLocaleId => {
            let obj = prog.arena.actual(call, 0);
            if is_wide_ty(prog, prog.expr_type(obj)) {
                insert_local_temp(prog, obj);
            }
        }
        Prim::Move => {
            let actuals = prog.arena.actuals(call);
            let [dst, src] = actuals[..] else { return };
            let dst_wide = is_wide_ty(prog, prog.expr_type(dst));
            let src_ty = prog.expr_type(src);
            // A direct use of a wide value drops to a checked narrow temp;
            // every later use of the same statement sees the temp.
            if matches!(&prog.arena.expr(src).kind, ExprKind::SymRef { .. }) && is_wide_ty(prog, src_ty) {
                insert_local_temp(prog, src);
                return;
            }
            if dst_wide && !is_wide_ty(prog, src_ty) && !prog.arena.ty_has_flag(src_ty, Flags::REF) {
                insert_local_temp(prog, dst);
            }
        }
        _ => {}
    }
}

fn narrowed_prim(prim: Prim) -> Prim {
    match prim {
        Prim::WideGet | Prim::GetMember | Prim::GetMemberValue => Prim::GetMemberValue,
        Prim::GetSvecMember | Prim::GetSvecMemberValue => Prim::GetSvecMemberValue,
        other => other,
    }
}

/// A `_local_` clone whose return type is wide hands back the `addr`
/// projection instead, checked at the return site.
fn narrow_return(prog: &mut Program, func: SymId) {
    let ret_ty = prog.arena.fn_data(func).ret_type;
    if !is_wide_ty(prog, ret_ty) {
        return;
    }
    let Some(narrow_ty) = prog.arena.ty(ret_ty).val_type else { return };
    prog.arena.fn_data_mut(func).ret_type = narrow_ty;

    let body = prog.arena.block_body(prog.arena.fn_data(func).body);
    let Some(ret) = prog.arena.list(body).tail else { return };
    if !prog.arena.is_prim(ret, Prim::Return) {
        return;
    }
    let value = prog.arena.actual(ret, 0);
    let (tmp, tmp_def) = prog.new_var("_narrow_ret", narrow_ty, Flags::TEMP);
    prog.arena.insert_before(ret, tmp_def);
    if !prog.config.no_local_checks {
        let checked = {
            let mut map = crate::ast::edit::CopyMap::new();
            prog.arena.copy_expr(value, &mut map)
        };
        let check = prog.prim_call(Prim::LocalCheck, vec![checked]);
        prog.arena.insert_before(ret, check);
    }
    let source = {
        let mut map = crate::ast::edit::CopyMap::new();
        prog.arena.copy_expr(value, &mut map)
    };
    let dst = prog.sym_ref(tmp);
    let mv = prog.prim_call(Prim::Move, vec![dst, source]);
    prog.arena.insert_before(ret, mv);
    let replacement = prog.sym_ref(tmp);
    prog.arena.replace(value, replacement);
}
