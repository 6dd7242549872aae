//! Parallel-construct lowering.
//!
//! Every `begin`/`cobegin`/`coforall`/`on`/`on-nb`/`gpu-on` block becomes a
//! nested function flagged with its construct, captured variables become
//! formals, an end-count token is threaded through, escaping variables move
//! to the heap, and finally each task call site is rewritten through an
//! argument bundle: a synthesized class holding one field per live-in, an
//! unpacking wrapper function, and the runtime dispatch primitive (task
//! queue, remote fork, or kernel launch).

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::{
        arena::{ExprId, SymId, TypeId},
        expr::ExprKind,
        sym::{Flags, Intent, RetTag, SymKind},
        ty::StructuralTag,
        visit::DefUseMaps,
    },
    intern::WellKnown,
    prim::Prim,
    program::Program,
};

/// Pass-local state: synthesized types and per-function end counts.
#[derive(Debug, Default)]
struct ParallelCtx {
    /// Task functions created by extraction, with their single call site.
    nested: Vec<(SymId, ExprId)>,
    /// Heap wrapper types, one per promoted value type.
    heap_types: AHashMap<TypeId, TypeId>,
    /// The `_EndCount` class, created on first demand.
    end_count_type: Option<TypeId>,
    /// Per-function end-count variable.
    end_counts: AHashMap<SymId, SymId>,
}

/// Runs the whole lowering. Resolution must have quiesced; widening runs
/// after this pass has pruned its intermediates.
pub fn parallel(prog: &mut Program) {
    let mut ctx = ParallelCtx::default();

    extract_task_blocks(prog, &mut ctx);
    flatten_captures(prog, &mut ctx);
    thread_end_counts(prog, &mut ctx);
    make_heap_allocations(prog, &mut ctx);
    for (func, call) in ctx.nested.clone() {
        bundle_args(prog, func, call);
    }
}

// ---- nested-function extraction ----

/// Construct kind of a task block, with the marker's operands.
fn task_kind(prog: &Program, block: ExprId) -> Option<(Prim, ExprId)> {
    let info = prog.arena.block_info(block)?;
    let prim = prog.arena.call(info).prim?;
    prim.is_task_block_marker().then_some((prim, info))
}

/// Rewrites each task-tagged block into a nested function and a call.
fn extract_task_blocks(prog: &mut Program, ctx: &mut ParallelCtx) {
    for block in prog.arena.all_blocks() {
        if !prog.arena.expr(block).in_tree() {
            continue;
        }
        let Some((marker, info)) = task_kind(prog, block) else { continue };

        let (name, flags) = match marker {
            Prim::BlockBegin => ("begin_fn", Flags::BEGIN),
            Prim::BlockCobegin => ("cobegin_fn", Flags::COBEGIN_OR_COFORALL),
            Prim::BlockCoforall => ("coforall_fn", Flags::COBEGIN_OR_COFORALL),
            Prim::BlockOn => ("on_fn", Flags::ON),
            Prim::BlockOnNb => ("on_fn", Flags::ON | Flags::NON_BLOCKING),
            Prim::BlockGpuOn => ("on_gpu_kernel", Flags::GPU_ON),
            _ => continue,
        };

        let func = prog.new_fn(name, prog.core.void, RetTag::Value);
        prog.arena.sym_mut(func).flags |= flags | Flags::COMPILER_INTERNAL;

        // The construct's operands become leading actuals: the target
        // locale for `on`, the launch geometry for GPU kernels.
        let mut lead_actuals = Vec::new();
        match marker {
            Prim::BlockOn | Prim::BlockOnNb => {
                let locale = prog.arena.actual(info, 0);
                prog.arena.remove(locale);
                let locale_ty = prog.core.locale_id();
                prog.add_formal(func, "_dummy_locale_arg", locale_ty, Intent::Blank);
                lead_actuals.push(locale);
            }
            Prim::BlockGpuOn => {
                for geometry in ["gridX", "gridY", "tbsizeX", "tbsizeY", "tbsizeZ", "sharedSize"] {
                    let actual = prog.arena.actual(info, 0);
                    prog.arena.remove(actual);
                    prog.add_formal(func, geometry, prog.core.int32, Intent::Blank);
                    lead_actuals.push(actual);
                }
            }
            _ => {}
        }

        let call = prog.fn_call(func, lead_actuals);
        let def = prog.def_of(func);
        prog.arena.insert_before(block, def);
        prog.arena.insert_before(block, call);

        prog.arena.remove(info);
        prog.arena.remove(block);
        prog.fn_push(func, block);
        let ret = prog.ret_void();
        prog.fn_push(func, ret);

        ctx.nested.push((func, call));
    }
}

// ---- capture flattening ----

/// Turns every outer-local reference inside a task function into a formal,
/// passing the variable at the call site.
///
/// Iterates to a fixpoint: capturing into an inner task function introduces
/// new references at its call site, which may sit inside an enclosing task
/// function processed earlier.
fn flatten_captures(prog: &mut Program, ctx: &mut ParallelCtx) {
    loop {
        let mut changed = false;
        for &(func, call) in &ctx.nested {
            let body = prog.arena.fn_data(func).body;
            let mut captured: Vec<SymId> = Vec::new();
            for site in prog.arena.collect_sym_refs(body) {
                let Some(sym) = prog.arena.sym_ref(site) else { continue };
                if !matches!(prog.arena.sym(sym).kind, SymKind::Var { .. } | SymKind::Arg(_)) {
                    continue;
                }
                if prog.arena.sym(sym).immediate().is_some() {
                    continue;
                }
                let Some(owner) = defining_fn(prog, sym) else { continue };
                if owner == func {
                    continue;
                }
                if !captured.contains(&sym) {
                    captured.push(sym);
                }
            }
            for var in captured {
                let name = prog.sym_name(var).to_owned();
                let ty = prog.arena.sym(var).ty;
                let formal = prog.add_formal(func, &name, ty, Intent::Blank);
                substitute_in_body(prog, func, var, formal);
                let actual = prog.sym_ref(var);
                let actuals = prog.arena.call(call).actuals;
                prog.arena.push_tail(actuals, actual);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

/// The function whose body defines `sym`, if any (module-level symbols have
/// none and stay global).
fn defining_fn(prog: &Program, sym: SymId) -> Option<SymId> {
    let def = prog.arena.sym(sym).def_point?;
    let owner = prog.arena.expr(def).parent_sym?;
    prog.arena.sym(owner).is_fn().then_some(owner)
}

fn substitute_in_body(prog: &mut Program, func: SymId, from: SymId, to: SymId) {
    let body = prog.arena.fn_data(func).body;
    for site in prog.arena.collect_sym_refs(body) {
        if let ExprKind::SymRef { sym } = &mut prog.arena.expr_mut(site).kind {
            if *sym == from {
                *sym = to;
            }
        }
    }
}

// ---- end counts ----

/// Each function containing a task construct gets an end-count token that
/// travels into the task function as a capture, so it lands in the bundle.
fn thread_end_counts(prog: &mut Program, ctx: &mut ParallelCtx) {
    // Explicit end-count primitives written by library code rewire first.
    for call in prog.arena.all_calls() {
        if !prog.arena.expr(call).in_tree() {
            continue;
        }
        let is_get = prog.arena.is_prim(call, Prim::GetEndCount);
        let is_set = prog.arena.is_prim(call, Prim::SetEndCount);
        if !is_get && !is_set {
            continue;
        }
        let Some(func) = prog.arena.enclosing_fn(call) else { continue };
        let var = end_count_var(prog, ctx, func);
        if is_get {
            let replacement = prog.sym_ref(var);
            prog.arena.replace(call, replacement);
        } else {
            let value = prog.arena.actual(call, 0);
            prog.arena.remove(value);
            let dst = prog.sym_ref(var);
            let mv = prog.prim_call(Prim::Move, vec![dst, value]);
            prog.arena.replace(call, mv);
        }
    }

    // Task functions receive the enclosing function's end count as an extra
    // capture (and so, later, as a bundle field).
    for &(func, call) in &ctx.nested.clone() {
        let flags = prog.arena.sym(func).flags;
        if !(flags.contains(Flags::BEGIN) || flags.contains(Flags::COBEGIN_OR_COFORALL)) {
            continue;
        }
        let Some(parent) = prog.arena.enclosing_fn(call) else { continue };
        let parent_var = end_count_var(prog, ctx, parent);
        let ty = prog.arena.sym(parent_var).ty;
        let name = prog.interner.resolve(WellKnown::EndCount.id()).to_owned();
        let formal = prog.add_formal(func, &name, ty, Intent::Blank);
        ctx.end_counts.insert(func, formal);
        let actual = prog.sym_ref(parent_var);
        let actuals = prog.arena.call(call).actuals;
        prog.arena.push_tail(actuals, actual);
    }
}

/// The per-function end-count variable, defined and allocated at the head
/// of the function on first use.
fn end_count_var(prog: &mut Program, ctx: &mut ParallelCtx, func: SymId) -> SymId {
    if let Some(&var) = ctx.end_counts.get(&func) {
        return var;
    }
    let ty = end_count_type(prog, ctx);
    let name = prog.interner.resolve(WellKnown::EndCount.id()).to_owned();
    let (var, def) = prog.new_var(&name, ty, Flags::TEMP);
    let body = prog.arena.fn_data(func).body;
    let ty_sym = prog.arena.ty(ty).symbol.expect("end count without symbol");
    let alloc = {
        let ty_ref = prog.sym_ref(ty_sym);
        prog.prim_call(Prim::ChplAllocPermitZero, vec![ty_ref])
    };
    let mv = prog.move_to(var, alloc);
    prog.arena.block_push_head(body, mv);
    prog.arena.block_push_head(body, def);
    ctx.end_counts.insert(func, var);
    var
}

/// The reference-counted completion token class.
fn end_count_type(prog: &mut Program, ctx: &mut ParallelCtx) -> TypeId {
    if let Some(ty) = ctx.end_count_type {
        return ty;
    }
    let name = prog.interner.intern("_EndCount");
    let ty = prog.new_structural_type(name, StructuralTag::Class, Flags::NO_OBJECT | Flags::NO_WIDE_CLASS);
    let count_field = prog.interner.intern("i");
    prog.new_field(ty, count_field, prog.core.int64);
    ctx.end_count_type = Some(ty);
    ty
}

// ---- heap promotion ----

/// Escape analysis: a variable captured by an asynchronous task function
/// may outlive its defining scope, so its storage moves into a single-field
/// heap class. Reads and writes are rewritten through the wrapper field, and
/// the allocation is freed at the innermost block containing all uses (or
/// ahead of the defining function's return) unless a task still holds it.
fn make_heap_allocations(prog: &mut Program, ctx: &mut ParallelCtx) {
    let async_fns: AHashSet<SymId> = ctx
        .nested
        .iter()
        .map(|&(f, _)| f)
        .filter(|&f| {
            let flags = prog.arena.sym(f).flags;
            flags.contains(Flags::BEGIN) || (flags.contains(Flags::ON) && flags.contains(Flags::NON_BLOCKING))
        })
        .collect();

    // Standing promotion requests first (ref formals, library-marked vars).
    let mut promoted: Vec<SymId> = prog
        .arena
        .sym_ids()
        .filter(|&s| {
            prog.arena.sym(s).flags.contains(Flags::HEAP_ALLOCATE) && defining_fn(prog, s).is_some()
        })
        .collect();

    // A variable also escapes when it is passed to an async task function
    // and the task mutates it or takes its address (transitively through
    // the formal it becomes).
    for &(func, call) in &ctx.nested {
        if !async_fns.contains(&func) {
            continue;
        }
        let formals = prog.arena.formals(func);
        let actuals = prog.arena.actuals(call);
        let body = prog.arena.fn_data(func).body;
        let maps = prog.arena.build_def_use_maps();
        for (&formal, &actual) in formals.iter().zip(&actuals) {
            let Some(var) = prog.arena.sym_ref(actual) else { continue };
            if defining_fn(prog, var).is_none() {
                continue;
            }
            let escapes = mutated_in(prog, &maps, formal, body)
                || prog.arena.sym(var).flags.contains(Flags::HEAP_ALLOCATE);
            if escapes && !promoted.contains(&var) {
                promoted.push(var);
            }
        }
    }

    for var in promoted {
        promote_to_heap(prog, ctx, var);
    }
}

/// True when the formal is written (move target, member store) or has its
/// address taken inside the body.
fn mutated_in(prog: &Program, maps: &DefUseMaps, formal: SymId, body: ExprId) -> bool {
    let in_body = |e: ExprId| {
        let mut cursor = Some(e);
        while let Some(c) = cursor {
            if c == body {
                return true;
            }
            cursor = prog.arena.expr(c).parent_expr;
        }
        false
    };
    if maps.defs_of(formal).iter().any(|&d| in_body(d)) {
        return true;
    }
    maps.uses_of(formal).iter().any(|&u| {
        in_body(u)
            && prog
                .arena
                .expr(u)
                .parent_expr
                .is_some_and(|p| prog.arena.is_prim(p, Prim::SetRef))
    })
}

/// The single-field wrapper class for a promoted value type.
fn heap_type(prog: &mut Program, ctx: &mut ParallelCtx, value_ty: TypeId) -> TypeId {
    if let Some(&ty) = ctx.heap_types.get(&value_ty) {
        return ty;
    }
    let name = {
        let base = prog.type_name(value_ty);
        prog.interner.intern(&format!("heap_{base}"))
    };
    let ty = prog.new_structural_type(name, StructuralTag::Class, Flags::NO_OBJECT | Flags::HEAP);
    prog.new_field(ty, WellKnown::HeapValue.id(), value_ty);
    ctx.heap_types.insert(value_ty, ty);
    ty
}

/// Retypes a variable to its heap wrapper: allocation after its def, field
/// reads and writes everywhere, a free when nothing asynchronous keeps it.
fn promote_to_heap(prog: &mut Program, ctx: &mut ParallelCtx, var: SymId) {
    let value_ty = prog.arena.sym(var).ty;
    let wrapper_ty = heap_type(prog, ctx, value_ty);
    let value_field = prog
        .arena
        .field_named(wrapper_ty, WellKnown::HeapValue.id(), false)
        .expect("heap type without value field");
    prog.arena.sym_mut(var).ty = wrapper_ty;
    prog.arena.sym_mut(var).flags |= Flags::CONCURRENTLY_ACCESSED;

    // Allocate right after the definition.
    let def = prog.arena.sym(var).def_point.expect("promoted variable without def");
    let ty_sym = prog.arena.ty(wrapper_ty).symbol.expect("heap type without symbol");
    let alloc = {
        let ty_ref = prog.sym_ref(ty_sym);
        prog.prim_call(Prim::ChplAllocPermitZero, vec![ty_ref])
    };
    let dst = prog.sym_ref(var);
    let mv = prog.prim_call(Prim::Move, vec![dst, alloc]);
    prog.arena.insert_after(def, mv);

    // Every other reference reads or writes through the wrapper field. Task
    // formals the variable flowed into are retyped with it.
    rewrite_heap_accesses(prog, var, wrapper_ty, value_field, mv);
    for &(func, call) in &ctx.nested.clone() {
        let formals = prog.arena.formals(func);
        let actuals = prog.arena.actuals(call);
        for (&formal, &actual) in formals.iter().zip(&actuals) {
            if prog.arena.sym_ref(actual) == Some(var) {
                prog.arena.sym_mut(formal).ty = wrapper_ty;
                rewrite_heap_accesses(prog, formal, wrapper_ty, value_field, call);
            }
        }
    }

    insert_heap_free(prog, ctx, var);
}

/// Rewrites direct reads/writes of a heap-promoted symbol into member
/// traffic, skipping the allocation site and task-call actuals (those pass
/// the wrapper pointer itself).
fn rewrite_heap_accesses(prog: &mut Program, sym: SymId, wrapper_ty: TypeId, value_field: SymId, skip: ExprId) {
    let sites: Vec<ExprId> = prog
        .arena
        .all_in_tree()
        .into_iter()
        .filter(|&e| prog.arena.sym_ref(e) == Some(sym))
        .collect();
    for site in sites {
        let Some(parent) = prog.arena.expr(site).parent_expr else { continue };
        if parent == skip {
            continue;
        }
        if let ExprKind::Call(call) = &prog.arena.expr(parent).kind {
            // The pointer itself flows into task calls and member prims.
            if call.prim.is_none() {
                continue;
            }
            let prim = call.prim.unwrap();
            if matches!(prim, Prim::GetMember | Prim::GetMemberValue | Prim::SetMember)
                && prog.arena.actuals(parent).first() == Some(&site)
            {
                continue;
            }
            if prim == Prim::Move && prog.arena.actuals(parent).first() == Some(&site) {
                // Write: move(x, v) becomes set_member(x, value, v).
                let actuals = prog.arena.actuals(parent);
                let [dst, src] = actuals[..] else { continue };
                if prog.expr_val_type(src) == wrapper_ty {
                    continue;
                }
                prog.arena.remove(dst);
                prog.arena.remove(src);
                let fld = prog.sym_ref(value_field);
                let store = prog.prim_call(Prim::SetMember, vec![dst, fld, src]);
                prog.arena.replace(parent, store);
                continue;
            }
        }
        // Read: x becomes get_member_value(x, value).
        let obj = prog.sym_ref(sym);
        let fld = prog.sym_ref(value_field);
        let load = prog.prim_call(Prim::GetMemberValue, vec![obj, fld]);
        prog.arena.replace(site, load);
    }
}

/// Frees the wrapper at the innermost block containing every use, or before
/// the defining function's return when that block is the body; skipped when
/// an asynchronous task may still hold the variable.
fn insert_heap_free(prog: &mut Program, ctx: &ParallelCtx, var: SymId) {
    if prog.config.no_memory_frees {
        return;
    }
    // Passed to a task function: the task may outlive every local scope.
    for &(func, call) in &ctx.nested {
        let flags = prog.arena.sym(func).flags;
        let is_async = flags.contains(Flags::BEGIN) || flags.contains(Flags::NON_BLOCKING);
        if is_async
            && prog
                .arena
                .actuals(call)
                .iter()
                .any(|&a| prog.arena.sym_ref(a) == Some(var))
        {
            return;
        }
    }

    let uses: Vec<ExprId> = prog
        .arena
        .all_in_tree()
        .into_iter()
        .filter(|&e| prog.arena.sym_ref(e) == Some(var))
        .collect();
    let Some(owner) = defining_fn(prog, var) else { return };
    let body = prog.arena.fn_data(owner).body;

    // Innermost common block of all uses.
    let chain_of = |e: ExprId| -> Vec<ExprId> {
        let mut chain = Vec::new();
        let mut cursor = prog.arena.enclosing_block(e);
        while let Some(b) = cursor {
            chain.push(b);
            cursor = prog.arena.enclosing_block(b);
        }
        chain.reverse();
        chain
    };
    let mut common: Option<Vec<ExprId>> = None;
    for &u in &uses {
        let chain = chain_of(u);
        common = Some(match common {
            None => chain,
            Some(prev) => prev
                .iter()
                .zip(&chain)
                .take_while(|(a, b)| a == b)
                .map(|(&a, _)| a)
                .collect(),
        });
    }
    let target = common.and_then(|c| c.last().copied()).unwrap_or(body);

    let obj = prog.sym_ref(var);
    let free = prog.prim_call(Prim::ChplFree, vec![obj]);
    if target == body {
        prog.arena.insert_before_return(owner, free);
    } else {
        prog.arena.block_push_tail_before_goto(target, free);
    }
}

// ---- argument bundling ----

/// Packages a task call's actuals into a bundle class instance and routes
/// the call through an unpacking wrapper and the matching runtime primitive.
fn bundle_args(prog: &mut Program, func: SymId, call: ExprId) {
    if !prog.arena.expr(call).in_tree() {
        return;
    }
    let flags = prog.arena.sym(func).flags;
    let is_on = flags.contains(Flags::ON);
    let is_gpu = flags.contains(Flags::GPU_ON);
    let lead = if is_on {
        1
    } else if is_gpu {
        6
    } else {
        0
    };

    let actuals = prog.arena.actuals(call);
    let (lead_actuals, bundled_actuals) = actuals.split_at(lead.min(actuals.len()));
    let lead_actuals = lead_actuals.to_vec();
    let bundled_actuals = bundled_actuals.to_vec();

    // The bundle class: one field per bundled actual.
    let fn_name = prog.sym_name(func).to_owned();
    let bundle_ty = {
        let name = prog.interner.intern(&format!("_class_locals_{fn_name}"));
        prog.new_structural_type(name, StructuralTag::Class, Flags::NO_OBJECT | Flags::NO_WIDE_CLASS)
    };
    let mut fields = Vec::with_capacity(bundled_actuals.len());
    for (i, &actual) in bundled_actuals.iter().enumerate() {
        let var = prog.arena.sym_ref(actual).expect("task actual is not a variable");
        prog.arena.sym_mut(var).flags |= Flags::CONCURRENTLY_ACCESSED;
        let field_name = {
            let base = prog.sym_name(var).to_owned();
            prog.interner.intern(&format!("_{}_{base}", i + 1))
        };
        let ty = prog.arena.sym(var).ty;
        fields.push(prog.new_field(bundle_ty, field_name, ty));
    }

    // Allocate and fill the bundle ahead of the call.
    let bundle_name = format!("_args_for{fn_name}");
    let (bundle, bundle_def) = prog.new_var(&bundle_name, bundle_ty, Flags::TEMP);
    prog.arena.insert_before(call, bundle_def);
    let bundle_ty_sym = prog.arena.ty(bundle_ty).symbol.expect("bundle without symbol");
    let alloc = {
        let ty_ref = prog.sym_ref(bundle_ty_sym);
        prog.prim_call(Prim::ChplAllocPermitZero, vec![ty_ref])
    };
    let mv = prog.move_to(bundle, alloc);
    prog.arena.insert_before(call, mv);
    for (&field, &actual) in fields.iter().zip(&bundled_actuals) {
        let var = prog.arena.sym_ref(actual).expect("task actual is not a variable");
        let store = {
            let obj = prog.sym_ref(bundle);
            let fld = prog.sym_ref(field);
            let val = prog.sym_ref(var);
            prog.prim_call(Prim::SetMember, vec![obj, fld, val])
        };
        prog.arena.insert_before(call, store);
    }

    // The wrapper: unpack fields into temps and call the task function.
    let wrap_fn = {
        let name = format!("wrap{fn_name}");
        let f = prog.new_fn(&name, prog.core.void, RetTag::Value);
        let mut wflags = Flags::COMPILER_INTERNAL;
        if is_gpu {
            wflags |= Flags::GPU_CALL;
        } else if is_on {
            wflags |= Flags::ON_BLOCK;
            if flags.contains(Flags::NON_BLOCKING) {
                wflags |= Flags::NON_BLOCKING;
            }
        } else if flags.contains(Flags::BEGIN) {
            wflags |= Flags::BEGIN_BLOCK;
        } else if flags.contains(Flags::COBEGIN_OR_COFORALL) {
            wflags |= Flags::COBEGIN_OR_COFORALL_BLOCK;
        }
        prog.arena.sym_mut(f).flags |= wflags;
        f
    };
    if is_on {
        let locale_ty = prog.core.locale_id();
        prog.add_formal(wrap_fn, "_dummy_locale_arg", locale_ty, Intent::Blank);
    }
    let bundle_formal = prog.add_formal(wrap_fn, "c", bundle_ty, Intent::Blank);

    let mut inner_args = Vec::new();
    if is_on {
        // The locale argument was consumed by the fork; pass a placeholder.
        inner_args.push(prog.int_lit(0));
    }
    for &field in &fields {
        let field_ty = prog.arena.sym(field).ty;
        let name = format!("_tmp_{}", prog.sym_name(field));
        let (tmp, tmp_def) = prog.new_var(&name, field_ty, Flags::TEMP);
        prog.fn_push(wrap_fn, tmp_def);
        let load = {
            let obj = prog.sym_ref(bundle_formal);
            let fld = prog.sym_ref(field);
            prog.prim_call(Prim::GetMemberValue, vec![obj, fld])
        };
        let mv = prog.move_to(tmp, load);
        prog.fn_push(wrap_fn, mv);
        inner_args.push(prog.sym_ref(tmp));
    }
    let inner_call = prog.fn_call(func, inner_args);
    prog.fn_push(wrap_fn, inner_call);
    // Tasks free their own bundle; forked wrappers leave it to the caller.
    if !is_on && !is_gpu {
        let free = {
            let obj = prog.sym_ref(bundle_formal);
            prog.prim_call(Prim::ChplFree, vec![obj])
        };
        prog.fn_push(wrap_fn, free);
    }
    let ret = prog.ret_void();
    prog.fn_push(wrap_fn, ret);

    // Dispatch through the runtime.
    let wrap_ref = prog.sym_ref(wrap_fn);
    let bundle_ref = prog.sym_ref(bundle);
    let dispatch = if is_gpu {
        let mut args = vec![wrap_ref];
        for &g in &lead_actuals {
            prog.arena.remove(g);
            args.push(g);
        }
        args.push(bundle_ref);
        prog.prim_call(Prim::GpuKernelLaunch, args)
    } else if is_on {
        let locale = lead_actuals[0];
        prog.arena.remove(locale);
        let prim = if flags.contains(Flags::NON_BLOCKING) {
            Prim::OnForkNb
        } else {
            Prim::OnFork
        };
        prog.prim_call(prim, vec![locale, wrap_ref, bundle_ref])
    } else if flags.contains(Flags::BEGIN) {
        prog.prim_call(Prim::TaskListAddBegin, vec![wrap_ref, bundle_ref])
    } else {
        prog.prim_call(Prim::TaskListAddCoStmt, vec![wrap_ref, bundle_ref])
    };
    prog.arena.insert_before(call, dispatch);
    if is_on || is_gpu {
        // Blocking fork and kernel launch copy the bundle out; free here.
        if !prog.config.no_memory_frees {
            let obj = prog.sym_ref(bundle);
            let free = prog.prim_call(Prim::ChplFree, vec![obj]);
            prog.arena.insert_after(dispatch, free);
        }
    }

    // The original call goes away; the task and wrapper defs move to the
    // enclosing module's top level.
    prog.arena.remove(call);
    prog.arena.retire_expr(call);
    let task_def = prog.arena.sym(func).def_point.expect("task function without def");
    prog.arena.remove(task_def);
    let module_block = prog.program_block();
    prog.arena.block_push_tail(module_block, task_def);
    let wrap_def = prog.def_of(wrap_fn);
    prog.arena.block_push_tail(module_block, wrap_def);
}
