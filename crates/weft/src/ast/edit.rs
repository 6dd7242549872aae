//! The editing kernel: every structural mutation of the tree.
//!
//! All splicing, reparenting, replacement, and copying funnels through this
//! module so the tree invariants have one enforcement point:
//!
//! * an in-tree expression always has a parent symbol; its parent expression
//!   is absent exactly when it hangs directly off a symbol,
//! * sibling-list head/tail/len always agree with the member links,
//! * `remove` unlinks but preserves subtrees so they can be re-inserted,
//! * `replace` atomically swaps one subtree for another.
//!
//! Precondition violations are internal inconsistencies and panic with the
//! offending node id.

use ahash::AHashMap;

use super::{
    arena::{Arena, ExprId, ListId, ListOwner, SymId},
    expr::{ExprKind, LabelTarget},
    sym::SymKind,
};

/// Old-to-new symbol correspondence recorded by [`Arena::copy_expr`].
///
/// Symbol references inside the copied subtree that point at copied symbols
/// are rewritten through this map; references to symbols defined outside the
/// copy are left alone.
#[derive(Debug, Default)]
pub struct CopyMap {
    pub syms: AHashMap<SymId, SymId>,
}

impl CopyMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The copy of `old`, when `old` was defined inside the copied subtree.
    #[must_use]
    pub fn get(&self, old: SymId) -> Option<SymId> {
        self.syms.get(&old).copied()
    }
}

impl Arena {
    // ---- parent bookkeeping ----

    /// Attaches `root` under the given parents, fixing parent links through
    /// the whole subtree and registering def points of defined symbols.
    pub(crate) fn adopt(&mut self, root: ExprId, parent_expr: Option<ExprId>, parent_sym: Option<SymId>) {
        {
            let node = self.expr_mut(root);
            node.parent_expr = parent_expr;
            node.parent_sym = parent_sym;
        }
        if let ExprKind::Def { sym, .. } = self.expr(root).kind {
            self.sym_mut(sym).def_point = Some(root);
            // A function's formals and body hang off the symbol, not the
            // def; propagate the symbol as their parent.
            if let SymKind::Fn(data) = &self.sym(sym).kind {
                let body = data.body;
                let where_clause = data.where_clause;
                let formals = self.items(data.formals);
                self.adopt(body, None, Some(sym));
                if let Some(w) = where_clause {
                    self.adopt(w, None, Some(sym));
                }
                for formal in formals {
                    self.adopt(formal, None, Some(sym));
                }
            }
        }
        for child in self.children(root) {
            self.adopt(child, Some(root), parent_sym);
        }
    }

    /// Detaches `root`: clears its parent expression and the parent symbol of
    /// every node in the subtree. Intra-subtree links stay intact so the
    /// subtree can be re-inserted elsewhere.
    pub(crate) fn orphan(&mut self, root: ExprId) {
        self.expr_mut(root).parent_expr = None;
        self.clear_parent_sym(root);
    }

    fn clear_parent_sym(&mut self, root: ExprId) {
        self.expr_mut(root).parent_sym = None;
        for child in self.children(root) {
            self.clear_parent_sym(child);
        }
    }

    // ---- sibling lists ----

    fn assert_insertable(&self, new: ExprId) {
        let node = self.expr(new);
        assert!(
            node.parent_sym.is_none() && node.list.is_none(),
            "{new}: inserted expression is already in the tree"
        );
    }

    /// Parent links conferred on members of `list`.
    fn list_parents(&self, list: ListId) -> (Option<ExprId>, Option<SymId>) {
        match self.list(list).owner {
            ListOwner::BlockBody(e) | ListOwner::CallActuals(e) => {
                (Some(e), self.expr(e).parent_sym)
            }
            ListOwner::Formals(s) => (None, Some(s)),
            ListOwner::Fields(t) | ListOwner::Inherits(t) => (None, self.ty(t).symbol),
        }
    }

    /// Appends `new` at the tail of `list`.
    pub fn push_tail(&mut self, list: ListId, new: ExprId) {
        self.assert_insertable(new);
        let tail = self.list(list).tail;
        match tail {
            Some(tail) => {
                self.expr_mut(tail).next = Some(new);
                self.expr_mut(new).prev = Some(tail);
            }
            None => self.list_mut(list).head = Some(new),
        }
        self.list_mut(list).tail = Some(new);
        self.list_mut(list).len += 1;
        self.expr_mut(new).list = Some(list);
        let (pe, ps) = self.list_parents(list);
        self.adopt(new, pe, ps);
    }

    /// Prepends `new` at the head of `list`.
    pub fn push_head(&mut self, list: ListId, new: ExprId) {
        self.assert_insertable(new);
        let head = self.list(list).head;
        match head {
            Some(head) => {
                self.expr_mut(head).prev = Some(new);
                self.expr_mut(new).next = Some(head);
            }
            None => self.list_mut(list).tail = Some(new),
        }
        self.list_mut(list).head = Some(new);
        self.list_mut(list).len += 1;
        self.expr_mut(new).list = Some(list);
        let (pe, ps) = self.list_parents(list);
        self.adopt(new, pe, ps);
    }

    /// Inserts `new` immediately before `anchor` in its sibling list.
    ///
    /// Valid only for anchors that sit in a list.
    pub fn insert_before(&mut self, anchor: ExprId, new: ExprId) {
        self.assert_insertable(new);
        let list = self
            .expr(anchor)
            .list
            .unwrap_or_else(|| panic!("{anchor}: insert_before target is not in a list"));
        let prev = self.expr(anchor).prev;
        self.expr_mut(new).prev = prev;
        self.expr_mut(new).next = Some(anchor);
        self.expr_mut(anchor).prev = Some(new);
        match prev {
            Some(prev) => self.expr_mut(prev).next = Some(new),
            None => self.list_mut(list).head = Some(new),
        }
        self.list_mut(list).len += 1;
        self.expr_mut(new).list = Some(list);
        let (pe, ps) = self.list_parents(list);
        self.adopt(new, pe, ps);
    }

    /// Inserts `new` immediately after `anchor` in its sibling list.
    pub fn insert_after(&mut self, anchor: ExprId, new: ExprId) {
        self.assert_insertable(new);
        let list = self
            .expr(anchor)
            .list
            .unwrap_or_else(|| panic!("{anchor}: insert_after target is not in a list"));
        let next = self.expr(anchor).next;
        self.expr_mut(new).next = next;
        self.expr_mut(new).prev = Some(anchor);
        self.expr_mut(anchor).next = Some(new);
        match next {
            Some(next) => self.expr_mut(next).prev = Some(new),
            None => self.list_mut(list).tail = Some(new),
        }
        self.list_mut(list).len += 1;
        self.expr_mut(new).list = Some(list);
        let (pe, ps) = self.list_parents(list);
        self.adopt(new, pe, ps);
    }

    /// Splices `e` out of its sibling list without touching parent links.
    fn unlink(&mut self, e: ExprId) {
        let Some(list) = self.expr(e).list else { return };
        let (prev, next) = {
            let node = self.expr(e);
            (node.prev, node.next)
        };
        match prev {
            Some(prev) => self.expr_mut(prev).next = next,
            None => self.list_mut(list).head = next,
        }
        match next {
            Some(next) => self.expr_mut(next).prev = prev,
            None => self.list_mut(list).tail = prev,
        }
        self.list_mut(list).len -= 1;
        let node = self.expr_mut(e);
        node.list = None;
        node.prev = None;
        node.next = None;
    }

    // ---- remove / replace ----

    /// Unlinks `e` from the tree, preserving its subtree for re-insertion.
    pub fn remove(&mut self, e: ExprId) {
        if self.expr(e).list.is_some() {
            self.unlink(e);
            self.orphan(e);
        } else if let Some(parent) = self.expr(e).parent_expr {
            self.replace_child(parent, e, None);
            self.orphan(e);
        } else if self.expr(e).parent_sym.is_some() {
            panic!("{e}: cannot remove a symbol-owned child; replace the contents instead");
        }
        // Already detached: nothing to do.
    }

    /// Atomically swaps the subtree at `old` for `new`.
    pub fn replace(&mut self, old: ExprId, new: ExprId) {
        assert_ne!(old, new, "{old}: replacing an expression with itself");
        self.assert_insertable(new);
        if let Some(list) = self.expr(old).list {
            // Take over old's exact list position.
            let (prev, next) = {
                let node = self.expr(old);
                (node.prev, node.next)
            };
            {
                let node = self.expr_mut(new);
                node.prev = prev;
                node.next = next;
                node.list = Some(list);
            }
            match prev {
                Some(prev) => self.expr_mut(prev).next = Some(new),
                None => self.list_mut(list).head = Some(new),
            }
            match next {
                Some(next) => self.expr_mut(next).prev = Some(new),
                None => self.list_mut(list).tail = Some(new),
            }
            {
                let node = self.expr_mut(old);
                node.list = None;
                node.prev = None;
                node.next = None;
            }
            let (pe, ps) = self.list_parents(list);
            self.orphan(old);
            self.adopt(new, pe, ps);
        } else if let Some(parent) = self.expr(old).parent_expr {
            let parent_sym = self.expr(old).parent_sym;
            self.replace_child(parent, old, Some(new));
            self.orphan(old);
            self.adopt(new, Some(parent), parent_sym);
        } else {
            panic!("{old}: replace target is not in the tree");
        }
    }

    /// Updates the named child slot of `parent` holding `old`.
    ///
    /// `None` clears optional slots; clearing a mandatory slot (a
    /// conditional's condition, a named actual's payload) is an internal
    /// inconsistency.
    fn replace_child(&mut self, parent: ExprId, old: ExprId, new: Option<ExprId>) {
        let kind = &mut self.expr_mut(parent).kind;
        let slot: &mut Option<ExprId> = match kind {
            ExprKind::Call(call) => {
                if call.base == Some(old) {
                    &mut call.base
                } else {
                    panic!("{parent}: call does not own child {old}")
                }
            }
            ExprKind::Def { init, type_expr, .. } => {
                if *init == Some(old) {
                    init
                } else if *type_expr == Some(old) {
                    type_expr
                } else {
                    panic!("{parent}: def does not own child {old}")
                }
            }
            ExprKind::Block { info, .. } => {
                if *info == Some(old) {
                    info
                } else {
                    panic!("{parent}: block does not own child {old} outside its body list")
                }
            }
            ExprKind::Cond { cond, then_block, else_block } => {
                if *cond == old {
                    *cond = new.unwrap_or_else(|| panic!("{parent}: conditional requires a condition"));
                    return;
                } else if *then_block == old {
                    *then_block = new.unwrap_or_else(|| panic!("{parent}: conditional requires a then block"));
                    return;
                } else if *else_block == Some(old) {
                    else_block
                } else {
                    panic!("{parent}: conditional does not own child {old}")
                }
            }
            ExprKind::NamedActual { actual, .. } => {
                if *actual == old {
                    *actual = new.unwrap_or_else(|| panic!("{parent}: named actual requires a payload"));
                    return;
                }
                panic!("{parent}: named actual does not own child {old}")
            }
            other => panic!("{parent}: {other:?} has no replaceable child slots"),
        };
        *slot = new;
    }

    // ---- block and function helpers ----

    /// Appends a statement to a block.
    pub fn block_push_tail(&mut self, block: ExprId, stmt: ExprId) {
        let body = self.block_body(block);
        self.push_tail(body, stmt);
    }

    /// Prepends a statement to a block.
    pub fn block_push_head(&mut self, block: ExprId, stmt: ExprId) {
        let body = self.block_body(block);
        self.push_head(body, stmt);
    }

    /// Inserts `stmt` ahead of the function's final return statement.
    ///
    /// Relies on the normalization invariant that `return` is the last
    /// statement of the body.
    pub fn insert_before_return(&mut self, func: SymId, stmt: ExprId) {
        let body = self.block_body(self.fn_data(func).body);
        match self.list(body).tail {
            Some(ret) if self.is_prim(ret, crate::prim::Prim::Return) => {
                self.insert_before(ret, stmt);
            }
            _ => self.push_tail(body, stmt),
        }
    }

    /// Appends `stmt` to a block, before a trailing goto if one ends it, so
    /// cleanup code runs on the fall-through path.
    pub fn block_push_tail_before_goto(&mut self, block: ExprId, stmt: ExprId) {
        let body = self.block_body(block);
        match self.list(body).tail {
            Some(tail) if matches!(self.expr(tail).kind, ExprKind::Goto { .. }) => {
                self.insert_before(tail, stmt);
            }
            _ => self.push_tail(body, stmt),
        }
    }

    // ---- copy ----

    /// Structural deep copy of an expression subtree.
    ///
    /// Every symbol defined inside the subtree gets a fresh identity,
    /// recorded in `map`; symbol references and goto labels inside the copy
    /// are rewritten through the map. The result is detached (no parents, no
    /// list), ready for insertion; the copy shares no node identity with
    /// the original.
    pub fn copy_expr(&mut self, root: ExprId, map: &mut CopyMap) -> ExprId {
        let copied = self.copy_structure(root, map);
        self.update_sym_refs(copied, map);
        copied
    }

    fn copy_structure(&mut self, root: ExprId, map: &mut CopyMap) -> ExprId {
        let loc = self.expr(root).loc;
        let kind = self.expr(root).kind.clone();
        let new_kind = match kind {
            ExprKind::SymRef { sym } => ExprKind::SymRef { sym },
            ExprKind::Unresolved { name } => ExprKind::Unresolved { name },
            ExprKind::Def { sym, init, type_expr } => {
                let new_sym = self.copy_symbol(sym, map);
                let init = init.map(|e| self.copy_structure(e, map));
                let type_expr = type_expr.map(|e| self.copy_structure(e, map));
                ExprKind::Def { sym: new_sym, init, type_expr }
            }
            ExprKind::Call(call) => {
                let new_call_shell = ExprKind::Call(super::expr::CallData {
                    prim: call.prim,
                    base: None,
                    actuals: ListId(u32::MAX),
                    partial: call.partial,
                    method_tag: call.method_tag,
                    square: call.square,
                });
                let new_expr = self.alloc_expr(new_call_shell, loc);
                let actuals = self.alloc_list(ListOwner::CallActuals(new_expr));
                for item in self.items(call.actuals) {
                    let copy = self.copy_structure(item, map);
                    self.link_detached(actuals, copy);
                }
                let base = call.base.map(|b| self.copy_structure(b, map));
                if let ExprKind::Call(data) = &mut self.expr_mut(new_expr).kind {
                    data.actuals = actuals;
                    data.base = base;
                }
                return new_expr;
            }
            ExprKind::NamedActual { name, actual } => {
                let actual = self.copy_structure(actual, map);
                ExprKind::NamedActual { name, actual }
            }
            ExprKind::Block { body, info, uses } => {
                let new_expr = self.alloc_expr(
                    ExprKind::Block {
                        body: ListId(u32::MAX),
                        info: None,
                        uses: uses.clone(),
                    },
                    loc,
                );
                let new_body = self.alloc_list(ListOwner::BlockBody(new_expr));
                for item in self.items(body) {
                    let copy = self.copy_structure(item, map);
                    self.link_detached(new_body, copy);
                }
                let info = info.map(|i| self.copy_structure(i, map));
                if let ExprKind::Block { body: b, info: i, .. } = &mut self.expr_mut(new_expr).kind {
                    *b = new_body;
                    *i = info;
                }
                return new_expr;
            }
            ExprKind::Cond { cond, then_block, else_block } => {
                let cond = self.copy_structure(cond, map);
                let then_block = self.copy_structure(then_block, map);
                let else_block = else_block.map(|e| self.copy_structure(e, map));
                ExprKind::Cond { cond, then_block, else_block }
            }
            ExprKind::Goto { tag, label } => ExprKind::Goto { tag, label },
            ExprKind::Removed => panic!("{root}: copying a removed expression"),
        };
        self.alloc_expr(new_kind, loc)
    }

    /// Links a freshly copied, parentless node into a detached list without
    /// the in-tree adoption that [`Arena::push_tail`] performs.
    fn link_detached(&mut self, list: ListId, e: ExprId) {
        let tail = self.list(list).tail;
        match tail {
            Some(tail) => {
                self.expr_mut(tail).next = Some(e);
                self.expr_mut(e).prev = Some(tail);
            }
            None => self.list_mut(list).head = Some(e),
        }
        self.list_mut(list).tail = Some(e);
        self.list_mut(list).len += 1;
        self.expr_mut(e).list = Some(list);
    }

    /// Copies a symbol defined inside a copied subtree.
    ///
    /// Functions copy deep: formals, body, and where clause come along, with
    /// their own defined symbols entered into `map`.
    pub fn copy_symbol(&mut self, sym: SymId, map: &mut CopyMap) -> SymId {
        if let Some(copied) = map.get(sym) {
            return copied;
        }
        let mut node = self.sym(sym).clone();
        node.def_point = None;
        let new_sym = match node.kind.clone() {
            SymKind::Fn(data) => {
                let new_sym = self.alloc_sym(node);
                let formals = self.alloc_list(ListOwner::Formals(new_sym));
                map.syms.insert(sym, new_sym);
                for formal in self.items(data.formals) {
                    let copy = self.copy_structure(formal, map);
                    self.link_detached(formals, copy);
                }
                let body = self.copy_structure(data.body, map);
                let where_clause = data.where_clause.map(|w| self.copy_structure(w, map));
                if let SymKind::Fn(new_data) = &mut self.sym_mut(new_sym).kind {
                    new_data.formals = formals;
                    new_data.body = body;
                    new_data.where_clause = where_clause;
                    new_data.called_by = Vec::new();
                }
                new_sym
            }
            _ => {
                let new_sym = self.alloc_sym(node);
                map.syms.insert(sym, new_sym);
                new_sym
            }
        };
        new_sym
    }

    /// Rewrites symbol references and goto labels in a copied subtree so
    /// they point at the copies of symbols defined inside it.
    pub fn update_sym_refs(&mut self, root: ExprId, map: &CopyMap) {
        match &mut self.expr_mut(root).kind {
            ExprKind::SymRef { sym } => {
                if let Some(&new_sym) = map.syms.get(sym) {
                    *sym = new_sym;
                }
            }
            ExprKind::Goto { label: LabelTarget::Sym(sym), .. } => {
                if let Some(&new_sym) = map.syms.get(sym) {
                    *sym = new_sym;
                }
            }
            _ => {}
        }
        for child in self.children(root) {
            self.update_sym_refs(child, map);
        }
        // Descend into functions defined inside the copy.
        if let ExprKind::Def { sym, .. } = self.expr(root).kind {
            if let SymKind::Fn(data) = self.sym(sym).kind.clone() {
                for formal in self.items(data.formals) {
                    self.update_sym_refs(formal, map);
                }
                self.update_sym_refs(data.body, map);
                if let Some(w) = data.where_clause {
                    self.update_sym_refs(w, map);
                }
            }
        }
    }

    /// Deep-copies a function symbol into a detached definition, returning
    /// the new function. Used by instantiation, wrapper synthesis, and
    /// local-block cloning.
    pub fn copy_fn(&mut self, func: SymId) -> (SymId, CopyMap) {
        let mut map = CopyMap::new();
        let new_fn = self.copy_symbol(func, &mut map);
        let data = self.fn_data(new_fn).clone();
        for formal in self.items(data.formals) {
            self.update_sym_refs(formal, &map);
        }
        self.update_sym_refs(data.body, &map);
        if let Some(w) = data.where_clause {
            self.update_sym_refs(w, &map);
        }
        // The copy's internals hang off the new symbol.
        self.adopt_fn_internals(new_fn);
        (new_fn, map)
    }

    /// Sets parent links of a function's formals, body, and where clause to
    /// the function symbol. Used after building or copying a function that
    /// is not yet inserted through a def.
    pub fn adopt_fn_internals(&mut self, func: SymId) {
        let data = self.fn_data(func).clone();
        for formal in self.items(data.formals) {
            self.adopt(formal, None, Some(func));
        }
        self.adopt(data.body, None, Some(func));
        if let Some(w) = data.where_clause {
            self.adopt(w, None, Some(func));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{arena::ListOwner, expr::ExprKind},
        diag::Loc,
    };

    fn unresolved(arena: &mut Arena, name: u32) -> ExprId {
        // The spelling is irrelevant to list mechanics; reuse a fixed id.
        let _ = name;
        arena.alloc_expr(
            ExprKind::Unresolved {
                name: crate::intern::WellKnown::Empty.id(),
            },
            Loc::UNKNOWN,
        )
    }

    fn block(arena: &mut Arena) -> ExprId {
        let b = arena.alloc_expr(
            ExprKind::Block {
                body: ListId(u32::MAX),
                info: None,
                uses: Vec::new(),
            },
            Loc::UNKNOWN,
        );
        let body = arena.alloc_list(ListOwner::BlockBody(b));
        if let ExprKind::Block { body: slot, .. } = &mut arena.expr_mut(b).kind {
            *slot = body;
        }
        b
    }

    fn assert_list_consistent(arena: &Arena, list: ListId) {
        let items = arena.items(list);
        assert_eq!(items.len(), arena.list(list).len as usize);
        assert_eq!(arena.list(list).head, items.first().copied());
        assert_eq!(arena.list(list).tail, items.last().copied());
        for window in items.windows(2) {
            assert_eq!(arena.expr(window[0]).next, Some(window[1]));
            assert_eq!(arena.expr(window[1]).prev, Some(window[0]));
        }
    }

    #[test]
    fn insert_and_remove_keep_list_consistent() {
        let mut arena = Arena::new();
        let b = block(&mut arena);
        let body = arena.block_body(b);
        let a = unresolved(&mut arena, 1);
        let c = unresolved(&mut arena, 2);
        let mid = unresolved(&mut arena, 3);

        arena.push_tail(body, a);
        arena.push_tail(body, c);
        arena.insert_after(a, mid);
        assert_eq!(arena.items(body), vec![a, mid, c]);
        assert_list_consistent(&arena, body);

        arena.remove(mid);
        assert_eq!(arena.items(body), vec![a, c]);
        assert_list_consistent(&arena, body);
        assert!(arena.expr(mid).list.is_none());
        assert!(arena.expr(mid).prev.is_none());

        // A removed node can be re-inserted.
        arena.insert_before(a, mid);
        assert_eq!(arena.items(body), vec![mid, a, c]);
        assert_list_consistent(&arena, body);
    }

    #[test]
    fn replace_takes_over_list_position() {
        let mut arena = Arena::new();
        let b = block(&mut arena);
        let body = arena.block_body(b);
        let a = unresolved(&mut arena, 1);
        let old = unresolved(&mut arena, 2);
        let c = unresolved(&mut arena, 3);
        for e in [a, old, c] {
            arena.push_tail(body, e);
        }
        let new = unresolved(&mut arena, 4);
        arena.replace(old, new);
        assert_eq!(arena.items(body), vec![a, new, c]);
        assert_list_consistent(&arena, body);
        assert!(arena.expr(old).list.is_none());
    }

    #[test]
    #[should_panic(expected = "already in the tree")]
    fn double_insert_is_an_inconsistency() {
        let mut arena = Arena::new();
        let b = block(&mut arena);
        let body = arena.block_body(b);
        let a = unresolved(&mut arena, 1);
        arena.push_tail(body, a);
        arena.push_tail(body, a);
    }

    #[test]
    fn nested_block_copy_is_isolated() {
        let mut arena = Arena::new();
        let outer = block(&mut arena);
        let inner = block(&mut arena);
        let stmt = unresolved(&mut arena, 1);
        arena.block_push_tail(inner, stmt);
        arena.block_push_tail(outer, inner);

        let mut map = CopyMap::new();
        let copy = arena.copy_expr(outer, &mut map);
        assert_ne!(copy, outer);
        let copied_inner = arena.items(arena.block_body(copy))[0];
        assert_ne!(copied_inner, inner);
        // No node identity is shared between original and copy.
        assert_ne!(arena.items(arena.block_body(copied_inner))[0], stmt);
        // The copy is detached.
        assert!(arena.expr(copy).parent_sym.is_none());
    }
}
