//! Tree traversal helpers shared by every pass.
//!
//! Collectors return id vectors (snapshots), so passes are free to edit the
//! tree while iterating the result; ids of nodes removed mid-iteration are
//! filtered by the `in_tree` checks each pass performs where it matters.

use ahash::AHashMap;

use super::{
    arena::{Arena, ExprId, SymId},
    expr::ExprKind,
    sym::SymKind,
};
use crate::prim::Prim;

impl Arena {
    /// The direct structural children of an expression: named child slots
    /// first, then the owned list members in order.
    #[must_use]
    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        let mut out = Vec::new();
        match &self.expr(id).kind {
            ExprKind::SymRef { .. }
            | ExprKind::Unresolved { .. }
            | ExprKind::Goto { .. }
            | ExprKind::Removed => {}
            ExprKind::Def { init, type_expr, .. } => {
                out.extend(type_expr.iter().copied());
                out.extend(init.iter().copied());
            }
            ExprKind::Call(call) => {
                out.extend(call.base.iter().copied());
                out.extend(self.items(call.actuals));
            }
            ExprKind::NamedActual { actual, .. } => out.push(*actual),
            ExprKind::Block { body, info, .. } => {
                out.extend(info.iter().copied());
                out.extend(self.items(*body));
            }
            ExprKind::Cond { cond, then_block, else_block } => {
                out.push(*cond);
                out.push(*then_block);
                out.extend(else_block.iter().copied());
            }
        }
        out
    }

    /// Pre-order walk of a subtree.
    #[must_use]
    pub fn collect_exprs(&self, root: ExprId) -> Vec<ExprId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(e) = stack.pop() {
            out.push(e);
            let mut children = self.children(e);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// All call expressions in a subtree, pre-order.
    #[must_use]
    pub fn collect_calls(&self, root: ExprId) -> Vec<ExprId> {
        self.collect_exprs(root)
            .into_iter()
            .filter(|&e| matches!(self.expr(e).kind, ExprKind::Call(_)))
            .collect()
    }

    /// All symbol references in a subtree, pre-order.
    #[must_use]
    pub fn collect_sym_refs(&self, root: ExprId) -> Vec<ExprId> {
        self.collect_exprs(root)
            .into_iter()
            .filter(|&e| matches!(self.expr(e).kind, ExprKind::SymRef { .. }))
            .collect()
    }

    /// All in-tree expressions across the whole program, in id order.
    #[must_use]
    pub fn all_in_tree(&self) -> Vec<ExprId> {
        self.expr_ids().filter(|&e| self.expr(e).in_tree()).collect()
    }

    /// All in-tree calls across the whole program.
    #[must_use]
    pub fn all_calls(&self) -> Vec<ExprId> {
        self.all_in_tree()
            .into_iter()
            .filter(|&e| matches!(self.expr(e).kind, ExprKind::Call(_)))
            .collect()
    }

    /// All in-tree block expressions across the whole program.
    #[must_use]
    pub fn all_blocks(&self) -> Vec<ExprId> {
        self.all_in_tree()
            .into_iter()
            .filter(|&e| matches!(self.expr(e).kind, ExprKind::Block { .. }))
            .collect()
    }

    /// Rebuilds every function's `called_by` vector from the in-tree calls.
    ///
    /// Run at the start of any pass that reasons caller-ward (end-count
    /// threading, heap promotion, pruning).
    pub fn compute_call_sites(&mut self) {
        let fns = self.all_fns();
        for f in &fns {
            self.fn_data_mut(*f).called_by.clear();
        }
        for call in self.all_calls() {
            if let Some(callee) = self.resolved_callee(call) {
                self.fn_data_mut(callee).called_by.push(call);
            }
        }
    }

    /// Def/use maps over variable and formal symbols.
    ///
    /// A def is a symbol reference in the target slot of a move or member
    /// store; every other in-tree reference is a use.
    #[must_use]
    pub fn build_def_use_maps(&self) -> DefUseMaps {
        let mut defs: AHashMap<SymId, Vec<ExprId>> = AHashMap::new();
        let mut uses: AHashMap<SymId, Vec<ExprId>> = AHashMap::new();
        for e in self.all_in_tree() {
            let ExprKind::SymRef { sym } = self.expr(e).kind else { continue };
            if !matches!(self.sym(sym).kind, SymKind::Var { .. } | SymKind::Arg(_)) {
                continue;
            }
            let is_def = self.expr(e).parent_expr.is_some_and(|parent| {
                (self.is_prim(parent, Prim::Move) || self.is_prim(parent, Prim::SetMember))
                    && self.actuals(parent).first() == Some(&e)
            });
            if is_def {
                defs.entry(sym).or_default().push(e);
            } else {
                uses.entry(sym).or_default().push(e);
            }
        }
        DefUseMaps { defs, uses }
    }
}

/// Output of [`Arena::build_def_use_maps`].
#[derive(Debug, Default)]
pub struct DefUseMaps {
    pub defs: AHashMap<SymId, Vec<ExprId>>,
    pub uses: AHashMap<SymId, Vec<ExprId>>,
}

impl DefUseMaps {
    #[must_use]
    pub fn defs_of(&self, sym: SymId) -> &[ExprId] {
        self.defs.get(&sym).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn uses_of(&self, sym: SymId) -> &[ExprId] {
        self.uses.get(&sym).map_or(&[], Vec::as_slice)
    }
}
