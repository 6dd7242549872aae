//! Expression nodes.
//!
//! Expressions form the in-tree half of the IR. Every expression carries its
//! parent links and intrusive sibling-list links alongside the variant data;
//! the links are owned by `ast::edit` and must never be written elsewhere.

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use super::arena::{Arena, ExprId, ListId, SymId};
use crate::{diag::Loc, intern::NameId, prim::Prim};

/// Marks what a goto does when reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, Serialize, Deserialize)]
pub enum GotoTag {
    Normal,
    Break,
    Continue,
    Return,
}

/// The label a goto targets: bound to a label symbol, or still a bare name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelTarget {
    Sym(SymId),
    Unresolved(NameId),
}

/// Payload of a call expression.
///
/// Exactly one of `prim`/`base` is populated for well-formed calls
/// primitive calls carry no base expression and named calls
/// carry no primitive. `base` starts as an unresolved reference and is
/// rewritten to a symbol reference by resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallData {
    pub prim: Option<Prim>,
    pub base: Option<ExprId>,
    pub actuals: ListId,
    /// Method-partial call: the receiver is applied but arguments follow in a
    /// second call that gets recombined during pre-fold.
    pub partial: bool,
    /// Call was written in method syntax in the source.
    pub method_tag: bool,
    /// Bracket call (indexing syntax).
    pub square: bool,
}

/// Expression variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    /// Reference to a defined symbol (non-owning).
    SymRef { sym: SymId },
    /// A name not yet bound to a symbol.
    Unresolved { name: NameId },
    /// Definition point of a symbol, owning the symbol plus optional
    /// initializer and declared-type expressions.
    Def {
        sym: SymId,
        init: Option<ExprId>,
        type_expr: Option<ExprId>,
    },
    Call(CallData),
    /// A keyword-style actual wrapping the underlying argument expression.
    NamedActual { name: NameId, actual: ExprId },
    /// A statement sequence. `info` is an optional primitive call tagging the
    /// block as a loop or a parallel/locality construct; `uses` lists the
    /// modules made visible in this block.
    Block {
        body: ListId,
        info: Option<ExprId>,
        uses: Vec<SymId>,
    },
    Cond {
        cond: ExprId,
        then_block: ExprId,
        else_block: Option<ExprId>,
    },
    Goto { tag: GotoTag, label: LabelTarget },
    /// Tombstone left by pruning; never reachable from the tree.
    Removed,
}

/// An expression node: variant data plus tree bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: Loc,
    /// Enclosing expression; `None` iff this node is the direct child of a
    /// symbol (function body, formal def, field def) or out of tree.
    pub parent_expr: Option<ExprId>,
    /// Enclosing symbol; `None` iff the node is out of tree.
    pub parent_sym: Option<SymId>,
    /// Owning sibling list, when the node sits in one.
    pub list: Option<ListId>,
    pub prev: Option<ExprId>,
    pub next: Option<ExprId>,
}

impl Expr {
    pub(crate) fn new(kind: ExprKind, loc: Loc) -> Self {
        Self {
            kind,
            loc,
            parent_expr: None,
            parent_sym: None,
            list: None,
            prev: None,
            next: None,
        }
    }

    /// True when the node is linked into the tree.
    #[must_use]
    pub fn in_tree(&self) -> bool {
        self.parent_sym.is_some()
    }
}

impl Arena {
    /// The call data of `id`, panicking if it is not a call.
    ///
    /// Passes use this where a non-call is an internal inconsistency.
    #[must_use]
    pub fn call(&self, id: ExprId) -> &CallData {
        match &self.expr(id).kind {
            ExprKind::Call(call) => call,
            other => panic!("{id}: expected call, found {other:?}"),
        }
    }

    /// Mutable access to call data; same contract as [`Arena::call`].
    pub fn call_mut(&mut self, id: ExprId) -> &mut CallData {
        match &mut self.expr_mut(id).kind {
            ExprKind::Call(call) => call,
            other => panic!("{id}: expected call, found {other:?}"),
        }
    }

    /// True when `id` is a call of primitive `prim`.
    #[must_use]
    pub fn is_prim(&self, id: ExprId, prim: Prim) -> bool {
        matches!(&self.expr(id).kind, ExprKind::Call(call) if call.prim == Some(prim))
    }

    /// The actuals of a call, front to back.
    #[must_use]
    pub fn actuals(&self, call: ExprId) -> Vec<ExprId> {
        self.items(self.call(call).actuals)
    }

    /// The `n`-th actual (0-based), panicking when out of range.
    #[must_use]
    pub fn actual(&self, call: ExprId, n: usize) -> ExprId {
        let actuals = self.actuals(call);
        *actuals
            .get(n)
            .unwrap_or_else(|| panic!("{call}: call has no actual {n}"))
    }

    /// The function symbol a call resolves to, when its base is a symbol
    /// reference to a function.
    #[must_use]
    pub fn resolved_callee(&self, call: ExprId) -> Option<SymId> {
        let base = self.call(call).base?;
        match self.expr(base).kind {
            ExprKind::SymRef { sym } if self.sym(sym).is_fn() => Some(sym),
            _ => None,
        }
    }

    /// The symbol referenced by `id`, when it is a symbol reference.
    #[must_use]
    pub fn sym_ref(&self, id: ExprId) -> Option<SymId> {
        match self.expr(id).kind {
            ExprKind::SymRef { sym } => Some(sym),
            _ => None,
        }
    }

    /// The defined symbol of a definition expression.
    #[must_use]
    pub fn def_sym(&self, id: ExprId) -> SymId {
        match self.expr(id).kind {
            ExprKind::Def { sym, .. } => sym,
            ref other => panic!("{id}: expected def, found {other:?}"),
        }
    }

    /// The body list of a block expression.
    #[must_use]
    pub fn block_body(&self, id: ExprId) -> ListId {
        match self.expr(id).kind {
            ExprKind::Block { body, .. } => body,
            ref other => panic!("{id}: expected block, found {other:?}"),
        }
    }

    /// The block-info call of a block, if any.
    #[must_use]
    pub fn block_info(&self, id: ExprId) -> Option<ExprId> {
        match self.expr(id).kind {
            ExprKind::Block { info, .. } => info,
            _ => None,
        }
    }

    /// True when `id` is a block whose info call is primitive `prim`.
    #[must_use]
    pub fn block_tagged(&self, id: ExprId, prim: Prim) -> bool {
        self.block_info(id).is_some_and(|info| self.is_prim(info, prim))
    }

    /// Walks `parent_expr` links to the statement directly under the
    /// enclosing block (or symbol), mirroring the "statement expression" of
    /// a node: the position where new statements may be spliced in.
    #[must_use]
    pub fn stmt_of(&self, id: ExprId) -> ExprId {
        let mut cursor = id;
        loop {
            let node = self.expr(cursor);
            match node.parent_expr {
                Some(parent) if !matches!(self.expr(parent).kind, ExprKind::Block { .. }) => {
                    cursor = parent;
                }
                _ => return cursor,
            }
        }
    }

    /// The nearest enclosing block expression, if any.
    #[must_use]
    pub fn enclosing_block(&self, id: ExprId) -> Option<ExprId> {
        let mut cursor = self.expr(id).parent_expr;
        while let Some(e) = cursor {
            if matches!(self.expr(e).kind, ExprKind::Block { .. }) {
                return Some(e);
            }
            cursor = self.expr(e).parent_expr;
        }
        None
    }

    /// The function symbol whose body (transitively) contains `id`, if the
    /// node is inside a function rather than a module top level.
    #[must_use]
    pub fn enclosing_fn(&self, id: ExprId) -> Option<SymId> {
        let sym = self.expr(id).parent_sym?;
        if self.sym(sym).is_fn() { Some(sym) } else { None }
    }
}
