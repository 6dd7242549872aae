//! Arena storage for IR nodes.
//!
//! Expressions, symbols, types, and sibling lists live in four flat vectors
//! and are referred to by 4-byte typed indices. Ids are handed out
//! monotonically and never reused within a compilation, so an id doubles as
//! the node's unique identity; pruning tombstones slots instead of freeing
//! them.
//!
//! The arena only stores and hands out nodes. All structural mutation
//! (splicing, reparenting, replacement) goes through `ast::edit` so the tree
//! invariants have a single enforcement point.

use serde::{Deserialize, Serialize};

use super::{
    expr::{Expr, ExprKind},
    sym::{SymKind, Symbol},
    ty::{Ty, TyKind},
};
use crate::diag::Loc;

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Raw index into the arena vector.
            #[inline]
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", stringify!($name), self.0)
            }
        }
    };
}

arena_id!(
    /// Identity of an expression node.
    ExprId
);
arena_id!(
    /// Identity of a symbol node.
    SymId
);
arena_id!(
    /// Identity of a type node.
    TypeId
);
arena_id!(
    /// Identity of an intrusive sibling list.
    ListId
);

/// Who owns a sibling list, and through which slot.
///
/// The owner determines the parent links of the list's elements: elements of
/// an expression-owned list get that expression as `parent_expr`; elements of
/// a symbol- or type-owned list have no `parent_expr` (they are direct
/// children of a symbol).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListOwner {
    /// Statements of a block expression.
    BlockBody(ExprId),
    /// Actual arguments of a call.
    CallActuals(ExprId),
    /// Formal definitions of a function symbol.
    Formals(SymId),
    /// Field definitions of a structural type.
    Fields(TypeId),
    /// Parent-type expressions of a structural type.
    Inherits(TypeId),
}

impl ListOwner {
    /// The expression that owns this list, if the owner is an expression.
    #[must_use]
    pub fn as_expr(self) -> Option<ExprId> {
        match self {
            Self::BlockBody(e) | Self::CallActuals(e) => Some(e),
            Self::Formals(_) | Self::Fields(_) | Self::Inherits(_) => None,
        }
    }
}

/// An intrusive doubly-linked sibling list.
///
/// `head`/`tail`/`len` are kept consistent with the `prev`/`next`/`list`
/// links on member expressions by the editing kernel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct List {
    pub head: Option<ExprId>,
    pub tail: Option<ExprId>,
    pub len: u32,
    pub owner: ListOwner,
}

impl List {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Flat node storage.
#[derive(Debug, Serialize, Deserialize)]
pub struct Arena {
    exprs: Vec<Expr>,
    syms: Vec<Symbol>,
    types: Vec<Ty>,
    lists: Vec<List>,
}

impl Arena {
    #[must_use]
    pub fn new() -> Self {
        Self {
            exprs: Vec::new(),
            syms: Vec::new(),
            types: Vec::new(),
            lists: Vec::new(),
        }
    }

    pub fn alloc_expr(&mut self, kind: ExprKind, loc: Loc) -> ExprId {
        let id = ExprId(u32::try_from(self.exprs.len()).expect("expr arena overflow"));
        self.exprs.push(Expr::new(kind, loc));
        id
    }

    pub fn alloc_sym(&mut self, sym: Symbol) -> SymId {
        let id = SymId(u32::try_from(self.syms.len()).expect("symbol arena overflow"));
        self.syms.push(sym);
        id
    }

    pub fn alloc_type(&mut self, ty: Ty) -> TypeId {
        let id = TypeId(u32::try_from(self.types.len()).expect("type arena overflow"));
        self.types.push(ty);
        id
    }

    pub fn alloc_list(&mut self, owner: ListOwner) -> ListId {
        let id = ListId(u32::try_from(self.lists.len()).expect("list arena overflow"));
        self.lists.push(List {
            head: None,
            tail: None,
            len: 0,
            owner,
        });
        id
    }

    #[inline]
    #[must_use]
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    #[inline]
    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.index()]
    }

    #[inline]
    #[must_use]
    pub fn sym(&self, id: SymId) -> &Symbol {
        &self.syms[id.index()]
    }

    #[inline]
    pub fn sym_mut(&mut self, id: SymId) -> &mut Symbol {
        &mut self.syms[id.index()]
    }

    #[inline]
    #[must_use]
    pub fn ty(&self, id: TypeId) -> &Ty {
        &self.types[id.index()]
    }

    #[inline]
    pub fn ty_mut(&mut self, id: TypeId) -> &mut Ty {
        &mut self.types[id.index()]
    }

    #[inline]
    #[must_use]
    pub fn list(&self, id: ListId) -> &List {
        &self.lists[id.index()]
    }

    #[inline]
    pub fn list_mut(&mut self, id: ListId) -> &mut List {
        &mut self.lists[id.index()]
    }

    /// Iterates the items of a sibling list front to back.
    ///
    /// Collects into a vector so callers may edit the list while walking the
    /// snapshot; passes do this constantly.
    #[must_use]
    pub fn items(&self, id: ListId) -> Vec<ExprId> {
        let mut out = Vec::with_capacity(self.list(id).len as usize);
        let mut cursor = self.list(id).head;
        while let Some(e) = cursor {
            out.push(e);
            cursor = self.expr(e).next;
        }
        out
    }

    /// Ids of all non-tombstoned expressions, in allocation order.
    pub fn expr_ids(&self) -> impl Iterator<Item = ExprId> + '_ {
        self.exprs
            .iter()
            .enumerate()
            .filter(|(_, e)| !matches!(e.kind, ExprKind::Removed))
            .map(|(i, _)| ExprId(i as u32))
    }

    /// Ids of all non-tombstoned symbols, in allocation order.
    pub fn sym_ids(&self) -> impl Iterator<Item = SymId> + '_ {
        self.syms
            .iter()
            .enumerate()
            .filter(|(_, s)| !matches!(s.kind, SymKind::Removed))
            .map(|(i, _)| SymId(i as u32))
    }

    /// Ids of all types, in allocation order.
    pub fn type_ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.types.len()).map(|i| TypeId(i as u32))
    }

    /// Tombstones an expression slot. The id stays allocated; the node is
    /// skipped by iteration and must no longer be referenced from the tree.
    pub fn retire_expr(&mut self, id: ExprId) {
        self.expr_mut(id).kind = ExprKind::Removed;
    }

    /// Tombstones a symbol slot.
    pub fn retire_sym(&mut self, id: SymId) {
        self.sym_mut(id).kind = SymKind::Removed;
    }

    #[must_use]
    pub fn expr_count(&self) -> usize {
        self.exprs.len()
    }

    #[must_use]
    pub fn sym_count(&self) -> usize {
        self.syms.len()
    }

    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// True when the type slot is a structural (record/union/class) type.
    #[must_use]
    pub fn is_structural(&self, id: TypeId) -> bool {
        matches!(self.ty(id).kind, TyKind::Structural(_))
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}
