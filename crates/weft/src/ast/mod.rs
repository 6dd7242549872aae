//! The IR: arena-allocated expressions, symbols, and types, plus the editing
//! kernel that is the only legal way to restructure them.
//!
//! # Module structure
//!
//! - `arena` - node storage and typed ids
//! - `expr` / `sym` / `ty` - the three node families
//! - `immediate` - compile-time constants and fold arithmetic
//! - `edit` - insert/remove/replace/copy (the invariant enforcement point)
//! - `visit` - collectors and global analyses
//! - `build` - normalized-AST construction API
//! - `verify` - integrity checking at pass boundaries

pub mod arena;
pub mod build;
pub mod edit;
pub mod expr;
pub mod immediate;
pub mod sym;
pub mod ty;
pub mod verify;
pub mod visit;

pub use arena::{Arena, ExprId, ListId, SymId, TypeId};
pub use edit::CopyMap;
pub use expr::{CallData, Expr, ExprKind, GotoTag, LabelTarget};
pub use immediate::Immediate;
pub use sym::{ArgData, Flags, FnData, Intent, RetTag, SubstVal, Substitutions, SymKind, Symbol, Variadic};
pub use ty::{PrimTy, StructData, StructuralTag, Ty, TyKind};
