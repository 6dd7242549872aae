//! Symbol nodes: variables, formals, functions, type symbols, modules,
//! labels, and enum constants.
//!
//! Symbols are the out-of-tree half of the IR: they are owned by their
//! definition expression (`def_point`) and referenced by any number of
//! symbol-reference expressions.

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use super::{
    arena::{Arena, ExprId, ListId, SymId, TypeId},
    immediate::Immediate,
};
use crate::intern::NameId;

bitflags::bitflags! {
    /// Marker flags on symbols (and, through their symbol, on types).
    ///
    /// Flags are how passes communicate: resolution marks wrappers and
    /// generics, parallel lowering marks task functions and heap types, the
    /// widening pass reads and writes the wide markers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Flags: u64 {
        /// Reference wrapper type.
        const REF = 1 << 0;
        /// Wide reference record.
        const WIDE = 1 << 1;
        /// Wide class record.
        const WIDE_CLASS = 1 << 2;
        const GENERIC = 1 << 3;
        const TUPLE = 1 << 4;
        const STAR_TUPLE = 1 << 5;
        const ITERATOR_CLASS = 1 << 6;
        const ITERATOR_RECORD = 1 << 7;
        const SYNC = 1 << 8;
        const SINGLE = 1 << 9;
        /// Raw array storage class.
        const DATA_CLASS = 1 << 10;
        const RUNTIME_TYPE = 1 << 11;
        const ARRAY = 1 << 12;
        /// Single-field class wrapping a heap-promoted variable.
        const HEAP = 1 << 13;
        /// Class with no object header (no class id, no dispatch).
        const NO_OBJECT = 1 << 14;
        /// Never widen this class type.
        const NO_WIDE_CLASS = 1 << 15;
        const EXTERN = 1 << 16;
        const INLINE = 1 << 17;
        const TEMP = 1 << 18;
        const METHOD = 1 << 19;
        const PARAM = 1 << 20;
        const CONST = 1 << 21;
        const PRIVATE = 1 << 22;
        /// Variable may be touched by more than one task.
        const CONCURRENTLY_ACCESSED = 1 << 23;
        /// Field embedding the parent class (never widened, never wide-read).
        const SUPER_CLASS = 1 << 24;
        const EXPAND_TUPLES_WITH_VALUES = 1 << 25;
        // Task-function markers set by parallel lowering.
        const BEGIN = 1 << 26;
        const ON = 1 << 27;
        const NON_BLOCKING = 1 << 28;
        const GPU_ON = 1 << 29;
        const GPU_CALL = 1 << 30;
        const COBEGIN_OR_COFORALL = 1 << 31;
        const BEGIN_BLOCK = 1 << 32;
        const ON_BLOCK = 1 << 33;
        const COBEGIN_OR_COFORALL_BLOCK = 1 << 34;
        // Wrapper markers set by wrapper synthesis.
        const DEFAULT_WRAPPER = 1 << 35;
        const ORDER_WRAPPER = 1 << 36;
        const COERCE_WRAPPER = 1 << 37;
        const PROMOTION_WRAPPER = 1 << 38;
        /// Compiler-internal function: skipped when attributing errors.
        const COMPILER_INTERNAL = 1 << 39;
        /// Variable holds a type, not a value.
        const TYPE_VARIABLE = 1 << 40;
        /// Variable must live on the heap (captured by an async task).
        const HEAP_ALLOCATE = 1 << 41;
        /// Method participates in dynamic dispatch.
        const VIRTUAL = 1 << 42;
        /// Internal (standard library) module.
        const INTERNAL_MODULE = 1 << 43;
        /// Synthesized iterator-protocol method.
        const ITERATOR_FN = 1 << 44;
        /// Formal expanded from a variadic formal.
        const EXPANDED_VARARGS = 1 << 45;
    }
}

/// Argument passing intent of a formal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum Intent {
    Blank,
    Const,
    In,
    Out,
    Inout,
    Ref,
    Param,
    Type,
}

/// What a function returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum RetTag {
    Value,
    Ref,
    Param,
    Type,
}

/// Variable-argument annotation on a formal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variadic {
    /// `...k` with a compile-time count: expansion produces a tuple actual.
    Fixed(u32),
    /// `...?k`: expansion matches the call's arity.
    Queried,
}

/// One binding of a generic substitution: a formal (or type field) bound to
/// a concrete type or a parameter value.
///
/// Reals are keyed by bit pattern so the value is `Eq + Hash` and can key
/// the instantiation cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubstVal {
    Ty(TypeId),
    Int(i64),
    Uint(u64),
    Bool(bool),
    RealBits(u64),
    Str(NameId),
}

impl SubstVal {
    /// Wraps a parameter immediate.
    #[must_use]
    pub fn from_immediate(imm: Immediate) -> Self {
        match imm {
            Immediate::Bool(v) => Self::Bool(v),
            Immediate::Int(v) => Self::Int(v),
            Immediate::Uint(v) => Self::Uint(v),
            Immediate::Real(v) => Self::RealBits(v.to_bits()),
            Immediate::String(v) => Self::Str(v),
        }
    }

    /// Recovers the immediate for param substitutions.
    #[must_use]
    pub fn as_immediate(self) -> Option<Immediate> {
        match self {
            Self::Int(v) => Some(Immediate::Int(v)),
            Self::Uint(v) => Some(Immediate::Uint(v)),
            Self::Bool(v) => Some(Immediate::Bool(v)),
            Self::RealBits(v) => Some(Immediate::Real(f64::from_bits(v))),
            Self::Str(v) => Some(Immediate::String(v)),
            Self::Ty(_) => None,
        }
    }
}

/// Ordered substitution pairs; the structural fingerprint of an
/// instantiation (formal id, bound value).
pub type Substitutions = Vec<(SymId, SubstVal)>;

/// Function payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FnData {
    /// Formal definitions, owned by the symbol (not in any expression).
    pub formals: ListId,
    /// Body block; its `parent_expr` is `None`.
    pub body: ExprId,
    pub ret_type: TypeId,
    pub ret_tag: RetTag,
    pub where_clause: Option<ExprId>,
    /// Generic this function was instantiated from.
    pub instantiated_from: Option<SymId>,
    /// Block the first instantiation was demanded from; bounds visibility
    /// for resolution inside the instantiation.
    pub instantiation_point: Option<ExprId>,
    pub substitutions: Substitutions,
    /// Call sites invoking this function; rebuilt by
    /// [`crate::ast::visit::compute_call_sites`].
    #[serde(skip)]
    pub called_by: Vec<ExprId>,
}

/// Formal-argument payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgData {
    pub intent: Intent,
    pub variadic: Option<Variadic>,
    /// Set when instantiation bound this formal to a param value.
    pub instantiated_param: bool,
    /// Generic constraint this formal was instantiated from, if any. `true`
    /// means the unconstrained `?T`/any form.
    pub instantiated_from_any: bool,
    /// Type the formal was instantiated from (its generic type), if any.
    pub instantiated_from: Option<TypeId>,
}

/// Module payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleData {
    /// Top-level block of the module.
    pub block: ExprId,
    /// Module initialization function, once built.
    pub init_fn: Option<SymId>,
}

/// Symbol variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SymKind {
    Var {
        /// Compile-time value for `param` variables and literals.
        immediate: Option<Immediate>,
    },
    Arg(ArgData),
    Fn(FnData),
    /// Wraps a type; the type is in [`Symbol::ty`].
    TypeSym,
    Module(ModuleData),
    Label,
    EnumConst { ordinal: i64 },
    /// Tombstone left by pruning.
    Removed,
}

/// A symbol node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub name: NameId,
    /// Name used by the C emitter; defaults to `name`, diverges for clones
    /// and synthesized functions.
    pub cname: NameId,
    /// Value type of the symbol (the wrapped type for type symbols).
    pub ty: TypeId,
    pub flags: Flags,
    /// Definition expression; in-tree iff the symbol is in-tree
    /// Formals and fields point at defs owned by symbol- or
    /// type-owned lists.
    pub def_point: Option<ExprId>,
    pub kind: SymKind,
}

impl Symbol {
    /// A fresh symbol with no flags and no definition point.
    #[must_use]
    pub fn new(name: NameId, ty: TypeId, kind: SymKind) -> Self {
        Self {
            name,
            cname: name,
            ty,
            flags: Flags::empty(),
            def_point: None,
            kind,
        }
    }

    #[must_use]
    pub fn is_fn(&self) -> bool {
        matches!(self.kind, SymKind::Fn(_))
    }

    #[must_use]
    pub fn is_type(&self) -> bool {
        matches!(self.kind, SymKind::TypeSym)
    }

    #[must_use]
    pub fn is_module(&self) -> bool {
        matches!(self.kind, SymKind::Module(_))
    }

    #[must_use]
    pub fn is_param(&self) -> bool {
        self.flags.contains(Flags::PARAM)
            || matches!(self.kind, SymKind::Arg(ref arg) if arg.intent == Intent::Param)
            || matches!(self.kind, SymKind::EnumConst { .. })
    }

    /// The compile-time value of the symbol, if it has one.
    #[must_use]
    pub fn immediate(&self) -> Option<Immediate> {
        match self.kind {
            SymKind::Var { immediate } => immediate,
            SymKind::EnumConst { ordinal } => Some(Immediate::Int(ordinal)),
            _ => None,
        }
    }
}

impl Arena {
    /// Function payload of `id`, panicking if it is not a function.
    #[must_use]
    pub fn fn_data(&self, id: SymId) -> &FnData {
        match &self.sym(id).kind {
            SymKind::Fn(data) => data,
            other => panic!("{id}: expected function, found {other:?}"),
        }
    }

    /// Mutable function payload; same contract as [`Arena::fn_data`].
    pub fn fn_data_mut(&mut self, id: SymId) -> &mut FnData {
        match &mut self.sym_mut(id).kind {
            SymKind::Fn(data) => data,
            other => panic!("{id}: expected function, found {other:?}"),
        }
    }

    /// Formal-argument payload of `id`, panicking if it is not a formal.
    #[must_use]
    pub fn arg_data(&self, id: SymId) -> &ArgData {
        match &self.sym(id).kind {
            SymKind::Arg(data) => data,
            other => panic!("{id}: expected formal, found {other:?}"),
        }
    }

    /// Mutable formal payload; same contract as [`Arena::arg_data`].
    pub fn arg_data_mut(&mut self, id: SymId) -> &mut ArgData {
        match &mut self.sym_mut(id).kind {
            SymKind::Arg(data) => data,
            other => panic!("{id}: expected formal, found {other:?}"),
        }
    }

    /// Module payload of `id`, panicking if it is not a module.
    #[must_use]
    pub fn module_data(&self, id: SymId) -> &ModuleData {
        match &self.sym(id).kind {
            SymKind::Module(data) => data,
            other => panic!("{id}: expected module, found {other:?}"),
        }
    }

    /// The formal symbols of a function, front to back.
    #[must_use]
    pub fn formals(&self, func: SymId) -> Vec<SymId> {
        self.items(self.fn_data(func).formals)
            .into_iter()
            .map(|def| self.def_sym(def))
            .collect()
    }

    /// All function symbols, in allocation order. Allocation order is what
    /// the visibility cache's high-water mark indexes.
    #[must_use]
    pub fn all_fns(&self) -> Vec<SymId> {
        self.sym_ids().filter(|&s| self.sym(s).is_fn()).collect()
    }
}
