//! Type nodes.
//!
//! Types live out of tree and are named by their type symbol. Class-like
//! (structural) types own their field and parent-clause lists; the dispatch
//! hierarchy is kept as explicit parent/child edge vectors maintained during
//! resolution.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::IntoStaticStr;

use super::{
    arena::{Arena, ListId, SymId, TypeId},
    sym::{Flags, Substitutions},
};
use crate::intern::NameId;

/// Built-in scalar and marker types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum PrimTy {
    /// Type not yet established.
    Unknown,
    /// The generic "any type" constraint.
    Any,
    Void,
    /// Type of the `nil` literal.
    Nil,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Real32,
    Real64,
    Complex64,
    Complex128,
    String,
    /// Runtime task list handle.
    TaskList,
    /// Opaque pointer used for argument bundles.
    RawPtr,
}

impl PrimTy {
    /// True for the integral kinds (signed or unsigned).
    #[must_use]
    pub fn is_int(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    #[must_use]
    pub fn is_uint(self) -> bool {
        matches!(self, Self::Uint8 | Self::Uint16 | Self::Uint32 | Self::Uint64)
    }

    #[must_use]
    pub fn is_real(self) -> bool {
        matches!(self, Self::Real32 | Self::Real64)
    }

    #[must_use]
    pub fn is_complex(self) -> bool {
        matches!(self, Self::Complex64 | Self::Complex128)
    }

    /// Bit width of the numeric kinds.
    #[must_use]
    pub fn bit_width(self) -> Option<u32> {
        Some(match self {
            Self::Int8 | Self::Uint8 => 8,
            Self::Int16 | Self::Uint16 => 16,
            Self::Int32 | Self::Uint32 => 32,
            Self::Int64 | Self::Uint64 | Self::Real64 | Self::Complex64 => 64,
            Self::Real32 => 32,
            Self::Complex128 => 128,
            _ => return None,
        })
    }
}

/// Which structural family a class-like type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum StructuralTag {
    Record,
    Union,
    Class,
}

/// Payload of a class-like type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructData {
    pub tag: StructuralTag,
    /// Field definitions (defs owned by this type).
    pub fields: ListId,
    /// Parent-type expressions from the declaration.
    pub inherits: ListId,
}

/// Type variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TyKind {
    Primitive(PrimTy),
    Enum { constants: Vec<SymId> },
    Structural(StructData),
}

/// A type node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ty {
    pub kind: TyKind,
    /// The type symbol naming this type.
    pub symbol: Option<SymId>,
    /// Reference type wrapping this type, once built.
    pub ref_type: Option<TypeId>,
    /// For reference wrappers: the referred-to value type.
    pub val_type: Option<TypeId>,
    /// Wide counterpart, once the widening pass builds it.
    pub wide_type: Option<TypeId>,
    /// Element type used when promoting scalar functions over this type.
    pub scalar_promotion: Option<TypeId>,
    /// Default value symbol (e.g. `nil` for classes, `0` for ints).
    pub default_value: Option<SymId>,
    pub default_ctor: Option<SymId>,
    pub type_ctor: Option<SymId>,
    pub destructor: Option<SymId>,
    pub dispatch_parents: SmallVec<[TypeId; 2]>,
    pub dispatch_children: SmallVec<[TypeId; 4]>,
    /// Generic type this one was instantiated from.
    pub instantiated_from: Option<TypeId>,
    pub substitutions: Substitutions,
}

impl Ty {
    /// A bare type with no hierarchy edges and no helper symbols.
    #[must_use]
    pub fn new(kind: TyKind) -> Self {
        Self {
            kind,
            symbol: None,
            ref_type: None,
            val_type: None,
            wide_type: None,
            scalar_promotion: None,
            default_value: None,
            default_ctor: None,
            type_ctor: None,
            destructor: None,
            dispatch_parents: SmallVec::new(),
            dispatch_children: SmallVec::new(),
            instantiated_from: None,
            substitutions: Substitutions::new(),
        }
    }

    #[must_use]
    pub fn as_primitive(&self) -> Option<PrimTy> {
        match self.kind {
            TyKind::Primitive(p) => Some(p),
            _ => None,
        }
    }
}

impl Arena {
    /// Flags of a type, read through its symbol.
    #[must_use]
    pub fn ty_flags(&self, ty: TypeId) -> Flags {
        match self.ty(ty).symbol {
            Some(sym) => self.sym(sym).flags,
            None => Flags::empty(),
        }
    }

    /// True when the type's symbol carries `flag`.
    #[must_use]
    pub fn ty_has_flag(&self, ty: TypeId, flag: Flags) -> bool {
        self.ty_flags(ty).contains(flag)
    }

    /// Structural payload, panicking for non-structural types.
    #[must_use]
    pub fn struct_data(&self, ty: TypeId) -> &StructData {
        match &self.ty(ty).kind {
            TyKind::Structural(data) => data,
            other => panic!("{ty}: expected structural type, found {other:?}"),
        }
    }

    /// True for class-family structural types.
    #[must_use]
    pub fn is_class_like(&self, ty: TypeId) -> bool {
        matches!(
            self.ty(ty).kind,
            TyKind::Structural(StructData { tag: StructuralTag::Class, .. })
        )
    }

    #[must_use]
    pub fn is_record_like(&self, ty: TypeId) -> bool {
        matches!(
            self.ty(ty).kind,
            TyKind::Structural(StructData {
                tag: StructuralTag::Record | StructuralTag::Union,
                ..
            })
        )
    }

    /// Field symbols of a structural type, in declaration order.
    #[must_use]
    pub fn fields(&self, ty: TypeId) -> Vec<SymId> {
        match &self.ty(ty).kind {
            TyKind::Structural(data) => self
                .items(data.fields)
                .into_iter()
                .map(|def| self.def_sym(def))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Looks up a field by name, including `super`-embedded parents when
    /// `traverse_super` is set.
    #[must_use]
    pub fn field_named(&self, ty: TypeId, name: NameId, traverse_super: bool) -> Option<SymId> {
        for field in self.fields(ty) {
            if self.sym(field).name == name {
                return Some(field);
            }
        }
        if traverse_super {
            for field in self.fields(ty) {
                if self.sym(field).flags.contains(Flags::SUPER_CLASS) {
                    if let Some(found) = self.field_named(self.sym(field).ty, name, true) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    /// 1-based position of a field within its type, as used by member
    /// primitives in emitted code.
    #[must_use]
    pub fn field_position(&self, ty: TypeId, field: SymId) -> Option<usize> {
        self.fields(ty).iter().position(|&f| f == field).map(|i| i + 1)
    }

    /// Strips one reference wrapper, if present.
    #[must_use]
    pub fn value_type(&self, ty: TypeId) -> TypeId {
        if self.ty_has_flag(ty, Flags::REF) {
            self.ty(ty).val_type.unwrap_or(ty)
        } else {
            ty
        }
    }

    /// True when `sub` is `ty` or reaches `ty` through dispatch-parent edges.
    #[must_use]
    pub fn dispatches_to(&self, sub: TypeId, ty: TypeId) -> bool {
        if sub == ty {
            return true;
        }
        self.ty(sub)
            .dispatch_parents
            .iter()
            .any(|&parent| self.dispatches_to(parent, ty))
    }

    /// Distance in dispatch-parent edges from `sub` up to `ty`; `None` when
    /// unrelated. Used by disambiguation's specificity criterion.
    #[must_use]
    pub fn dispatch_distance(&self, sub: TypeId, ty: TypeId) -> Option<u32> {
        if sub == ty {
            return Some(0);
        }
        self.ty(sub)
            .dispatch_parents
            .iter()
            .filter_map(|&parent| self.dispatch_distance(parent, ty))
            .min()
            .map(|d| d + 1)
    }
}
