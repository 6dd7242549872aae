//! The program under compilation: arena, interner, configuration, and the
//! well-known symbols every pass needs.
//!
//! All process-scoped state lives here and is threaded through passes
//! explicitly; there are no module-level singletons. Caches that are local
//! to one phase (visibility, instantiation, wrappers, virtual tables) live
//! in that phase's own context struct and die with it.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    ast::{
        arena::{Arena, ExprId, ListOwner, SymId, TypeId},
        expr::ExprKind,
        sym::{Flags, ModuleData, SubstVal, SymKind, Symbol},
        ty::{PrimTy, StructData, StructuralTag, Ty, TyKind},
    },
    config::Config,
    diag::{Loc, Reporter},
    intern::{Interner, NameId, WellKnown},
};

/// Ids of the built-in types, created once at program construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoreTypes {
    pub unknown: TypeId,
    pub any: TypeId,
    pub void: TypeId,
    pub nil: TypeId,
    pub bool_: TypeId,
    pub int8: TypeId,
    pub int16: TypeId,
    pub int32: TypeId,
    pub int64: TypeId,
    pub uint8: TypeId,
    pub uint16: TypeId,
    pub uint32: TypeId,
    pub uint64: TypeId,
    pub real32: TypeId,
    pub real64: TypeId,
    pub complex64: TypeId,
    pub complex128: TypeId,
    pub string: TypeId,
    pub task_list: TypeId,
    pub raw_ptr: TypeId,
    /// Root of the class dispatch hierarchy.
    pub object: TypeId,
}

impl CoreTypes {
    /// The canonical type for a default (64-bit) integer literal.
    #[must_use]
    pub fn default_int(&self) -> TypeId {
        self.int64
    }

    /// The locale-id type carried in wide references and `on` wrappers.
    #[must_use]
    pub fn locale_id(&self) -> TypeId {
        self.int32
    }
}

/// Everything the middle end knows about one compilation.
#[derive(Debug)]
pub struct Program {
    pub arena: Arena,
    pub interner: Interner,
    pub config: Config,
    pub reporter: Reporter,
    pub core: CoreTypes,
    /// `_root`: the outermost scope, owning the builtin definitions.
    pub root_module: SymId,
    /// `_Program`: child of the root; synthesized types and functions are
    /// defined at the head or tail of its block.
    pub program_module: SymId,
    /// User and internal modules, children of `_Program`.
    pub modules: Vec<SymId>,
    /// The user entry point, once identified.
    pub main_fn: Option<SymId>,
    /// Shared literal symbols, one per distinct immediate.
    pub(crate) literal_cache: AHashMap<SubstVal, SymId>,
    /// The shared `void` value symbol, created on first use.
    pub(crate) void_value: Option<SymId>,
    /// Marker symbol whose conditional introduces a `try` resolution frame.
    pub try_token: SymId,
}

impl Program {
    /// Creates an empty program: builtins defined, `_root` and `_Program` in
    /// place, no user modules yet.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let mut arena = Arena::new();
        let mut interner = Interner::new();

        let (root_module, root_block) = new_module_raw(&mut arena, WellKnown::Root.id());
        let core = CoreTypes::install(&mut arena, &mut interner, root_block);
        let (program_module, _) = new_module_raw(&mut arena, WellKnown::Program.id());
        let def = arena.alloc_expr(
            ExprKind::Def { sym: program_module, init: None, type_expr: None },
            Loc::UNKNOWN,
        );
        arena.block_push_tail(root_block, def);

        let try_token = {
            let name = interner.intern("_tryToken");
            let mut sym = Symbol::new(name, core.bool_, SymKind::Var { immediate: None });
            sym.flags |= Flags::CONST | Flags::COMPILER_INTERNAL;
            let sym = arena.alloc_sym(sym);
            let def = arena.alloc_expr(
                ExprKind::Def { sym, init: None, type_expr: None },
                Loc::UNKNOWN,
            );
            arena.block_push_tail(root_block, def);
            sym
        };

        Self {
            arena,
            interner,
            config,
            reporter: Reporter::new(),
            core,
            root_module,
            program_module,
            modules: Vec::new(),
            main_fn: None,
            literal_cache: AHashMap::new(),
            void_value: None,
            try_token,
        }
    }

    /// Adds a module as a child of `_Program`.
    pub fn add_module(&mut self, name: &str, internal: bool) -> SymId {
        let name = self.interner.intern(name);
        let (module, _) = new_module_raw(&mut self.arena, name);
        if internal {
            self.arena.sym_mut(module).flags |= Flags::INTERNAL_MODULE;
        }
        let def = self.arena.alloc_expr(
            ExprKind::Def { sym: module, init: None, type_expr: None },
            Loc::UNKNOWN,
        );
        let program_block = self.arena.module_data(self.program_module).block;
        self.arena.block_push_tail(program_block, def);
        self.modules.push(module);
        module
    }

    /// The block synthesized definitions are appended to.
    #[must_use]
    pub fn program_block(&self) -> ExprId {
        self.arena.module_data(self.program_module).block
    }

    /// Type of an expression as currently resolved.
    #[must_use]
    pub fn expr_type(&self, e: ExprId) -> TypeId {
        match &self.arena.expr(e).kind {
            ExprKind::SymRef { sym } => self.arena.sym(*sym).ty,
            ExprKind::NamedActual { actual, .. } => self.expr_type(*actual),
            ExprKind::Call(call) => {
                if let Some(prim) = call.prim {
                    crate::prim::return_type(prim, e, self)
                } else if let Some(callee) = self.arena.resolved_callee(e) {
                    self.arena.fn_data(callee).ret_type
                } else {
                    self.core.unknown
                }
            }
            ExprKind::Unresolved { .. } => self.core.unknown,
            ExprKind::Def { .. }
            | ExprKind::Block { .. }
            | ExprKind::Cond { .. }
            | ExprKind::Goto { .. }
            | ExprKind::Removed => self.core.void,
        }
    }

    /// Value type of an expression: its type with one ref wrapper stripped.
    #[must_use]
    pub fn expr_val_type(&self, e: ExprId) -> TypeId {
        self.arena.value_type(self.expr_type(e))
    }

    /// Human-readable type name for diagnostics.
    #[must_use]
    pub fn type_name(&self, ty: TypeId) -> String {
        if let Some(sym) = self.arena.ty(ty).symbol {
            return self.interner.resolve(self.arena.sym(sym).name).to_owned();
        }
        match self.arena.ty(ty).kind {
            TyKind::Primitive(p) => <&'static str>::from(p).to_owned(),
            _ => format!("{ty}"),
        }
    }

    /// The name of a symbol as a `&str`.
    #[must_use]
    pub fn sym_name(&self, sym: SymId) -> &str {
        self.interner.resolve(self.arena.sym(sym).name)
    }

    /// Creates a compiler temp of the given type.
    pub fn new_temp(&mut self, name: &str, ty: TypeId) -> SymId {
        let name = self.interner.intern(name);
        let mut sym = Symbol::new(name, ty, SymKind::Var { immediate: None });
        sym.flags |= Flags::TEMP;
        self.arena.alloc_sym(sym)
    }

    /// Creates (or returns) the reference type of `ty`.
    ///
    /// A reference is a record flagged `REF` with a single `_val` field of
    /// the referred-to type, defined at the tail of the program block.
    pub fn make_ref_type(&mut self, ty: TypeId) -> TypeId {
        if let Some(r) = self.arena.ty(ty).ref_type {
            return r;
        }
        let name = {
            let base = self.type_name(ty);
            self.interner.intern(&format!("_ref_{base}"))
        };
        let ref_ty = self.new_structural_type(name, StructuralTag::Record, Flags::REF);
        self.arena.ty_mut(ref_ty).val_type = Some(ty);
        self.arena.ty_mut(ty).ref_type = Some(ref_ty);
        let val_field = self.new_field(ref_ty, WellKnown::RefVal.id(), ty);
        debug_assert!(self.arena.sym(val_field).def_point.is_some());
        ref_ty
    }

    /// Creates a structural type plus its type symbol, defined at the tail
    /// of the program block.
    pub fn new_structural_type(&mut self, name: NameId, tag: StructuralTag, flags: Flags) -> TypeId {
        let ty = self.arena.alloc_type(Ty::new(TyKind::Primitive(PrimTy::Unknown)));
        let fields = self.arena.alloc_list(ListOwner::Fields(ty));
        let inherits = self.arena.alloc_list(ListOwner::Inherits(ty));
        self.arena.ty_mut(ty).kind = TyKind::Structural(StructData { tag, fields, inherits });
        let mut sym = Symbol::new(name, ty, SymKind::TypeSym);
        sym.flags = flags;
        let sym = self.arena.alloc_sym(sym);
        self.arena.ty_mut(ty).symbol = Some(sym);
        let def = self.arena.alloc_expr(
            ExprKind::Def { sym, init: None, type_expr: None },
            Loc::UNKNOWN,
        );
        let block = self.program_block();
        self.arena.block_push_tail(block, def);
        ty
    }

    /// Appends a field to a structural type, returning the field symbol.
    pub fn new_field(&mut self, ty: TypeId, name: NameId, field_ty: TypeId) -> SymId {
        let sym = self.arena.alloc_sym(Symbol::new(name, field_ty, SymKind::Var { immediate: None }));
        let def = self.arena.alloc_expr(
            ExprKind::Def { sym, init: None, type_expr: None },
            Loc::UNKNOWN,
        );
        let fields = self.arena.struct_data(ty).fields;
        self.arena.push_tail(fields, def);
        sym
    }

    /// True when the type is one of the signed integer builtins.
    #[must_use]
    pub fn is_int_type(&self, ty: TypeId) -> bool {
        self.arena.ty(ty).as_primitive().is_some_and(PrimTy::is_int)
    }

    #[must_use]
    pub fn is_uint_type(&self, ty: TypeId) -> bool {
        self.arena.ty(ty).as_primitive().is_some_and(PrimTy::is_uint)
    }

    #[must_use]
    pub fn is_real_type(&self, ty: TypeId) -> bool {
        self.arena.ty(ty).as_primitive().is_some_and(PrimTy::is_real)
    }

    #[must_use]
    pub fn is_numeric_type(&self, ty: TypeId) -> bool {
        self.arena
            .ty(ty)
            .as_primitive()
            .is_some_and(|p| p.is_int() || p.is_uint() || p.is_real() || p.is_complex() || p == PrimTy::Bool)
    }
}

impl CoreTypes {
    fn install(arena: &mut Arena, interner: &mut Interner, root_block: ExprId) -> Self {
        let mut prim = |arena: &mut Arena, p: PrimTy| -> TypeId {
            let ty = arena.alloc_type(Ty::new(TyKind::Primitive(p)));
            let name = interner.intern(<&'static str>::from(p));
            let sym = arena.alloc_sym(Symbol::new(name, ty, SymKind::TypeSym));
            arena.ty_mut(ty).symbol = Some(sym);
            let def = arena.alloc_expr(
                ExprKind::Def { sym, init: None, type_expr: None },
                Loc::UNKNOWN,
            );
            arena.block_push_tail(root_block, def);
            ty
        };

        let unknown = prim(arena, PrimTy::Unknown);
        let any = prim(arena, PrimTy::Any);
        let void = prim(arena, PrimTy::Void);
        let nil = prim(arena, PrimTy::Nil);
        let bool_ = prim(arena, PrimTy::Bool);
        let int8 = prim(arena, PrimTy::Int8);
        let int16 = prim(arena, PrimTy::Int16);
        let int32 = prim(arena, PrimTy::Int32);
        let int64 = prim(arena, PrimTy::Int64);
        let uint8 = prim(arena, PrimTy::Uint8);
        let uint16 = prim(arena, PrimTy::Uint16);
        let uint32 = prim(arena, PrimTy::Uint32);
        let uint64 = prim(arena, PrimTy::Uint64);
        let real32 = prim(arena, PrimTy::Real32);
        let real64 = prim(arena, PrimTy::Real64);
        let complex64 = prim(arena, PrimTy::Complex64);
        let complex128 = prim(arena, PrimTy::Complex128);
        let string = prim(arena, PrimTy::String);
        let task_list = prim(arena, PrimTy::TaskList);
        let raw_ptr = prim(arena, PrimTy::RawPtr);

        // The root class of the dispatch hierarchy.
        let object = {
            let ty = arena.alloc_type(Ty::new(TyKind::Primitive(PrimTy::Unknown)));
            let fields = arena.alloc_list(ListOwner::Fields(ty));
            let inherits = arena.alloc_list(ListOwner::Inherits(ty));
            arena.ty_mut(ty).kind = TyKind::Structural(StructData {
                tag: StructuralTag::Class,
                fields,
                inherits,
            });
            let name = interner.intern("object");
            let sym = arena.alloc_sym(Symbol::new(name, ty, SymKind::TypeSym));
            arena.ty_mut(ty).symbol = Some(sym);
            let def = arena.alloc_expr(
                ExprKind::Def { sym, init: None, type_expr: None },
                Loc::UNKNOWN,
            );
            arena.block_push_tail(root_block, def);
            ty
        };

        Self {
            unknown,
            any,
            void,
            nil,
            bool_,
            int8,
            int16,
            int32,
            int64,
            uint8,
            uint16,
            uint32,
            uint64,
            real32,
            real64,
            complex64,
            complex128,
            string,
            task_list,
            raw_ptr,
            object,
        }
    }
}

/// Allocates a module symbol and its top-level block.
fn new_module_raw(arena: &mut Arena, name: NameId) -> (SymId, ExprId) {
    let block = arena.alloc_expr(
        ExprKind::Block {
            body: crate::ast::arena::ListId(u32::MAX),
            info: None,
            uses: Vec::new(),
        },
        Loc::UNKNOWN,
    );
    let body = arena.alloc_list(ListOwner::BlockBody(block));
    if let ExprKind::Block { body: slot, .. } = &mut arena.expr_mut(block).kind {
        *slot = body;
    }
    let module = arena.alloc_sym(Symbol::new(
        name,
        crate::ast::arena::TypeId(0),
        SymKind::Module(ModuleData { block, init_fn: None }),
    ));
    arena.adopt(block, None, Some(module));
    (module, block)
}
