//! Construction of normalized AST.
//!
//! The front end (an external collaborator) produces trees through this API;
//! tests use it to stage the literal scenarios the passes are specified
//! against. Construction follows the normalized form the resolver expects:
//! initializers are explicit `move`s, every statement-level call sits in a
//! block, and `return` is the final statement of a function body.

use super::{
    arena::{ExprId, ListOwner, SymId, TypeId},
    expr::{CallData, ExprKind, GotoTag, LabelTarget},
    immediate::Immediate,
    sym::{ArgData, Flags, FnData, Intent, RetTag, SubstVal, SymKind, Symbol, Variadic},
    ty::StructuralTag,
};
use crate::{diag::Loc, intern::NameId, prim::Prim, program::Program};

impl Program {
    // ---- leaves ----

    /// A reference to an already-defined symbol.
    pub fn sym_ref(&mut self, sym: SymId) -> ExprId {
        self.sym_ref_at(sym, Loc::UNKNOWN)
    }

    /// A reference to `sym` carrying a source location.
    pub fn sym_ref_at(&mut self, sym: SymId, loc: Loc) -> ExprId {
        self.arena.alloc_expr(ExprKind::SymRef { sym }, loc)
    }

    /// A not-yet-bound name reference.
    pub fn unresolved(&mut self, name: &str) -> ExprId {
        let name = self.interner.intern(name);
        self.arena.alloc_expr(ExprKind::Unresolved { name }, Loc::UNKNOWN)
    }

    /// The shared literal symbol for an immediate, creating and defining it
    /// in the root module on first use.
    pub fn literal(&mut self, imm: Immediate) -> SymId {
        let key = SubstVal::from_immediate(imm);
        if let Some(&sym) = self.literal_cache.get(&key) {
            return sym;
        }
        let ty = match imm {
            Immediate::Bool(_) => self.core.bool_,
            Immediate::Int(_) => self.core.int64,
            Immediate::Uint(_) => self.core.uint64,
            Immediate::Real(_) => self.core.real64,
            Immediate::String(_) => self.core.string,
        };
        let name = self.interner.intern(&format!("_literal_{}", self.literal_cache.len()));
        let mut sym = Symbol::new(name, ty, SymKind::Var { immediate: Some(imm) });
        sym.flags |= Flags::CONST | Flags::PARAM;
        let sym = self.arena.alloc_sym(sym);
        let def = self.arena.alloc_expr(
            ExprKind::Def { sym, init: None, type_expr: None },
            Loc::UNKNOWN,
        );
        let root_block = self.arena.module_data(self.root_module).block;
        self.arena.block_push_tail(root_block, def);
        self.literal_cache.insert(key, sym);
        sym
    }

    /// A symbol reference to the shared literal for `value`.
    pub fn int_lit(&mut self, value: i64) -> ExprId {
        let sym = self.literal(Immediate::Int(value));
        self.sym_ref(sym)
    }

    pub fn bool_lit(&mut self, value: bool) -> ExprId {
        let sym = self.literal(Immediate::Bool(value));
        self.sym_ref(sym)
    }

    pub fn real_lit(&mut self, value: f64) -> ExprId {
        let sym = self.literal(Immediate::Real(value));
        self.sym_ref(sym)
    }

    pub fn string_lit(&mut self, value: &str) -> ExprId {
        let name = self.interner.intern(value);
        let sym = self.literal(Immediate::String(name));
        self.sym_ref(sym)
    }

    // ---- calls ----

    fn call_raw(
        &mut self,
        prim: Option<Prim>,
        base: Option<ExprId>,
        actuals: Vec<ExprId>,
        loc: Loc,
    ) -> ExprId {
        let call = self.arena.alloc_expr(
            ExprKind::Call(CallData {
                prim,
                base: None,
                actuals: super::arena::ListId(u32::MAX),
                partial: false,
                method_tag: false,
                square: false,
            }),
            loc,
        );
        let list = self.arena.alloc_list(ListOwner::CallActuals(call));
        self.arena.call_mut(call).actuals = list;
        for actual in actuals {
            // The call is detached; link members without in-tree adoption.
            self.arena.push_tail(list, actual);
        }
        if let Some(base) = base {
            self.arena.call_mut(call).base = Some(base);
            self.arena.adopt(base, Some(call), None);
        }
        call
    }

    /// A primitive call.
    pub fn prim_call(&mut self, prim: Prim, actuals: Vec<ExprId>) -> ExprId {
        self.call_raw(Some(prim), None, actuals, Loc::UNKNOWN)
    }

    /// A named (unresolved) call.
    pub fn named_call(&mut self, name: &str, actuals: Vec<ExprId>) -> ExprId {
        self.named_call_at(name, actuals, Loc::UNKNOWN)
    }

    /// A named call carrying a source location.
    pub fn named_call_at(&mut self, name: &str, actuals: Vec<ExprId>, loc: Loc) -> ExprId {
        let base = {
            let name = self.interner.intern(name);
            self.arena.alloc_expr(ExprKind::Unresolved { name }, loc)
        };
        self.call_raw(None, Some(base), actuals, loc)
    }

    /// A call whose base is already bound to a function symbol.
    pub fn fn_call(&mut self, func: SymId, actuals: Vec<ExprId>) -> ExprId {
        let base = self.sym_ref(func);
        self.call_raw(None, Some(base), actuals, Loc::UNKNOWN)
    }

    /// A keyword-style actual.
    pub fn named_actual(&mut self, name: &str, actual: ExprId) -> ExprId {
        let name = self.interner.intern(name);
        let wrapper = self.arena.alloc_expr(ExprKind::NamedActual { name, actual }, Loc::UNKNOWN);
        self.arena.adopt(actual, Some(wrapper), None);
        wrapper
    }

    /// `move(dst, src)` with `dst` a symbol.
    pub fn move_to(&mut self, dst: SymId, src: ExprId) -> ExprId {
        let dst = self.sym_ref(dst);
        self.prim_call(Prim::Move, vec![dst, src])
    }

    /// The final `return` of a function body.
    pub fn ret(&mut self, value: ExprId) -> ExprId {
        self.prim_call(Prim::Return, vec![value])
    }

    /// A `return void`.
    pub fn ret_void(&mut self) -> ExprId {
        let void_sym = self.void_sym();
        let void = self.sym_ref(void_sym);
        self.prim_call(Prim::Return, vec![void])
    }

    /// The shared `void` value symbol.
    pub fn void_sym(&mut self) -> SymId {
        if let Some(sym) = self.void_value {
            return sym;
        }
        let name = self.interner.intern("_void");
        let mut sym = Symbol::new(name, self.core.void, SymKind::Var { immediate: None });
        sym.flags |= Flags::CONST;
        let sym = self.arena.alloc_sym(sym);
        let def = self.arena.alloc_expr(
            ExprKind::Def { sym, init: None, type_expr: None },
            Loc::UNKNOWN,
        );
        let root_block = self.arena.module_data(self.root_module).block;
        self.arena.block_push_tail(root_block, def);
        self.void_value = Some(sym);
        sym
    }

    // ---- statements ----

    /// An empty block.
    pub fn block(&mut self) -> ExprId {
        let b = self.arena.alloc_expr(
            ExprKind::Block {
                body: super::arena::ListId(u32::MAX),
                info: None,
                uses: Vec::new(),
            },
            Loc::UNKNOWN,
        );
        let body = self.arena.alloc_list(ListOwner::BlockBody(b));
        if let ExprKind::Block { body: slot, .. } = &mut self.arena.expr_mut(b).kind {
            *slot = body;
        }
        b
    }

    /// A block with the given statements.
    pub fn block_of(&mut self, stmts: Vec<ExprId>) -> ExprId {
        let b = self.block();
        for stmt in stmts {
            self.arena.block_push_tail(b, stmt);
        }
        b
    }

    /// Tags a block with a block-info primitive call (loop or construct
    /// marker).
    pub fn set_block_info(&mut self, block: ExprId, info: ExprId) {
        self.arena.adopt(info, Some(block), self.arena.expr(block).parent_sym);
        if let ExprKind::Block { info: slot, .. } = &mut self.arena.expr_mut(block).kind {
            *slot = Some(info);
        } else {
            panic!("{block}: block info on a non-block");
        }
    }

    /// Records a `use` of a module inside a block.
    pub fn add_use(&mut self, block: ExprId, module: SymId) {
        if let ExprKind::Block { uses, .. } = &mut self.arena.expr_mut(block).kind {
            uses.push(module);
        } else {
            panic!("{block}: use on a non-block");
        }
    }

    /// A conditional statement.
    pub fn cond(&mut self, cond: ExprId, then_block: ExprId, else_block: Option<ExprId>) -> ExprId {
        let e = self.arena.alloc_expr(
            ExprKind::Cond { cond, then_block, else_block },
            Loc::UNKNOWN,
        );
        self.arena.adopt(cond, Some(e), None);
        self.arena.adopt(then_block, Some(e), None);
        if let Some(else_block) = else_block {
            self.arena.adopt(else_block, Some(e), None);
        }
        e
    }

    /// A goto with a bound label.
    pub fn goto(&mut self, tag: GotoTag, label: SymId) -> ExprId {
        self.arena.alloc_expr(
            ExprKind::Goto { tag, label: LabelTarget::Sym(label) },
            Loc::UNKNOWN,
        )
    }

    // ---- definitions ----

    /// Defines a variable, returning `(symbol, def)`. The def is not yet
    /// inserted anywhere.
    pub fn new_var(&mut self, name: &str, ty: TypeId, flags: Flags) -> (SymId, ExprId) {
        let name = self.interner.intern(name);
        let mut sym = Symbol::new(name, ty, SymKind::Var { immediate: None });
        sym.flags = flags;
        let sym = self.arena.alloc_sym(sym);
        let def = self.arena.alloc_expr(
            ExprKind::Def { sym, init: None, type_expr: None },
            Loc::UNKNOWN,
        );
        (sym, def)
    }

    /// Defines a `param` variable with a known immediate.
    pub fn new_param_var(&mut self, name: &str, imm: Immediate) -> (SymId, ExprId) {
        let ty = match imm {
            Immediate::Bool(_) => self.core.bool_,
            Immediate::Int(_) => self.core.int64,
            Immediate::Uint(_) => self.core.uint64,
            Immediate::Real(_) => self.core.real64,
            Immediate::String(_) => self.core.string,
        };
        let name = self.interner.intern(name);
        let mut sym = Symbol::new(name, ty, SymKind::Var { immediate: None });
        sym.flags |= Flags::PARAM;
        let sym = self.arena.alloc_sym(sym);
        let def = self.arena.alloc_expr(
            ExprKind::Def { sym, init: None, type_expr: None },
            Loc::UNKNOWN,
        );
        (sym, def)
    }

    /// A def wrapping an existing symbol.
    pub fn def_of(&mut self, sym: SymId) -> ExprId {
        self.arena.alloc_expr(
            ExprKind::Def { sym, init: None, type_expr: None },
            Loc::UNKNOWN,
        )
    }

    // ---- functions ----

    /// Creates a function symbol with an empty formals list and empty body.
    pub fn new_fn(&mut self, name: &str, ret_type: TypeId, ret_tag: RetTag) -> SymId {
        let name = self.interner.intern(name);
        self.new_fn_named(name, ret_type, ret_tag)
    }

    /// [`Program::new_fn`] with an already-interned name.
    pub fn new_fn_named(&mut self, name: NameId, ret_type: TypeId, ret_tag: RetTag) -> SymId {
        let body = self.block();
        let sym = self.arena.alloc_sym(Symbol::new(
            name,
            self.core.unknown,
            SymKind::Fn(FnData {
                formals: super::arena::ListId(u32::MAX),
                body,
                ret_type,
                ret_tag,
                where_clause: None,
                instantiated_from: None,
                instantiation_point: None,
                substitutions: Vec::new(),
                called_by: Vec::new(),
            }),
        ));
        let formals = self.arena.alloc_list(ListOwner::Formals(sym));
        self.arena.fn_data_mut(sym).formals = formals;
        self.arena.adopt(body, None, Some(sym));
        sym
    }

    /// Appends a formal to a function, returning the formal symbol.
    pub fn add_formal(&mut self, func: SymId, name: &str, ty: TypeId, intent: Intent) -> SymId {
        let name = self.interner.intern(name);
        let sym = self.arena.alloc_sym(Symbol::new(
            name,
            ty,
            SymKind::Arg(ArgData {
                intent,
                variadic: None,
                instantiated_param: false,
                instantiated_from_any: false,
                instantiated_from: None,
            }),
        ));
        let def = self.arena.alloc_expr(
            ExprKind::Def { sym, init: None, type_expr: None },
            Loc::UNKNOWN,
        );
        let formals = self.arena.fn_data(func).formals;
        self.arena.push_tail(formals, def);
        sym
    }

    /// Appends a variadic formal.
    pub fn add_variadic_formal(&mut self, func: SymId, name: &str, variadic: Variadic) -> SymId {
        let formal = self.add_formal(func, name, self.core.any, Intent::Blank);
        self.arena.arg_data_mut(formal).variadic = Some(variadic);
        self.arena.sym_mut(func).flags |= Flags::GENERIC;
        formal
    }

    /// Sets the default expression of a formal (stored in its def's init
    /// slot, as normalization leaves it).
    pub fn set_formal_default(&mut self, formal: SymId, default: ExprId) {
        let def = self.arena.sym(formal).def_point.expect("formal without def");
        self.arena.adopt(default, Some(def), self.arena.expr(def).parent_sym);
        if let ExprKind::Def { init, .. } = &mut self.arena.expr_mut(def).kind {
            *init = Some(default);
        }
    }

    /// Appends a statement to a function's body.
    pub fn fn_push(&mut self, func: SymId, stmt: ExprId) {
        let body = self.arena.fn_data(func).body;
        self.arena.block_push_tail(body, stmt);
    }

    /// Defines `func` at the tail of a module's block.
    pub fn insert_fn_in_module(&mut self, func: SymId, module: SymId) -> ExprId {
        let def = self.def_of(func);
        let block = self.arena.module_data(module).block;
        self.arena.block_push_tail(block, def);
        def
    }

    /// Defines `func` at the tail of the `_Program` block (where synthesized
    /// functions land).
    pub fn insert_fn_at_program(&mut self, func: SymId) -> ExprId {
        let def = self.def_of(func);
        let block = self.program_block();
        self.arena.block_push_tail(block, def);
        def
    }

    // ---- types ----

    /// Creates a named class type with no parents beyond `object`.
    pub fn new_class(&mut self, name: &str) -> TypeId {
        let name = self.interner.intern(name);
        let ty = self.new_structural_type(name, StructuralTag::Class, Flags::empty());
        let object = self.core.object;
        self.arena.ty_mut(ty).dispatch_parents.push(object);
        self.arena.ty_mut(object).dispatch_children.push(ty);
        ty
    }

    /// Creates a named record type.
    pub fn new_record(&mut self, name: &str) -> TypeId {
        let name = self.interner.intern(name);
        self.new_structural_type(name, StructuralTag::Record, Flags::empty())
    }

    /// Creates an array type over `elem`: a record flagged `ARRAY` whose
    /// scalar-promotion type is the element type, wrapping a raw data class.
    pub fn new_array_type(&mut self, name: &str, elem: TypeId) -> TypeId {
        let data_name = self.interner.intern(&format!("_data_{name}"));
        let data = self.new_structural_type(data_name, StructuralTag::Class, Flags::DATA_CLASS | Flags::NO_OBJECT);
        self.arena.ty_mut(data).scalar_promotion = Some(elem);

        let name = self.interner.intern(name);
        let ty = self.new_structural_type(name, StructuralTag::Record, Flags::ARRAY);
        let data_field = self.interner.intern("_data");
        self.new_field(ty, data_field, data);
        let size_field = self.interner.intern("_size");
        self.new_field(ty, size_field, self.core.int64);
        self.arena.ty_mut(ty).scalar_promotion = Some(elem);
        ty
    }

    /// Declares a subclass relationship after both types exist.
    pub fn add_dispatch_parent(&mut self, child: TypeId, parent: TypeId) {
        self.arena.ty_mut(child).dispatch_parents.push(parent);
        self.arena.ty_mut(parent).dispatch_children.push(child);
    }
}
