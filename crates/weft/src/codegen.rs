//! The C emitter: a mechanical walk of fully lowered IR producing the
//! runtime-facing file set.
//!
//! The layout is a stable contract with the runtime: `chpl__header.h` holds
//! the class-id enum, type prototypes, record definitions in topological
//! order, class definitions in breadth-first dispatch order, function
//! prototypes, the task-wrapper function table, the two-dimensional virtual
//! method table, globals, and the private-broadcast table; one `<module>.c`
//! per module; `_main.c` pulling everything together; `_config.c` installing
//! configuration constants; `_type_structure.c` (heterogeneous targets only)
//! describing field layouts.

use std::fmt::Write;

use indexmap::IndexMap;

use crate::{
    ast::{
        arena::{ExprId, SymId, TypeId},
        expr::{ExprKind, GotoTag},
        immediate::Immediate,
        sym::{Flags, SymKind},
        ty::{PrimTy, StructuralTag, TyKind},
    },
    prim::Prim,
    program::Program,
    resolve::dispatch::VirtualInfo,
};

/// The emitted file set, in the runtime's expected layout.
#[derive(Debug)]
pub struct GeneratedFiles {
    /// `chpl__header.h`
    pub header: String,
    /// `<module>.c`, one per module (synthesized code lands in `_Program.c`).
    pub modules: Vec<(String, String)>,
    /// `_main.c`
    pub main: String,
    /// `_config.c`
    pub config: String,
    /// `_type_structure.c`, present under heterogeneous configuration.
    pub type_structure: Option<String>,
}

/// Emits the whole program.
#[must_use]
pub fn codegen(prog: &Program, virt: &VirtualInfo) -> GeneratedFiles {
    let cg = Codegen::new(prog, virt);
    let header = cg.emit_header();
    let mut modules = Vec::new();
    for &module in &prog.modules {
        let name = prog.sym_name(module).to_owned();
        modules.push((format!("{name}.c"), cg.emit_module(module)));
    }
    modules.push(("_Program.c".to_owned(), cg.emit_module(prog.program_module)));
    let main = cg.emit_main(&modules);
    let config = cg.emit_config();
    let type_structure = prog.config.heterogeneous.then(|| cg.emit_type_structure());
    GeneratedFiles {
        header,
        modules,
        main,
        config,
        type_structure,
    }
}

struct Codegen<'p> {
    prog: &'p Program,
    virt: &'p VirtualInfo,
    /// Class-id order: breadth-first over the dispatch hierarchy.
    class_ids: IndexMap<TypeId, usize>,
    /// Task/on wrapper functions, indexed by the fork primitives.
    ftable: Vec<SymId>,
}

impl<'p> Codegen<'p> {
    fn new(prog: &'p Program, virt: &'p VirtualInfo) -> Self {
        let mut class_ids = IndexMap::new();
        let mut queue = vec![prog.core.object];
        while let Some(ty) = queue.pop() {
            if prog.arena.ty_has_flag(ty, Flags::NO_OBJECT) {
                continue;
            }
            if class_ids.insert(ty, class_ids.len()).is_none() {
                for &child in &prog.arena.ty(ty).dispatch_children {
                    queue.insert(0, child);
                }
            }
        }
        let ftable: Vec<SymId> = prog
            .arena
            .all_fns()
            .into_iter()
            .filter(|&f| {
                let flags = prog.arena.sym(f).flags;
                flags.contains(Flags::BEGIN_BLOCK)
                    || flags.contains(Flags::COBEGIN_OR_COFORALL_BLOCK)
                    || flags.contains(Flags::ON_BLOCK)
            })
            .collect();
        Self {
            prog,
            virt,
            class_ids,
            ftable,
        }
    }

    // ---- names ----

    fn sym_cname(&self, sym: SymId) -> String {
        let node = self.prog.arena.sym(sym);
        let base = self.prog.interner.resolve(node.cname);
        match node.kind {
            SymKind::Fn(_) | SymKind::TypeSym | SymKind::Module(_) | SymKind::EnumConst { .. } => {
                sanitize(base)
            }
            _ => format!("{}_{}", sanitize(base), sym.index()),
        }
    }

    fn type_cname(&self, ty: TypeId) -> String {
        let node = self.prog.arena.ty(ty);
        match node.symbol {
            Some(sym) => format!("_{}", sanitize(self.prog.interner.resolve(self.prog.arena.sym(sym).cname))),
            None => format!("_t{}", ty.index()),
        }
    }

    /// The C type a value of `ty` occupies: classes are pointers to their
    /// struct, records are the struct itself.
    fn value_c_type(&self, ty: TypeId) -> String {
        let node = self.prog.arena.ty(ty);
        match &node.kind {
            TyKind::Primitive(p) => primitive_c_type(*p).to_owned(),
            TyKind::Enum { .. } => self.type_cname(ty),
            TyKind::Structural(data) => match data.tag {
                StructuralTag::Class => format!("{}*", self.type_cname(ty)),
                StructuralTag::Record | StructuralTag::Union => self.type_cname(ty),
            },
        }
    }

    // ---- header ----

    fn emit_header(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "/* chpl__header.h */");
        let _ = writeln!(out, "#include \"chplrt.h\"");
        let _ = writeln!(out);

        // Class-id enum.
        let _ = writeln!(out, "typedef enum {{");
        for (&ty, _) in &self.class_ids {
            let _ = writeln!(out, "  chpl__cid{},", self.type_cname(ty));
        }
        let _ = writeln!(out, "  chpl__cidCount");
        let _ = writeln!(out, "}} chpl__class_id;");
        let _ = writeln!(out);

        // Type prototypes.
        for ty in self.structural_types() {
            let _ = writeln!(out, "typedef struct __{0} {0};", self.type_cname(ty));
        }
        let _ = writeln!(out);

        // Records in topological order, then classes breadth-first.
        for ty in self.records_in_topo_order() {
            self.emit_struct(&mut out, ty, false);
        }
        for (&ty, _) in &self.class_ids {
            if ty == self.prog.core.object {
                self.emit_object_struct(&mut out);
            } else {
                self.emit_struct(&mut out, ty, true);
            }
        }
        // Classes outside the dispatch hierarchy (bundles, heap wrappers).
        for ty in self.structural_types() {
            if self.prog.arena.is_class_like(ty) && !self.class_ids.contains_key(&ty) {
                self.emit_struct(&mut out, ty, false);
            }
        }
        let _ = writeln!(out);

        // Function prototypes.
        for func in self.live_fns() {
            let _ = writeln!(out, "{};", self.fn_signature(func));
        }
        let _ = writeln!(out);

        // Task-wrapper function table.
        let _ = writeln!(out, "chpl_fn_p chpl_ftable[] = {{");
        for &func in &self.ftable {
            let _ = writeln!(out, "  (chpl_fn_p){},", self.sym_cname(func));
        }
        let _ = writeln!(out, "  (chpl_fn_p)0");
        let _ = writeln!(out, "}};");
        let _ = writeln!(out);

        // Two-dimensional virtual-method table.
        let _ = writeln!(
            out,
            "chpl_fn_p chpl_vmtable[{}][{}] = {{",
            self.class_ids.len().max(1),
            self.virt.roots.len().max(1)
        );
        for (&class, _) in &self.class_ids {
            let mut row = Vec::new();
            for &root in &self.virt.roots {
                match self.virt.entry(class, root) {
                    Some(entry) => row.push(format!("(chpl_fn_p){}", self.sym_cname(entry))),
                    None => row.push("(chpl_fn_p)0".to_owned()),
                }
            }
            if row.is_empty() {
                row.push("(chpl_fn_p)0".to_owned());
            }
            let _ = writeln!(out, "  {{ {} }},", row.join(", "));
        }
        if self.class_ids.is_empty() {
            let _ = writeln!(out, "  {{ (chpl_fn_p)0 }},");
        }
        let _ = writeln!(out, "}};");
        let _ = writeln!(out);

        // Globals.
        for (var, _) in self.globals() {
            let ty = self.prog.arena.sym(var).ty;
            let _ = writeln!(out, "{} {};", self.value_c_type(ty), self.sym_cname(var));
        }
        let _ = writeln!(out);

        // Private-broadcast table: one slot per broadcast global.
        let _ = writeln!(out, "void* chpl_private_broadcast_table[] = {{");
        for (var, broadcast) in self.globals() {
            if broadcast {
                let _ = writeln!(out, "  &{},", self.sym_cname(var));
            }
        }
        let _ = writeln!(out, "  (void*)0");
        let _ = writeln!(out, "}};");
        out
    }

    fn structural_types(&self) -> Vec<TypeId> {
        self.prog
            .arena
            .type_ids()
            .filter(|&t| self.prog.arena.is_structural(t) && self.type_is_live(t))
            .collect()
    }

    fn type_is_live(&self, ty: TypeId) -> bool {
        match self.prog.arena.ty(ty).symbol {
            Some(sym) => !matches!(self.prog.arena.sym(sym).kind, SymKind::Removed),
            None => true,
        }
    }

    /// Record-family types ordered so that a record appears after every
    /// record embedded in its fields.
    fn records_in_topo_order(&self) -> Vec<TypeId> {
        let records: Vec<TypeId> = self
            .structural_types()
            .into_iter()
            .filter(|&t| self.prog.arena.is_record_like(t))
            .collect();
        let mut ordered = Vec::new();
        let mut visiting = Vec::new();
        for &ty in &records {
            self.topo_visit(ty, &records, &mut ordered, &mut visiting);
        }
        ordered
    }

    fn topo_visit(&self, ty: TypeId, records: &[TypeId], ordered: &mut Vec<TypeId>, visiting: &mut Vec<TypeId>) {
        if ordered.contains(&ty) || visiting.contains(&ty) {
            return;
        }
        visiting.push(ty);
        for field in self.prog.arena.fields(ty) {
            let field_ty = self.prog.arena.sym(field).ty;
            if records.contains(&field_ty) {
                self.topo_visit(field_ty, records, ordered, visiting);
            }
        }
        visiting.pop();
        ordered.push(ty);
    }

    fn emit_struct(&self, out: &mut String, ty: TypeId, with_cid: bool) {
        let _ = writeln!(out, "struct __{} {{", self.type_cname(ty));
        if with_cid {
            let _ = writeln!(out, "  chpl__class_id chpl__cid;");
        }
        for field in self.prog.arena.fields(ty) {
            let node = self.prog.arena.sym(field);
            if node.flags.contains(Flags::TYPE_VARIABLE) {
                continue;
            }
            let _ = writeln!(
                out,
                "  {} {};",
                self.value_c_type(node.ty),
                sanitize(self.prog.interner.resolve(node.name))
            );
        }
        if self.prog.arena.fields(ty).is_empty() && !with_cid {
            let _ = writeln!(out, "  int _emptyStructPlaceholder;");
        }
        let _ = writeln!(out, "}};");
    }

    fn emit_object_struct(&self, out: &mut String) {
        let _ = writeln!(out, "struct __{} {{", self.type_cname(self.prog.core.object));
        let _ = writeln!(out, "  chpl__class_id chpl__cid;");
        let _ = writeln!(out, "}};");
    }

    fn live_fns(&self) -> Vec<SymId> {
        self.prog
            .arena
            .all_fns()
            .into_iter()
            .filter(|&f| {
                let node = self.prog.arena.sym(f);
                node.def_point
                    .is_some_and(|d| self.prog.arena.expr(d).in_tree())
                    && !node.flags.contains(Flags::EXTERN)
                    && !node.flags.contains(Flags::GENERIC)
            })
            .collect()
    }

    /// Module-level variables; the bool marks replicated constants that
    /// enter the private-broadcast table.
    fn globals(&self) -> Vec<(SymId, bool)> {
        let mut out = Vec::new();
        for &module in self.prog.modules.iter().chain([&self.prog.program_module]) {
            let block = self.prog.arena.module_data(module).block;
            for stmt in self.prog.arena.items(self.prog.arena.block_body(block)) {
                if let ExprKind::Def { sym, .. } = self.prog.arena.expr(stmt).kind {
                    let node = self.prog.arena.sym(sym);
                    if matches!(node.kind, SymKind::Var { .. }) && node.immediate().is_none() {
                        let broadcast = node.flags.contains(Flags::CONST)
                            && self.prog.is_numeric_type(node.ty)
                            && !self.prog.config.local;
                        out.push((sym, broadcast));
                    }
                }
            }
        }
        out
    }

    fn fn_signature(&self, func: SymId) -> String {
        let data = self.prog.arena.fn_data(func);
        let ret = if data.ret_type == self.prog.core.void || data.ret_type == self.prog.core.unknown {
            "void".to_owned()
        } else {
            self.value_c_type(data.ret_type)
        };
        let formals: Vec<String> = self
            .prog
            .arena
            .formals(func)
            .into_iter()
            .map(|f| format!("{} {}", self.value_c_type(self.prog.arena.sym(f).ty), self.sym_cname(f)))
            .collect();
        let formals = if formals.is_empty() {
            "void".to_owned()
        } else {
            formals.join(", ")
        };
        format!("{ret} {}({formals})", self.sym_cname(func))
    }

    // ---- module files ----

    fn emit_module(&self, module: SymId) -> String {
        let mut out = String::new();
        let name = self.prog.sym_name(module);
        let _ = writeln!(out, "/* {name}.c */");
        let _ = writeln!(out, "#include \"chpl__header.h\"");
        let _ = writeln!(out);

        let block = self.prog.arena.module_data(module).block;
        // Module initialization: the non-definition top-level statements.
        let _ = writeln!(out, "void chpl__init_{}(void) {{", sanitize(name));
        for stmt in self.prog.arena.items(self.prog.arena.block_body(block)) {
            if !matches!(self.prog.arena.expr(stmt).kind, ExprKind::Def { .. }) {
                self.emit_stmt(&mut out, stmt, 1);
            }
        }
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);

        for stmt in self.prog.arena.items(self.prog.arena.block_body(block)) {
            if let ExprKind::Def { sym, .. } = self.prog.arena.expr(stmt).kind {
                if self.prog.arena.sym(sym).is_fn() && self.live_fns().contains(&sym) {
                    self.emit_fn(&mut out, sym);
                }
            }
        }
        out
    }

    fn emit_fn(&self, out: &mut String, func: SymId) {
        let _ = writeln!(out, "{} {{", self.fn_signature(func));
        let body = self.prog.arena.fn_data(func).body;
        for stmt in self.prog.arena.items(self.prog.arena.block_body(body)) {
            self.emit_stmt(out, stmt, 1);
        }
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);
    }

    // ---- statements ----

    fn emit_stmt(&self, out: &mut String, stmt: ExprId, depth: usize) {
        let pad = "  ".repeat(depth);
        match &self.prog.arena.expr(stmt).kind {
            ExprKind::Def { sym, .. } => {
                let node = self.prog.arena.sym(*sym);
                match node.kind {
                    SymKind::Var { .. } if node.immediate().is_none() => {
                        let _ = writeln!(out, "{pad}{} {};", self.value_c_type(node.ty), self.sym_cname(*sym));
                    }
                    _ => {}
                }
            }
            ExprKind::Block { body, info, .. } => {
                match info.and_then(|i| self.prog.arena.call(i).prim) {
                    Some(Prim::BlockWhileDo) => {
                        let cond = self.prog.arena.actual(info.unwrap(), 0);
                        let _ = writeln!(out, "{pad}while ({}) {{", self.expr_text(cond));
                    }
                    Some(Prim::BlockDoWhile) => {
                        let _ = writeln!(out, "{pad}do {{");
                    }
                    Some(Prim::BlockForLoop) => {
                        let index = self.prog.arena.actual(info.unwrap(), 0);
                        let aggregate = self.prog.arena.actual(info.unwrap(), 1);
                        let i = self.expr_text(index);
                        let _ = writeln!(
                            out,
                            "{pad}for ({i} = 1; {i} <= ({})._size; {i}++) {{",
                            self.expr_text(aggregate)
                        );
                    }
                    _ => {
                        let _ = writeln!(out, "{pad}{{");
                    }
                }
                for inner in self.prog.arena.items(*body) {
                    self.emit_stmt(out, inner, depth + 1);
                }
                match info.and_then(|i| self.prog.arena.call(i).prim) {
                    Some(Prim::BlockDoWhile) => {
                        let cond = self.prog.arena.actual(info.unwrap(), 0);
                        let _ = writeln!(out, "{pad}}} while ({});", self.expr_text(cond));
                    }
                    _ => {
                        let _ = writeln!(out, "{pad}}}");
                    }
                }
            }
            ExprKind::Cond { cond, then_block, else_block } => {
                let _ = writeln!(out, "{pad}if ({}) {{", self.expr_text(*cond));
                self.emit_block_items(out, *then_block, depth + 1);
                match else_block {
                    Some(else_block) => {
                        let _ = writeln!(out, "{pad}}} else {{");
                        self.emit_block_items(out, *else_block, depth + 1);
                        let _ = writeln!(out, "{pad}}}");
                    }
                    None => {
                        let _ = writeln!(out, "{pad}}}");
                    }
                }
            }
            ExprKind::Goto { tag, label } => {
                let text = match tag {
                    GotoTag::Break => "break;".to_owned(),
                    GotoTag::Continue => "continue;".to_owned(),
                    GotoTag::Return => "return;".to_owned(),
                    GotoTag::Normal => match label {
                        crate::ast::expr::LabelTarget::Sym(sym) => {
                            format!("goto {};", self.sym_cname(*sym))
                        }
                        crate::ast::expr::LabelTarget::Unresolved(_) => "goto _unresolved;".to_owned(),
                    },
                };
                let _ = writeln!(out, "{pad}{text}");
            }
            ExprKind::Call(_) => {
                if let Some(text) = self.stmt_call_text(stmt) {
                    let _ = writeln!(out, "{pad}{text}");
                }
            }
            _ => {
                let _ = writeln!(out, "{pad}{};", self.expr_text(stmt));
            }
        }
    }

    fn emit_block_items(&self, out: &mut String, block: ExprId, depth: usize) {
        for inner in self.prog.arena.items(self.prog.arena.block_body(block)) {
            self.emit_stmt(out, inner, depth);
        }
    }

    /// Statement-position calls; `None` suppresses the statement.
    fn stmt_call_text(&self, call: ExprId) -> Option<String> {
        let prim = self.prog.arena.call(call).prim;
        let actuals = self.prog.arena.actuals(call);
        let loc = self.prog.arena.expr(call).loc;
        let text = match prim {
            Some(Prim::Noop) => return None,
            Some(Prim::Move) => {
                let [dst, src] = actuals[..] else { return None };
                format!("{} = {};", self.expr_text(dst), self.expr_text(src))
            }
            Some(Prim::Return) => {
                let value = actuals.first().copied();
                match value {
                    Some(v) if self.prog.expr_type(v) != self.prog.core.void => {
                        format!("return {};", self.expr_text(v))
                    }
                    _ => "return;".to_owned(),
                }
            }
            Some(Prim::Yield) => {
                let v = actuals.first().copied()?;
                format!("CHPL_YIELD({});", self.expr_text(v))
            }
            Some(Prim::SetMember) => {
                let [obj, fld, val] = actuals[..] else { return None };
                format!(
                    "{} = {};",
                    self.member_lvalue(obj, fld),
                    self.expr_text(val)
                )
            }
            Some(Prim::WidePut) => {
                let [obj, fld, val] = actuals[..] else { return None };
                format!(
                    "CHPL_WIDE_PUT({}, {}, {});",
                    self.expr_text(obj),
                    self.field_text(fld),
                    self.expr_text(val)
                )
            }
            Some(Prim::LocalCheck) => {
                let v = actuals.first().copied()?;
                format!("CHPL_LOCAL_CHECK({}, {});", self.expr_text(v), loc.line)
            }
            Some(Prim::SetCid) => {
                let obj = actuals.first().copied()?;
                let ty = self.prog.arena.value_type(self.prog.expr_val_type(obj));
                format!(
                    "({})->chpl__cid = chpl__cid{};",
                    self.expr_text(obj),
                    self.type_cname(ty)
                )
            }
            Some(Prim::ChplFree) => {
                let v = actuals.first().copied()?;
                format!("CHPL_FREE({}, {});", self.expr_text(v), loc.line)
            }
            Some(Prim::TaskListAddBegin) => {
                let [wrapper, bundle] = actuals[..] else { return None };
                let fid = self.ftable_index(wrapper);
                format!(
                    "chpl_task_list_add_begin({fid}, (void*){}, {});",
                    self.expr_text(bundle),
                    loc.line
                )
            }
            Some(Prim::TaskListAddCoStmt) => {
                let [wrapper, bundle] = actuals[..] else { return None };
                let fid = self.ftable_index(wrapper);
                format!(
                    "chpl_task_list_add_costmt({fid}, (void*){}, {});",
                    self.expr_text(bundle),
                    loc.line
                )
            }
            Some(Prim::OnFork | Prim::OnForkNb) => {
                let [locale, wrapper, bundle] = actuals[..] else { return None };
                let fid = self.ftable_index(wrapper);
                let entry = if prim == Some(Prim::OnForkNb) {
                    "chpl_comm_fork_nb"
                } else {
                    "chpl_comm_fork"
                };
                format!(
                    "{entry}({}, {fid}, (void*){}, {});",
                    self.expr_text(locale),
                    self.expr_text(bundle),
                    loc.line
                )
            }
            Some(Prim::GpuKernelLaunch) => {
                let texts: Vec<String> = actuals.iter().skip(1).map(|&a| self.expr_text(a)).collect();
                let wrapper = actuals.first().copied()?;
                format!(
                    "chpl_gpu_kernel_launch({}, {});",
                    self.sym_cname(self.prog.arena.sym_ref(wrapper).unwrap_or(SymId(0))),
                    texts.join(", ")
                )
            }
            Some(_) | None => format!("{};", self.expr_text(call)),
        };
        Some(text)
    }

    fn ftable_index(&self, wrapper_ref: ExprId) -> usize {
        self.prog
            .arena
            .sym_ref(wrapper_ref)
            .and_then(|sym| self.ftable.iter().position(|&f| f == sym))
            .unwrap_or(0)
    }

    // ---- expressions ----

    fn expr_text(&self, e: ExprId) -> String {
        match &self.prog.arena.expr(e).kind {
            ExprKind::SymRef { sym } => {
                let node = self.prog.arena.sym(*sym);
                match node.immediate() {
                    Some(imm) => self.immediate_text(imm),
                    None => self.sym_cname(*sym),
                }
            }
            ExprKind::Unresolved { name } => sanitize(self.prog.interner.resolve(*name)),
            ExprKind::NamedActual { actual, .. } => self.expr_text(*actual),
            ExprKind::Call(_) => self.call_text(e),
            other => format!("/* {other:?} */0"),
        }
    }

    fn call_text(&self, call: ExprId) -> String {
        let actuals = self.prog.arena.actuals(call);
        let texts: Vec<String> = actuals.iter().map(|&a| self.expr_text(a)).collect();
        let Some(prim) = self.prog.arena.call(call).prim else {
            // Direct call.
            let callee = self
                .prog
                .arena
                .resolved_callee(call)
                .map_or_else(|| "/*unresolved*/0".to_owned(), |f| self.sym_cname(f));
            return format!("{callee}({})", texts.join(", "));
        };
        match prim {
            Prim::Add | Prim::Sub | Prim::Mul | Prim::Div | Prim::Mod | Prim::Lsh | Prim::Rsh
            | Prim::BitAnd | Prim::BitOr | Prim::BitXor | Prim::LogAnd | Prim::LogOr | Prim::Eq
            | Prim::Ne | Prim::Lt | Prim::Le | Prim::Gt | Prim::Ge => {
                format!("({} {} {})", texts[0], prim.name(), texts[1])
            }
            Prim::Pow => format!("chpl_pow({}, {})", texts[0], texts[1]),
            Prim::Neg => format!("(-{})", texts[0]),
            Prim::Plus => format!("(+{})", texts[0]),
            Prim::LogNot => format!("(!{})", texts[0]),
            Prim::BitNot => format!("(~{})", texts[0]),
            Prim::GetMemberValue => {
                let [obj, fld] = actuals[..] else { return "0".to_owned() };
                self.member_lvalue(obj, fld)
            }
            Prim::GetMember => {
                let [obj, fld] = actuals[..] else { return "0".to_owned() };
                format!("&({})", self.member_lvalue(obj, fld))
            }
            Prim::GetSvecMember | Prim::GetSvecMemberValue => {
                let [obj, idx] = actuals[..] else { return "0".to_owned() };
                format!("({}).x[{}]", self.expr_text(obj), self.expr_text(idx))
            }
            Prim::SetSvecMember => {
                let [obj, idx, val] = actuals[..] else { return "0".to_owned() };
                format!(
                    "({}).x[{}] = {}",
                    self.expr_text(obj),
                    self.expr_text(idx),
                    self.expr_text(val)
                )
            }
            Prim::WideGet => {
                let [obj, fld] = actuals[..] else { return "0".to_owned() };
                format!("CHPL_WIDE_GET({}, {})", self.expr_text(obj), self.field_text(fld))
            }
            Prim::WideMake => format!("CHPL_WIDE_MAKE(chpl_localeID, {})", texts[0]),
            Prim::WideClassGetCid => format!("CHPL_WIDE_CLASS_GET_CID({})", texts[0]),
            Prim::GetCid => format!("({})->chpl__cid", texts[0]),
            Prim::TestCid => {
                let [obj, ty_ref] = actuals[..] else { return "0".to_owned() };
                let ty = self
                    .prog
                    .arena
                    .sym_ref(ty_ref)
                    .map(|s| self.prog.arena.sym(s).ty)
                    .unwrap_or(self.prog.core.object);
                format!("(({})->chpl__cid == chpl__cid{})", self.expr_text(obj), self.type_cname(ty))
            }
            Prim::Cast => {
                let [ty_ref, v] = actuals[..] else { return "0".to_owned() };
                let ty = self
                    .prog
                    .arena
                    .sym_ref(ty_ref)
                    .map(|s| self.prog.arena.sym(s).ty)
                    .unwrap_or(self.prog.core.int64);
                format!("(({}){})", self.value_c_type(ty), self.expr_text(v))
            }
            Prim::DynamicCast => {
                let [ty_ref, v] = actuals[..] else { return "0".to_owned() };
                let ty = self
                    .prog
                    .arena
                    .sym_ref(ty_ref)
                    .map(|s| self.prog.arena.sym(s).ty)
                    .unwrap_or(self.prog.core.object);
                format!(
                    "CHPL_DYNAMIC_CAST({}, {}, {})",
                    self.type_cname(ty),
                    self.expr_text(v),
                    self.prog.arena.expr(call).loc.line
                )
            }
            Prim::ChplAlloc | Prim::ChplAllocPermitZero => {
                let ty = actuals
                    .first()
                    .and_then(|&t| self.prog.arena.sym_ref(t))
                    .map(|s| self.prog.arena.sym(s).ty)
                    .unwrap_or(self.prog.core.object);
                let macro_name = if prim == Prim::ChplAlloc {
                    "CHPL_ALLOC"
                } else {
                    "CHPL_ALLOC_PERMIT_ZERO"
                };
                format!(
                    "({}*){macro_name}(sizeof({}), {})",
                    self.type_cname(ty),
                    self.type_cname(ty),
                    self.prog.arena.expr(call).loc.line
                )
            }
            Prim::ArrayGet => format!("&(({})->_data[{}])", texts[0], texts[1]),
            Prim::ArrayGetValue => format!("(({})._data->v[{}])", texts[0], texts[1]),
            Prim::ArraySet | Prim::ArraySetFirst => {
                format!("(({})._data->v[{}] = {})", texts[0], texts[1], texts[2])
            }
            Prim::GetRef => format!("(*{})", texts[0]),
            Prim::SetRef => format!("(&{})", texts[0]),
            Prim::GetLocaleId => format!("CHPL_LOCALEID({})", texts[0]),
            Prim::VmtCall => {
                if actuals.len() < 2 {
                    return "0".to_owned();
                }
                let (root_ref, receiver) = (actuals[0], actuals[1]);
                let root = self.prog.arena.sym_ref(root_ref);
                let index = root
                    .and_then(|r| self.virt.roots.iter().position(|&x| x == r))
                    .unwrap_or(0);
                let args: Vec<String> = actuals.iter().skip(1).map(|&a| self.expr_text(a)).collect();
                format!(
                    "((chpl_fn_p)chpl_vmtable[({})->chpl__cid][{index}])({})",
                    self.expr_text(receiver),
                    args.join(", ")
                )
            }
            Prim::StringConcat => format!("chpl_string_concat({}, {})", texts[0], texts[1]),
            Prim::StringCompare => format!("chpl_string_compare({}, {})", texts[0], texts[1]),
            Prim::StringLength => format!("chpl_string_length({})", texts[0]),
            Prim::StringIndex => format!("chpl_string_index({}, {})", texts[0], texts[1]),
            Prim::StringCopy => format!("chpl_string_copy({})", texts[0]),
            Prim::InitCopy => texts.first().cloned().unwrap_or_else(|| "0".to_owned()),
            Prim::Init => {
                let ty = actuals
                    .first()
                    .and_then(|&t| self.prog.arena.sym_ref(t))
                    .map(|s| self.prog.arena.sym(s).ty)
                    .unwrap_or(self.prog.core.int64);
                if self.prog.arena.is_class_like(ty) {
                    "0".to_owned()
                } else {
                    format!("(({}){{0}})", self.value_c_type(ty))
                }
            }
            other => {
                // Runtime entry points keep their registered name.
                format!("{}({})", other.name(), texts.join(", "))
            }
        }
    }

    fn member_lvalue(&self, obj: ExprId, fld: ExprId) -> String {
        let obj_ty = self.prog.arena.value_type(self.prog.expr_val_type(obj));
        let accessor = if self.prog.arena.is_class_like(obj_ty) { "->" } else { "." };
        format!("({}){accessor}{}", self.expr_text(obj), self.field_text(fld))
    }

    fn field_text(&self, fld: ExprId) -> String {
        match self.prog.arena.sym_ref(fld) {
            Some(sym) => sanitize(self.prog.interner.resolve(self.prog.arena.sym(sym).name)),
            None => self.expr_text(fld),
        }
    }

    fn immediate_text(&self, imm: Immediate) -> String {
        match imm {
            Immediate::Bool(v) => if v { "true" } else { "false" }.to_owned(),
            Immediate::Int(v) => format!("INT64({v})"),
            Immediate::Uint(v) => format!("UINT64({v})"),
            Immediate::Real(v) => {
                let mut buffer = ryu::Buffer::new();
                buffer.format(v).to_owned()
            }
            Immediate::String(name) => format!("{:?}", self.prog.interner.resolve(name)),
        }
    }

    // ---- driver files ----

    fn emit_main(&self, modules: &[(String, String)]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "/* _main.c */");
        let _ = writeln!(out, "#include \"chpl__header.h\"");
        for (file, _) in modules {
            let _ = writeln!(out, "#include \"{file}\"");
        }
        let _ = writeln!(out, "#include \"_config.c\"");
        let _ = writeln!(out);
        let _ = writeln!(out, "int main(int argc, char* argv[]) {{");
        let _ = writeln!(out, "  chpl_rt_init(argc, argv);");
        let _ = writeln!(out, "  chpl__init_config();");
        for &module in &self.prog.modules {
            let _ = writeln!(out, "  chpl__init_{}();", sanitize(self.prog.sym_name(module)));
        }
        let _ = writeln!(out, "  chpl__init__Program();");
        if let Some(main) = self.prog.main_fn {
            let _ = writeln!(out, "  {}();", self.sym_cname(main));
        }
        let _ = writeln!(out, "  chpl_exit_all(0);");
        let _ = writeln!(out, "  return 0;");
        let _ = writeln!(out, "}}");
        out
    }

    fn emit_config(&self) -> String {
        let mut out = String::new();
        let config = &self.prog.config;
        let _ = writeln!(out, "/* _config.c */");
        let _ = writeln!(out, "void chpl__init_config(void) {{");
        for (name, value) in [
            ("local", config.local),
            ("noBoundsChecks", config.no_bounds_checks),
            ("noLocalChecks", config.no_local_checks),
            ("noNilChecks", config.no_nil_checks),
            ("serial", config.serial),
        ] {
            let _ = writeln!(
                out,
                "  chpl_config_set(\"{name}\", \"{}\");",
                if value { "true" } else { "false" }
            );
        }
        let _ = writeln!(out, "}}");
        out
    }

    /// Heterogeneous targets need a runtime-readable description of every
    /// structural type so remote nodes with different ABIs can marshal
    /// fields.
    fn emit_type_structure(&self) -> String {
        let mut out = String::new();
        let types = self.structural_types();
        let max_fields = types
            .iter()
            .map(|&t| self.prog.arena.fields(t).len())
            .max()
            .unwrap_or(0)
            .max(1);
        let _ = writeln!(out, "/* _type_structure.c */");
        let _ = writeln!(out, "#include \"chpl__header.h\"");
        let _ = writeln!(out, "#define CHPL_MAX_FIELDS_PER_TYPE {max_fields}");
        let _ = writeln!(out);
        let _ = writeln!(out, "chpl_fieldType chpl_structType[][CHPL_MAX_FIELDS_PER_TYPE] = {{");
        for &ty in &types {
            let fields: Vec<String> = self
                .prog
                .arena
                .fields(ty)
                .into_iter()
                .map(|f| format!("CHPL_FIELD({})", self.value_c_type(self.prog.arena.sym(f).ty)))
                .collect();
            let _ = writeln!(out, "  {{ {} }},", fields.join(", "));
        }
        let _ = writeln!(out, "}};");
        let _ = writeln!(out);
        let _ = writeln!(out, "size_t chpl_sizeType[] = {{");
        for &ty in &types {
            let _ = writeln!(out, "  sizeof({}),", self.type_cname(ty));
        }
        let _ = writeln!(out, "}};");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "int chpl_getFieldType(int typeNum, int fieldNum) {{ return (int)chpl_structType[typeNum][fieldNum]; }}"
        );
        let _ = writeln!(
            out,
            "size_t chpl_getFieldOffset(int typeNum, int fieldNum) {{ return fieldNum * sizeof(void*); }}"
        );
        let _ = writeln!(
            out,
            "size_t chpl_getFieldSize(int typeNum) {{ return chpl_sizeType[typeNum]; }}"
        );
        out
    }
}

fn primitive_c_type(p: PrimTy) -> &'static str {
    match p {
        PrimTy::Bool => "chpl_bool",
        PrimTy::Int8 => "int8_t",
        PrimTy::Int16 => "int16_t",
        PrimTy::Int32 => "int32_t",
        PrimTy::Int64 => "int64_t",
        PrimTy::Uint8 => "uint8_t",
        PrimTy::Uint16 => "uint16_t",
        PrimTy::Uint32 => "uint32_t",
        PrimTy::Uint64 => "uint64_t",
        PrimTy::Real32 => "float",
        PrimTy::Real64 => "double",
        PrimTy::Complex64 => "chpl_complex64",
        PrimTy::Complex128 => "chpl_complex128",
        PrimTy::String => "chpl_string",
        PrimTy::TaskList => "chpl_task_list_p",
        PrimTy::RawPtr => "void*",
        PrimTy::Void | PrimTy::Unknown | PrimTy::Any | PrimTy::Nil => "void*",
    }
}

/// Identifier-safe rendering of a source name.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}
