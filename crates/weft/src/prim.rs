//! The primitive operation registry.
//!
//! Primitives are the closed set of intrinsic operations the middle end
//! understands: the emitter prints their textual name, the folder consults
//! their return-type oracle, and dead-code elimination and the atomic pass
//! consult the per-primitive flags. Primitive calls never carry a base
//! expression; named calls never carry a primitive.

use strum::{EnumIter, IntoStaticStr};

use crate::{
    ast::{
        arena::{ExprId, TypeId},
        expr::ExprKind,
        sym::Flags,
    },
    program::Program,
};

/// Tags of the intrinsic operations.
///
/// The string form is the name the C emitter prints for runtime-facing
/// primitives (macros and runtime entry points) and a lowercase mnemonic for
/// the purely structural ones that never survive to codegen.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    IntoStaticStr,
    EnumIter,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Prim {
    // -- structural --
    #[strum(serialize = "noop")]
    Noop,
    #[strum(serialize = "move")]
    Move,
    #[strum(serialize = "return")]
    Return,
    #[strum(serialize = "yield")]
    Yield,
    /// Default-initialize a value of the type named by the first actual.
    #[strum(serialize = "init")]
    Init,
    /// Copy-initialize from the first actual.
    #[strum(serialize = "init_copy")]
    InitCopy,

    // -- arithmetic / bitwise / logic --
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "**")]
    Pow,
    #[strum(serialize = "u-")]
    Neg,
    #[strum(serialize = "u+")]
    Plus,
    #[strum(serialize = "<<")]
    Lsh,
    #[strum(serialize = ">>")]
    Rsh,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "~")]
    BitNot,
    #[strum(serialize = "&&")]
    LogAnd,
    #[strum(serialize = "||")]
    LogOr,
    #[strum(serialize = "!")]
    LogNot,

    // -- comparison --
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,

    // -- references --
    /// Take the address of the first actual (produces a reference).
    #[strum(serialize = "set_ref")]
    SetRef,
    /// Dereference a reference.
    #[strum(serialize = "get_ref")]
    GetRef,

    // -- member access --
    #[strum(serialize = "get_member")]
    GetMember,
    #[strum(serialize = "get_member_value")]
    GetMemberValue,
    #[strum(serialize = "set_member")]
    SetMember,
    #[strum(serialize = "get_svec_member")]
    GetSvecMember,
    #[strum(serialize = "get_svec_member_value")]
    GetSvecMemberValue,
    #[strum(serialize = "set_svec_member")]
    SetSvecMember,

    // -- wide pointers --
    #[strum(serialize = "CHPL_WIDE_GET")]
    WideGet,
    #[strum(serialize = "CHPL_WIDE_PUT")]
    WidePut,
    #[strum(serialize = "CHPL_WIDE_CLASS_GET_CID")]
    WideClassGetCid,
    #[strum(serialize = "CHPL_WIDE_MAKE")]
    WideMake,
    #[strum(serialize = "CHPL_LOCAL_CHECK")]
    LocalCheck,
    #[strum(serialize = "CHPL_LOCALEID")]
    GetLocaleId,

    // -- arrays --
    #[strum(serialize = "CHPL_ARRAY_ALLOC")]
    ArrayAlloc,
    #[strum(serialize = "CHPL_ARRAY_FREE")]
    ArrayFree,
    #[strum(serialize = "array_get")]
    ArrayGet,
    #[strum(serialize = "array_get_value")]
    ArrayGetValue,
    #[strum(serialize = "array_set")]
    ArraySet,
    #[strum(serialize = "array_set_first")]
    ArraySetFirst,

    // -- sync / single --
    #[strum(serialize = "chpl_sync_init")]
    SyncInit,
    #[strum(serialize = "chpl_sync_destroy")]
    SyncDestroy,
    #[strum(serialize = "chpl_sync_lock")]
    SyncLock,
    #[strum(serialize = "chpl_sync_unlock")]
    SyncUnlock,
    #[strum(serialize = "chpl_sync_wait_full")]
    SyncWaitFull,
    #[strum(serialize = "chpl_sync_wait_empty")]
    SyncWaitEmpty,
    #[strum(serialize = "chpl_sync_mark_full")]
    SyncSignalFull,
    #[strum(serialize = "chpl_sync_mark_empty")]
    SyncSignalEmpty,
    #[strum(serialize = "chpl_single_init")]
    SingleInit,
    #[strum(serialize = "chpl_single_destroy")]
    SingleDestroy,
    #[strum(serialize = "chpl_single_wait_full")]
    SingleWaitFull,
    #[strum(serialize = "chpl_single_mark_full")]
    SingleSignalFull,
    /// Project the value out of a sync/single variable (coercion wrapper).
    #[strum(serialize = "sync_value")]
    SyncValue,

    // -- tasking --
    #[strum(serialize = "chpl_task_list_add_begin")]
    TaskListAddBegin,
    #[strum(serialize = "chpl_task_list_add_costmt")]
    TaskListAddCoStmt,
    #[strum(serialize = "chpl_task_list_process")]
    ProcessTaskList,
    #[strum(serialize = "chpl_task_list_execute")]
    ExecuteTasksInList,
    #[strum(serialize = "chpl_task_list_free")]
    FreeTaskList,
    #[strum(serialize = "chpl_comm_fork")]
    OnFork,
    #[strum(serialize = "chpl_comm_fork_nb")]
    OnForkNb,
    #[strum(serialize = "chpl_gpu_kernel_launch")]
    GpuKernelLaunch,
    #[strum(serialize = "get_end_count")]
    GetEndCount,
    #[strum(serialize = "set_end_count")]
    SetEndCount,

    /// Indirect call through the virtual-method table: actuals are the root
    /// method, the receiver, then the remaining arguments.
    #[strum(serialize = "vmt_call")]
    VmtCall,

    // -- class ids and casts --
    #[strum(serialize = "getcid")]
    GetCid,
    #[strum(serialize = "setcid")]
    SetCid,
    #[strum(serialize = "testcid")]
    TestCid,
    #[strum(serialize = "cast")]
    Cast,
    #[strum(serialize = "dynamic_cast")]
    DynamicCast,
    #[strum(serialize = "union_getid")]
    UnionGetId,
    #[strum(serialize = "union_setid")]
    UnionSetId,

    // -- strings --
    #[strum(serialize = "string_copy")]
    StringCopy,
    #[strum(serialize = "string_concat")]
    StringConcat,
    #[strum(serialize = "string_compare")]
    StringCompare,
    #[strum(serialize = "string_length")]
    StringLength,
    #[strum(serialize = "string_index")]
    StringIndex,

    // -- heap / memory --
    #[strum(serialize = "CHPL_ALLOC")]
    ChplAlloc,
    #[strum(serialize = "CHPL_ALLOC_PERMIT_ZERO")]
    ChplAllocPermitZero,
    #[strum(serialize = "CHPL_FREE")]
    ChplFree,
    #[strum(serialize = "chpl_heap_register_global_var")]
    HeapRegisterGlobal,
    #[strum(serialize = "chpl_private_broadcast")]
    PrivateBroadcast,

    // -- transactional memory --
    #[strum(serialize = "chpl_stm_tx_begin")]
    TxBegin,
    #[strum(serialize = "chpl_stm_tx_commit")]
    TxCommit,
    #[strum(serialize = "chpl_stm_tx_abort")]
    TxAbort,
    #[strum(serialize = "chpl_stm_tx_load")]
    TxLoad,
    #[strum(serialize = "chpl_stm_tx_store")]
    TxStore,

    // -- compile-time queries and diagnostics --
    #[strum(serialize = "typeof")]
    TypeOf,
    #[strum(serialize = "is_subtype")]
    IsSubtype,
    #[strum(serialize = "compiler_error")]
    CompilerError,
    #[strum(serialize = "compiler_warning")]
    CompilerWarning,

    // -- block-info markers --
    #[strum(serialize = "block_while_do")]
    BlockWhileDo,
    #[strum(serialize = "block_do_while")]
    BlockDoWhile,
    #[strum(serialize = "block_for")]
    BlockForLoop,
    #[strum(serialize = "block_param_for")]
    BlockParamLoop,
    #[strum(serialize = "block_begin")]
    BlockBegin,
    #[strum(serialize = "block_cobegin")]
    BlockCobegin,
    #[strum(serialize = "block_coforall")]
    BlockCoforall,
    #[strum(serialize = "block_on")]
    BlockOn,
    #[strum(serialize = "block_on_nb")]
    BlockOnNb,
    #[strum(serialize = "block_gpu_on")]
    BlockGpuOn,
    #[strum(serialize = "block_local")]
    BlockLocal,
    #[strum(serialize = "block_unlocal")]
    BlockUnlocal,
    #[strum(serialize = "block_atomic")]
    BlockAtomic,
    #[strum(serialize = "block_type")]
    BlockType,
}

/// Per-primitive behavior flags consulted by the passes and the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimInfo {
    /// Has side effects; may never be dead-code eliminated.
    pub essential: bool,
    /// The emitter appends the source location to the generated call.
    pub pass_line_no: bool,
    /// Permitted inside an `atomic` block.
    pub atomic_safe: bool,
}

impl Prim {
    /// The emitter-facing name.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Behavior flags of this primitive.
    #[must_use]
    pub fn info(self) -> PrimInfo {
        use Prim::*;
        let essential = matches!(
            self,
            Return
                | Yield
                | SetMember
                | SetSvecMember
                | WidePut
                | SetCid
                | UnionSetId
                | ArrayAlloc
                | ArrayFree
                | ArraySet
                | ArraySetFirst
                | SyncInit
                | SyncDestroy
                | SyncLock
                | SyncUnlock
                | SyncWaitFull
                | SyncWaitEmpty
                | SyncSignalFull
                | SyncSignalEmpty
                | SingleInit
                | SingleDestroy
                | SingleWaitFull
                | SingleSignalFull
                | TaskListAddBegin
                | TaskListAddCoStmt
                | ProcessTaskList
                | ExecuteTasksInList
                | FreeTaskList
                | OnFork
                | OnForkNb
                | GpuKernelLaunch
                | SetEndCount
                | ChplAlloc
                | ChplAllocPermitZero
                | ChplFree
                | HeapRegisterGlobal
                | PrivateBroadcast
                | TxBegin
                | TxCommit
                | TxAbort
                | TxStore
                | LocalCheck
                | CompilerError
                | CompilerWarning
                | VmtCall
        );
        let pass_line_no = matches!(
            self,
            ChplAlloc
                | ChplAllocPermitZero
                | ChplFree
                | ArrayAlloc
                | ArrayFree
                | TaskListAddBegin
                | TaskListAddCoStmt
                | OnFork
                | OnForkNb
                | GpuKernelLaunch
                | LocalCheck
        );
        let atomic_safe = matches!(
            self,
            Noop | Move
                | Add
                | Sub
                | Mul
                | Div
                | Mod
                | Pow
                | Neg
                | Plus
                | Lsh
                | Rsh
                | BitAnd
                | BitOr
                | BitXor
                | BitNot
                | LogAnd
                | LogOr
                | LogNot
                | Eq
                | Ne
                | Lt
                | Le
                | Gt
                | Ge
                | SetRef
                | GetRef
                | GetMember
                | GetMemberValue
                | SetMember
                | GetSvecMember
                | GetSvecMemberValue
                | SetSvecMember
                | Cast
                | TypeOf
                | IsSubtype
                | TxLoad
                | TxStore
        );
        PrimInfo {
            essential,
            pass_line_no,
            atomic_safe,
        }
    }

    /// True for the block-info markers that tag parallel or locality
    /// constructs (the blocks parallel lowering extracts).
    #[must_use]
    pub fn is_task_block_marker(self) -> bool {
        matches!(
            self,
            Self::BlockBegin
                | Self::BlockCobegin
                | Self::BlockCoforall
                | Self::BlockOn
                | Self::BlockOnNb
                | Self::BlockGpuOn
        )
    }

    /// True for binary primitives the constant folder understands.
    #[must_use]
    pub fn fold_binary_op(self) -> Option<crate::ast::immediate::FoldOp> {
        use crate::ast::immediate::FoldOp;
        Some(match self {
            Self::Add => FoldOp::Add,
            Self::Sub => FoldOp::Sub,
            Self::Mul => FoldOp::Mul,
            Self::Div => FoldOp::Div,
            Self::Mod => FoldOp::Mod,
            Self::Pow => FoldOp::Pow,
            Self::Lsh => FoldOp::Lsh,
            Self::Rsh => FoldOp::Rsh,
            Self::BitAnd => FoldOp::BitAnd,
            Self::BitOr => FoldOp::BitOr,
            Self::BitXor => FoldOp::BitXor,
            Self::LogAnd => FoldOp::LogAnd,
            Self::LogOr => FoldOp::LogOr,
            Self::Eq => FoldOp::Eq,
            Self::Ne => FoldOp::Ne,
            Self::Lt => FoldOp::Lt,
            Self::Le => FoldOp::Le,
            Self::Gt => FoldOp::Gt,
            Self::Ge => FoldOp::Ge,
            _ => return None,
        })
    }

    /// True for unary primitives the constant folder understands.
    #[must_use]
    pub fn fold_unary_op(self) -> Option<crate::ast::immediate::UnaryFoldOp> {
        use crate::ast::immediate::UnaryFoldOp;
        Some(match self {
            Self::Neg => UnaryFoldOp::Neg,
            Self::Plus => UnaryFoldOp::Plus,
            Self::LogNot => UnaryFoldOp::Not,
            Self::BitNot => UnaryFoldOp::BitNot,
            _ => return None,
        })
    }
}

/// The return-type oracle: the static type a primitive call produces.
#[must_use]
pub fn return_type(prim: Prim, call: ExprId, prog: &Program) -> TypeId {
    use Prim::*;
    let arena = &prog.arena;
    let core = &prog.core;
    let actual_type = |n: usize| -> TypeId {
        let actuals = arena.actuals(call);
        actuals.get(n).map_or(core.unknown, |&a| prog.expr_type(a))
    };
    match prim {
        Add | Sub | Mul | Div | Mod | Pow | Neg | Plus | Lsh | Rsh | BitAnd | BitOr | BitXor
        | BitNot => arena.value_type(actual_type(0)),
        LogAnd | LogOr | LogNot | Eq | Ne | Lt | Le | Gt | Ge | TestCid | IsSubtype
        | LocalCheck => core.bool_,
        SetRef => {
            let ty = actual_type(0);
            arena.ty(ty).ref_type.unwrap_or(core.unknown)
        }
        GetRef | SyncValue => arena.value_type(actual_type(0)),
        GetMember | GetSvecMember => {
            // Field reads produce a reference to the field when one exists.
            let field_ty = member_field_type(prim, call, prog);
            arena.ty(field_ty).ref_type.unwrap_or(field_ty)
        }
        GetMemberValue | GetSvecMemberValue | WideGet | TxLoad => {
            member_field_type(prim, call, prog)
        }
        ArrayGet => {
            let elem = element_type(actual_type(0), prog);
            arena.ty(elem).ref_type.unwrap_or(elem)
        }
        ArrayGetValue => element_type(actual_type(0), prog),
        Cast | DynamicCast | Init => {
            // First actual names the target type.
            let actuals = arena.actuals(call);
            actuals
                .first()
                .and_then(|&t| arena.sym_ref(t))
                .filter(|&s| arena.sym(s).is_type())
                .map_or(core.unknown, |s| arena.sym(s).ty)
        }
        InitCopy | StringCopy => arena.value_type(actual_type(0)),
        TypeOf => prog.expr_val_type(
            *arena.actuals(call).first().unwrap_or(&call),
        ),
        StringConcat | StringIndex => core.string,
        StringCompare | UnionGetId => core.int64,
        StringLength => core.int64,
        GetCid | GetLocaleId | WideClassGetCid => core.int32,
        GetEndCount => core.unknown,
        ChplAlloc | ChplAllocPermitZero => {
            // Allocation of the class type named by the first actual.
            let actuals = arena.actuals(call);
            actuals
                .first()
                .and_then(|&t| arena.sym_ref(t))
                .filter(|&s| arena.sym(s).is_type())
                .map_or(core.raw_ptr, |s| arena.sym(s).ty)
        }
        WideMake => {
            let narrow = arena.value_type(actual_type(0));
            arena.ty(narrow).wide_type.unwrap_or(core.unknown)
        }
        ArrayAlloc => actual_type(0),
        VmtCall => {
            let actuals = arena.actuals(call);
            actuals
                .first()
                .and_then(|&f| arena.sym_ref(f))
                .filter(|&s| arena.sym(s).is_fn())
                .map_or(core.unknown, |s| arena.fn_data(s).ret_type)
        }
        _ => core.void,
    }
}

/// Field type for member-access primitives: second actual is a symbol
/// reference to the field.
fn member_field_type(prim: Prim, call: ExprId, prog: &Program) -> TypeId {
    let arena = &prog.arena;
    let actuals = arena.actuals(call);
    if let Some(&field_ref) = actuals.get(1) {
        if let Some(field) = arena.sym_ref(field_ref) {
            return arena.sym(field).ty;
        }
        // Wide access through a literal field position.
        if prim == Prim::WideGet {
            return prog.expr_val_type(field_ref);
        }
    }
    prog.core.unknown
}

/// Element type of an array-like: the scalar-promotion type of its data
/// class (or of the array record itself).
fn element_type(array_ty: TypeId, prog: &Program) -> TypeId {
    let arena = &prog.arena;
    let base = arena.value_type(array_ty);
    if let Some(elem) = arena.ty(base).scalar_promotion {
        return elem;
    }
    if arena.ty_has_flag(base, Flags::DATA_CLASS) {
        if let Some(elem) = arena.ty(base).scalar_promotion {
            return elem;
        }
    }
    prog.core.unknown
}

/// Convenience check used by expression-statement handling: a call whose
/// base expression is absent and whose primitive is a block-info marker is
/// never a statement on its own.
#[must_use]
pub fn is_block_info(kind: &ExprKind) -> bool {
    match kind {
        ExprKind::Call(call) => call.prim.is_some_and(|p| {
            p.is_task_block_marker()
                || matches!(
                    p,
                    Prim::BlockWhileDo
                        | Prim::BlockDoWhile
                        | Prim::BlockForLoop
                        | Prim::BlockParamLoop
                        | Prim::BlockLocal
                        | Prim::BlockUnlocal
                        | Prim::BlockAtomic
                        | Prim::BlockType
                )
        }),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn side_effect_prims_are_essential() {
        assert!(Prim::SetMember.info().essential);
        assert!(Prim::TaskListAddBegin.info().essential);
        assert!(!Prim::Add.info().essential);
        assert!(!Prim::Move.info().essential);
    }

    #[test]
    fn sync_ops_are_not_atomic_safe() {
        assert!(!Prim::SyncLock.info().atomic_safe);
        assert!(!Prim::OnFork.info().atomic_safe);
        assert!(Prim::TxLoad.info().atomic_safe);
        assert!(Prim::GetMemberValue.info().atomic_safe);
    }

    #[test]
    fn every_prim_has_a_name() {
        for prim in Prim::iter() {
            assert!(!prim.name().is_empty());
        }
    }

    #[test]
    fn allocation_passes_line_numbers() {
        assert!(Prim::ChplAllocPermitZero.info().pass_line_no);
        assert!(Prim::LocalCheck.info().pass_line_no);
        assert!(!Prim::Eq.info().pass_line_no);
    }
}
