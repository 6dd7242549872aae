//! The pass pipeline: resolution, parallel lowering, wide references, and
//! emission, in the contract-mandated order.

use crate::{codegen::GeneratedFiles, diag::UserError, passes, program::Program, resolve};

/// Outcome of a full middle-end run.
#[derive(Debug)]
pub enum CompileOutcome {
    /// Lowering completed; here are the generated files.
    Success(Box<GeneratedFiles>),
    /// Resolution reported user errors; nothing was emitted.
    Errors(Vec<UserError>),
}

/// Runs every pass over a normalized program.
///
/// Stops before code generation when resolution reported errors, so the
/// diagnostics the reporter collected are the result.
pub fn compile(prog: &mut Program) -> CompileOutcome {
    let virt = resolve::resolve_program(prog);
    if prog.reporter.has_errors() {
        return CompileOutcome::Errors(prog.reporter.errors().to_vec());
    }

    passes::parallel::parallel(prog);
    let _wide = passes::widen::insert_wide_references(prog);

    let files = crate::codegen::codegen(prog, &virt);
    CompileOutcome::Success(Box::new(files))
}
