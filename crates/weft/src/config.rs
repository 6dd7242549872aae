//! Compilation configuration handed down from the driver.
//!
//! Every pass reads its knobs from a shared [`Config`] rather than from
//! globals. The driver deserializes the struct from JSON next to the
//! normalized AST; unknown fields are rejected so stale driver flags surface
//! immediately.

use serde::Deserialize;

/// Flags and limits controlling the middle end.
///
/// Field names mirror the driver's spelling with the `f` prefix dropped.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
pub struct Config {
    /// Build the runtime support file set only.
    pub runtime: bool,
    /// Single-locale compilation: no wide references, no remote forks.
    pub local: bool,
    /// Elide array bounds checks.
    pub no_bounds_checks: bool,
    /// Elide locality checks inside `local` blocks.
    pub no_local_checks: bool,
    /// Elide nil-dereference checks.
    pub no_nil_checks: bool,
    /// Disable the copy-propagation cleanup after lowering.
    pub no_copy_propagation: bool,
    /// Never inline wrapper functions.
    pub no_inline: bool,
    /// Disable remote value forwarding into task functions.
    pub no_remote_value_forwarding: bool,
    /// Disable the tuple-copy optimization.
    pub no_tuple_copy_opt: bool,
    /// Serialize all parallel constructs.
    pub serial: bool,
    /// Serialize forall loops only.
    pub serial_forall: bool,
    /// Target GPU kernels for `gpu on` blocks.
    pub gpu: bool,
    /// Heterogeneous target: emit the type-structure tables.
    pub heterogeneous: bool,
    /// Never emit frees (leak instead; used for debugging lowerings).
    pub no_memory_frees: bool,
    /// Largest aggregate eligible for scalar replacement.
    pub scalar_replace_limit: u32,
    /// Largest tuple eligible for the copy optimization.
    pub tuple_copy_limit: u32,
    /// Largest override count lowered to a class-id test chain; beyond this
    /// the call stays an indirect virtual-method-table call.
    pub conditional_dynamic_dispatch_limit: u32,
    /// When non-zero, explain candidate ranking for calls on this line.
    pub explain_call_line: u32,
    /// Restrict `explain_call_line` to one module (interned lazily by name).
    pub explain_call_module: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: false,
            local: false,
            no_bounds_checks: false,
            no_local_checks: false,
            no_nil_checks: false,
            no_copy_propagation: false,
            no_inline: false,
            no_remote_value_forwarding: false,
            no_tuple_copy_opt: false,
            serial: false,
            serial_forall: false,
            gpu: false,
            heterogeneous: false,
            no_memory_frees: false,
            scalar_replace_limit: 8,
            tuple_copy_limit: 8,
            conditional_dynamic_dispatch_limit: 3,
            explain_call_line: 0,
            explain_call_module: None,
        }
    }
}

impl Config {
    /// True when wide references must be inserted at all.
    #[must_use]
    pub fn widens(&self) -> bool {
        !self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_partial_flag_sets() {
        let config: Config = serde_json::from_str(r#"{"local": true, "tuple_copy_limit": 4}"#).unwrap();
        assert!(config.local);
        assert_eq!(config.tuple_copy_limit, 4);
        assert!(!config.serial);
        assert!(!config.widens());
    }

    #[test]
    fn rejects_unknown_flags() {
        let result = serde_json::from_str::<Config>(r#"{"fast": true}"#);
        assert!(result.is_err());
    }
}
