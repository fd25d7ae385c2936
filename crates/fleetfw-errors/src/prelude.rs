//! Prelude module for convenient error handling imports.
//!
//! # Example
//!
//! ```
//! use fleetfw_errors::prelude::*;
//!
//! fn load(host_id: &str) -> Result<()> {
//!     Err(FleetError::discovery(host_id, "not in inventory"))
//! }
//!
//! assert_eq!(load("esx-07").map_err(|e| e.category()), Err(ErrorCategory::Discovery));
//! ```

pub use crate::{
    Result,
    catalog::{CatalogError, VersionError},
    common::{ErrorCategory, ErrorContext, ErrorSeverity, FleetError, ResultExt},
    protocol::{FailureKind, ProtocolFailure},
};

/// Macro for creating an error context with key-value pairs.
///
/// # Example
///
/// ```
/// use fleetfw_errors::error_context;
///
/// let ctx = error_context!("save_job", "job_id" => "42");
/// assert!(ctx.to_string().contains("job_id: 42"));
/// ```
#[macro_export]
macro_rules! error_context {
    ($operation:expr, $($key:expr => $value:expr),* $(,)?) => {
        {
            let mut ctx = $crate::ErrorContext::new($operation);
            $(
                ctx = ctx.with($key, $value);
            )*
            ctx
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_macro() {
        let ctx = error_context!(
            "load_plan",
            "plan_id" => "p-1",
            "store" => "json"
        );
        assert!(ctx.to_string().contains("load_plan"));
        assert!(ctx.to_string().contains("store: json"));
    }
}
