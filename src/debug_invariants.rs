//! Structural self-checks for grids and layouts.

use crate::mesh_error::GridError;

/// Types that can validate their own structural invariants.
pub trait DebugInvariants {
    /// Validate invariants and return the first violation found.
    fn validate_invariants(&self) -> Result<(), GridError>;

    /// Panic on the first violation in debug builds (or with the
    /// `strict-invariants` / `check-invariants` features).
    fn debug_assert_invariants(&self) {
        #[cfg(any(debug_assertions, feature = "strict-invariants", feature = "check-invariants"))]
        if let Err(e) = self.validate_invariants() {
            panic!("[invariants] {}: {e}", std::any::type_name::<Self>());
        }
    }
}

/// Validate `$target` after a mutating step when invariant checking is enabled.
///
/// The context literal names the step in the panic message.
#[macro_export]
macro_rules! debug_invariants {
    ($target:expr, $ctx:literal) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants", feature = "check-invariants"))]
        if let Err(e) = $crate::debug_invariants::DebugInvariants::validate_invariants($target) {
            panic!(concat!("[invariants] ", $ctx, ": {}"), e);
        }
    };
}
