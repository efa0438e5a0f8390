//! Error types for the store layer.

/// Errors surfaced by a [`Store`](crate::Store) implementation.
///
/// Validation and precondition failures never reach this layer; these
/// are the faults only the remote side can produce.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The store's access policy rejected the operation.
    #[error("permission denied at {path}")]
    PermissionDenied { path: String },

    /// The store could not be reached or the connection is gone.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
