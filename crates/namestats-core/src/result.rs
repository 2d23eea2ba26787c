//! Convenience result type alias for NameStats.

use crate::error::AppError;

/// A specialized `Result` type for NameStats operations.
pub type AppResult<T> = Result<T, AppError>;
