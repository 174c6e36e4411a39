use std::fmt;

/// Error returned by [`crate::FallbackManager::execute_with_fallback`].
///
/// Carries the primary's error alongside every fallback's, in priority
/// order, so a caller can see exactly what was tried.
#[derive(Debug)]
pub enum FallbackError<E> {
    Cancelled,
    AllFailed { primary_error: E, fallback_errors: Vec<(String, E)> },
}

impl<E: fmt::Display> fmt::Display for FallbackError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackError::Cancelled => write!(f, "operation cancelled before the primary ran"),
            FallbackError::AllFailed { primary_error, fallback_errors } => {
                write!(f, "primary failed: {primary_error}")?;
                for (name, error) in fallback_errors {
                    write!(f, "; fallback {name} failed: {error}")?;
                }
                Ok(())
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for FallbackError<E> {}
