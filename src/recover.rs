use std::fmt::Display;
use tracing::warn;

/// Logs a failed operation under its phase and drops the error.
///
/// Returns the value on success so callers can branch on whether the step happened.
pub fn log_and_continue<T, E>(phase: &str, operation: &str, result: Result<T, E>) -> Option<T>
where
    E: Display,
{
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(phase, operation, error = %format!("{e:#}"), "{phase}: {operation} failed, continuing");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn passes_value_through() {
        let result: anyhow::Result<u32> = Ok(7);
        assert_eq!(log_and_continue("scan", "op", result), Some(7));
    }

    #[test]
    fn swallows_error() {
        let result: anyhow::Result<u32> = Err(anyhow!("connection refused"));
        assert_eq!(log_and_continue("importToES", "putSettings", result), None);
    }
}
