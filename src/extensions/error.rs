//! Error types for the extension registry and reconciliation.

use thiserror::Error;

use crate::settings::ParseError;

/// Errors talking to the extension registry.
///
/// Errors reported inside a GraphQL response body are not wrapped here; each
/// message becomes one entry of an [`AggregateError`].
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Registry error: {0}")]
    Status(reqwest::StatusCode),

    #[error("Registry response contained no data")]
    NoData,

    #[error("Extension '{0}' not found in registry")]
    ExtensionNotFound(String),
}

/// One or more failures collapsed into a single error.
///
/// Registry and reconciliation failures are never partial: callers either get
/// the full list of configured extensions or one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render(.errors))]
pub struct AggregateError {
    pub errors: Vec<String>,
}

impl AggregateError {
    pub fn new<I, S>(errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            errors: errors.into_iter().map(Into::into).collect(),
        }
    }

    pub fn single(error: impl ToString) -> Self {
        Self {
            errors: vec![error.to_string()],
        }
    }
}

impl From<ParseError> for AggregateError {
    fn from(err: ParseError) -> Self {
        Self::single(err)
    }
}

impl From<RegistryError> for AggregateError {
    fn from(err: RegistryError) -> Self {
        Self::single(err)
    }
}

fn render(errors: &[String]) -> String {
    match errors {
        [] => "Unknown error".to_string(),
        [one] => one.clone(),
        many => {
            let mut out = format!("{} errors occurred:", many.len());
            for e in many {
                out.push_str("\n- ");
                out.push_str(e);
            }
            out
        }
    }
}

/// Result type for registry and reconciliation operations.
pub type ExtensionResult<T> = Result<T, AggregateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_error_message() {
        let err = AggregateError::single("boom");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_many_errors_listed() {
        let err = AggregateError::new(["a", "b"]);
        assert_eq!(err.to_string(), "2 errors occurred:\n- a\n- b");
    }

    #[test]
    fn test_from_parse_error() {
        let err: AggregateError = ParseError::new("bad settings").into();
        assert_eq!(err.errors, vec!["bad settings".to_string()]);
    }
}
