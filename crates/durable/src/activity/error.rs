use serde::{Deserialize, Serialize};

/// Code for inputs or outputs that do not fit the activity's types
pub const BAD_PAYLOAD: &str = "BAD_PAYLOAD";

/// Failure of one step try, or of a whole run
///
/// `retryable` decides whether the worker pool schedules another try. Once a
/// run is errored its stored error is always non-retryable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct StepError {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    pub retryable: bool,
}

impl StepError {
    /// A failure worth another try
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: true,
        }
    }

    /// A failure no retry will fix
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: false,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::transient(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        Self::permanent(err.to_string()).with_code(BAD_PAYLOAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_code_is_omitted_when_absent() {
        let plain = StepError::transient("flaky");
        assert_eq!(
            serde_json::to_value(&plain).unwrap(),
            json!({ "message": "flaky", "retryable": true })
        );

        let coded = StepError::permanent("nope").with_code("DENIED");
        assert_eq!(
            serde_json::to_value(&coded).unwrap(),
            json!({ "message": "nope", "code": "DENIED", "retryable": false })
        );
    }

    #[test]
    fn test_conversions() {
        let from_anyhow: StepError = anyhow::anyhow!("disk full").context("writing box").into();
        assert!(from_anyhow.retryable);
        assert_eq!(from_anyhow.message, "writing box: disk full");

        let bad = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let from_json: StepError = bad.into();
        assert!(!from_json.retryable);
        assert_eq!(from_json.code.as_deref(), Some(BAD_PAYLOAD));
    }
}
