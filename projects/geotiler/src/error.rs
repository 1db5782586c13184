use thiserror::Error;

/// Failures that the sample pipelines treat differently from plain IO errors.
#[derive(Debug, Error)]
pub enum SampleError {
    /// Invalid user input. Aborts the run.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single tile or label is unusable. The sample is skipped and the batch continues.
    #[error("content rejected: {0}")]
    Content(String),
}

impl SampleError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn content(msg: impl Into<String>) -> Self {
        Self::Content(msg.into())
    }
}

/// True when `err` carries a [`SampleError::Content`] anywhere in its chain.
pub fn is_content_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<SampleError>(),
            Some(SampleError::Content(_))
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_content_error_detected_through_context() {
        let err: anyhow::Result<()> = Err(SampleError::content("uniform tile").into());
        let err = err.context("writing tile 000003").unwrap_err();
        assert!(is_content_error(&err));

        let err = anyhow::Error::new(SampleError::config("bad band list"));
        assert!(!is_content_error(&err));
    }
}
