use thiserror::Error;

/// Failure modes of the quote path.
///
/// Transient errors are retried by the rate limiter up to its budget and only
/// then surfaced; everything else is returned to the caller immediately.
/// Errors are always carried per symbol so one bad instrument never fails a
/// batch.
#[derive(Debug, Error)]
pub enum QuoteError {
    /// Network-level or 5xx provider failure; worth retrying.
    #[error("transient provider failure: {message}")]
    Transient { message: String },

    /// The provider answered, but with no usable price (zero, negative, or
    /// absent). Distinct from transient failures so callers can render
    /// "unavailable" instead of "retry".
    #[error("no usable price data for {symbol}")]
    NoData { symbol: String },

    /// Retry budget exhausted; wraps the final transient failure.
    #[error("retry budget exhausted after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    /// Non-retryable provider response (unexpected schema, 4xx).
    #[error("provider error: {message}")]
    Provider { message: String },
}

impl QuoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    pub fn no_data(symbol: impl Into<String>) -> Self {
        Self::NoData {
            symbol: symbol.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, QuoteError::Transient { .. })
    }
}

impl From<reqwest::Error> for QuoteError {
    fn from(err: reqwest::Error) -> Self {
        // Connect/timeout/5xx are retryable; anything else (decode, builder)
        // indicates a non-retryable problem with the request or payload.
        let retryable = err.is_timeout()
            || err.is_connect()
            || err
                .status()
                .map(|s| s.is_server_error())
                .unwrap_or(false);
        if retryable {
            QuoteError::transient(err.to_string())
        } else {
            QuoteError::provider(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(QuoteError::transient("connection reset").is_transient());
        assert!(!QuoteError::no_data("AAPL").is_transient());
        assert!(!QuoteError::provider("bad payload").is_transient());
        assert!(!QuoteError::RetriesExhausted {
            attempts: 3,
            message: "timeout".to_string()
        }
        .is_transient());
    }
}
