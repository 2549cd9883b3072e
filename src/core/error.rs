use thiserror::Error;

/// Errors produced by the handystats runtime.
#[derive(Error, Debug)]
pub enum HandyError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("pattern error at pos {pos}: {message}")]
    Pattern { pos: usize, message: String },

    #[error("statistic tag {0} is not enabled")]
    TagNotEnabled(&'static str),

    #[error("metric not found: {0}")]
    UnknownMetric(String),

    #[error("timer instance {instance} not found on metric '{metric}'")]
    TimerMissingInstance { metric: String, instance: u64 },

    #[error("event queue is at capacity, event dropped")]
    QueueExhausted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for handystats operations.
pub type Result<T> = std::result::Result<T, HandyError>;

impl HandyError {
    /// Creates a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new pattern error anchored at a byte position.
    pub fn pattern<S: Into<String>>(pos: usize, msg: S) -> Self {
        Self::Pattern {
            pos,
            message: msg.into(),
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Json(_) => "config",
            Self::Pattern { .. } => "pattern",
            Self::TagNotEnabled(_) => "query",
            Self::UnknownMetric(_) => "lookup",
            Self::TimerMissingInstance { .. } => "timer",
            Self::QueueExhausted => "queue",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HandyError::config("bad interval");
        assert_eq!(err.to_string(), "configuration error: bad interval");
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_pattern_error_position() {
        let err = HandyError::pattern(7, "unbalanced brace");
        assert_eq!(err.to_string(), "pattern error at pos 7: unbalanced brace");
        assert_eq!(err.category(), "pattern");
    }

    #[test]
    fn test_timer_instance_error() {
        let err = HandyError::TimerMissingInstance {
            metric: "db.query".into(),
            instance: 42,
        };
        assert_eq!(
            err.to_string(),
            "timer instance 42 not found on metric 'db.query'"
        );
        assert_eq!(err.category(), "timer");
    }
}
