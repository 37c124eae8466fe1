//! SimFlow 错误处理系统
//!
//! 统一的错误类型和错误处理机制

use thiserror::Error;

/// 框架统一错误类型
#[derive(Error, Debug)]
pub enum SimFlowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error("cannot schedule at t={requested} before current time t={current}")]
    TimeOrdering { requested: f64, current: f64 },

    #[error("invalid delay or period: {value}")]
    InvalidDelay { value: f64 },

    #[error("scheduler '{scheduler}' is stopped")]
    SchedulerStopped { scheduler: String },

    #[error("execution layer '{layer}' is already registered")]
    DuplicateLayer { layer: String },

    #[error("execution layer '{layer}' is not registered")]
    UnknownLayer { layer: String },

    #[error("subscriber '{subscriber}' already declares a handler for '{kind}'")]
    AmbiguousHandler { subscriber: String, kind: String },

    #[error("event queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Handler error: {message}")]
    Handler { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SimFlowError {
    /// 创建配置相关错误
    pub fn config(message: &str) -> Self {
        Self::Config {
            message: message.to_string(),
        }
    }

    /// 创建处理器相关错误
    pub fn handler(message: &str) -> Self {
        Self::Handler {
            message: message.to_string(),
        }
    }

    /// 创建内部错误
    pub fn internal(message: &str) -> Self {
        Self::Internal {
            message: message.to_string(),
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, SimFlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = SimFlowError::config("Test config error");
        assert!(matches!(error, SimFlowError::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: Test config error");
    }

    #[test]
    fn test_error_from_io() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let sim_error = SimFlowError::from(io_error);
        assert!(matches!(sim_error, SimFlowError::Io(_)));
    }

    #[test]
    fn test_ordering_error_message() {
        let error = SimFlowError::TimeOrdering {
            requested: 1.0,
            current: 5.0,
        };
        assert_eq!(
            error.to_string(),
            "cannot schedule at t=1 before current time t=5"
        );
    }

    #[test]
    fn test_result_type() {
        let success: Result<i32> = Ok(42);
        let failure: Result<i32> = Err(SimFlowError::internal("Test error"));

        assert!(success.is_ok());
        assert!(failure.is_err());
    }
}
