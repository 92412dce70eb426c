//! 基础设施错误
//!
//! 只覆盖存储、Kafka 和配置三类外部依赖；分发业务的错误在服务内部定义，
//! 通过 `#[from]` 包住这里的类型。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SharedError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Kafka 错误: {0}")]
    Kafka(String),

    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, SharedError>;

impl SharedError {
    /// 日志中的 `code` 字段
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = SharedError::Kafka("broker down".to_string());
        assert_eq!(err.code(), "KAFKA_ERROR");
        assert_eq!(err.to_string(), "Kafka 错误: broker down");

        let err = SharedError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.code(), "DATABASE_ERROR");
    }

    #[test]
    fn test_config_error_wrapped() {
        let err = SharedError::from(config::ConfigError::NotFound("dispatch".to_string()));
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(err.to_string().starts_with("配置加载失败"));
    }
}
