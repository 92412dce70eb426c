//! 共享库
//!
//! 包含各服务共用的配置、错误处理、Kafka 消费与可观测性等基础设施代码。

pub mod config;
pub mod error;
pub mod kafka;
pub mod observability;
