//! 共享库
//!
//! 包含所有服务共用的配置、错误处理、数据库连接、缓存、Redis pub/sub、
//! 领域事件与可观测性等基础设施代码。

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod observability;
pub mod pubsub;
pub mod retry;
