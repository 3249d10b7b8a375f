//! trae-llm: model access layer for the trae agent
//!
//! Provides:
//! - Conversation message types
//! - The `ModelGateway` contract and an OpenAI-compatible HTTP gateway
//! - Retry with exponential backoff and jitter
//! - A bounded, expiring response cache
//! - Configuration loading (trae_config.toml)

pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod gateway;
pub mod message;
pub mod metrics;
pub mod openai;
pub mod retry;

pub use cache::{cache_key, CacheConfig, CacheStats, CachedGateway, ResponseCache};
pub use config::{ConfigError, ModelConfig, Overrides, ResolvedConfig, TraeConfig};
pub use error::{LlmError, ModelError, ModelErrorKind};
pub use gateway::{ModelGateway, ModelSettings};
pub use message::{FunctionCall, FunctionDefinition, Message, Role, ToolCall, ToolDefinition};
pub use metrics::{InMemoryMetrics, MetricsSink, NoopMetrics};
pub use openai::OpenAiGateway;
pub use retry::{RetryConfig, RetryingGateway};
