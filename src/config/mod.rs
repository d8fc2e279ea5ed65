pub mod schema;

pub use schema::{AnthropicConfig, CacheConfig, Config, GeminiConfig, LocalConfig, OpenAiConfig};
