pub mod config;
mod file;

pub use config::{CryptConfig, HttpConfig, IasConfig, LoopbackConfig, UserAgentConfig};
pub use file::ConfigError;
