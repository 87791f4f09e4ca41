pub mod agent;
pub mod config;

pub use agent::{Agent, AgentError};
pub use config::AgentCliConfig;
