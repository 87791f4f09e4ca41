//! CLI-level configuration: the `stupid-agent` binary's own env-driven
//! knobs on top of `stupid_llm::LlmConfig`/`OllamaConfig` and
//! `stupid_tool_runtime::LoopConfig`.
//!
//! Follows the same `STUPID_PROFILE`-prefixed env lookup
//! `stupid_llm::config` uses, so a single `.env` can carry both crates'
//! settings under one profile.

use std::env;
use std::path::PathBuf;

fn profile_prefix() -> Option<String> {
    env::var("STUPID_PROFILE").ok().filter(|p| !p.is_empty())
}

fn profiled_env_or(key: &str, default: &str) -> String {
    if let Some(profile) = profile_prefix() {
        if let Ok(v) = env::var(format!("{}_{}", profile.to_uppercase(), key)) {
            return v;
        }
    }
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn profiled_env_usize(key: &str, default: usize) -> usize {
    profiled_env_or(key, &default.to_string()).parse().unwrap_or(default)
}

/// What the `agent-cli` binary needs beyond the LLM provider credentials
/// already covered by `stupid_llm::LlmConfig`.
#[derive(Debug, Clone)]
pub struct AgentCliConfig {
    pub system_prompt: String,
    pub working_directory: PathBuf,
    pub tool_call_cutoff: usize,
    pub max_concurrent_tools: usize,
}

impl AgentCliConfig {
    pub fn from_env_profiled() -> Self {
        Self {
            system_prompt: profiled_env_or(
                "AGENT_SYSTEM_PROMPT",
                "You are a careful, terse coding assistant with access to shell, file-read, and \
                 file-write tools. Use tools when they let you verify a claim instead of guessing.",
            ),
            working_directory: PathBuf::from(profiled_env_or(
                "AGENT_WORKING_DIR",
                &env::current_dir().map(|p| p.display().to_string()).unwrap_or_else(|_| ".".to_string()),
            )),
            tool_call_cutoff: profiled_env_usize("AGENT_TOOL_CALL_CUTOFF", 40),
            max_concurrent_tools: profiled_env_usize("AGENT_MAX_CONCURRENT_TOOLS", 4),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("STUPID_PROFILE");
        env::remove_var("AGENT_TOOL_CALL_CUTOFF");
        let cfg = AgentCliConfig::from_env_profiled();
        assert_eq!(cfg.tool_call_cutoff, 40);
        assert_eq!(cfg.max_concurrent_tools, 4);
    }

    #[test]
    fn profile_prefix_wins_over_bare_key() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("STUPID_PROFILE", "test");
        env::set_var("AGENT_TOOL_CALL_CUTOFF", "10");
        env::set_var("TEST_AGENT_TOOL_CALL_CUTOFF", "99");
        let cfg = AgentCliConfig::from_env_profiled();
        assert_eq!(cfg.tool_call_cutoff, 99);
        env::remove_var("STUPID_PROFILE");
        env::remove_var("AGENT_TOOL_CALL_CUTOFF");
        env::remove_var("TEST_AGENT_TOOL_CALL_CUTOFF");
    }
}
