//! Provider configuration loaded from the environment.
//!
//! Mirrors the profiled env-loading shape (`STUPID_PROFILE`-prefixed lookup
//! falling back to the bare key) that used to live in the now-dropped
//! `stupid-core` crate. Trimmed down to just the two configs this crate
//! needs: `LlmConfig` for whichever provider is active, and `OllamaConfig`
//! for the local-model case.

use std::env;

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

fn profiled_env_opt(key: &str) -> Option<String> {
    if let Some(profile) = profile_prefix() {
        if let Ok(v) = env::var(format!("{}_{}", profile.to_uppercase(), key)) {
            return Some(v);
        }
    }
    env::var(key).ok()
}

fn profiled_env_f32(key: &str, default: f32) -> f32 {
    profiled_env_opt(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(key: &str, default: u32) -> u32 {
    profiled_env_opt(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmConfig {
    pub fn from_env_profiled() -> Self {
        Self {
            provider: profiled_env_or("LLM_PROVIDER", "anthropic"),
            openai_api_key: profiled_env_opt("OPENAI_API_KEY"),
            openai_model: profiled_env_or("OPENAI_MODEL", "gpt-4o"),
            openai_base_url: profiled_env_opt("OPENAI_BASE_URL"),
            anthropic_api_key: profiled_env_opt("ANTHROPIC_API_KEY"),
            anthropic_model: profiled_env_or("ANTHROPIC_MODEL", "claude-sonnet-4-20250514"),
            gemini_api_key: profiled_env_opt("GEMINI_API_KEY"),
            gemini_model: profiled_env_or("GEMINI_MODEL", "gemini-1.5-pro"),
            temperature: profiled_env_f32("LLM_TEMPERATURE", 0.2),
            max_tokens: profiled_env_u32("LLM_MAX_TOKENS", 4096),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub url: String,
    pub model: String,
    pub embedding_model: String,
}

impl OllamaConfig {
    pub fn from_env_profiled() -> Self {
        Self {
            url: profiled_env_or("OLLAMA_URL", "http://localhost:11434"),
            model: profiled_env_or("OLLAMA_MODEL", "llama3.1"),
            embedding_model: profiled_env_or("OLLAMA_EMBEDDING_MODEL", "nomic-embed-text"),
        }
    }
}
