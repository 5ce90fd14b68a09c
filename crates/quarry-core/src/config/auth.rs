//! Authentication mode configuration.
//!
//! The mode decides whether MCP token checks run at all. It comes from
//! `quarry.yaml` and can be overridden by the environment:
//!
//! 1. `AUTH_MODE` (`NONE`, `LITE`, `SUPABASE_GOOGLE`)
//! 2. `AUTH_PROVIDER` (deprecated, `NONE` or `LITE` only)
//! 3. `DEPLOY_MODE` (`ONPREM` implies `LITE`, `SAAS` implies `SUPABASE_GOOGLE`)

use serde::{Deserialize, Serialize};

/// Deployment authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthMode {
    /// No authentication: every check passes.
    #[default]
    None,
    Lite,
    SupabaseGoogle,
}

impl AuthMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NONE" => Some(AuthMode::None),
            "LITE" => Some(AuthMode::Lite),
            "SUPABASE_GOOGLE" => Some(AuthMode::SupabaseGoogle),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        *self == AuthMode::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,

    /// Identity used when the mode is `NONE`.
    #[serde(default = "default_username")]
    pub default_username: String,

    /// Environment variable holding the caller's MCP token for the stdio carrier.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            default_username: default_username(),
            token_env: default_token_env(),
        }
    }
}

impl AuthConfig {
    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = resolve_mode(&lookup) {
            self.mode = mode;
        }
        if let Some(username) = lookup("AUTH_DEFAULT_USERNAME") {
            let username = username.trim();
            if !username.is_empty() {
                self.default_username = username.to_string();
            }
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }
}

fn resolve_mode<F>(lookup: &F) -> Option<AuthMode>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(direct) = lookup("AUTH_MODE").as_deref().and_then(AuthMode::parse) {
        return Some(direct);
    }

    if let Some(legacy) = lookup("AUTH_PROVIDER") {
        let legacy = match legacy.trim().to_ascii_uppercase().as_str() {
            "NONE" => Some(AuthMode::None),
            "LITE" => Some(AuthMode::Lite),
            _ => None,
        };
        if legacy.is_some() {
            tracing::warn!("AUTH_PROVIDER is deprecated, use AUTH_MODE instead");
            return legacy;
        }
    }

    match lookup("DEPLOY_MODE")?.trim().to_ascii_uppercase().as_str() {
        "ONPREM" => Some(AuthMode::Lite),
        "SAAS" => Some(AuthMode::SupabaseGoogle),
        _ => None,
    }
}

fn default_username() -> String {
    "guest".to_string()
}

fn default_token_env() -> String {
    "QUARRY_MCP_TOKEN".to_string()
}
