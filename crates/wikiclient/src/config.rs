use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "wikiclient/0.1";

/// Which token family authorizes mutating calls on the target server.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// `meta=tokens&type=csrf` (MediaWiki 1.24+).
    Csrf,
    /// Legacy `action=tokens&type=edit`.
    Edit,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csrf => "csrf",
            Self::Edit => "edit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csrf" => Some(Self::Csrf),
            "edit" => Some(Self::Edit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiConfig {
    #[serde(default)]
    pub wiki: WikiSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token_kind: Option<TokenKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Everything a Wiki handle needs; the only configuration surface of the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    /// No timeout when unset.
    pub timeout_ms: Option<u64>,
    pub credentials: Option<Credentials>,
    /// Detected from the server when unset.
    pub token_kind: Option<TokenKind>,
}

impl Default for WikiClientConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: None,
            credentials: None,
            token_kind: None,
        }
    }
}

impl WikiClientConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_config(&WikiConfig::default())
    }

    /// Resolve each value as env > config file > default.
    pub fn from_config(config: &WikiConfig) -> Self {
        Self::resolve(config, env_value)
    }

    /// Like [`WikiClientConfig::from_config`], reading overrides from `lookup` instead of the process env.
    pub fn resolve(config: &WikiConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let wiki = &config.wiki;
        let username = lookup("WIKI_USERNAME").or_else(|| wiki.username.clone());
        let password = lookup("WIKI_PASSWORD").or_else(|| wiki.password.clone());
        let credentials = match (username, password) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            _ => None,
        };

        Self {
            api_url: lookup("WIKI_API_URL")
                .or_else(|| wiki.api_url.clone())
                .unwrap_or_default(),
            user_agent: lookup("WIKI_USER_AGENT")
                .or_else(|| wiki.user_agent.clone())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout_ms: lookup("WIKI_HTTP_TIMEOUT_MS")
                .and_then(|value| value.parse::<u64>().ok())
                .or(wiki.timeout_ms),
            credentials,
            token_kind: lookup("WIKI_TOKEN_KIND")
                .and_then(|value| TokenKind::parse(&value))
                .or(wiki.token_kind),
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }
}

/// Load and parse a WikiConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<WikiConfig> {
    if !config_path.exists() {
        return Ok(WikiConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: WikiConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
