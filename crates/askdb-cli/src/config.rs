//! Configuration file support

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use askdb_agent::{AgentConfig, ContextGuardConfig, PromptStyle, RunConfig};
use askdb_ai::Provider;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Configuration for askdb, loaded once at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// Default provider (openai, groq, openrouter, ollama, custom)
    pub provider: Option<String>,
    /// Endpoint override for OpenAI-compatible servers
    pub base_url: Option<String>,
    /// API keys (alternative to environment variables)
    pub api_keys: ApiKeys,
    pub database: DatabaseSettings,
    pub agent: AgentSettings,
    pub history: HistorySettings,
    pub paths: PathSettings,
    pub email: EmailSettings,
    pub tools: ToolSettings,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub groq: Option<String>,
    pub openrouter: Option<String>,
    pub custom: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// `sqlite:///path`, `sqlite://path` or a bare file path
    pub url: Option<String>,
    pub read_only: bool,
    pub query_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            read_only: true,
            query_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_iterations: u32,
    pub max_execution_secs: u64,
    pub max_retries: u32,
    pub prompt_style: String,
    pub show_steps: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        let run = RunConfig::default();
        Self {
            max_iterations: run.max_iterations,
            max_execution_secs: run.max_execution_time.as_secs(),
            max_retries: run.max_retries,
            prompt_style: PromptStyle::default().as_str().to_string(),
            show_steps: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub hard_ceiling: usize,
    pub soft_ceiling: usize,
    pub keep_recent: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        let guard = ContextGuardConfig::default();
        Self {
            hard_ceiling: guard.hard_ceiling,
            soft_ceiling: guard.soft_ceiling,
            keep_recent: guard.keep_recent,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Where charts, diagrams and reports are written
    pub report_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub from: Option<String>,
    pub outbox_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub charts: bool,
    pub email: bool,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            charts: true,
            email: true,
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("askdb")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("ASKDB_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load from an explicit path, falling back to defaults on any problem
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&Self::config_path())
    }

    fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some(DEFAULT_MODEL.to_string()),
            provider: Some("openai".to_string()),
            ..Config::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Get API key for a provider, checking config then env
    pub fn get_api_key(&self, provider: Provider) -> Option<String> {
        let from_config = match provider {
            Provider::OpenAI => self.api_keys.openai.clone(),
            Provider::Groq => self.api_keys.groq.clone(),
            Provider::OpenRouter => self.api_keys.openrouter.clone(),
            Provider::Custom => self.api_keys.custom.clone(),
            Provider::Ollama => None,
        };

        if from_config.is_some() {
            return from_config;
        }

        provider
            .api_key_env_var()
            .and_then(|var| std::env::var(var).ok())
    }

    pub fn model_id(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn provider(&self) -> askdb_ai::Result<Provider> {
        self.provider.as_deref().unwrap_or("openai").parse()
    }

    pub fn prompt_style(&self) -> askdb_agent::Result<PromptStyle> {
        self.agent.prompt_style.parse()
    }

    /// Reasoning loop settings
    pub fn agent_config(&self) -> askdb_agent::Result<AgentConfig> {
        let guard = ContextGuardConfig {
            hard_ceiling: self.history.hard_ceiling,
            soft_ceiling: self.history.soft_ceiling,
            keep_recent: self.history.keep_recent,
        };
        if guard.soft_ceiling > guard.hard_ceiling {
            return Err(askdb_agent::Error::InvalidConfig(format!(
                "history soft_ceiling ({}) exceeds hard_ceiling ({})",
                guard.soft_ceiling, guard.hard_ceiling
            )));
        }

        Ok(AgentConfig {
            run: RunConfig {
                max_iterations: self.agent.max_iterations,
                max_execution_time: Duration::from_secs(self.agent.max_execution_secs),
                max_retries: self.agent.max_retries,
            },
            context_guard: guard,
            prompt_style: self.prompt_style()?,
            ..AgentConfig::default()
        })
    }

    pub fn report_dir(&self) -> PathBuf {
        self.paths
            .report_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("reports"))
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.email
            .outbox_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("outbox"))
    }

    pub fn email_from(&self) -> &str {
        self.email.from.as_deref().unwrap_or("askdb@localhost")
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# askdb configuration file
# Place at ~/.config/askdb/config.toml (Linux/Mac) or %APPDATA%\askdb\config.toml (Windows)

# Default model to use
model = "gpt-4o-mini"

# Provider (openai, groq, openrouter, ollama, custom)
provider = "openai"

# Endpoint override for OpenAI-compatible servers (optional)
# base_url = "http://localhost:11434/v1"

[database]
# sqlite:///absolute/path.db, sqlite://relative/path.db or a bare path
url = "sqlite:///path/to/database.db"
read_only = true
query_timeout_secs = 30

[agent]
max_iterations = 15
max_execution_secs = 300
# Consecutive malformed completions tolerated before giving up
max_retries = 2
# plain, schema-aware, visualization
prompt_style = "schema-aware"
show_steps = false

# Conversation history limits, in characters
[history]
hard_ceiling = 50000
soft_ceiling = 12000
keep_recent = 4

[paths]
# report_dir = "reports"

[email]
# from = "analyst@example.com"
# outbox_dir = "~/.config/askdb/outbox"

[tools]
charts = true
email = true

# API keys (optional - can also use environment variables)
[api_keys]
# openai = "sk-..."
"#
}
