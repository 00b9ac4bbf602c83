//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::Result;
use crate::error::Error;
use crate::orchestrator::{BackendConfig, RoutingTable};
use crate::retry::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for file-backed collaborators (workspace items, session index)
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Gemini API key (`GEMINI_API_KEY` overrides an empty value)
    #[serde(default)]
    pub gemini_api_key: String,

    /// Anthropic API key (`ANTHROPIC_API_KEY` overrides an empty value)
    #[serde(default)]
    pub anthropic_api_key: String,

    /// Maximum backend calls per agent loop
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Number of prior turns rendered into each request
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Keyword that forces the external-workspace category
    #[serde(default = "default_workspace_keyword")]
    pub workspace_keyword: String,

    /// Backend per task category
    #[serde(default)]
    pub routing: RoutingTable,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub mcp: McpConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Browser automation service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Base URL of the automation service; browser tools are disabled when empty
    #[serde(default = "default_browser_url")]
    pub service_url: String,

    /// Maximum LINK entries in an action surface
    #[serde(default = "default_max_links")]
    pub max_links: usize,

    /// Persisted user -> session index
    #[serde(default = "default_session_index")]
    pub session_index: PathBuf,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            service_url: default_browser_url(),
            max_links: default_max_links(),
            session_index: default_session_index(),
        }
    }
}

/// External-workspace tool process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Program spawned once per user
    #[serde(default = "default_mcp_command")]
    pub command: String,

    #[serde(default = "default_mcp_args")]
    pub args: Vec<String>,

    /// Environment variable that receives the user's workspace token
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_mcp_command(),
            args: default_mcp_args(),
            token_env: default_token_env(),
        }
    }
}

/// Context retrieval settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Retrieval endpoint; no context is retrieved when unset
    #[serde(default)]
    pub url: Option<String>,
}

/// Retry settings applied to every external call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

fn default_workspace() -> PathBuf {
    config_dir().join("workspace")
}

fn default_max_steps() -> usize {
    5
}

fn default_history_window() -> usize {
    20
}

fn default_workspace_keyword() -> String {
    "notion".to_string()
}

fn default_browser_url() -> String {
    "http://127.0.0.1:3100".to_string()
}

fn default_max_links() -> usize {
    15
}

fn default_session_index() -> PathBuf {
    config_dir().join("browser_sessions.json")
}

fn default_mcp_command() -> String {
    "npx".to_string()
}

fn default_mcp_args() -> Vec<String> {
    vec!["-y".to_string(), "@notionhq/notion-mcp-server".to_string()]
}

fn default_token_env() -> String {
    "NOTION_TOKEN".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            gemini_api_key: String::new(),
            anthropic_api_key: String::new(),
            max_steps: default_max_steps(),
            history_window: default_history_window(),
            workspace_keyword: default_workspace_keyword(),
            routing: RoutingTable::default(),
            browser: BrowserConfig::default(),
            mcp: McpConfig::default(),
            retrieval: RetrievalConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Fill empty API keys from the environment.
    pub fn apply_env(&mut self) {
        if self.gemini_api_key.is_empty() {
            if let Ok(key) = std::env::var("GEMINI_API_KEY") {
                self.gemini_api_key = key;
            }
        }
        if self.anthropic_api_key.is_empty() {
            if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
                self.anthropic_api_key = key;
            }
        }
    }

    /// Every backend referenced by the routing table.
    pub fn backends(&self) -> Vec<&BackendConfig> {
        self.routing.all()
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".switchboard")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from the default path
pub fn load() -> Result<Config> {
    load_from(&config_path())
}

/// Load configuration from a file
pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config not found at {:?}. Run 'switchboard onboard' first.",
            path
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let mut config: Config = serde_json::from_str(&content)?;
    config.apply_env();
    Ok(config)
}

/// Save configuration to file
pub fn save(config: &Config) -> Result<()> {
    save_to(config, &config_path())
}

pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Initialize configuration and workspace
pub fn onboard() -> Result<()> {
    use crate::ui;
    use inquire::{Confirm, Text};

    ui::print_header("Setup Wizard");
    println!("  I'll help you get Switchboard configured in a few steps.\n");

    let mut config = Config::default();

    // 1. Provider keys
    config.gemini_api_key = Text::new("Gemini API key (fast backend, leave empty to use GEMINI_API_KEY):")
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
    config.anthropic_api_key = Text::new("Anthropic API key (tool-capable backend, leave empty to use ANTHROPIC_API_KEY):")
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    // 2. Browser service
    let url = Text::new("Browser automation service URL:")
        .with_default(&config.browser.service_url)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
    config.browser.service_url = url;

    // 3. External workspace tools
    config.mcp.enabled = Confirm::new("Enable external-workspace tools (spawns an MCP server per user)?")
        .with_default(false)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    // 4. Folders + save
    ui::print_thinking("Creating directories");
    std::fs::create_dir_all(&config.workspace)?;

    ui::print_thinking("Saving configuration");
    save(&config)?;

    println!();
    ui::print_success("Setup complete!");
    ui::print_step("Run 'switchboard ask' to start.");

    Ok(())
}

/// Delete all configuration and data
pub fn reset() -> Result<()> {
    use inquire::Confirm;
    use crate::ui;

    ui::print_warning("CAUTION: This will delete all Switchboard configuration, credentials and session records.");

    let confirmed = Confirm::new("Are you absolutely sure?")
        .with_default(false)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    if confirmed {
        let dir = config_dir();
        if dir.exists() {
            ui::print_thinking(&format!("Deleting {:?}", dir));
            std::fs::remove_dir_all(dir)?;
            ui::print_success("Switchboard has been reset.");
        } else {
            ui::print_step("No configuration directory found.");
        }
    } else {
        ui::print_step("Reset cancelled.");
    }

    Ok(())
}
