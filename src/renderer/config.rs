//! Browser renderer configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Browser renderer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserEngineConfig {
    /// Run in headless mode (default: true).
    /// Some sites serve an empty comment feed to headless sessions; set to
    /// false when a target keeps reporting zero comments.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    #[serde(default)]
    pub proxy: Option<String>,

    /// Navigation and DevTools request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Profile directory to reuse logins and cookies across runs.
    #[serde(default)]
    pub user_data_dir: Option<PathBuf>,
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            proxy: None,
            timeout: default_timeout(),
            chrome_args: Vec::new(),
            remote_url: None,
            user_data_dir: None,
        }
    }
}

pub fn default_headless() -> bool {
    true
}

pub fn default_timeout() -> u64 {
    30
}
