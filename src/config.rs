use crate::homebrew::ProcessRunner;
use crate::queue::QueueOptions;
use crate::repository::RefreshFailurePolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// brew 的常见安装位置，按顺序探测
const BREW_LOCATIONS: &[&str] = &[
    "/opt/homebrew/bin/brew",
    "/usr/local/bin/brew",
    "/home/linuxbrew/.linuxbrew/bin/brew",
];

pub const EXECUTABLE_ENV: &str = "LIAN_BREW_EXECUTABLE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub executable_path: PathBuf,
    pub refresh_failure: RefreshFailurePolicy,
    pub event_capacity: usize,
    pub retained_operations: usize,
    pub interrupt_grace_ms: u64,
    pub terminate_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            executable_path: detect_executable(),
            refresh_failure: RefreshFailurePolicy::default(),
            event_capacity: 1024,
            retained_operations: 64,
            interrupt_grace_ms: 5000,
            terminate_grace_ms: 1000,
        }
    }
}

impl Config {
    pub fn config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".config/lian-brew/config.toml")
    }

    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            Self::default()
        };

        // 环境变量优先于配置文件
        if let Ok(executable) = std::env::var(EXECUTABLE_ENV) {
            if !executable.trim().is_empty() {
                config.executable_path = PathBuf::from(executable);
            }
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件 {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("配置文件格式错误 {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            event_capacity: self.event_capacity,
            retained_operations: self.retained_operations,
        }
    }

    pub fn runner(&self) -> ProcessRunner {
        ProcessRunner::new(
            Duration::from_millis(self.interrupt_grace_ms),
            Duration::from_millis(self.terminate_grace_ms),
        )
    }
}

fn detect_executable() -> PathBuf {
    BREW_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from("/usr/local/bin/brew"))
}
