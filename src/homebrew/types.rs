//! Homebrew 相关基础数据类型

use serde::{Deserialize, Serialize};
use std::fmt;

use super::parser::clean_terminal_output;

/// 包标识（formula 名或 cask token），与版本无关
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for PackageId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// 外部命令的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// 失败时展示给用户的输出：优先 stderr，为空时退回 stdout
    pub fn failure_output(&self) -> String {
        let raw = if self.stderr.iter().all(u8::is_ascii_whitespace) {
            self.stdout_lossy()
        } else {
            self.stderr_lossy()
        };
        clean_terminal_output(raw.trim())
    }
}
