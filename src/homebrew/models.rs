//! `brew info --json=v2` 文档模型

use super::types::PackageId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HomebrewInfo {
    #[serde(default)]
    pub formulae: Vec<Formula>,
    #[serde(default)]
    pub casks: Vec<Cask>,
}

impl HomebrewInfo {
    pub fn len(&self) -> usize {
        self.formulae.len() + self.casks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulae.is_empty() && self.casks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    #[serde(rename = "name")]
    pub id: PackageId,
    pub full_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub homepage: String,
    pub versions: FormulaVersions,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub keg_only: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub outdated: bool,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub installed: Vec<InstalledKeg>,
}

impl Formula {
    /// 当前安装的 keg（brew 把最新的放在第一位）
    pub fn installed_keg(&self) -> Option<&InstalledKeg> {
        self.installed.first()
    }

    /// 是否由用户显式安装（区别于作为依赖被拉进来）
    pub fn installed_on_request(&self) -> bool {
        self.installed_keg()
            .map(|keg| keg.installed_on_request)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaVersions {
    #[serde(default)]
    pub stable: Option<String>,
    #[serde(default)]
    pub head: Option<String>,
    #[serde(default)]
    pub bottle: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledKeg {
    pub version: String,
    #[serde(default)]
    pub runtime_dependencies: Vec<RuntimeDependency>,
    #[serde(default)]
    pub installed_as_dependency: bool,
    #[serde(default)]
    pub installed_on_request: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeDependency {
    pub full_name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cask {
    #[serde(rename = "token")]
    pub id: PackageId,
    #[serde(default, rename = "name")]
    pub names: Vec<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub url: Option<String>,
    pub version: String,
    #[serde(default)]
    pub installed: Option<String>,
    #[serde(default)]
    pub auto_updates: Option<bool>,
    #[serde(default)]
    pub outdated: bool,
}

/// `brew search` 的结果：两类 ID 列表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    pub formulae: Vec<PackageId>,
    pub casks: Vec<PackageId>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.formulae.is_empty() && self.casks.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &PackageId> {
        self.formulae.iter().chain(self.casks.iter())
    }
}
