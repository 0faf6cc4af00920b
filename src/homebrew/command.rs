//! Homebrew 命令及其参数映射

use super::types::PackageId;
use std::collections::BTreeSet;
use std::fmt;

/// upgrade 的范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeStrategy {
    All,
    Only(BTreeSet<PackageId>),
}

/// 一次 brew 调用意图
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HomebrewCommand {
    List,
    Info(BTreeSet<PackageId>),
    Search(String),
    Install(BTreeSet<PackageId>),
    Uninstall(BTreeSet<PackageId>),
    Update,
    Upgrade(UpgradeStrategy),
}

impl HomebrewCommand {
    /// 命令对应的 brew 参数列表
    pub fn arguments(&self) -> Vec<String> {
        match self {
            HomebrewCommand::List => with_ids(&["info", "--json=v2", "--installed"], &BTreeSet::new()),
            HomebrewCommand::Info(ids) => with_ids(&["info", "--json=v2"], ids),
            HomebrewCommand::Search(query) => vec!["search".to_string(), query.clone()],
            HomebrewCommand::Install(ids) => with_ids(&["install"], ids),
            HomebrewCommand::Uninstall(ids) => with_ids(&["uninstall"], ids),
            HomebrewCommand::Update => vec!["update".to_string()],
            HomebrewCommand::Upgrade(UpgradeStrategy::All) => vec!["upgrade".to_string()],
            HomebrewCommand::Upgrade(UpgradeStrategy::Only(ids)) => with_ids(&["upgrade"], ids),
        }
    }

    /// install / uninstall 作用的包；其他命令返回 None
    pub fn mutation_targets(&self) -> Option<&BTreeSet<PackageId>> {
        match self {
            HomebrewCommand::Install(ids) | HomebrewCommand::Uninstall(ids) => Some(ids),
            _ => None,
        }
    }
}

impl fmt::Display for HomebrewCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "brew {}", self.arguments().join(" "))
    }
}

fn with_ids(head: &[&str], ids: &BTreeSet<PackageId>) -> Vec<String> {
    head.iter()
        .map(|s| s.to_string())
        .chain(ids.iter().map(|id| id.as_str().to_string()))
        .collect()
}

/// 由若干 ID 构造集合
pub fn id_set<I, T>(ids: I) -> BTreeSet<PackageId>
where
    I: IntoIterator<Item = T>,
    T: Into<PackageId>,
{
    ids.into_iter().map(Into::into).collect()
}
