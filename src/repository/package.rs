//! 面向界面的包模型：formula 与 cask 统一为 `Package`

use crate::homebrew::{Cask, Formula, HomebrewInfo, PackageId};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    Formula,
    Cask,
}

impl PackageKind {
    pub fn label(&self) -> &'static str {
        match self {
            PackageKind::Formula => "formula",
            PackageKind::Cask => "cask",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    pub id: PackageId,
    pub kind: PackageKind,
    pub name: String,
    pub description: Option<String>,
    pub homepage: String,
    /// `None` 表示未安装
    pub installed_version: Option<String>,
    pub latest_version: String,
}

impl Package {
    pub fn is_installed(&self) -> bool {
        self.installed_version.is_some()
    }
}

impl From<&Formula> for Package {
    fn from(formula: &Formula) -> Self {
        let latest_version = formula
            .versions
            .stable
            .clone()
            .or_else(|| formula.versions.head.clone())
            .unwrap_or_default();

        Self {
            id: formula.id.clone(),
            kind: PackageKind::Formula,
            name: formula.full_name.clone(),
            description: formula.desc.clone(),
            homepage: formula.homepage.clone(),
            installed_version: formula.installed_keg().map(|keg| keg.version.clone()),
            latest_version,
        }
    }
}

impl From<&Cask> for Package {
    fn from(cask: &Cask) -> Self {
        Self {
            id: cask.id.clone(),
            kind: PackageKind::Cask,
            name: cask
                .names
                .first()
                .cloned()
                .unwrap_or_else(|| cask.id.to_string()),
            description: cask.desc.clone(),
            homepage: cask.homepage.clone(),
            installed_version: cask.installed.clone(),
            latest_version: cask.version.clone(),
        }
    }
}

/// 两组有序的包，按 ID 跨组查找
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Packages {
    pub formulae: Vec<Package>,
    pub casks: Vec<Package>,
}

impl Packages {
    pub fn from_info(info: &HomebrewInfo) -> Self {
        Self {
            formulae: info.formulae.iter().map(Package::from).collect(),
            casks: info.casks.iter().map(Package::from).collect(),
        }
    }

    /// 已安装列表只保留显式安装的 formula，作为依赖装进来的不显示
    pub fn installed_from_info(info: &HomebrewInfo) -> Self {
        Self {
            formulae: info
                .formulae
                .iter()
                .filter(|formula| formula.installed_on_request())
                .map(Package::from)
                .collect(),
            casks: info.casks.iter().map(Package::from).collect(),
        }
    }

    pub fn count(&self) -> usize {
        self.formulae.len() + self.casks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulae.is_empty() && self.casks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.formulae.iter().chain(self.casks.iter())
    }

    pub fn get(&self, id: &PackageId) -> Option<&Package> {
        self.iter().find(|package| package.id == *id)
    }

    pub fn get_mut(&mut self, id: &PackageId) -> Option<&mut Package> {
        self.formulae
            .iter_mut()
            .chain(self.casks.iter_mut())
            .find(|package| package.id == *id)
    }

    /// 用已安装快照覆盖安装状态；快照里没有的包保持原样
    pub fn join_installed(&mut self, installed: &Packages) {
        for package in self.formulae.iter_mut().chain(self.casks.iter_mut()) {
            if let Some(known) = installed.get(&package.id) {
                package.installed_version = known.installed_version.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homebrew::parser::parse_info;
    use crate::testing::{INFO_INSTALLED_JSON, INFO_SEARCH_JSON};

    #[test]
    fn installed_list_skips_dependencies() {
        let info = parse_info(INFO_INSTALLED_JSON.as_bytes()).unwrap();
        let packages = Packages::installed_from_info(&info);

        assert_eq!(packages.count(), 2);
        let jq = packages.get(&PackageId::from("jq")).unwrap();
        assert_eq!(jq.installed_version.as_deref(), Some("1.7.1"));
        assert_eq!(jq.kind, PackageKind::Formula);
        assert!(packages.get(&PackageId::from("oniguruma")).is_none());

        let code = packages.get(&PackageId::from("visual-studio-code")).unwrap();
        assert_eq!(code.name, "Microsoft Visual Studio Code");
        assert_eq!(code.kind, PackageKind::Cask);
    }

    #[test]
    fn join_prefers_installed_snapshot() {
        let info = parse_info(INFO_SEARCH_JSON.as_bytes()).unwrap();
        let mut results = Packages::from_info(&info);

        let mut installed = Packages::from_info(&info);
        installed.formulae.retain(|package| package.id.as_str() == "jq");
        installed.casks.clear();
        installed.get_mut(&PackageId::from("jq")).unwrap().installed_version = None;

        results.join_installed(&installed);
        assert_eq!(results.get(&PackageId::from("jq")).unwrap().installed_version, None);
        assert_eq!(results.get(&PackageId::from("jqbx")).unwrap().name, "JQBX");
        assert_eq!(results.get(&PackageId::from("jo")).unwrap().latest_version, "1.9");
    }
}
