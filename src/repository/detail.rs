//! 单个包的详情视图：包记录 + 当前活动

use super::package::Package;
use crate::homebrew::PackageId;
use crate::queue::Activity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityPhase {
    Started,
    Completed,
    Failed,
}

/// 仓库在安装 / 卸载前后发出的事件，独立于队列的操作状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEvent {
    pub id: PackageId,
    pub activity: Activity,
    pub phase: ActivityPhase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDetail {
    pub package: Package,
    pub activity: Option<Activity>,
}

impl PackageDetail {
    pub fn new(package: Package) -> Self {
        Self {
            package,
            activity: None,
        }
    }

    pub fn id(&self) -> &PackageId {
        &self.package.id
    }

    // 以下方法都返回详情是否发生了变化

    pub fn apply_event(&mut self, event: &ActivityEvent) -> bool {
        if event.id != self.package.id {
            return false;
        }

        let before = self.clone();
        match (event.phase, event.activity) {
            (ActivityPhase::Started, activity) => self.activity = Some(activity),
            (ActivityPhase::Completed, Activity::Uninstalling) => {
                self.package.installed_version = None;
                self.activity = None;
            }
            (ActivityPhase::Completed, Activity::Installing) => {
                self.package.installed_version = Some(self.package.latest_version.clone());
                self.activity = None;
            }
            (ActivityPhase::Failed, _) => self.activity = None,
        }
        *self != before
    }

    /// 已安装快照里有这个包时，采用快照中的安装版本
    pub fn adopt_snapshot(&mut self, installed: &super::Packages) -> bool {
        let Some(known) = installed.get(&self.package.id) else {
            return false;
        };
        if self.package.installed_version == known.installed_version {
            return false;
        }
        self.package.installed_version = known.installed_version.clone();
        true
    }

    pub fn replace_package(&mut self, package: Package) -> bool {
        if package.id != self.package.id || package == self.package {
            return false;
        }
        self.package = package;
        true
    }

    pub fn set_activity(&mut self, activity: Option<Activity>) -> bool {
        if self.activity == activity {
            return false;
        }
        self.activity = activity;
        true
    }
}
