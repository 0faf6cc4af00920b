//! 包状态仓库
//!
//! 已安装列表、搜索结果与单包详情的唯一内存视图。所有 brew 调用都经由命令队列，
//! 卸载时先在本地把安装版本置空，安装 / 卸载成功后自动重新同步。

pub mod detail;
pub mod package;

pub use detail::{ActivityEvent, ActivityPhase, PackageDetail};
pub use package::{Package, PackageKind, Packages};

use crate::error::BrewError;
use crate::homebrew::{Homebrew, PackageId, UpgradeStrategy};
use crate::queue::{Activity, CommandQueue, Operation, OperationId, OperationTracker};
use crate::stream::{watch_stream, BoxStream};
use futures_util::future;
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// 刷新已安装列表失败时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshFailurePolicy {
    /// 清空列表，视为“当前一无所知”
    #[default]
    Empty,
    /// 保留上一次成功的结果
    PreserveLastGood,
}

struct Inner {
    homebrew: Homebrew,
    tracker: OperationTracker,
    policy: RefreshFailurePolicy,
    /// `None` 表示还没有完成过刷新
    packages: watch::Sender<Option<Packages>>,
    refreshing: watch::Sender<bool>,
    search_results: watch::Sender<Option<Packages>>,
    /// refresh_detail 得到的最新包记录
    details: watch::Sender<HashMap<PackageId, Package>>,
    activity_events: broadcast::Sender<ActivityEvent>,
}

/// 可自由克隆，所有克隆共享同一份状态
#[derive(Clone)]
pub struct PackageRepository {
    inner: Arc<Inner>,
}

impl PackageRepository {
    pub fn new(queue: CommandQueue, policy: RefreshFailurePolicy) -> Self {
        let tracker = OperationTracker::new(&queue);
        let (activity_events, _) = broadcast::channel(256);

        Self {
            inner: Arc::new(Inner {
                homebrew: Homebrew::new(queue),
                tracker,
                policy,
                packages: watch::Sender::new(None),
                refreshing: watch::Sender::new(false),
                search_results: watch::Sender::new(None),
                details: watch::Sender::new(HashMap::new()),
                activity_events,
            }),
        }
    }

    pub fn homebrew(&self) -> &Homebrew {
        &self.inner.homebrew
    }

    pub fn tracker(&self) -> &OperationTracker {
        &self.inner.tracker
    }

    // ===== 已安装列表 =====

    /// 重新读取已安装列表
    ///
    /// 已有刷新在进行时不会再提交新的 `List`，只等待那一次结束。
    /// 失败不会返回错误，按 `RefreshFailurePolicy` 处理。
    pub async fn refresh(&self) {
        let started = self.inner.refreshing.send_if_modified(|refreshing| {
            if *refreshing {
                return false;
            }
            *refreshing = true;
            true
        });

        if started {
            // 刷新在独立任务中完成，与调用方的等待解耦
            let repository = self.clone();
            tokio::spawn(async move { repository.run_refresh().await });
        } else {
            log::debug!("已有刷新在进行，合并本次请求");
        }

        let mut refreshing = self.inner.refreshing.subscribe();
        let _ = refreshing.wait_for(|refreshing| !*refreshing).await;
    }

    async fn run_refresh(&self) {
        match self.inner.homebrew.installed_packages().await {
            Ok(info) => {
                let packages = Packages::installed_from_info(&info);
                log::info!(
                    "已安装 {} 个 formula, {} 个 cask",
                    packages.formulae.len(),
                    packages.casks.len()
                );
                self.inner.packages.send_replace(Some(packages));
            }
            Err(e) => {
                log::warn!("刷新已安装列表失败: {}", e);
                match self.inner.policy {
                    RefreshFailurePolicy::Empty => {
                        self.inner.packages.send_replace(Some(Packages::default()));
                    }
                    RefreshFailurePolicy::PreserveLastGood => {
                        self.inner.packages.send_if_modified(|packages| {
                            if packages.is_some() {
                                return false;
                            }
                            *packages = Some(Packages::default());
                            true
                        });
                    }
                }
            }
        }
        self.inner.refreshing.send_replace(false);
    }

    /// 已安装列表流，首次刷新完成之前不发出任何值
    pub fn packages(&self) -> BoxStream<Packages> {
        watch_stream(self.inner.packages.subscribe())
            .filter_map(future::ready)
            .boxed()
    }

    pub fn packages_snapshot(&self) -> Option<Packages> {
        self.inner.packages.borrow().clone()
    }

    pub fn refreshing(&self) -> BoxStream<bool> {
        watch_stream(self.inner.refreshing.subscribe()).boxed()
    }

    pub fn is_refreshing(&self) -> bool {
        *self.inner.refreshing.borrow()
    }

    // ===== 安装 / 卸载 =====

    pub async fn install(&self, ids: BTreeSet<PackageId>) -> Result<String, BrewError> {
        self.mutate(Activity::Installing, ids).await
    }

    /// 提交前先把这些包的安装版本置空；失败时不回滚
    pub async fn uninstall(&self, ids: BTreeSet<PackageId>) -> Result<String, BrewError> {
        self.mutate(Activity::Uninstalling, ids).await
    }

    async fn mutate(
        &self,
        activity: Activity,
        ids: BTreeSet<PackageId>,
    ) -> Result<String, BrewError> {
        if ids.is_empty() {
            return Ok(String::new());
        }

        if activity == Activity::Uninstalling {
            self.inner.packages.send_if_modified(|packages| {
                let Some(packages) = packages.as_mut() else {
                    return false;
                };
                let mut changed = false;
                for id in &ids {
                    if let Some(package) = packages.get_mut(id) {
                        changed |= package.installed_version.take().is_some();
                    }
                }
                changed
            });
        }

        self.emit(&ids, activity, ActivityPhase::Started);
        let result = match activity {
            Activity::Installing => self.inner.homebrew.install(ids.clone()).await,
            Activity::Uninstalling => self.inner.homebrew.uninstall(ids.clone()).await,
        };

        match &result {
            Ok(_) => {
                self.emit(&ids, activity, ActivityPhase::Completed);
                self.resync(&ids).await;
            }
            Err(e) => {
                log::warn!("{:?} 失败: {}", activity, e);
                self.emit(&ids, activity, ActivityPhase::Failed);
            }
        }
        result
    }

    fn emit(&self, ids: &BTreeSet<PackageId>, activity: Activity, phase: ActivityPhase) {
        for id in ids {
            let _ = self.inner.activity_events.send(ActivityEvent {
                id: id.clone(),
                activity,
                phase,
            });
        }
    }

    /// 修改成功后：刷新已安装列表，并重新查询受影响包的详情
    async fn resync(&self, ids: &BTreeSet<PackageId>) {
        let (_, details) = tokio::join!(self.refresh(), self.store_details(ids));
        if let Err(e) = details {
            log::warn!("更新包详情失败: {}", e);
        }
    }

    /// 安装 / 卸载事件流
    pub fn activity_events(&self) -> broadcast::Receiver<ActivityEvent> {
        self.inner.activity_events.subscribe()
    }

    /// 包当前活动（来自操作跟踪）
    pub fn activity(&self, id: &PackageId) -> BoxStream<Option<Activity>> {
        self.inner.tracker.activity(id)
    }

    // ===== 查询 =====

    /// 搜索并批量查询结果的详细信息，安装状态以已安装列表为准
    pub async fn search(&self, query: &str) -> Result<Packages, BrewError> {
        let results = self.inner.homebrew.search(query).await?;
        let ids: BTreeSet<PackageId> = results.ids().cloned().collect();
        let packages = self.info(&ids).await?;

        log::debug!("搜索 {:?} 得到 {} 个结果", query, packages.count());
        self.inner.search_results.send_replace(Some(packages.clone()));
        Ok(packages)
    }

    pub fn search_results(&self) -> BoxStream<Packages> {
        watch_stream(self.inner.search_results.subscribe())
            .filter_map(future::ready)
            .boxed()
    }

    /// 批量查询；空集合不调用 brew
    pub async fn info(&self, ids: &BTreeSet<PackageId>) -> Result<Packages, BrewError> {
        let info = self.inner.homebrew.info(ids).await?;
        let mut packages = Packages::from_info(&info);
        if let Some(installed) = self.packages_snapshot() {
            packages.join_installed(&installed);
        }
        Ok(packages)
    }

    /// 重新查询单个包，结果会合并进该包所有的详情流
    pub async fn refresh_detail(&self, id: &PackageId) -> Result<Package, BrewError> {
        let ids = BTreeSet::from([id.clone()]);
        let mut found = self.store_details(&ids).await?;
        found
            .remove(id)
            .ok_or_else(|| BrewError::MissingPackage(id.clone()))
    }

    async fn store_details(
        &self,
        ids: &BTreeSet<PackageId>,
    ) -> Result<HashMap<PackageId, Package>, BrewError> {
        let info = self.inner.homebrew.info(ids).await?;
        let packages = Packages::from_info(&info);
        let found: HashMap<PackageId, Package> = packages
            .formulae
            .into_iter()
            .chain(packages.casks)
            .filter(|package| ids.contains(&package.id))
            .map(|package| (package.id.clone(), package))
            .collect();

        if let Some(missing) = ids.iter().find(|id| !found.contains_key(*id)) {
            return Err(BrewError::MissingPackage(missing.clone()));
        }

        self.inner.details.send_modify(|details| {
            details.extend(found.iter().map(|(id, package)| (id.clone(), package.clone())));
        });
        Ok(found)
    }

    /// 单个包的详情流
    ///
    /// 合并 refresh_detail 的记录、已安装快照中的安装版本、操作跟踪的活动，
    /// 以及本仓库的安装 / 卸载事件。
    pub fn detail(&self, package: &Package) -> BoxStream<PackageDetail> {
        let id = package.id.clone();
        let mut detail = PackageDetail::new(package.clone());

        let stored = self.inner.details.borrow().get(&id).cloned();
        if let Some(stored) = stored {
            detail.replace_package(stored);
        }
        if let Some(installed) = self.packages_snapshot() {
            detail.adopt_snapshot(&installed);
        }
        detail.set_activity(self.inner.tracker.current_activity(&id));

        let (tx, rx) = watch::channel(detail);
        tokio::spawn(fold_detail(
            tx,
            id.clone(),
            self.inner.tracker.activity(&id),
            self.inner.details.subscribe(),
            self.inner.packages.subscribe(),
            self.inner.activity_events.subscribe(),
        ));

        watch_stream(rx).boxed()
    }

    // ===== 其他命令 =====

    pub async fn update(&self) -> Result<String, BrewError> {
        let output = self.inner.homebrew.update().await?;
        self.refresh().await;
        Ok(output)
    }

    pub async fn upgrade(&self, strategy: UpgradeStrategy) -> Result<String, BrewError> {
        let output = self.inner.homebrew.upgrade(strategy).await?;
        self.refresh().await;
        Ok(output)
    }

    pub fn cancel(&self, id: OperationId) {
        self.inner.homebrew.queue().cancel(id);
    }

    /// 全部操作，最新的在前
    pub fn operations(&self) -> BoxStream<Vec<Operation>> {
        self.inner.tracker.all()
    }
}

/// 详情流的后台折叠任务，详情流被丢弃后退出
async fn fold_detail(
    detail: watch::Sender<PackageDetail>,
    id: PackageId,
    mut activity: BoxStream<Option<Activity>>,
    mut details: watch::Receiver<HashMap<PackageId, Package>>,
    mut packages: watch::Receiver<Option<Packages>>,
    mut events: broadcast::Receiver<ActivityEvent>,
) {
    loop {
        tokio::select! {
            _ = detail.closed() => break,
            next = activity.next() => match next {
                Some(current) => {
                    detail.send_if_modified(|detail| detail.set_activity(current));
                }
                None => break,
            },
            changed = details.changed() => {
                if changed.is_err() {
                    break;
                }
                let stored = details.borrow_and_update().get(&id).cloned();
                if let Some(stored) = stored {
                    detail.send_if_modified(|detail| detail.replace_package(stored));
                }
            }
            changed = packages.changed() => {
                if changed.is_err() {
                    break;
                }
                let installed = packages.borrow_and_update().clone();
                if let Some(installed) = installed {
                    detail.send_if_modified(|detail| detail.adopt_snapshot(&installed));
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    detail.send_if_modified(|detail| detail.apply_event(&event));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("{} 的详情流丢失了 {} 条活动事件", id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    log::debug!("{} 的详情流结束", id);
}
