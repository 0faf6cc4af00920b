//! 操作跟踪：按包汇总“正在发生什么”，并累积全部操作供展示

use super::{CommandQueue, Operation, OperationId, Shared};
use crate::homebrew::{HomebrewCommand, PackageId};
use crate::stream::{watch_stream, BoxStream};
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Weak;
use tokio::sync::{broadcast, watch};

/// 面向界面的轻量信号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activity {
    Installing,
    Uninstalling,
}

impl Activity {
    fn of(command: &HomebrewCommand) -> Option<Activity> {
        match command {
            HomebrewCommand::Install(_) => Some(Activity::Installing),
            HomebrewCommand::Uninstall(_) => Some(Activity::Uninstalling),
            _ => None,
        }
    }
}

pub type ActivityMap = HashMap<PackageId, Activity>;

#[derive(Default)]
struct TrackerState {
    /// 全部观察到的操作，最新的在前，不淘汰
    all: Vec<Operation>,
    /// queued / running 的操作，按提交顺序
    live: Vec<Operation>,
}

impl TrackerState {
    fn observe(&mut self, operation: Operation) {
        match self.all.iter_mut().find(|op| op.id == operation.id) {
            Some(existing) => *existing = operation.clone(),
            None => self.all.insert(0, operation.clone()),
        }

        let position = self.live.iter().position(|op| op.id == operation.id);
        match (position, operation.status.is_live()) {
            (Some(index), true) => self.live[index] = operation,
            (Some(index), false) => {
                self.live.remove(index);
            }
            (None, true) => self.live.push(operation),
            (None, false) => {}
        }
    }

    /// 丢失事件后按队列的当前状态重建
    ///
    /// 不在队列活动列表里的操作已经结束：能从队列的历史中查到终态就采用，
    /// 查不到（已被淘汰）则从列表中移除。
    fn resync(&mut self, live: Vec<Operation>, queue: Option<&Shared>) {
        for operation in &live {
            self.observe(operation.clone());
        }

        let stale: Vec<OperationId> = self
            .all
            .iter()
            .filter(|op| op.status.is_live() && !live.iter().any(|l| l.id == op.id))
            .map(|op| op.id)
            .collect();
        for id in stale {
            match queue.and_then(|queue| queue.operation(id)) {
                Some(finished) => self.observe(finished),
                None => {
                    log::debug!("操作 {} 的终态已无法查到，从列表移除", id);
                    self.all.retain(|op| op.id != id);
                }
            }
        }
        self.live.retain(|op| live.iter().any(|l| l.id == op.id));
    }

    /// 同一个包有多个活动操作时，以最早提交的那个为准
    fn activity(&self) -> ActivityMap {
        let mut map = ActivityMap::new();
        for operation in &self.live {
            let Some(activity) = Activity::of(&operation.command) else {
                continue;
            };
            if let Some(targets) = operation.command.mutation_targets() {
                for id in targets {
                    map.entry(id.clone()).or_insert(activity);
                }
            }
        }
        map
    }
}

/// 订阅命令队列状态流的只读视图，可自由克隆
#[derive(Clone)]
pub struct OperationTracker {
    queue: Weak<Shared>,
    operations: watch::Receiver<Vec<Operation>>,
    activity: watch::Receiver<ActivityMap>,
}

impl OperationTracker {
    /// 创建时立即订阅队列，之后提交的操作都不会遗漏
    pub fn new(queue: &CommandQueue) -> Self {
        let events = queue.subscribe();
        let mut state = TrackerState::default();
        state.resync(queue.live_operations(), None);

        let (operations_tx, operations) = watch::channel(state.all.clone());
        let (activity_tx, activity) = watch::channel(state.activity());

        tokio::spawn(track(
            events,
            queue.downgrade(),
            state,
            operations_tx,
            activity_tx,
        ));

        Self {
            queue: queue.downgrade(),
            operations,
            activity,
        }
    }

    /// 包当前的活动
    pub fn current_activity(&self, id: &PackageId) -> Option<Activity> {
        self.activity.borrow().get(id).copied()
    }

    /// 包的活动流：先给出当前值，之后每次变化发出一次
    ///
    /// 直接消费队列的状态事件，瞬间完成的操作也会产生 `Some` 与随后的 `None`。
    pub fn activity(&self, id: &PackageId) -> BoxStream<Option<Activity>> {
        let Some(queue) = self.queue.upgrade() else {
            return stream::iter([self.current_activity(id)]).boxed();
        };

        // 先订阅再取快照，两者之间的事件会在流里重复出现，observe 对此是幂等的
        let mut feed = ActivityFeed {
            id: id.clone(),
            events: queue.events.subscribe(),
            queue: self.queue.clone(),
            live: Vec::new(),
            last: None,
        };
        feed.resync(&queue.live_operations());

        stream::unfold(feed, |mut feed| async move {
            let activity = feed.next().await?;
            Some((activity, feed))
        })
        .boxed()
    }

    pub fn subscribe_activity(&self) -> watch::Receiver<ActivityMap> {
        self.activity.clone()
    }

    /// 全部操作快照，最新的在前
    pub fn operations(&self) -> Vec<Operation> {
        self.operations.borrow().clone()
    }

    /// 全部操作列表流
    pub fn all(&self) -> BoxStream<Vec<Operation>> {
        watch_stream(self.operations.clone()).boxed()
    }

    /// 等到指定操作出现在列表中并满足条件
    pub async fn wait_for<F>(&self, mut predicate: F) -> Vec<Operation>
    where
        F: FnMut(&[Operation]) -> bool,
    {
        let mut rx = self.operations.clone();
        let operations = match rx.wait_for(|ops| predicate(ops.as_slice())).await {
            Ok(ops) => ops.clone(),
            Err(_) => self.operations(),
        };
        operations
    }
}

/// 单个包的活动流状态
struct ActivityFeed {
    id: PackageId,
    events: broadcast::Receiver<Operation>,
    queue: Weak<Shared>,
    /// 作用于该包的 queued / running 操作，按提交顺序
    live: Vec<(OperationId, Activity)>,
    /// 上一次发出的值
    last: Option<Option<Activity>>,
}

impl ActivityFeed {
    fn current(&self) -> Option<Activity> {
        self.live.first().map(|(_, activity)| *activity)
    }

    fn observe(&mut self, operation: &Operation) {
        let Some(activity) = Activity::of(&operation.command) else {
            return;
        };
        let targets_package = operation
            .command
            .mutation_targets()
            .is_some_and(|targets| targets.contains(&self.id));
        if !targets_package {
            return;
        }

        let position = self.live.iter().position(|(id, _)| *id == operation.id);
        match (position, operation.status.is_live()) {
            (None, true) => self.live.push((operation.id, activity)),
            (Some(index), false) => {
                self.live.remove(index);
            }
            _ => {}
        }
    }

    fn resync(&mut self, live: &[Operation]) {
        self.live.clear();
        for operation in live {
            self.observe(operation);
        }
    }

    /// 下一个与上次不同的值；队列关闭后返回 None
    async fn next(&mut self) -> Option<Option<Activity>> {
        loop {
            let current = self.current();
            if self.last != Some(current) {
                self.last = Some(current);
                return Some(current);
            }

            match self.events.recv().await {
                Ok(operation) => self.observe(&operation),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("{} 的活动流丢失了 {} 条事件，重新同步", self.id, skipped);
                    let queue = self.queue.upgrade()?;
                    self.resync(&queue.live_operations());
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

async fn track(
    mut events: broadcast::Receiver<Operation>,
    queue: Weak<Shared>,
    mut state: TrackerState,
    operations: watch::Sender<Vec<Operation>>,
    activity: watch::Sender<ActivityMap>,
) {
    loop {
        match events.recv().await {
            Ok(operation) => {
                log::debug!(
                    "操作 {} {} -> {}",
                    operation.id,
                    operation.command,
                    operation.status.label()
                );
                state.observe(operation);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("操作跟踪丢失了 {} 条事件，从队列重新同步", skipped);
                let Some(queue) = queue.upgrade() else {
                    break;
                };
                state.resync(queue.live_operations(), Some(&*queue));
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }

        operations.send_replace(state.all.clone());
        let next = state.activity();
        activity.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
