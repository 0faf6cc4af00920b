//! brew 命令队列
//!
//! brew 同一时间只允许一个实例写入，所有调用（刷新、搜索、安装、卸载、查询）
//! 都必须经由同一条串行通道执行。每次提交得到一个 `OperationId`，
//! 状态变化（queued → running → 终态）通过广播流发给所有订阅者，
//! 调用方按 ID 过滤出自己关心的结果。

pub mod operation;
pub mod tracker;

pub use operation::{Operation, OperationId, OperationStatus};
pub use tracker::{Activity, ActivityMap, OperationTracker};

use crate::error::BrewError;
use crate::homebrew::{CommandOutput, CommandRunner, HomebrewCommand, RunError};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// 队列参数
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// 广播通道容量
    pub event_capacity: usize,
    /// 已结束操作的保留数量，供晚到的 `wait` 使用
    pub retained_operations: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            retained_operations: 64,
        }
    }
}

struct LiveEntry {
    operation: Operation,
    cancel: CancellationToken,
    /// 执行通道已取出该操作，正在启动进程
    claimed: bool,
}

struct Registry {
    /// queued / running 的操作
    live: HashMap<OperationId, LiveEntry>,
    /// 提交顺序
    order: VecDeque<OperationId>,
    /// 最近结束的操作（有界）
    finished: VecDeque<Operation>,
    retain: usize,
}

impl Registry {
    fn operation(&self, id: OperationId) -> Option<&Operation> {
        self.live
            .get(&id)
            .map(|entry| &entry.operation)
            .or_else(|| self.finished.iter().find(|op| op.id == id))
    }

    fn status_of(&self, id: OperationId) -> Option<OperationStatus> {
        self.operation(id).map(|op| op.status.clone())
    }

    fn retire(&mut self, operation: Operation) {
        self.order.retain(|id| *id != operation.id);
        if self.retain == 0 {
            return;
        }
        if self.finished.len() >= self.retain {
            self.finished.pop_front();
        }
        self.finished.push_back(operation);
    }
}

pub(crate) struct Shared {
    executable: PathBuf,
    runner: Arc<dyn CommandRunner>,
    events: broadcast::Sender<Operation>,
    registry: Mutex<Registry>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 广播必须在持锁期间发出，保证同一 ID 的状态按顺序被观察到
    fn publish(&self, operation: Operation) {
        let _ = self.events.send(operation);
    }

    pub(crate) fn live_operations(&self) -> Vec<Operation> {
        let registry = self.lock();
        registry
            .order
            .iter()
            .filter_map(|id| registry.live.get(id))
            .map(|entry| entry.operation.clone())
            .collect()
    }

    /// 活动中或仍保留在历史里的操作
    pub(crate) fn operation(&self, id: OperationId) -> Option<Operation> {
        self.lock().operation(id).cloned()
    }

    /// 执行通道取出操作；若它已在排队期间被取消则返回 None
    ///
    /// 此时状态仍是 queued，进程真正启动后才由 `mark_running` 发布 running。
    fn claim(&self, id: OperationId) -> Option<(HomebrewCommand, CancellationToken)> {
        let mut registry = self.lock();
        let entry = registry.live.get_mut(&id)?;
        if entry.cancel.is_cancelled() || entry.operation.status != OperationStatus::Queued {
            return None;
        }
        entry.claimed = true;
        Some((entry.operation.command.clone(), entry.cancel.clone()))
    }

    fn mark_running(&self, id: OperationId) {
        let mut registry = self.lock();
        let Some(entry) = registry.live.get_mut(&id) else {
            return;
        };
        if entry.operation.status != OperationStatus::Queued {
            return;
        }
        entry.operation.status = OperationStatus::Running;
        let running = entry.operation.clone();
        self.publish(running);
    }

    fn finish(&self, id: OperationId, status: OperationStatus) {
        let mut registry = self.lock();
        let Some(entry) = registry.live.remove(&id) else {
            return;
        };
        let finished = entry.operation.with_status(status);
        registry.retire(finished.clone());
        self.publish(finished);
    }
}

/// 串行执行 brew 命令的队列，可自由克隆
#[derive(Clone)]
pub struct CommandQueue {
    shared: Arc<Shared>,
    lane: mpsc::UnboundedSender<OperationId>,
}

impl CommandQueue {
    /// 创建队列并启动唯一的执行通道（需要在 tokio 运行时内调用）
    pub fn new(
        executable: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        options: QueueOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let shared = Arc::new(Shared {
            executable: executable.into(),
            runner,
            events,
            registry: Mutex::new(Registry {
                live: HashMap::new(),
                order: VecDeque::new(),
                finished: VecDeque::new(),
                retain: options.retained_operations,
            }),
        });

        let (lane, jobs) = mpsc::unbounded_channel();
        tokio::spawn(run_lane(shared.clone(), jobs));

        Self { shared, lane }
    }

    /// 提交命令，立即返回操作 ID；执行通道已关闭时拒绝提交
    pub fn submit(&self, command: HomebrewCommand) -> Result<OperationId, BrewError> {
        self.enqueue(command).map(|(id, _)| id)
    }

    /// 提交命令并等待结果
    pub async fn run(&self, command: HomebrewCommand) -> Result<Arc<CommandOutput>, BrewError> {
        let (id, events) = self.enqueue(command)?;
        self.wait_on(id, events).await
    }

    /// 订阅发生在发布 queued 之前，调用方不会错过任何状态
    fn enqueue(
        &self,
        command: HomebrewCommand,
    ) -> Result<(OperationId, broadcast::Receiver<Operation>), BrewError> {
        let operation = Operation::queued(command);
        let id = operation.id;

        let mut registry = self.shared.lock();
        if self.lane.send(id).is_err() {
            log::warn!("执行通道已关闭，拒绝 {}", operation.command);
            return Err(BrewError::QueueClosed);
        }
        let events = self.shared.events.subscribe();
        log::debug!("排队 {} ({})", operation.command, id);

        registry.order.push_back(id);
        registry.live.insert(
            id,
            LiveEntry {
                operation: operation.clone(),
                cancel: CancellationToken::new(),
                claimed: false,
            },
        );
        self.shared.publish(operation);
        Ok((id, events))
    }

    /// 等待指定操作结束
    ///
    /// `Completed` 返回输出（含非零退出码），`Cancelled` 返回 `BrewError::Cancelled`，
    /// 启动失败返回 `BrewError::LaunchFailed`。
    pub async fn wait(&self, id: OperationId) -> Result<Arc<CommandOutput>, BrewError> {
        let events = self.shared.events.subscribe();
        self.wait_on(id, events).await
    }

    async fn wait_on(
        &self,
        id: OperationId,
        mut events: broadcast::Receiver<Operation>,
    ) -> Result<Arc<CommandOutput>, BrewError> {
        // 订阅之后再查一次当前状态，避免错过订阅之前已发生的终态
        let status = self.shared.lock().status_of(id);
        match status {
            Some(status) => {
                if let Some(result) = resolve(id, &status) {
                    return result;
                }
            }
            None => return Err(BrewError::UnknownOperation(id)),
        }

        loop {
            match events.recv().await {
                Ok(operation) if operation.id == id => {
                    if let Some(result) = resolve(id, &operation.status) {
                        return result;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("等待 {} 时丢失了 {} 条状态事件，重新同步", id, skipped);
                    let status = self.shared.lock().status_of(id);
                    match status {
                        Some(status) => {
                            if let Some(result) = resolve(id, &status) {
                                return result;
                            }
                        }
                        None => return Err(BrewError::UnknownOperation(id)),
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BrewError::QueueClosed),
            }
        }
    }

    /// 取消操作
    ///
    /// 排队中的操作直接标记为取消且永远不会执行；运行中的操作会终止进程，
    /// 进程退出后状态才变为 `Cancelled`；已结束的操作忽略。
    /// 未知的 ID 同样忽略。
    pub fn cancel(&self, id: OperationId) {
        let mut registry = self.shared.lock();
        let Some(entry) = registry.live.get(&id) else {
            return;
        };

        // 已被执行通道取出的操作由通道负责收尾，进程未启动时不会再启动
        if entry.claimed {
            log::info!("终止运行中的 {} ({})", entry.operation.command, id);
            entry.cancel.cancel();
            return;
        }

        if let Some(entry) = registry.live.remove(&id) {
            entry.cancel.cancel();
            log::info!("取消排队中的 {} ({})", entry.operation.command, id);
            let cancelled = entry.operation.with_status(OperationStatus::Cancelled);
            registry.retire(cancelled.clone());
            self.shared.publish(cancelled);
        }
    }

    /// 取消全部排队与运行中的操作（退出时使用）
    pub fn cancel_all(&self) {
        let ids: Vec<OperationId> = self.shared.lock().order.iter().copied().collect();
        for id in ids {
            self.cancel(id);
        }
    }

    /// 状态流：每一次状态变化（包括初始的 queued）
    pub fn subscribe(&self) -> broadcast::Receiver<Operation> {
        self.shared.events.subscribe()
    }

    /// 当前排队 / 运行中的操作，按提交顺序
    pub fn live_operations(&self) -> Vec<Operation> {
        self.shared.live_operations()
    }

    pub(crate) fn downgrade(&self) -> Weak<Shared> {
        Arc::downgrade(&self.shared)
    }
}

fn resolve(
    id: OperationId,
    status: &OperationStatus,
) -> Option<Result<Arc<CommandOutput>, BrewError>> {
    match status {
        OperationStatus::Queued | OperationStatus::Running => None,
        OperationStatus::Completed(output) => Some(Ok(output.clone())),
        OperationStatus::LaunchFailed(message) => {
            Some(Err(BrewError::LaunchFailed(message.clone())))
        }
        OperationStatus::Cancelled => Some(Err(BrewError::Cancelled(id))),
    }
}

/// 唯一的执行通道：按提交顺序一次运行一个外部进程
async fn run_lane(shared: Arc<Shared>, mut jobs: mpsc::UnboundedReceiver<OperationId>) {
    while let Some(id) = jobs.recv().await {
        let Some((command, cancel)) = shared.claim(id) else {
            continue;
        };

        log::info!("执行 {}", command);
        let started = {
            let shared = shared.clone();
            Box::new(move || shared.mark_running(id))
        };
        let result = shared
            .runner
            .run(&shared.executable, &command.arguments(), cancel, started)
            .await;

        let status = match result {
            Ok(output) => {
                if output.success() {
                    log::info!("完成 {}", command);
                } else {
                    log::warn!("{} 退出码 {}", command, output.status);
                }
                OperationStatus::Completed(Arc::new(output))
            }
            Err(RunError::Cancelled) => {
                log::info!("已取消 {}", command);
                OperationStatus::Cancelled
            }
            Err(RunError::Launch(e)) => {
                log::warn!("无法启动 {}: {}", shared.executable.display(), e);
                OperationStatus::LaunchFailed(e.to_string())
            }
        };
        shared.finish(id, status);
    }
    log::debug!("执行通道退出");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homebrew::id_set;
    use crate::testing::{ScriptedRunner, Reply};
    use std::time::Duration;

    fn queue_with(runner: Arc<ScriptedRunner>) -> CommandQueue {
        CommandQueue::new("/usr/local/bin/brew", runner, QueueOptions::default())
    }

    async fn next_for(
        events: &mut broadcast::Receiver<Operation>,
        id: OperationId,
    ) -> OperationStatus {
        loop {
            let operation = events.recv().await.unwrap();
            if operation.id == id {
                return operation.status;
            }
        }
    }

    #[tokio::test]
    async fn runs_one_at_a_time_in_submission_order() {
        let runner = Arc::new(ScriptedRunner::new(|_| {
            Reply::ok("").delayed(Duration::from_millis(20))
        }));
        let queue = queue_with(runner.clone());

        let ids: Vec<OperationId> = ["a", "b", "c", "d"]
            .iter()
            .map(|q| queue.submit(HomebrewCommand::Search(q.to_string())).unwrap())
            .collect();
        for id in &ids {
            queue.wait(*id).await.unwrap();
        }

        assert_eq!(runner.max_concurrent(), 1);
        let searched: Vec<String> = runner.calls().into_iter().map(|c| c[1].clone()).collect();
        assert_eq!(searched, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn transitions_are_published_in_order() {
        let runner = Arc::new(ScriptedRunner::new(|_| Reply::ok("done")));
        let queue = queue_with(runner);
        let mut events = queue.subscribe();

        let id = queue.submit(HomebrewCommand::Update).unwrap();
        assert_eq!(next_for(&mut events, id).await, OperationStatus::Queued);
        assert_eq!(next_for(&mut events, id).await, OperationStatus::Running);
        match next_for(&mut events, id).await {
            OperationStatus::Completed(output) => assert_eq!(output.stdout, b"done"),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancelling_queued_operation_never_runs_it() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let held = gate.clone();
        let runner = Arc::new(ScriptedRunner::new(move |args| {
            if args[0] == "update" {
                Reply::ok("").gated(held.clone())
            } else {
                Reply::ok("")
            }
        }));
        let queue = queue_with(runner.clone());
        // 每个操作各用一个接收端，互不消耗对方的事件
        let mut first_events = queue.subscribe();
        let mut second_events = queue.subscribe();

        let first = queue.submit(HomebrewCommand::Update).unwrap();
        let second = queue.submit(HomebrewCommand::Install(id_set(["jq"]))).unwrap();
        assert_eq!(next_for(&mut first_events, first).await, OperationStatus::Queued);
        assert_eq!(next_for(&mut first_events, first).await, OperationStatus::Running);

        queue.cancel(second);
        assert_eq!(next_for(&mut second_events, second).await, OperationStatus::Queued);
        assert_eq!(next_for(&mut second_events, second).await, OperationStatus::Cancelled);
        assert_eq!(queue.wait(second).await, Err(BrewError::Cancelled(second)));

        gate.notify_one();
        queue.wait(first).await.unwrap();
        let third = queue.submit(HomebrewCommand::List).unwrap();
        queue.wait(third).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c[0] != "install"));
    }

    #[tokio::test]
    async fn cancelling_running_operation_lets_lane_continue() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let held = gate.clone();
        let runner = Arc::new(ScriptedRunner::new(move |args| {
            if args[0] == "update" {
                Reply::ok("").gated(held.clone())
            } else {
                Reply::ok("next")
            }
        }));
        let queue = queue_with(runner.clone());
        let mut events = queue.subscribe();

        let running = queue.submit(HomebrewCommand::Update).unwrap();
        let next = queue.submit(HomebrewCommand::List).unwrap();
        assert_eq!(next_for(&mut events, running).await, OperationStatus::Queued);
        assert_eq!(next_for(&mut events, running).await, OperationStatus::Running);

        queue.cancel(running);
        assert_eq!(queue.wait(running).await, Err(BrewError::Cancelled(running)));
        let output = queue.wait(next).await.unwrap();
        assert_eq!(output.stdout, b"next");

        // 已结束的操作再次取消是空操作
        queue.cancel(running);
        assert_eq!(queue.wait(running).await, Err(BrewError::Cancelled(running)));
    }

    #[tokio::test]
    async fn non_zero_exit_completes_normally() {
        let runner = Arc::new(ScriptedRunner::new(|_| Reply::exit(1, "", "Error: boom")));
        let queue = queue_with(runner);

        let output = queue
            .run(HomebrewCommand::Uninstall(id_set(["jq"])))
            .await
            .unwrap();
        assert_eq!(output.status, 1);
        assert_eq!(output.stderr_lossy(), "Error: boom");
    }

    #[tokio::test]
    async fn launch_failure_is_reported_to_waiter() {
        let runner = Arc::new(ScriptedRunner::new(|_| Reply::launch_failure()));
        let queue = queue_with(runner.clone());

        let result = queue.run(HomebrewCommand::Update).await;
        assert!(matches!(result, Err(BrewError::LaunchFailed(_))));

        // 队列本身仍然可用
        let runner_calls = runner.calls().len();
        let _ = queue.run(HomebrewCommand::List).await;
        assert_eq!(runner.calls().len(), runner_calls + 1);
    }

    #[tokio::test]
    async fn launch_failure_never_reports_running() {
        let runner = Arc::new(ScriptedRunner::new(|_| Reply::launch_failure()));
        let queue = queue_with(runner);
        let mut events = queue.subscribe();

        let id = queue.submit(HomebrewCommand::Update).unwrap();
        let mut labels = Vec::new();
        loop {
            let status = next_for(&mut events, id).await;
            labels.push(status.label());
            if status.is_terminal() {
                break;
            }
        }
        assert_eq!(labels, vec!["queued", "launch-failed"]);
    }

    #[test]
    fn submit_after_lane_stopped_is_rejected() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|_| Reply::ok("")));
        let queue = runtime.block_on(async { queue_with(runner.clone()) });
        let mut events = queue.subscribe();
        drop(runtime);

        assert_eq!(queue.submit(HomebrewCommand::Update), Err(BrewError::QueueClosed));
        assert!(events.try_recv().is_err());
        assert!(queue.live_operations().is_empty());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn waiters_only_see_their_own_operation() {
        let runner = Arc::new(ScriptedRunner::new(|args| {
            Reply::ok(&args[1]).delayed(Duration::from_millis(5))
        }));
        let queue = queue_with(runner);

        let ids: Vec<(OperationId, &str)> = ["wget", "jq", "fd"]
            .into_iter()
            .map(|q| (queue.submit(HomebrewCommand::Search(q.to_string())).unwrap(), q))
            .collect();

        let waits = ids.iter().rev().map(|(id, query)| {
            let queue = queue.clone();
            let id = *id;
            let query = query.to_string();
            tokio::spawn(async move {
                let output = queue.wait(id).await.unwrap();
                assert_eq!(output.stdout_lossy(), query);
            })
        });
        for handle in waits.collect::<Vec<_>>() {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn late_wait_resolves_from_retained_history() {
        let runner = Arc::new(ScriptedRunner::new(|_| Reply::ok("cached")));
        let queue = queue_with(runner);

        let id = queue.submit(HomebrewCommand::List).unwrap();
        queue.wait(id).await.unwrap();
        let again = queue.wait(id).await.unwrap();
        assert_eq!(again.stdout, b"cached");
        assert!(queue.live_operations().is_empty());
    }

    #[tokio::test]
    async fn unknown_operation_is_an_error() {
        let runner = Arc::new(ScriptedRunner::new(|_| Reply::ok("")));
        let queue = queue_with(runner);
        let id = OperationId::new();
        assert_eq!(queue.wait(id).await, Err(BrewError::UnknownOperation(id)));
    }

    #[tokio::test]
    async fn cancel_all_clears_the_queue() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let held = gate.clone();
        let runner = Arc::new(ScriptedRunner::new(move |_| Reply::ok("").gated(held.clone())));
        let queue = queue_with(runner.clone());

        let ids: Vec<OperationId> = (0..3).map(|_| queue.submit(HomebrewCommand::Update).unwrap()).collect();
        queue.cancel_all();
        for id in ids {
            assert_eq!(queue.wait(id).await, Err(BrewError::Cancelled(id)));
        }
        assert!(runner.calls().len() <= 1);
        assert!(queue.live_operations().is_empty());
    }
}
