//! 外部进程执行（brew 调用的最底层）

use super::types::CommandOutput;
use async_trait::async_trait;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("进程启动失败: {0}")]
    Launch(#[from] std::io::Error),
    #[error("进程已被取消")]
    Cancelled,
}

/// 进程成功启动后调用，最多一次
pub type OnStarted = Box<dyn FnOnce() + Send>;

/// 运行一个外部可执行文件，返回退出码与完整的 stdout / stderr。
///
/// 进程启动成功后实现方必须调用 `started`，启动失败时不得调用。
/// `cancel` 在启动前已触发则不启动进程；运行中被触发时实现方必须终止进程，
/// 等待其退出后返回 `RunError::Cancelled`。
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        cancel: CancellationToken,
        started: OnStarted,
    ) -> Result<CommandOutput, RunError>;
}

/// 基于真实子进程的实现
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// SIGINT 之后等待多久升级为 SIGTERM
    interrupt_grace: Duration,
    /// SIGTERM 之后等待多久升级为 SIGKILL
    terminate_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(1))
    }
}

impl ProcessRunner {
    pub fn new(interrupt_grace: Duration, terminate_grace: Duration) -> Self {
        Self {
            interrupt_grace,
            terminate_grace,
        }
    }

    /// 取消时的信号阶梯（均针对整个进程组）：
    ///   1. SIGINT： 与 Ctrl+C 相同，brew 会在退出前释放自己的锁
    ///   2. SIGTERM：interrupt_grace 后仍未退出
    ///   3. SIGKILL：terminate_grace 后仍未退出
    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        let Some(pid) = pid else {
            let _ = child.wait().await;
            return;
        };

        signal_group(pid, libc::SIGINT);
        if tokio::time::timeout(self.interrupt_grace, child.wait()).await.is_ok() {
            return;
        }

        log::warn!("进程组 {} 未响应 SIGINT，发送 SIGTERM", pid);
        signal_group(pid, libc::SIGTERM);
        if tokio::time::timeout(self.terminate_grace, child.wait()).await.is_ok() {
            return;
        }

        log::warn!("进程组 {} 未响应 SIGTERM，发送 SIGKILL", pid);
        signal_group(pid, libc::SIGKILL);
        let _ = child.wait().await;
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        cancel: CancellationToken,
        started: OnStarted,
    ) -> Result<CommandOutput, RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        unsafe {
            cmd.pre_exec(|| {
                // 独立进程组，取消时可以一次性杀死整棵进程树
                libc::setpgid(0, 0);
                #[cfg(target_os = "linux")]
                libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                Ok(())
            });
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();
        log::debug!("已启动 {} (pid {:?})", program.display(), pid);
        started();

        let stdout = tokio::spawn(read_to_end(child.stdout.take()));
        let stderr = tokio::spawn(read_to_end(child.stderr.take()));

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                self.terminate(&mut child, pid).await;
                stdout.abort();
                stderr.abort();
                return Err(RunError::Cancelled);
            }
        };

        Ok(CommandOutput {
            status: exit_code(status),
            stdout: stdout.await.unwrap_or_default(),
            stderr: stderr.await.unwrap_or_default(),
        })
    }
}

async fn read_to_end<R: AsyncRead + Unpin>(stream: Option<R>) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut reader) = stream {
        if let Err(e) = reader.read_to_end(&mut buffer).await {
            log::warn!("读取子进程输出失败: {}", e);
        }
    }
    buffer
}

fn signal_group(pid: u32, signal: libc::c_int) {
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

/// 被信号终止的进程按 shell 约定记为 128 + 信号值
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}
