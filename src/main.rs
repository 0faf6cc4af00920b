mod cli;

use anyhow::Result;
use clap::Parser;
use lian_brew::config::Config;
use lian_brew::queue::{CommandQueue, Operation};
use lian_brew::repository::PackageRepository;
use std::sync::Arc;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Cli::parse();

    // 加载配置
    let config = Config::load_or_default()?;
    log::debug!("brew: {}", config.executable_path.display());

    let queue = CommandQueue::new(
        config.executable_path.clone(),
        Arc::new(config.runner()),
        config.queue_options(),
    );
    tokio::spawn(log_transitions(queue.subscribe()));

    // Ctrl-C 终止正在运行的 brew，排队中的操作直接取消
    let interrupted = queue.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("收到 Ctrl-C，取消全部操作");
            interrupted.cancel_all();
        }
    });

    let repository = PackageRepository::new(queue, config.refresh_failure);
    cli::execute(&repository, args.command).await
}

async fn log_transitions(mut events: broadcast::Receiver<Operation>) {
    loop {
        match events.recv().await {
            Ok(operation) => log::info!(
                "[{}] {} {}",
                operation.status.label(),
                operation.command,
                operation.id
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("日志丢失了 {} 条操作事件", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
