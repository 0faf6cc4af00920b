//! 经由命令队列调用 brew，并把输出解码为结构化结果

use super::command::{HomebrewCommand, UpgradeStrategy};
use super::models::{HomebrewInfo, SearchResults};
use super::parser::{is_no_results, parse_info, parse_search_output};
use super::types::{CommandOutput, PackageId};
use crate::error::BrewError;
use crate::queue::CommandQueue;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct Homebrew {
    queue: CommandQueue,
}

impl Homebrew {
    pub fn new(queue: CommandQueue) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// 全部已安装的 formula 与 cask
    pub async fn installed_packages(&self) -> Result<HomebrewInfo, BrewError> {
        let output = checked(self.queue.run(HomebrewCommand::List).await?)?;
        parse_info(&output.stdout)
    }

    /// 批量查询包信息；空集合直接返回空结果，不调用 brew
    pub async fn info(&self, ids: &BTreeSet<PackageId>) -> Result<HomebrewInfo, BrewError> {
        if ids.is_empty() {
            return Ok(HomebrewInfo::default());
        }

        let output = checked(self.queue.run(HomebrewCommand::Info(ids.clone())).await?)?;
        let info = parse_info(&output.stdout)?;
        if info.len() < ids.len() {
            return Err(BrewError::PartialResultCountMismatch {
                expected: ids.len(),
                actual: info.len(),
            });
        }
        Ok(info)
    }

    pub async fn search(&self, query: &str) -> Result<SearchResults, BrewError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(SearchResults::default());
        }

        let output = self
            .queue
            .run(HomebrewCommand::Search(query.to_string()))
            .await?;
        if !output.success() {
            if is_no_results(&output.stderr_lossy()) {
                return Ok(SearchResults::default());
            }
            return Err(non_zero_exit(&output));
        }
        Ok(parse_search_output(&output.stdout_lossy()))
    }

    pub async fn install(&self, ids: BTreeSet<PackageId>) -> Result<String, BrewError> {
        let output = checked(self.queue.run(HomebrewCommand::Install(ids)).await?)?;
        Ok(output.stdout_lossy())
    }

    pub async fn uninstall(&self, ids: BTreeSet<PackageId>) -> Result<String, BrewError> {
        let output = checked(self.queue.run(HomebrewCommand::Uninstall(ids)).await?)?;
        Ok(output.stdout_lossy())
    }

    pub async fn update(&self) -> Result<String, BrewError> {
        let output = checked(self.queue.run(HomebrewCommand::Update).await?)?;
        Ok(output.stdout_lossy())
    }

    pub async fn upgrade(&self, strategy: UpgradeStrategy) -> Result<String, BrewError> {
        let output = checked(self.queue.run(HomebrewCommand::Upgrade(strategy)).await?)?;
        Ok(output.stdout_lossy())
    }
}

fn checked(output: Arc<CommandOutput>) -> Result<Arc<CommandOutput>, BrewError> {
    if output.success() {
        Ok(output)
    } else {
        Err(non_zero_exit(&output))
    }
}

fn non_zero_exit(output: &CommandOutput) -> BrewError {
    BrewError::NonZeroExit {
        status: output.status,
        output: output.failure_output(),
    }
}
