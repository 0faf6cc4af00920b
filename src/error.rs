use crate::homebrew::PackageId;
use crate::queue::OperationId;
use thiserror::Error;

/// 命令队列与包仓库对外暴露的错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrewError {
    #[error("无法启动 brew: {0}")]
    LaunchFailed(String),

    #[error("brew 退出码 {status}: {output}")]
    NonZeroExit { status: i32, output: String },

    #[error("操作已取消: {0}")]
    Cancelled(OperationId),

    #[error("无法解析 brew 输出: {0}")]
    DecodeFailed(String),

    #[error("结果中缺少包 {0}")]
    MissingPackage(PackageId),

    #[error("请求 {expected} 个包的信息，只返回了 {actual} 个")]
    PartialResultCountMismatch { expected: usize, actual: usize },

    #[error("未知操作: {0}")]
    UnknownOperation(OperationId),

    #[error("命令队列已关闭")]
    QueueClosed,
}

impl BrewError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BrewError::Cancelled(_))
    }
}
