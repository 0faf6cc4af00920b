//! Homebrew 前端核心：串行命令队列、操作跟踪与包状态仓库

pub mod config;
pub mod error;
pub mod homebrew;
pub mod queue;
pub mod repository;
pub mod stream;

#[cfg(test)]
mod testing;

pub use error::BrewError;
