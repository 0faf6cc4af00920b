//! Homebrew 模块：对 brew 命令行的封装

pub mod client;
pub mod command;
pub mod models;
pub mod parser;
pub mod runner;
pub mod types;

// 重新导出常用类型
pub use client::Homebrew;
pub use command::{id_set, HomebrewCommand, UpgradeStrategy};
pub use models::{Cask, Formula, HomebrewInfo, InstalledKeg, SearchResults};
pub use runner::{CommandRunner, OnStarted, ProcessRunner, RunError};
pub use types::{CommandOutput, PackageId};
