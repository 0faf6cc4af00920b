//! 命令行参数解析与结果输出

use anyhow::Result;
use clap::{Parser, Subcommand};
use lian_brew::homebrew::{id_set, UpgradeStrategy};
use lian_brew::queue::{Operation, OperationStatus};
use lian_brew::repository::{Package, PackageRepository, Packages};

#[derive(Debug, Parser)]
#[command(name = "lian-brew", version, about = "串行执行 brew 命令的 Homebrew 前端")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Action {
    /// 列出已安装的包
    List,
    /// 搜索包
    Search {
        /// 关键词，多个词按空格拼接
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// 查看包信息
    Info {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// 安装
    Install {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// 卸载
    Uninstall {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// 更新 Homebrew
    Update,
    /// 升级全部或指定的包
    Upgrade { packages: Vec<String> },
    /// 刷新已安装列表并显示本次运行的全部操作
    Ops,
}

fn upgrade_strategy(packages: Vec<String>) -> UpgradeStrategy {
    if packages.is_empty() {
        UpgradeStrategy::All
    } else {
        UpgradeStrategy::Only(id_set(packages))
    }
}

pub async fn execute(repository: &PackageRepository, action: Action) -> Result<()> {
    match action {
        Action::List => {
            repository.refresh().await;
            let packages = repository.packages_snapshot().unwrap_or_default();
            print_packages(&packages);
        }
        Action::Search { query } => {
            let query = query.join(" ");
            let packages = repository.search(&query).await?;
            if packages.is_empty() {
                println!("没有找到与 \"{}\" 匹配的包", query.trim());
            } else {
                print_packages(&packages);
            }
        }
        Action::Info { packages } => {
            let packages = repository.info(&id_set(packages)).await?;
            for package in packages.iter() {
                print_detail(package);
            }
        }
        Action::Install { packages } => print_output(&repository.install(id_set(packages)).await?),
        Action::Uninstall { packages } => {
            print_output(&repository.uninstall(id_set(packages)).await?)
        }
        Action::Update => print_output(&repository.update().await?),
        Action::Upgrade { packages } => {
            print_output(&repository.upgrade(upgrade_strategy(packages)).await?)
        }
        Action::Ops => {
            repository.refresh().await;
            let operations = repository
                .tracker()
                .wait_for(|ops| !ops.is_empty() && ops.iter().all(|op| op.status.is_terminal()))
                .await;
            print_operations(&operations);
        }
    }
    Ok(())
}

fn print_packages(packages: &Packages) {
    if packages.is_empty() {
        println!("(空)");
        return;
    }
    for (title, group) in [("Formulae", &packages.formulae), ("Casks", &packages.casks)] {
        if group.is_empty() {
            continue;
        }
        println!("==> {} ({})", title, group.len());
        for package in group {
            println!(
                "  {:<28} {:<14} {:<14} {}",
                package.id.as_str(),
                package.installed_version.as_deref().unwrap_or("-"),
                package.latest_version,
                package.description.as_deref().unwrap_or("")
            );
        }
    }
}

fn print_detail(package: &Package) {
    println!("==> {} ({})", package.name, package.kind.label());
    if let Some(description) = &package.description {
        println!("  {}", description);
    }
    if !package.homepage.is_empty() {
        println!("  主页: {}", package.homepage);
    }
    println!("  最新版本: {}", package.latest_version);
    match &package.installed_version {
        Some(version) => println!("  已安装: {}", version),
        None => println!("  未安装"),
    }
}

fn print_output(output: &str) {
    let output = output.trim_end();
    if !output.is_empty() {
        println!("{}", output);
    }
}

fn print_operations(operations: &[Operation]) {
    for operation in operations {
        let detail = match &operation.status {
            OperationStatus::Completed(output) => format!("exit {}", output.status),
            OperationStatus::LaunchFailed(message) => message.clone(),
            _ => String::new(),
        };
        println!(
            "{}  {:<13} {}  {}",
            operation.started_at.format("%H:%M:%S"),
            operation.status.label(),
            operation.command,
            detail
        );
    }
}
