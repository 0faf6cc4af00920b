//! 测试用的脚本化 CommandRunner 与 brew 输出样本

use crate::homebrew::{CommandOutput, CommandRunner, OnStarted, RunError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// 一次脚本化的响应
pub struct Reply {
    result: Result<CommandOutput, String>,
    gate: Option<Arc<Notify>>,
    delay: Option<Duration>,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Self::exit(0, stdout, "")
    }

    pub fn exit(status: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            result: Ok(CommandOutput {
                status,
                stdout: stdout.as_bytes().to_vec(),
                stderr: stderr.as_bytes().to_vec(),
            }),
            gate: None,
            delay: None,
        }
    }

    pub fn launch_failure() -> Self {
        Self {
            result: Err("No such file or directory (os error 2)".to_string()),
            gate: None,
            delay: None,
        }
    }

    /// 在 gate 被通知之前不返回（可被取消）
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Script = dyn Fn(&[String]) -> Reply + Send + Sync;

/// 记录每次调用的参数，并统计同时运行的最大数量
pub struct ScriptedRunner {
    script: Box<Script>,
    calls: Mutex<Vec<Vec<String>>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&[String]) -> Reply + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// 以参数开头匹配的调用次数
    pub fn count_calls(&self, prefix: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|call| {
                call.len() >= prefix.len() && call.iter().zip(prefix).all(|(a, b)| a == b)
            })
            .count()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        _program: &Path,
        args: &[String],
        cancel: CancellationToken,
        started: OnStarted,
    ) -> Result<CommandOutput, RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        self.calls.lock().unwrap().push(args.to_vec());
        let Reply { result, gate, delay } = (self.script)(args);

        let result = match result {
            Ok(output) => output,
            Err(message) => {
                return Err(RunError::Launch(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    message,
                )))
            }
        };

        started();
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let finished = async {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(gate) = &gate {
                gate.notified().await;
            }
        };
        let outcome = tokio::select! {
            _ = finished => Ok(result),
            _ = cancel.cancelled() => Err(RunError::Cancelled),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// `brew info --json=v2 --installed`：jq 显式安装，oniguruma 作为依赖，外加一个 cask
pub const INFO_INSTALLED_JSON: &str = r#"{
  "formulae": [
    {
      "name": "jq",
      "full_name": "jq",
      "aliases": [],
      "desc": "Lightweight and flexible command-line JSON processor",
      "license": "MIT",
      "homepage": "https://jqlang.github.io/jq/",
      "versions": { "stable": "1.7.1", "head": "HEAD", "bottle": true },
      "dependencies": ["oniguruma"],
      "keg_only": false,
      "pinned": false,
      "outdated": false,
      "deprecated": false,
      "disabled": false,
      "installed": [
        {
          "version": "1.7.1",
          "runtime_dependencies": [{ "full_name": "oniguruma", "version": "6.9.9" }],
          "installed_as_dependency": false,
          "installed_on_request": true
        }
      ]
    },
    {
      "name": "oniguruma",
      "full_name": "oniguruma",
      "desc": "Regular expressions library",
      "homepage": "https://github.com/kkos/oniguruma/",
      "versions": { "stable": "6.9.9", "head": null, "bottle": true },
      "installed": [
        {
          "version": "6.9.9",
          "runtime_dependencies": [],
          "installed_as_dependency": true,
          "installed_on_request": false
        }
      ]
    }
  ],
  "casks": [
    {
      "token": "visual-studio-code",
      "name": ["Microsoft Visual Studio Code"],
      "desc": "Open-source code editor",
      "homepage": "https://code.visualstudio.com/",
      "url": "https://update.code.visualstudio.com/1.85.2/darwin-universal/stable",
      "version": "1.85.2",
      "installed": "1.85.2",
      "auto_updates": true,
      "outdated": false
    }
  ]
}"#;

/// `brew info --json=v2 jq`：jq 尚未安装
pub const INFO_JQ_JSON: &str = r#"{
  "formulae": [
    {
      "name": "jq",
      "full_name": "jq",
      "desc": "Lightweight and flexible command-line JSON processor",
      "homepage": "https://jqlang.github.io/jq/",
      "versions": { "stable": "1.7.1", "head": "HEAD", "bottle": true },
      "installed": []
    }
  ],
  "casks": []
}"#;

/// `brew info --json=v2 jq`：jq 已安装
pub const INFO_JQ_INSTALLED_JSON: &str = r#"{
  "formulae": [
    {
      "name": "jq",
      "full_name": "jq",
      "desc": "Lightweight and flexible command-line JSON processor",
      "homepage": "https://jqlang.github.io/jq/",
      "versions": { "stable": "1.7.1", "head": "HEAD", "bottle": true },
      "installed": [
        {
          "version": "1.7.1",
          "installed_as_dependency": false,
          "installed_on_request": true
        }
      ]
    }
  ],
  "casks": []
}"#;

/// `brew info --json=v2 jo jq jqbx`
pub const INFO_SEARCH_JSON: &str = r#"{
  "formulae": [
    {
      "name": "jo",
      "full_name": "jo",
      "desc": "JSON output from a shell",
      "homepage": "https://github.com/jpmens/jo",
      "versions": { "stable": "1.9", "head": null, "bottle": true },
      "installed": []
    },
    {
      "name": "jq",
      "full_name": "jq",
      "desc": "Lightweight and flexible command-line JSON processor",
      "homepage": "https://jqlang.github.io/jq/",
      "versions": { "stable": "1.7.1", "head": "HEAD", "bottle": true },
      "installed": [
        { "version": "1.7.1", "installed_as_dependency": false, "installed_on_request": true }
      ]
    }
  ],
  "casks": [
    {
      "token": "jqbx",
      "name": ["JQBX"],
      "desc": null,
      "homepage": "https://www.jqbx.fm/",
      "version": "0.4.0",
      "installed": null
    }
  ]
}"#;

/// `brew search jq`
pub const SEARCH_JQ_OUTPUT: &str = "==> Formulae\njo\njq\n\n==> Casks\njqbx\n";
