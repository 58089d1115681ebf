//! 规则文件热更新
//!
//! 使用 `notify` 监听规则文件所在目录，文件变化经 debounce 窗口去抖后
//! 重新加载规则并原子替换分发表。加载失败时保留当前分发表。
//!
//! 监听目录而不是文件本身，编辑器"写临时文件再重命名"的保存方式也能被捕获。

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use business_rules::EventDispatcher;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::loader::RulesLoader;

/// 规则文件监听器
///
/// 持有 notify watcher 与 debounce 任务，drop 或 [`RulesWatcher::stop`] 后停止监听。
pub struct RulesWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl RulesWatcher {
    /// 启动监听
    ///
    /// `shutdown_rx` 收到 `true` 时 debounce 循环退出。
    pub fn start(
        loader: Arc<RulesLoader>,
        dispatcher: Arc<EventDispatcher>,
        debounce: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self> {
        let path = loader.path().to_path_buf();
        let dir = watch_dir(&path);
        let file_name: Option<OsString> = path.file_name().map(|n| n.to_os_string());

        // notify 回调运行在其自身线程，通过 channel 转发到 tokio 任务
        let (event_tx, mut event_rx) = mpsc::channel::<()>(16);

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        let relevant = matches!(
                            event.kind,
                            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                        ) && event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == file_name.as_deref());
                        if relevant {
                            let _ = event_tx.try_send(());
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "文件监听器事件错误");
                    }
                }
            })
            .context("创建文件监听器失败")?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .context("启动文件监听失败")?;

        info!(path = %path.display(), debounce_ms = debounce.as_millis() as u64, "规则文件监听已启动");

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(()) = event_rx.recv() => {
                        // Debounce：等待窗口期，丢弃窗口内的后续事件
                        tokio::time::sleep(debounce).await;
                        while event_rx.try_recv().is_ok() {}

                        let loader = Arc::clone(&loader);
                        let dispatcher = Arc::clone(&dispatcher);
                        let reloaded = tokio::task::spawn_blocking(move || {
                            loader.reload_into(&dispatcher)
                        })
                        .await;

                        match reloaded {
                            Ok(Ok(active)) => info!(active, "规则文件变更，分发表已更新"),
                            Ok(Err(e)) => error!(error = %e, "规则文件重新加载失败，保留当前分发表"),
                            Err(e) => error!(error = %e, "规则重新加载任务异常退出"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("规则文件监听已停止");
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    /// 等待 debounce 循环退出
    ///
    /// 调用前应先通过 shutdown channel 发送 `true`。
    pub async fn stop(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "规则文件监听任务异常退出");
        }
    }
}

/// 规则文件所在目录，相对路径的文件名对应当前目录
fn watch_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sales::{self, Outbox};
    use business_rules::{OperatorRegistry, RuleSetCompiler};

    #[test]
    fn test_watch_dir() {
        assert_eq!(watch_dir(Path::new("rules.json")), PathBuf::from("."));
        assert_eq!(
            watch_dir(Path::new("config/rules.json")),
            PathBuf::from("config")
        );
    }

    const RULE_SET: &str = r#"{
        "name": "closed won",
        "enabled": true,
        "signal": "spot.transition",
        "variables_provider": "sales_transition_variables",
        "actions_provider": "sales_transition_actions"
    }"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reload_on_change() {
        let dir = std::env::temp_dir().join(format!("rule-dispatcher-watch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rules.json");
        std::fs::write(&path, format!("[{}]", RULE_SET)).unwrap();

        let registry = sales::registry(Arc::new(Outbox::default()));
        let loader = Arc::new(RulesLoader::new(
            &path,
            RuleSetCompiler::new(OperatorRegistry::with_defaults(), registry),
        ));
        let dispatcher = Arc::new(EventDispatcher::default());
        loader.reload_into(&dispatcher).unwrap();
        assert_eq!(dispatcher.len(), 1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = RulesWatcher::start(
            Arc::clone(&loader),
            Arc::clone(&dispatcher),
            Duration::from_millis(50),
            shutdown_rx,
        )
        .unwrap();

        std::fs::write(&path, format!("[{}, {}]", RULE_SET, RULE_SET)).unwrap();

        let mut reloaded = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if dispatcher.len() == 2 {
                reloaded = true;
                break;
            }
        }
        assert!(reloaded, "分发表未在规定时间内更新");

        shutdown_tx.send(true).unwrap();
        watcher.stop().await;
    }
}
