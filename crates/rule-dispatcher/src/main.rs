//! 规则分发服务
//!
//! 从标准输入逐行读取事件并分发给规则集，处理摘要写到标准输出。

use std::sync::Arc;

use anyhow::Result;
use business_rules::{EventDispatcher, OperatorRegistry, RuleSetCompiler};
use rule_dispatcher::host::Host;
use rule_dispatcher::loader::RulesLoader;
use rule_dispatcher::sales::{self, Outbox};
use rule_dispatcher::watcher::RulesWatcher;
use rules_shared::config::AppConfig;
use rules_shared::observability;
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "rule-dispatcher";

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..Default::default()
        }
    });

    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        rules_path = %config.engine.rules_path,
        "Starting rule-dispatcher service..."
    );

    let outbox = Arc::new(Outbox::default());
    let compiler = RuleSetCompiler::new(
        OperatorRegistry::with_defaults(),
        sales::registry(Arc::clone(&outbox)),
    );
    let loader = Arc::new(RulesLoader::new(config.engine.rules_path(), compiler));
    let dispatcher = Arc::new(EventDispatcher::default());

    match loader.reload_into(&dispatcher) {
        Ok(active) => info!("Loaded {} active rule sets", active),
        Err(e) => warn!("Failed to load rules: {}, starting with empty dispatch table", e),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = if config.engine.watch_rules {
        match RulesWatcher::start(
            Arc::clone(&loader),
            Arc::clone(&dispatcher),
            config.engine.reload_debounce(),
            shutdown_rx,
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "规则文件监听启动失败，热更新不可用");
                None
            }
        }
    } else {
        None
    };

    let host = Host::new(Arc::clone(&dispatcher), config.engine.trigger_timeout());
    let summary = host
        .run(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            shutdown_signal(),
        )
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(watcher) = watcher {
        watcher.stop().await;
    }
    dispatcher.teardown();

    info!(
        events = summary.events,
        failures = summary.failures,
        slack_messages = outbox.messages().len(),
        change_log_entries = outbox.change_log().len(),
        "Service shutdown complete"
    );
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
