//! 事件宿主
//!
//! 从输入流逐行读取 `{"signal": "...", "args": {...}}` 事件，
//! 在阻塞线程池中执行分发（规则评估是同步的），并为每次分发设置超时。
//! 每个事件处理完成后向输出流写一行 JSON 摘要。
//!
//! 单个事件的失败（解析错误、超时、规则集错误）只记录日志，不会中断处理循环。

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use business_rules::{DispatchReport, Event, EventDispatcher};
use rules_shared::observability::metrics::record_dispatch;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::DispatcherError;

/// 单个事件的处理摘要
#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub signal: String,
    pub rule_sets: usize,
    pub triggered: Vec<String>,
    pub failures: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EventSummary {
    fn from_report(report: &DispatchReport) -> Self {
        Self {
            signal: report.signal.clone(),
            rule_sets: report.results.len(),
            triggered: report
                .triggered_rule_sets()
                .into_iter()
                .map(str::to_string)
                .collect(),
            failures: report
                .failures()
                .filter_map(|r| r.result.as_ref().err().map(|e| format!("{}: {}", r.rule_set_id, e)))
                .collect(),
            error: None,
        }
    }

    fn from_error(signal: &str, error: &DispatcherError) -> Self {
        Self {
            signal: signal.to_string(),
            rule_sets: 0,
            triggered: Vec::new(),
            failures: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some() || !self.failures.is_empty()
    }
}

/// 处理循环的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub events: usize,
    pub failures: usize,
}

/// 事件宿主
pub struct Host {
    dispatcher: Arc<EventDispatcher>,
    timeout: Duration,
}

impl Host {
    pub fn new(dispatcher: Arc<EventDispatcher>, timeout: Duration) -> Self {
        Self {
            dispatcher,
            timeout,
        }
    }

    /// 分发单个事件
    ///
    /// 超时后返回错误，但已在阻塞线程中开始的评估会继续执行完毕。
    pub async fn handle_event(&self, event: Event) -> Result<DispatchReport, DispatcherError> {
        let signal = event.signal.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let start = Instant::now();

        let task = tokio::task::spawn_blocking(move || dispatcher.dispatch(&event));
        let result = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(DispatcherError::TaskFailed(e.to_string())),
            Err(_) => Err(DispatcherError::Timeout {
                signal: signal.clone(),
                timeout_ms: self.timeout.as_millis(),
            }),
        };

        let status = match &result {
            Ok(report) if report.has_failures() => "partial",
            Ok(_) => "ok",
            Err(e) => e.status(),
        };
        record_dispatch(&signal, status, start.elapsed().as_secs_f64());

        result
    }

    /// 解析并分发一行事件
    pub async fn handle_line(&self, line: &str) -> EventSummary {
        let event: Event = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                let error = DispatcherError::InvalidEvent(e);
                warn!(error = %error, "事件解析失败，已跳过");
                record_dispatch("", error.status(), 0.0);
                return EventSummary::from_error("", &error);
            }
        };

        let signal = event.signal.clone();
        match self.handle_event(event).await {
            Ok(report) => {
                debug!(signal = %signal, rule_sets = report.results.len(), "事件已分发");
                EventSummary::from_report(&report)
            }
            Err(e) => {
                warn!(signal = %signal, error = %e, "事件分发失败");
                EventSummary::from_error(&signal, &e)
            }
        }
    }

    /// 处理输入流中的事件，直到输入结束或收到关闭信号
    pub async fn run<R, W, S>(&self, reader: R, mut writer: W, shutdown: S) -> Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        let mut lines = reader.lines();
        let mut summary = RunSummary::default();
        tokio::pin!(shutdown);

        loop {
            let line = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("收到关闭信号，停止读取事件");
                    break;
                }
                line = lines.next_line() => line?,
            };

            let Some(line) = line else {
                info!("事件输入已结束");
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let event_summary = self.handle_line(line).await;
            summary.events += 1;
            if event_summary.is_failure() {
                summary.failures += 1;
            }

            let mut output = serde_json::to_vec(&event_summary)?;
            output.push(b'\n');
            writer.write_all(&output).await?;
            writer.flush().await?;
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use business_rules::{
        Action, ActionsTable, BusinessRuleSet, DispatchTable, EventArgs, OperatorRegistry,
        ProviderRegistry, RuleBlock, RuleSetCompiler, VariablesTable,
    };

    fn dispatcher(delay: Duration) -> Arc<EventDispatcher> {
        let variables = VariablesTable::new(|args: &EventArgs| Ok(args.clone()))
            .accessor("get_status", |args, _| Ok(args.value("status")));
        let actions = ActionsTable::new(|_: &EventArgs| Ok(())).action("wait", move |_, _, _| {
            std::thread::sleep(delay);
            Ok(())
        });

        let mut providers = ProviderRegistry::new();
        providers
            .register_variables("orders", Arc::new(variables))
            .register_actions("slow", Arc::new(actions));
        let mut compiler = RuleSetCompiler::new(OperatorRegistry::with_defaults(), providers);

        let rule_set = BusinessRuleSet::new("waits", "orders", "slow")
            .with_signal("order.paid")
            .with_block(RuleBlock::new("always").with_action(Action::new("wait")));
        let compiled = compiler.compile(&rule_set).unwrap();

        Arc::new(EventDispatcher::new(DispatchTable::build([Arc::new(compiled)])))
    }

    #[tokio::test]
    async fn test_handle_event() {
        let host = Host::new(dispatcher(Duration::ZERO), Duration::from_secs(5));
        let report = host
            .handle_event(Event::new("order.paid", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.triggered_rule_sets().len(), 1);
    }

    #[tokio::test]
    async fn test_handle_event_timeout() {
        let host = Host::new(dispatcher(Duration::from_millis(300)), Duration::from_millis(20));
        let err = host
            .handle_event(Event::new("order.paid", serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatcherError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_run_continues_after_bad_line() {
        let host = Host::new(dispatcher(Duration::ZERO), Duration::from_secs(5));
        let input = b"{\"signal\": \"order.paid\", \"args\": {}}\nnot json\n\n{\"signal\": \"order.shipped\"}\n";
        let mut output = Vec::new();

        let summary = host
            .run(&input[..], &mut output, std::future::pending::<()>())
            .await
            .unwrap();

        assert_eq!(summary, RunSummary { events: 3, failures: 1 });

        let lines: Vec<serde_json::Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["triggered"].as_array().unwrap().len(), 1);
        assert!(lines[1]["error"].is_string());
        assert_eq!(lines[2]["rule_sets"], 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let host = Host::new(dispatcher(Duration::ZERO), Duration::from_secs(5));
        let input = b"{\"signal\": \"order.paid\"}\n";
        let mut output = Vec::new();

        let summary = host
            .run(&input[..], &mut output, std::future::ready(()))
            .await
            .unwrap();

        assert_eq!(summary.events, 0);
        assert!(output.is_empty());
    }
}
