//! 事件分发
//!
//! 按信号名索引已启用的规则集，事件到达时依次触发匹配的规则集。
//! 分发表通过 `ArcSwap` 原子替换，规则重新加载不会阻塞正在进行的分发，
//! 每次分发都使用开始时取到的快照。

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::compiler::CompiledRuleSet;
use crate::error::RuleError;
use crate::executor::TriggerOutcome;
use crate::value::EventArgs;

/// 外部事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub signal: String,
    #[serde(default)]
    pub args: EventArgs,
}

impl Event {
    pub fn new(signal: impl Into<String>, args: impl Into<EventArgs>) -> Self {
        Self {
            signal: signal.into(),
            args: args.into(),
        }
    }
}

/// 信号到规则集的索引
#[derive(Debug, Default)]
pub struct DispatchTable {
    by_signal: HashMap<String, Vec<Arc<CompiledRuleSet>>>,
}

impl DispatchTable {
    /// 构建分发表，只收录已启用的规则集，同一信号内保持加载顺序
    pub fn build(rule_sets: impl IntoIterator<Item = Arc<CompiledRuleSet>>) -> Self {
        let mut by_signal: HashMap<String, Vec<Arc<CompiledRuleSet>>> = HashMap::new();
        for rule_set in rule_sets.into_iter().filter(|rs| rs.enabled) {
            by_signal
                .entry(rule_set.signal.clone())
                .or_default()
                .push(rule_set);
        }
        Self { by_signal }
    }

    /// 监听某信号的规则集
    pub fn rule_sets_for(&self, signal: &str) -> &[Arc<CompiledRuleSet>] {
        self.by_signal.get(signal).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 已收录的信号（排序后）
    pub fn signals(&self) -> Vec<String> {
        let mut signals: Vec<String> = self.by_signal.keys().cloned().collect();
        signals.sort();
        signals
    }

    /// 收录的规则集总数
    pub fn len(&self) -> usize {
        self.by_signal.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_signal.is_empty()
    }
}

/// 单个规则集的分发结果
#[derive(Debug)]
pub struct DispatchResult {
    pub rule_set_id: String,
    pub result: Result<TriggerOutcome, RuleError>,
}

/// 一次分发的汇总
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub signal: String,
    pub results: Vec<DispatchResult>,
}

impl DispatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &DispatchResult> {
        self.results.iter().filter(|r| r.result.is_err())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// 有规则块被触发的规则集 ID
    pub fn triggered_rule_sets(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| matches!(&r.result, Ok(outcome) if outcome.any_triggered()))
            .map(|r| r.rule_set_id.as_str())
            .collect()
    }
}

/// 事件分发器
pub struct EventDispatcher {
    table: ArcSwap<DispatchTable>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DispatchTable::default())
    }
}

impl EventDispatcher {
    pub fn new(table: DispatchTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
        }
    }

    /// 当前分发表快照
    pub fn snapshot(&self) -> Arc<DispatchTable> {
        self.table.load_full()
    }

    /// 替换分发表
    pub fn rebuild(&self, table: DispatchTable) {
        info!(
            rule_sets = table.len(),
            signals = ?table.signals(),
            "分发表已更新"
        );
        self.table.store(Arc::new(table));
    }

    /// 清空分发表
    pub fn teardown(&self) {
        info!("分发表已清空");
        self.table.store(Arc::new(DispatchTable::default()));
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }

    /// 分发事件
    ///
    /// 匹配信号且 `signal_kwargs` 与事件参数一致的规则集会被依次触发。
    /// 单个规则集失败只记录日志并写入报告，不影响其他规则集。
    pub fn dispatch(&self, event: &Event) -> DispatchReport {
        let table = self.table.load_full();
        let mut report = DispatchReport {
            signal: event.signal.clone(),
            results: Vec::new(),
        };

        for rule_set in table.rule_sets_for(&event.signal) {
            if !signal_kwargs_match(rule_set, &event.args) {
                debug!(rule_set = %rule_set.id, "signal_kwargs 不匹配，跳过");
                continue;
            }

            let result = rule_set.trigger(&event.args);
            if let Err(e) = &result {
                error!(
                    signal = %event.signal,
                    rule_set = %rule_set.id,
                    error = %e,
                    "规则集触发失败"
                );
            }
            report.results.push(DispatchResult {
                rule_set_id: rule_set.id.clone(),
                result,
            });
        }

        report
    }
}

/// 规则集的 signal_kwargs 是否都与事件参数相等
fn signal_kwargs_match(rule_set: &CompiledRuleSet, args: &EventArgs) -> bool {
    rule_set
        .signal_kwargs
        .iter()
        .all(|(key, expected)| &args.value(key) == expected)
}
