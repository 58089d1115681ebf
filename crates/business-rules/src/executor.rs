//! 规则执行器
//!
//! 在编译后的规则集上执行一次触发：
//! 1. 规则集未启用时直接返回
//! 2. 由同一份事件参数构造一个变量实例和一个动作实例
//! 3. 按顺序评估已启用的规则块，条件满足时依次执行其动作
//! 4. `stop_on_first_trigger` 为真时，第一个触发的规则块之后停止
//!
//! 条件组不做短路求值：所有子条件和子条件组都会被评估，
//! 评估错误不会因为数据不同而被跳过。

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::compiler::{CompiledAction, CompiledBlock, CompiledCondition, CompiledRuleSet};
use crate::error::{Location, Result, RuleError};
use crate::models::CombinationRule;
use crate::providers::{ActionsProvider, ProviderError, VariablesProvider};
use crate::value::EventArgs;

/// 一次触发的结果
#[derive(Debug, Clone, Serialize)]
pub struct TriggerOutcome {
    pub trigger_id: Uuid,
    pub rule_set_id: String,
    /// 规则集未启用而被跳过
    pub skipped: bool,
    /// 因 stop_on_first_trigger 提前结束
    pub stopped_early: bool,
    pub blocks: Vec<BlockOutcome>,
    pub evaluation_time_ms: i64,
}

impl TriggerOutcome {
    fn new(rule_set_id: &str) -> Self {
        Self {
            trigger_id: Uuid::new_v4(),
            rule_set_id: rule_set_id.to_string(),
            skipped: false,
            stopped_early: false,
            blocks: Vec::new(),
            evaluation_time_ms: 0,
        }
    }

    /// 是否有规则块被触发
    pub fn any_triggered(&self) -> bool {
        self.blocks.iter().any(|b| b.triggered)
    }

    /// 被触发的规则块 ID
    pub fn triggered_blocks(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter(|b| b.triggered)
            .map(|b| b.block_id.as_str())
            .collect()
    }
}

/// 单个规则块的结果
#[derive(Debug, Clone, Serialize)]
pub struct BlockOutcome {
    pub block_id: String,
    pub triggered: bool,
    pub actions_run: usize,
}

impl CompiledRuleSet {
    /// 以事件参数触发规则集
    #[instrument(skip_all, fields(rule_set = %self.id, name = %self.name))]
    pub fn trigger(&self, args: &EventArgs) -> Result<TriggerOutcome> {
        let start = Instant::now();
        let mut outcome = TriggerOutcome::new(&self.id);

        if !self.enabled {
            debug!("规则集未启用，跳过");
            outcome.skipped = true;
            return Ok(outcome);
        }

        let result = self.run_blocks(args, &mut outcome);

        let elapsed = start.elapsed();
        outcome.evaluation_time_ms = elapsed.as_millis() as i64;

        let status = match &result {
            Ok(()) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!(
            "rule_set_triggers_total",
            "rule_set" => self.id.clone(),
            "status" => status
        )
        .increment(1);
        metrics::histogram!(
            "rule_set_trigger_duration_seconds",
            "rule_set" => self.id.clone()
        )
        .record(elapsed.as_secs_f64());

        match result {
            Ok(()) => {
                info!(
                    trigger_id = %outcome.trigger_id,
                    triggered = ?outcome.triggered_blocks(),
                    stopped_early = outcome.stopped_early,
                    elapsed_ms = outcome.evaluation_time_ms,
                    "规则集执行完成"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(trigger_id = %outcome.trigger_id, error = %e, "规则集执行失败");
                Err(e)
            }
        }
    }

    fn run_blocks(&self, args: &EventArgs, outcome: &mut TriggerOutcome) -> Result<()> {
        let location = Location::rule_set(&self.id);

        let variables = self.variables.construct(args).map_err(|e| {
            RuleError::ProviderConstruction {
                provider: self.variables_provider.clone(),
                reason: e.to_string(),
                location: location.clone(),
            }
        })?;

        let mut actions = self.actions.construct(args).map_err(|e| {
            RuleError::ProviderConstruction {
                provider: self.actions_provider.clone(),
                reason: e.to_string(),
                location: location.clone(),
            }
        })?;

        for block in &self.blocks {
            let location = location.clone().block(&block.id);
            let (triggered, actions_run) =
                block.run(variables.as_ref(), actions.as_mut(), &location)?;

            outcome.blocks.push(BlockOutcome {
                block_id: block.id.clone(),
                triggered,
                actions_run,
            });

            if triggered && self.stop_on_first_trigger {
                debug!(block = %block.id, "首个规则块已触发，停止评估");
                outcome.stopped_early = true;
                break;
            }
        }

        Ok(())
    }
}

impl CompiledBlock {
    /// 评估规则块，条件满足时按顺序执行动作
    ///
    /// 返回 `(triggered, actions_run)`。没有顶层条件组的规则块视为满足。
    pub fn run(
        &self,
        variables: &dyn VariablesProvider,
        actions: &mut dyn ActionsProvider,
        location: &Location,
    ) -> Result<(bool, usize)> {
        let triggered = self.all_conditions_true(variables, location)?;

        metrics::counter!(
            "rule_block_evaluations_total",
            "block" => self.id.clone(),
            "triggered" => triggered.to_string()
        )
        .increment(1);

        debug!(block = %self.id, name = %self.name, triggered, "规则块评估完成");

        if !triggered {
            return Ok((false, 0));
        }

        for action in &self.actions {
            action.run(variables, actions, &location.clone().action(&action.id))?;
        }

        Ok((true, self.actions.len()))
    }

    /// 所有顶层条件组是否都为真
    pub fn all_conditions_true(
        &self,
        variables: &dyn VariablesProvider,
        location: &Location,
    ) -> Result<bool> {
        let results = self
            .roots
            .iter()
            .map(|&root| self.evaluate_set(root, variables, location))
            .collect::<Result<Vec<bool>>>()?;

        Ok(results.into_iter().all(|r| r))
    }

    /// 递归评估条件组
    ///
    /// 子结果的顺序为：直接条件在前，子条件组在后。
    /// - all: 所有子结果为真；没有子结果时为真
    /// - any: 至少一个子结果为真；没有子结果时为假
    pub fn evaluate_set(
        &self,
        index: usize,
        variables: &dyn VariablesProvider,
        location: &Location,
    ) -> Result<bool> {
        let set = &self.sets[index];
        let location = location.clone().condition_set(&set.id);

        let mut results = Vec::with_capacity(set.conditions.len() + set.children.len());
        for condition in &set.conditions {
            results.push(condition.evaluate(variables, &location)?);
        }
        for &child in &set.children {
            results.push(self.evaluate_set(child, variables, &location)?);
        }

        Ok(combine(set.rule, &results))
    }
}

/// 按组合规则合并子结果
pub fn combine(rule: CombinationRule, results: &[bool]) -> bool {
    match rule {
        CombinationRule::All => results.iter().all(|&r| r),
        CombinationRule::Any => results.iter().any(|&r| r),
    }
}

impl CompiledCondition {
    /// 评估条件：调用属性方法得到左值，与字面量右值比较
    pub fn evaluate(&self, variables: &dyn VariablesProvider, location: &Location) -> Result<bool> {
        let location = location.clone().condition(&self.id);

        let left = variables
            .get(&self.property, &self.kwargs)
            .map_err(|e| match e {
                ProviderError::UnknownMethod(property) => RuleError::UnknownProperty {
                    property,
                    location: location.clone(),
                },
                other => RuleError::ProviderFailed {
                    method: self.property.clone(),
                    reason: other.to_string(),
                    location: location.clone(),
                },
            })?;

        let matched = self
            .operator
            .apply(&left, &self.value)
            .map_err(|e| RuleError::TypeMismatch {
                operator: self.operator.id().to_string(),
                expected: e.expected,
                actual: e.actual,
                location: location.clone(),
            })?;

        debug!(
            condition = %self.id,
            property = %self.property,
            operator = %self.operator.id(),
            left = %left,
            right = %self.value,
            matched,
            "条件评估"
        );

        Ok(matched)
    }
}

impl CompiledAction {
    /// 执行动作，动作方法接收变量实例和 kwargs
    pub fn run(
        &self,
        variables: &dyn VariablesProvider,
        actions: &mut dyn ActionsProvider,
        location: &Location,
    ) -> Result<()> {
        let result = actions
            .run(&self.method, variables, &self.kwargs)
            .map_err(|e| match e {
                ProviderError::UnknownMethod(method) => RuleError::UnknownAction {
                    method,
                    location: location.clone(),
                },
                other => RuleError::ProviderFailed {
                    method: self.method.clone(),
                    reason: other.to_string(),
                    location: location.clone(),
                },
            });

        let status = if result.is_ok() { "ok" } else { "failed" };
        metrics::counter!(
            "rule_actions_total",
            "method" => self.method.clone(),
            "status" => status
        )
        .increment(1);

        if result.is_ok() {
            info!(action = %self.id, method = %self.method, "动作已执行");
        }
        result
    }
}
