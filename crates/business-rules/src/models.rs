//! 规则定义领域模型
//!
//! 这些结构对应持久化的规则定义（规则集 → 规则块 → 条件组树 → 条件/动作），
//! 由外部存储加载，对引擎而言是只读快照。评估前需经 [`crate::compiler`] 编译。

use crate::value::Kwargs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// 业务规则集
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessRuleSet {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
    /// 触发该规则集的事件信号名
    #[serde(default)]
    pub signal: String,
    /// 信号注册过滤条件，每一项都必须与事件参数相等
    #[serde(default)]
    pub signal_kwargs: Kwargs,
    #[serde(default)]
    pub stop_on_first_trigger: bool,
    pub variables_provider: String,
    pub actions_provider: String,
    #[serde(default)]
    pub rule_blocks: Vec<RuleBlock>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl BusinessRuleSet {
    /// 创建启用状态的规则集
    pub fn new(
        name: impl Into<String>,
        variables_provider: impl Into<String>,
        actions_provider: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            enabled: true,
            notes: None,
            signal: String::new(),
            signal_kwargs: Kwargs::new(),
            stop_on_first_trigger: false,
            variables_provider: variables_provider.into(),
            actions_provider: actions_provider.into(),
            rule_blocks: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_signal(mut self, signal: impl Into<String>) -> Self {
        self.signal = signal.into();
        self
    }

    pub fn with_signal_kwarg(mut self, key: impl Into<String>, value: impl Into<crate::Value>) -> Self {
        self.signal_kwargs.insert(key.into(), value.into());
        self
    }

    pub fn stop_on_first_trigger(mut self, stop: bool) -> Self {
        self.stop_on_first_trigger = stop;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_block(mut self, block: RuleBlock) -> Self {
        self.rule_blocks.push(block);
        self
    }
}

impl fmt::Display for BusinessRuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// 规则块
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleBlock {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    /// 块内所有条件组（包括嵌套的子组），父子关系由 `parent` 表达
    #[serde(default)]
    pub condition_sets: Vec<ConditionSet>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl RuleBlock {
    /// 创建启用状态的规则块
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            enabled: true,
            condition_sets: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_condition_set(mut self, set: ConditionSet) -> Self {
        self.condition_sets.push(set);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}

/// 组合规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombinationRule {
    /// 逻辑与
    All,
    /// 逻辑或
    Any,
}

impl FromStr for CombinationRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "any" => Ok(Self::Any),
            _ => Err(s.to_string()),
        }
    }
}

impl fmt::Display for CombinationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Any => write!(f, "any"),
        }
    }
}

fn default_combination_rule() -> String {
    CombinationRule::All.to_string()
}

/// 条件组
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionSet {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    /// 以文本保存，编译时校验是否为 all/any
    #[serde(default = "default_combination_rule")]
    pub combination_rule: String,
    /// 父条件组 ID（同一规则块内），为空表示顶层条件组
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ConditionSet {
    pub fn new(name: impl Into<String>, rule: CombinationRule) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            combination_rule: rule.to_string(),
            parent: None,
            conditions: Vec::new(),
        }
    }

    pub fn all(name: impl Into<String>) -> Self {
        Self::new(name, CombinationRule::All)
    }

    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, CombinationRule::Any)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// 条件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default = "new_id")]
    pub id: String,
    /// 变量提供者上的属性方法名
    pub property_method: String,
    #[serde(default)]
    pub property_kwargs: Kwargs,
    pub comparison_operator: String,
    /// 右值，以文本保存
    #[serde(default)]
    pub value: Option<String>,
}

impl Condition {
    pub fn new(
        property_method: impl Into<String>,
        comparison_operator: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            property_method: property_method.into(),
            property_kwargs: Kwargs::new(),
            comparison_operator: comparison_operator.into(),
            value: Some(value.into()),
        }
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<crate::Value>) -> Self {
        self.property_kwargs.insert(key.into(), value.into());
        self
    }

    pub fn without_value(mut self) -> Self {
        self.value = None;
        self
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.property_method.is_empty() {
            return write!(f, "-");
        }
        write!(f, "{}", self.property_method)
    }
}

/// 动作
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(default = "new_id")]
    pub id: String,
    pub action_method: String,
    #[serde(default)]
    pub action_kwargs: Kwargs,
}

impl Action {
    pub fn new(action_method: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            action_method: action_method.into(),
            action_kwargs: Kwargs::new(),
        }
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<crate::Value>) -> Self {
        self.action_kwargs.insert(key.into(), value.into());
        self
    }
}
