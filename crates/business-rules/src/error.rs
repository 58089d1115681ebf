//! 规则引擎错误类型
//!
//! 所有错误都携带 [`Location`]，指明出错的规则集、规则块、条件组、条件或动作，
//! 便于定位是哪一条配置导致了评估失败。

use std::fmt;
use thiserror::Error;

/// 出错实体的定位信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub rule_set: Option<String>,
    pub block: Option<String>,
    pub condition_set: Option<String>,
    pub condition: Option<String>,
    pub action: Option<String>,
}

impl Location {
    pub fn rule_set(id: impl Into<String>) -> Self {
        Self {
            rule_set: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn block(mut self, id: impl Into<String>) -> Self {
        self.block = Some(id.into());
        self
    }

    pub fn condition_set(mut self, id: impl Into<String>) -> Self {
        self.condition_set = Some(id.into());
        self
    }

    pub fn condition(mut self, id: impl Into<String>) -> Self {
        self.condition = Some(id.into());
        self
    }

    pub fn action(mut self, id: impl Into<String>) -> Self {
        self.action = Some(id.into());
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [
            ("rule_set", &self.rule_set),
            ("block", &self.block),
            ("condition_set", &self.condition_set),
            ("condition", &self.condition),
            ("action", &self.action),
        ];

        let mut first = true;
        for (key, value) in parts {
            if let Some(value) = value {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{}={}", key, value)?;
                first = false;
            }
        }

        if first {
            write!(f, "-")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("未知的属性方法: {property} ({location})")]
    UnknownProperty { property: String, location: Location },

    #[error("未知的比较操作符: {operator} ({location})")]
    UnknownOperator { operator: String, location: Location },

    #[error("未知的动作方法: {method} ({location})")]
    UnknownAction { method: String, location: Location },

    #[error("无效的组合规则: {rule}，仅支持 all/any ({location})")]
    InvalidCombinationRule { rule: String, location: Location },

    #[error("无法构造提供者 {provider}: {reason} ({location})")]
    ProviderConstruction {
        provider: String,
        reason: String,
        location: Location,
    },

    #[error("条件组父子关系存在环 ({location})")]
    CyclicConditionSet { location: Location },

    #[error("同一规则块中条件组 id 重复: {id} ({location})")]
    DuplicateConditionSet { id: String, location: Location },

    #[error("父条件组不存在于同一规则块: {parent} ({location})")]
    UnknownParentConditionSet { parent: String, location: Location },

    #[error("属性 {property} 不允许使用操作符 {operator}，允许: {allowed:?} ({location})")]
    OperatorNotAllowed {
        property: String,
        operator: String,
        allowed: Vec<String>,
        location: Location,
    },

    #[error("无效的正则表达式 '{pattern}': {reason} ({location})")]
    InvalidPattern {
        pattern: String,
        reason: String,
        location: Location,
    },

    #[error("类型不匹配: 操作符 {operator} 期望 {expected}, 实际 {actual} ({location})")]
    TypeMismatch {
        operator: String,
        expected: String,
        actual: String,
        location: Location,
    },

    #[error("提供者方法 {method} 执行失败: {reason} ({location})")]
    ProviderFailed {
        method: String,
        reason: String,
        location: Location,
    },

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    /// 获取错误定位（JSON 错误没有定位）
    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::UnknownProperty { location, .. }
            | Self::UnknownOperator { location, .. }
            | Self::UnknownAction { location, .. }
            | Self::InvalidCombinationRule { location, .. }
            | Self::ProviderConstruction { location, .. }
            | Self::CyclicConditionSet { location }
            | Self::DuplicateConditionSet { location, .. }
            | Self::UnknownParentConditionSet { location, .. }
            | Self::OperatorNotAllowed { location, .. }
            | Self::InvalidPattern { location, .. }
            | Self::TypeMismatch { location, .. }
            | Self::ProviderFailed { location, .. } => Some(location),
            Self::JsonError(_) => None,
        }
    }

    /// 错误类别，用作指标标签
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownProperty { .. } => "unknown_property",
            Self::UnknownOperator { .. } => "unknown_operator",
            Self::UnknownAction { .. } => "unknown_action",
            Self::InvalidCombinationRule { .. } => "invalid_combination_rule",
            Self::ProviderConstruction { .. } => "provider_construction",
            Self::CyclicConditionSet { .. } => "cyclic_condition_set",
            Self::DuplicateConditionSet { .. } => "duplicate_condition_set",
            Self::UnknownParentConditionSet { .. } => "unknown_parent_condition_set",
            Self::OperatorNotAllowed { .. } => "operator_not_allowed",
            Self::InvalidPattern { .. } => "invalid_pattern",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::ProviderFailed { .. } => "provider_failed",
            Self::JsonError(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        let location = Location::rule_set("rs-1").block("b-1").condition("c-9");
        assert_eq!(location.to_string(), "rule_set=rs-1 block=b-1 condition=c-9");
        assert_eq!(Location::default().to_string(), "-");
    }

    #[test]
    fn test_error_message_contains_location() {
        let err = RuleError::UnknownOperator {
            operator: "op.nonexistent".to_string(),
            location: Location::rule_set("rs-1").condition("c-1"),
        };

        let message = err.to_string();
        assert!(message.contains("op.nonexistent"));
        assert!(message.contains("condition=c-1"));
        assert_eq!(err.kind(), "unknown_operator");
        assert_eq!(err.location().unwrap().condition.as_deref(), Some("c-1"));
    }
}
