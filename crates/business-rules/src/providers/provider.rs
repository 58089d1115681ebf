//! 变量提供者与动作提供者 Trait 定义
//!
//! 规则中以字符串保存属性方法名和动作方法名，引擎通过这里的能力接口分派调用。
//! 每次触发时，工厂根据事件参数各构造一个变量实例和一个动作实例。

use thiserror::Error;

use crate::value::{EventArgs, Kwargs, Value};

/// 提供者返回的错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("未知方法: {0}")]
    UnknownMethod(String),

    #[error("事件参数无效: {0}")]
    InvalidEvent(String),

    #[error("{0}")]
    Failed(String),
}

/// 属性方法描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: String,
    /// 允许使用的操作符，None 表示不限制
    pub operators: Option<Vec<String>>,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operators: None,
        }
    }

    pub fn restricted(name: impl Into<String>, operators: &[&str]) -> Self {
        Self {
            name: name.into(),
            operators: Some(operators.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// 操作符是否被允许
    pub fn allows(&self, operator: &str) -> bool {
        self.operators
            .as_ref()
            .is_none_or(|ops| ops.iter().any(|op| op == operator))
    }
}

/// 变量实例
///
/// 属性方法对实例是只读的。
#[cfg_attr(test, mockall::automock)]
pub trait VariablesProvider: Send {
    /// 调用属性方法，方法不存在时返回 [`ProviderError::UnknownMethod`]
    fn get(&self, property: &str, kwargs: &Kwargs) -> Result<Value, ProviderError>;
}

/// 动作实例
pub trait ActionsProvider: Send {
    /// 执行动作方法，方法不存在时返回 [`ProviderError::UnknownMethod`]
    fn run(
        &mut self,
        action: &str,
        variables: &dyn VariablesProvider,
        kwargs: &Kwargs,
    ) -> Result<(), ProviderError>;
}

/// 变量提供者类型（工厂）
pub trait VariablesFactory: Send + Sync {
    /// 支持的属性方法，编译规则时用于校验
    fn properties(&self) -> Vec<PropertyDescriptor>;

    /// 根据事件参数构造变量实例
    fn construct(&self, args: &EventArgs) -> Result<Box<dyn VariablesProvider>, ProviderError>;
}

/// 动作提供者类型（工厂）
pub trait ActionsFactory: Send + Sync {
    /// 支持的动作方法
    fn actions(&self) -> Vec<String>;

    /// 根据事件参数构造动作实例
    fn construct(&self, args: &EventArgs) -> Result<Box<dyn ActionsProvider>, ProviderError>;
}
