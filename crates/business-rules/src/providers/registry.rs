//! 提供者注册表
//!
//! 规则集通过 `variables_provider` / `actions_provider` 标识引用提供者类型，
//! 注册表负责把标识解析为工厂实例，并为规则编辑提供可选项（属性、操作符、动作）。
//!
//! ## 使用示例
//!
//! ```ignore
//! let mut registry = ProviderRegistry::new();
//! registry
//!     .register_variables("sales_transition_variables", Arc::new(sales::variables()))
//!     .register_actions("sales_transition_actions", Arc::new(sales::actions(outbox)));
//!
//! let factory = registry.variables("sales_transition_variables").unwrap();
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::provider::{ActionsFactory, PropertyDescriptor, VariablesFactory};
use crate::operators::DEFAULT_OPERATORS;

/// 提供者注册表
///
/// 线程安全，编译后的规则集持有工厂的 Arc 引用。
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    variables: HashMap<String, Arc<dyn VariablesFactory>>,
    actions: HashMap<String, Arc<dyn ActionsFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册变量提供者，同名会被替换
    pub fn register_variables(
        &mut self,
        name: impl Into<String>,
        factory: Arc<dyn VariablesFactory>,
    ) -> &mut Self {
        let name = name.into();
        debug!(
            provider = %name,
            properties = factory.properties().len(),
            "注册变量提供者"
        );
        self.variables.insert(name, factory);
        self
    }

    /// 注册动作提供者，同名会被替换
    pub fn register_actions(
        &mut self,
        name: impl Into<String>,
        factory: Arc<dyn ActionsFactory>,
    ) -> &mut Self {
        let name = name.into();
        debug!(
            provider = %name,
            actions = factory.actions().len(),
            "注册动作提供者"
        );
        self.actions.insert(name, factory);
        self
    }

    pub fn variables(&self, name: &str) -> Option<Arc<dyn VariablesFactory>> {
        self.variables.get(name).cloned()
    }

    pub fn actions(&self, name: &str) -> Option<Arc<dyn ActionsFactory>> {
        self.actions.get(name).cloned()
    }

    /// 已注册的变量提供者标识
    pub fn variables_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.variables.keys().cloned().collect();
        names.sort();
        names
    }

    /// 已注册的动作提供者标识
    pub fn actions_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    /// 变量提供者上可选的属性方法
    pub fn property_choices(&self, provider: &str) -> Vec<String> {
        self.variables(provider)
            .map(|factory| factory.properties().into_iter().map(|p| p.name).collect())
            .unwrap_or_default()
    }

    /// 某属性可选的比较操作符
    ///
    /// 属性声明了操作符白名单时返回白名单，否则返回默认操作符。
    pub fn operator_choices(&self, provider: &str, property: &str) -> Vec<String> {
        let declared = self.variables(provider).and_then(|factory| {
            factory
                .properties()
                .into_iter()
                .find(|p| p.name == property)
                .and_then(|p: PropertyDescriptor| p.operators)
        });

        declared.unwrap_or_else(|| DEFAULT_OPERATORS.iter().map(|s| s.to_string()).collect())
    }

    /// 动作提供者上可选的动作方法
    pub fn action_choices(&self, provider: &str) -> Vec<String> {
        self.actions(provider)
            .map(|factory| factory.actions())
            .unwrap_or_default()
    }
}
