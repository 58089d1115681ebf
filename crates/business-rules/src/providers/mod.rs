//! 提供者模块
//!
//! - [`provider`]: 变量/动作提供者的能力接口
//! - [`table`]: 基于方法表的通用实现
//! - [`registry`]: 标识到提供者类型的注册表

pub mod provider;
pub mod registry;
pub mod table;

pub use provider::{
    ActionsFactory, ActionsProvider, PropertyDescriptor, ProviderError, VariablesFactory,
    VariablesProvider,
};
pub use registry::ProviderRegistry;
pub use table::{ActionsTable, VariablesTable};

#[cfg(test)]
pub use provider::MockVariablesProvider;
