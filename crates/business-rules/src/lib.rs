//! 业务规则引擎
//!
//! 以数据描述业务规则，由外部事件触发评估：
//! - 规则集 → 规则块 → 条件组树 / 动作
//! - 条件组按 all / any 组合子条件和子条件组
//! - 属性方法与动作方法由注册的提供者实现
//! - 规则加载时编译并校验，运行时只做求值
//! - 按信号分发事件，分发表可原子替换
//!
//! ```ignore
//! let mut compiler = RuleSetCompiler::new(OperatorRegistry::with_defaults(), providers);
//! let compiled = compiler.compile(&rule_set)?;
//! let outcome = compiled.trigger(&EventArgs::new(json!({"age": 21})))?;
//! ```

pub mod compiler;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod models;
pub mod operators;
pub mod providers;
pub mod value;

pub use compiler::{
    CompiledAction, CompiledBlock, CompiledCondition, CompiledConditionSet, CompiledRuleSet,
    RuleSetCompiler,
};
pub use dispatch::{DispatchReport, DispatchResult, DispatchTable, Event, EventDispatcher};
pub use error::{Location, Result, RuleError};
pub use executor::{BlockOutcome, TriggerOutcome};
pub use models::{Action, BusinessRuleSet, CombinationRule, Condition, ConditionSet, RuleBlock};
pub use operators::{ComparisonOperator, OperatorRegistry, DEFAULT_OPERATORS};
pub use providers::{
    ActionsFactory, ActionsProvider, ActionsTable, PropertyDescriptor, ProviderError,
    ProviderRegistry, VariablesFactory, VariablesProvider, VariablesTable,
};
pub use value::{EventArgs, Kwargs, Value};
