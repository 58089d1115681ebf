//! 基于方法表的提供者实现
//!
//! 以 "方法名 → 函数" 的表描述一个提供者类型，每次触发时由构造函数根据事件参数
//! 生成状态 `T`，属性方法和动作方法都以该状态为接收者。
//!
//! ```ignore
//! let variables = VariablesTable::new(|args: &EventArgs| Ok(args.clone()))
//!     .accessor("get_age", |args, _| Ok(args.value("age")))
//!     .restricted_accessor("get_country", &["eq", "ne"], |args, _| Ok(args.value("country")));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use super::provider::{
    ActionsFactory, ActionsProvider, PropertyDescriptor, ProviderError, VariablesFactory,
    VariablesProvider,
};
use crate::value::{EventArgs, Kwargs, Value};

type Constructor<T> = Arc<dyn Fn(&EventArgs) -> Result<T, ProviderError> + Send + Sync>;
type Accessor<T> = Arc<dyn Fn(&T, &Kwargs) -> Result<Value, ProviderError> + Send + Sync>;
type ActionFn<T> =
    Arc<dyn Fn(&mut T, &dyn VariablesProvider, &Kwargs) -> Result<(), ProviderError> + Send + Sync>;

struct AccessorEntry<T> {
    read: Accessor<T>,
    operators: Option<Vec<String>>,
}

/// 变量方法表
pub struct VariablesTable<T> {
    constructor: Constructor<T>,
    accessors: Arc<BTreeMap<String, AccessorEntry<T>>>,
}

impl<T: Send + 'static> VariablesTable<T> {
    pub fn new<C>(constructor: C) -> Self
    where
        C: Fn(&EventArgs) -> Result<T, ProviderError> + Send + Sync + 'static,
    {
        Self {
            constructor: Arc::new(constructor),
            accessors: Arc::new(BTreeMap::new()),
        }
    }

    /// 注册属性方法
    pub fn accessor<F>(self, name: &str, read: F) -> Self
    where
        F: Fn(&T, &Kwargs) -> Result<Value, ProviderError> + Send + Sync + 'static,
    {
        self.insert(name, Arc::new(read), None)
    }

    /// 注册限制了可用操作符的属性方法
    pub fn restricted_accessor<F>(self, name: &str, operators: &[&str], read: F) -> Self
    where
        F: Fn(&T, &Kwargs) -> Result<Value, ProviderError> + Send + Sync + 'static,
    {
        let operators = operators.iter().map(|s| s.to_string()).collect();
        self.insert(name, Arc::new(read), Some(operators))
    }

    fn insert(mut self, name: &str, read: Accessor<T>, operators: Option<Vec<String>>) -> Self {
        // 构造阶段尚未共享，get_mut 总能成功
        if let Some(accessors) = Arc::get_mut(&mut self.accessors) {
            accessors.insert(name.to_string(), AccessorEntry { read, operators });
        }
        self
    }
}

impl<T: Send + 'static> VariablesFactory for VariablesTable<T> {
    fn properties(&self) -> Vec<PropertyDescriptor> {
        self.accessors
            .iter()
            .map(|(name, entry)| PropertyDescriptor {
                name: name.clone(),
                operators: entry.operators.clone(),
            })
            .collect()
    }

    fn construct(&self, args: &EventArgs) -> Result<Box<dyn VariablesProvider>, ProviderError> {
        let state = (self.constructor)(args)?;
        Ok(Box::new(TableVariables {
            state,
            accessors: Arc::clone(&self.accessors),
        }))
    }
}

struct TableVariables<T> {
    state: T,
    accessors: Arc<BTreeMap<String, AccessorEntry<T>>>,
}

impl<T: Send> VariablesProvider for TableVariables<T> {
    fn get(&self, property: &str, kwargs: &Kwargs) -> Result<Value, ProviderError> {
        let entry = self
            .accessors
            .get(property)
            .ok_or_else(|| ProviderError::UnknownMethod(property.to_string()))?;
        (entry.read)(&self.state, kwargs)
    }
}

/// 动作方法表
pub struct ActionsTable<T> {
    constructor: Constructor<T>,
    actions: Arc<BTreeMap<String, ActionFn<T>>>,
}

impl<T: Send + 'static> ActionsTable<T> {
    pub fn new<C>(constructor: C) -> Self
    where
        C: Fn(&EventArgs) -> Result<T, ProviderError> + Send + Sync + 'static,
    {
        Self {
            constructor: Arc::new(constructor),
            actions: Arc::new(BTreeMap::new()),
        }
    }

    /// 注册动作方法
    pub fn action<F>(mut self, name: &str, run: F) -> Self
    where
        F: Fn(&mut T, &dyn VariablesProvider, &Kwargs) -> Result<(), ProviderError>
            + Send
            + Sync
            + 'static,
    {
        if let Some(actions) = Arc::get_mut(&mut self.actions) {
            actions.insert(name.to_string(), Arc::new(run));
        }
        self
    }
}

impl<T: Send + 'static> ActionsFactory for ActionsTable<T> {
    fn actions(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    fn construct(&self, args: &EventArgs) -> Result<Box<dyn ActionsProvider>, ProviderError> {
        let state = (self.constructor)(args)?;
        Ok(Box::new(TableActions {
            state,
            actions: Arc::clone(&self.actions),
        }))
    }
}

struct TableActions<T> {
    state: T,
    actions: Arc<BTreeMap<String, ActionFn<T>>>,
}

impl<T: Send> ActionsProvider for TableActions<T> {
    fn run(
        &mut self,
        action: &str,
        variables: &dyn VariablesProvider,
        kwargs: &Kwargs,
    ) -> Result<(), ProviderError> {
        let run = self
            .actions
            .get(action)
            .ok_or_else(|| ProviderError::UnknownMethod(action.to_string()))?;
        run(&mut self.state, variables, kwargs)
    }
}
