//! 比较操作符注册表
//!
//! 条件中保存的是操作符标识（如 `ge`、`operator.ge`），评估前通过
//! [`OperatorRegistry`] 解析成二元谓词。左值来自变量提供者，右值是条件里保存的文本字面量，
//! 类型转换由各操作符自己负责。

use crate::value::Value;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 默认操作符标识
pub const DEFAULT_OPERATORS: &[&str] = &[
    "lt",
    "le",
    "eq",
    "ne",
    "ge",
    "gt",
    "not",
    "truth",
    "is",
    "isNot",
    "startsWith",
    "endsWith",
];

/// 操作符比较失败（值的类型无法比较）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonError {
    pub expected: String,
    pub actual: String,
}

impl ComparisonError {
    fn new(expected: impl Into<String>, actual: &Value) -> Self {
        Self {
            expected: expected.into(),
            actual: actual.type_name().to_string(),
        }
    }
}

/// 二元谓词
pub type Predicate = dyn Fn(&Value, &Value) -> Result<bool, ComparisonError> + Send + Sync;

/// 已解析的比较操作符
#[derive(Clone)]
pub struct ComparisonOperator {
    id: String,
    predicate: Arc<Predicate>,
}

impl ComparisonOperator {
    pub fn new<F>(id: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value, &Value) -> Result<bool, ComparisonError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 计算 `predicate(left, right)`
    pub fn apply(&self, left: &Value, right: &Value) -> Result<bool, ComparisonError> {
        (self.predicate)(left, right)
    }
}

impl fmt::Debug for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComparisonOperator")
            .field("id", &self.id)
            .finish()
    }
}

/// 操作符注册表
#[derive(Clone, Debug)]
pub struct OperatorRegistry {
    operators: HashMap<String, ComparisonOperator>,
}

impl OperatorRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    /// 注册操作符，同名会被替换
    pub fn register(&mut self, operator: ComparisonOperator) -> &mut Self {
        self.operators.insert(operator.id.clone(), operator);
        self
    }

    /// 以新标识注册已有操作符的别名
    pub fn alias(&mut self, alias: &str, target: &str) -> &mut Self {
        // 别名解析为目标操作符，id 保持为规范名
        if let Some(existing) = self.operators.get(target).cloned() {
            self.operators.insert(alias.to_string(), existing);
        }
        self
    }

    pub fn get(&self, id: &str) -> Option<&ComparisonOperator> {
        self.operators.get(id)
    }

    /// 解析操作符标识
    pub fn resolve(&self, id: &str) -> crate::Result<ComparisonOperator> {
        self.get(id)
            .cloned()
            .ok_or_else(|| crate::RuleError::UnknownOperator {
                operator: id.to_string(),
                location: Default::default(),
            })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.operators.contains_key(id)
    }

    /// 所有已注册的标识（排序后）
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.operators.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 包含默认操作符的注册表
    ///
    /// 同时注册旧版配置中使用的点号路径标识（`operator.lt`、`str.startswith` 等）。
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry
            .register(ComparisonOperator::new("lt", |l, r| {
                ordering(l, r).map(|o| o == Some(Ordering::Less))
            }))
            .register(ComparisonOperator::new("le", |l, r| {
                ordering(l, r).map(|o| matches!(o, Some(Ordering::Less | Ordering::Equal)))
            }))
            .register(ComparisonOperator::new("ge", |l, r| {
                ordering(l, r).map(|o| matches!(o, Some(Ordering::Greater | Ordering::Equal)))
            }))
            .register(ComparisonOperator::new("gt", |l, r| {
                ordering(l, r).map(|o| o == Some(Ordering::Greater))
            }))
            .register(ComparisonOperator::new("eq", |l, r| Ok(loosely_equal(l, r))))
            .register(ComparisonOperator::new("ne", |l, r| Ok(!loosely_equal(l, r))))
            .register(ComparisonOperator::new("not", |l, _| Ok(!l.is_truthy())))
            .register(ComparisonOperator::new("truth", |l, _| Ok(l.is_truthy())))
            .register(ComparisonOperator::new("is", |l, r| Ok(l == r)))
            .register(ComparisonOperator::new("isNot", |l, r| Ok(l != r)))
            .register(ComparisonOperator::new("startsWith", |l, r| {
                text(l).map(|s| s.starts_with(&r.to_text()))
            }))
            .register(ComparisonOperator::new("endsWith", |l, r| {
                text(l).map(|s| s.ends_with(&r.to_text()))
            }))
            .register(ComparisonOperator::new("contains", contains))
            .register(ComparisonOperator::new("matches", matches_pattern));

        for (alias, target) in [
            ("operator.lt", "lt"),
            ("operator.le", "le"),
            ("operator.eq", "eq"),
            ("operator.ne", "ne"),
            ("operator.ge", "ge"),
            ("operator.gt", "gt"),
            ("operator.not_", "not"),
            ("operator.truth", "truth"),
            ("operator.is_", "is"),
            ("operator.is_not", "isNot"),
            ("str.startswith", "startsWith"),
            ("str.endswith", "endsWith"),
        ] {
            registry.alias(alias, target);
        }

        registry
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// 操作符是否需要正则模式作为右值
pub fn is_pattern_operator(id: &str) -> bool {
    id == "matches"
}

/// 绑定预编译正则的 `matches` 操作符，评估时忽略右值
pub fn pattern_operator(pattern: &str) -> Result<ComparisonOperator, regex::Error> {
    let regex = Regex::new(pattern)?;
    Ok(ComparisonOperator::new("matches", move |left, _| {
        text(left).map(|s| regex.is_match(s))
    }))
}

/// 排序比较：左值为数值时右值按数值解析，两边都是文本时按字典序
fn ordering(left: &Value, right: &Value) -> Result<Option<Ordering>, ComparisonError> {
    match left {
        Value::Number(l) => {
            let r = right
                .as_f64()
                .ok_or_else(|| ComparisonError::new("number", right))?;
            Ok(l.partial_cmp(&r))
        }
        Value::Text(l) => match right {
            Value::Text(r) => Ok(Some(l.as_str().cmp(r.as_str()))),
            Value::Number(r) => {
                let l = left
                    .as_f64()
                    .ok_or_else(|| ComparisonError::new("number", left))?;
                Ok(l.partial_cmp(r))
            }
            other => Err(ComparisonError::new("string or number", other)),
        },
        other => Err(ComparisonError::new("number or string", other)),
    }
}

/// 宽松相等：右值按左值的类型转换后比较
///
/// 数值按 `f64` 精确相等比较，不带容差。
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, r) => r.is_null(),
        (_, Value::Null) => false,
        (Value::Number(l), r) => r.as_f64().is_some_and(|r| *l == r),
        (Value::Bool(l), r) => r.as_bool() == Some(*l),
        (Value::Text(l), r) => *l == r.to_text(),
        (l, r) => l == r,
    }
}

fn text(value: &Value) -> Result<&str, ComparisonError> {
    value
        .as_str()
        .ok_or_else(|| ComparisonError::new("string", value))
}

fn contains(left: &Value, right: &Value) -> Result<bool, ComparisonError> {
    match left {
        Value::Text(s) => Ok(s.contains(&right.to_text())),
        Value::List(items) => Ok(items.iter().any(|item| loosely_equal(item, right))),
        other => Err(ComparisonError::new("string or list", other)),
    }
}

fn matches_pattern(left: &Value, right: &Value) -> Result<bool, ComparisonError> {
    let s = text(left)?;
    let regex = Regex::new(&right.to_text())
        .map_err(|_| ComparisonError::new("valid regex pattern", right))?;
    Ok(regex.is_match(s))
}
