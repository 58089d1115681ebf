//! 类型化的参数值
//!
//! 规则中的 kwargs、属性方法的返回值、条件的右值都使用 [`Value`] 表示。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 关键字参数包（有序，保证评估结果确定）
pub type Kwargs = BTreeMap<String, Value>;

/// 参数值
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// 数值视图，文本会尝试解析
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// 布尔视图，文本接受 true/false/1/0（不区分大小写）
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// 真值判断
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
        }
    }

    /// 文本形式，用于字符串类操作符
    pub fn to_text(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Text(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, item)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::from(&v)
    }
}

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// 事件参数 - 触发规则集的外部事件载荷
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventArgs {
    data: serde_json::Value,
}

impl EventArgs {
    pub fn new(data: serde_json::Value) -> Self {
        Self { data }
    }

    /// 获取字段值（支持点号分隔的路径，如 "instance.spot.id" 或 "items.0.name"）
    pub fn get_field(&self, path: &str) -> Option<&serde_json::Value> {
        let mut current = &self.data;

        for part in path.split('.') {
            match current {
                serde_json::Value::Object(map) => {
                    current = map.get(part)?;
                }
                serde_json::Value::Array(arr) => {
                    let index: usize = part.parse().ok()?;
                    current = arr.get(index)?;
                }
                _ => return None,
            }
        }

        Some(current)
    }

    /// 获取字段并转换为 [`Value`]，缺失时为 Null
    pub fn value(&self, path: &str) -> Value {
        self.get_field(path).map(Value::from).unwrap_or(Value::Null)
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }
}

impl From<serde_json::Value> for EventArgs {
    fn from(data: serde_json::Value) -> Self {
        Self::new(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_deserialization() {
        let kwargs: Kwargs = serde_json::from_value(json!({
            "channel": "@sales",
            "retries": 3,
            "urgent": true,
            "tags": ["a", "b"],
            "extra": null
        }))
        .unwrap();

        assert_eq!(kwargs["channel"], Value::Text("@sales".to_string()));
        assert_eq!(kwargs["retries"], Value::Number(3.0));
        assert_eq!(kwargs["urgent"], Value::Bool(true));
        assert_eq!(
            kwargs["tags"],
            Value::List(vec![Value::from("a"), Value::from("b")])
        );
        assert!(kwargs["extra"].is_null());
    }

    #[test]
    fn test_number_text_form() {
        // 整数值的文本形式不带小数点
        assert_eq!(Value::from(21).to_text(), "21");
        assert_eq!(Value::from(2.5).to_text(), "2.5");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::List(vec![Value::Null]).is_truthy());
    }

    #[test]
    fn test_event_args_get_field() {
        let args = EventArgs::new(json!({
            "instance": {
                "spot": {"id": 42, "market": {"id": 7}},
                "items": [{"name": "ticket"}]
            }
        }));

        assert_eq!(args.value("instance.spot.id"), Value::Number(42.0));
        assert_eq!(args.value("instance.spot.market.id"), Value::Number(7.0));
        assert_eq!(args.value("instance.items.0.name"), Value::from("ticket"));
        assert!(args.value("instance.missing").is_null());
    }
}
