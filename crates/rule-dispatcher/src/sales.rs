//! 销售状态流转示例提供者
//!
//! 事件参数中的 `instance` 描述一次状态流转：
//!
//! ```json
//! {
//!     "instance": {
//!         "spot": {"id": 42, "market": {"id": 7}},
//!         "source": {"category": "lead", "name": "Qualified"},
//!         "target": {"category": "won", "name": "Closed Won"}
//!     }
//! }
//! ```
//!
//! 动作不直接访问外部系统，而是写入 [`Outbox`] 并记录日志，由下游投递。

use std::sync::Arc;

use business_rules::{
    ActionsTable, EventArgs, Kwargs, ProviderError, ProviderRegistry, Value, VariablesProvider,
    VariablesTable,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

pub const VARIABLES_PROVIDER: &str = "sales_transition_variables";
pub const ACTIONS_PROVIDER: &str = "sales_transition_actions";

const DEFAULT_USERNAME: &str = "Dynamic Sales Transition Bot";
const DEFAULT_CHANNEL: &str = "#sales";
const ICON_URL: &str = "https://i.imgur.com/uxUK5.jpg";

/// 待发送的 Slack 消息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlackMessage {
    pub username: String,
    pub channel: String,
    pub text: String,
    pub icon_url: String,
}

/// 系统变更日志
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeLogEntry {
    pub spot_id: Value,
    pub source_name: Value,
    pub target_name: Value,
    pub recorded_at: DateTime<Utc>,
}

/// 动作产生的待投递记录
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Mutex<Vec<SlackMessage>>,
    change_log: Mutex<Vec<ChangeLogEntry>>,
}

impl Outbox {
    pub fn messages(&self) -> Vec<SlackMessage> {
        self.messages.lock().clone()
    }

    pub fn change_log(&self) -> Vec<ChangeLogEntry> {
        self.change_log.lock().clone()
    }
}

/// 变量实例的状态：事件中的 instance 对象
pub struct Transition {
    instance: EventArgs,
}

impl Transition {
    fn read(&self, path: &str) -> Result<Value, ProviderError> {
        Ok(self.instance.value(path))
    }
}

/// 销售状态流转变量提供者
pub fn variables() -> VariablesTable<Transition> {
    VariablesTable::new(|args: &EventArgs| {
        let instance = args
            .get_field("instance")
            .filter(|v| v.is_object())
            .cloned()
            .ok_or_else(|| ProviderError::InvalidEvent("事件缺少 instance 对象".to_string()))?;
        Ok(Transition {
            instance: EventArgs::new(instance),
        })
    })
    .restricted_accessor("get_spot_id", &["eq", "ne"], |t, _| t.read("spot.id"))
    .accessor("get_spot_market_id", |t, _| t.read("spot.market.id"))
    .accessor("get_source_category", |t, _| t.read("source.category"))
    .accessor("get_source_name", |t, _| t.read("source.name"))
    .accessor("get_target_category", |t, _| t.read("target.category"))
    .accessor("get_target_name", |t, _| t.read("target.name"))
}

fn kwarg_text(kwargs: &Kwargs, key: &str, default: &str) -> String {
    kwargs
        .get(key)
        .filter(|v| !v.is_null())
        .map(Value::to_text)
        .unwrap_or_else(|| default.to_string())
}

fn read(variables: &dyn VariablesProvider, property: &str) -> Result<Value, ProviderError> {
    variables.get(property, &Kwargs::new())
}

/// 销售状态流转动作提供者
pub fn actions(outbox: Arc<Outbox>) -> ActionsTable<Arc<Outbox>> {
    ActionsTable::new(move |_: &EventArgs| Ok(Arc::clone(&outbox)))
        .action("send_slack_message", |outbox, _, kwargs| {
            let message = SlackMessage {
                username: kwarg_text(kwargs, "username", DEFAULT_USERNAME),
                channel: kwarg_text(kwargs, "channel", DEFAULT_CHANNEL),
                text: kwarg_text(kwargs, "text", ""),
                icon_url: ICON_URL.to_string(),
            };
            info!(
                channel = %message.channel,
                username = %message.username,
                text = %message.text,
                "Slack 消息已入队"
            );
            outbox.messages.lock().push(message);
            Ok(())
        })
        .action("create_system_change_log", |outbox, variables, _| {
            let entry = ChangeLogEntry {
                spot_id: read(variables, "get_spot_id")?,
                source_name: read(variables, "get_source_name")?,
                target_name: read(variables, "get_target_name")?,
                recorded_at: Utc::now(),
            };
            info!(
                spot_id = %entry.spot_id,
                from = %entry.source_name,
                to = %entry.target_name,
                "系统变更日志已记录"
            );
            outbox.change_log.lock().push(entry);
            Ok(())
        })
}

/// 注册了示例提供者的注册表
pub fn registry(outbox: Arc<Outbox>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry
        .register_variables(VARIABLES_PROVIDER, Arc::new(variables()))
        .register_actions(ACTIONS_PROVIDER, Arc::new(actions(outbox)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use business_rules::{ActionsFactory, VariablesFactory};
    use serde_json::json;

    fn transition() -> EventArgs {
        EventArgs::new(json!({
            "instance": {
                "spot": {"id": 42, "market": {"id": 7}},
                "source": {"category": "lead", "name": "Qualified"},
                "target": {"category": "won", "name": "Closed Won"}
            }
        }))
    }

    #[test]
    fn test_variables_read_instance() {
        let instance = variables().construct(&transition()).unwrap();
        let get = |p: &str| instance.get(p, &Kwargs::new()).unwrap();

        assert_eq!(get("get_spot_id"), Value::from(42));
        assert_eq!(get("get_spot_market_id"), Value::from(7));
        assert_eq!(get("get_source_category"), Value::from("lead"));
        assert_eq!(get("get_source_name"), Value::from("Qualified"));
        assert_eq!(get("get_target_category"), Value::from("won"));
        assert_eq!(get("get_target_name"), Value::from("Closed Won"));
    }

    #[test]
    fn test_spot_id_operator_restriction() {
        let properties = variables().properties();
        let spot = properties.iter().find(|p| p.name == "get_spot_id").unwrap();
        assert!(spot.allows("eq"));
        assert!(!spot.allows("gt"));

        let market = properties.iter().find(|p| p.name == "get_spot_market_id").unwrap();
        assert!(market.allows("gt"));
    }

    #[test]
    fn test_missing_instance_rejected() {
        let result = variables().construct(&EventArgs::new(json!({"spot": {}})));
        assert!(matches!(result, Err(ProviderError::InvalidEvent(_))));
    }

    #[test]
    fn test_send_slack_message_defaults() {
        let outbox = Arc::new(Outbox::default());
        let args = transition();
        let vars = variables().construct(&args).unwrap();
        let mut acts = actions(Arc::clone(&outbox)).construct(&args).unwrap();

        let mut kwargs = Kwargs::new();
        kwargs.insert("text".to_string(), Value::from("Spot 42 closed"));
        acts.run("send_slack_message", vars.as_ref(), &kwargs).unwrap();

        let messages = outbox.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].username, DEFAULT_USERNAME);
        assert_eq!(messages[0].channel, DEFAULT_CHANNEL);
        assert_eq!(messages[0].text, "Spot 42 closed");
    }

    #[test]
    fn test_create_system_change_log() {
        let outbox = Arc::new(Outbox::default());
        let args = transition();
        let vars = variables().construct(&args).unwrap();
        let mut acts = actions(Arc::clone(&outbox)).construct(&args).unwrap();

        acts.run("create_system_change_log", vars.as_ref(), &Kwargs::new())
            .unwrap();

        let log = outbox.change_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].spot_id, Value::from(42));
        assert_eq!(log[0].target_name, Value::from("Closed Won"));
    }

    #[test]
    fn test_registry_names() {
        let registry = registry(Arc::new(Outbox::default()));
        assert_eq!(registry.variables_names(), vec![VARIABLES_PROVIDER.to_string()]);
        assert_eq!(
            registry.action_choices(ACTIONS_PROVIDER),
            vec![
                "create_system_change_log".to_string(),
                "send_slack_message".to_string()
            ]
        );
    }
}
