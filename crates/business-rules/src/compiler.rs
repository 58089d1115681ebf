//! 规则编译器
//!
//! 将持久化的规则集定义编译成不可变的执行树：
//! - 解析变量/动作提供者标识
//! - 每个规则块的条件组按 `parent` 关系构建为 arena，节点保存子节点下标
//! - 检测父子关系中的环和重复的条件组 id（只在加载时做一次）
//! - 未启用的规则块直接跳过，不参与校验
//! - 解析组合规则与比较操作符，校验属性方法、动作方法和操作符白名单
//!
//! 编译对单个规则集是全有或全无的，任何配置错误都会让整个规则集加载失败。

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Location, Result, RuleError};
use crate::models::{Action, BusinessRuleSet, CombinationRule, Condition, ConditionSet, RuleBlock};
use crate::operators::{is_pattern_operator, pattern_operator, ComparisonOperator, OperatorRegistry};
use crate::providers::{ActionsFactory, PropertyDescriptor, ProviderRegistry, VariablesFactory};
use crate::value::{Kwargs, Value};

/// 编译后的规则集
#[derive(Clone)]
pub struct CompiledRuleSet {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub signal: String,
    pub signal_kwargs: Kwargs,
    pub stop_on_first_trigger: bool,
    pub variables_provider: String,
    pub actions_provider: String,
    pub(crate) variables: Arc<dyn VariablesFactory>,
    pub(crate) actions: Arc<dyn ActionsFactory>,
    /// 已启用的规则块（按定义顺序）
    pub blocks: Vec<CompiledBlock>,
    /// 编译版本号（用于判断规则是否已重新加载）
    pub compile_version: u64,
}

impl std::fmt::Debug for CompiledRuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRuleSet")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("signal", &self.signal)
            .field("blocks", &self.blocks.len())
            .field("compile_version", &self.compile_version)
            .finish()
    }
}

/// 编译后的规则块
#[derive(Debug, Clone)]
pub struct CompiledBlock {
    pub id: String,
    pub name: String,
    /// 顶层条件组在 `sets` 中的下标
    pub roots: Vec<usize>,
    /// 条件组 arena
    pub sets: Vec<CompiledConditionSet>,
    pub actions: Vec<CompiledAction>,
}

/// 编译后的条件组
#[derive(Debug, Clone)]
pub struct CompiledConditionSet {
    pub id: String,
    pub name: String,
    pub rule: CombinationRule,
    pub conditions: Vec<CompiledCondition>,
    /// 子条件组在 arena 中的下标（按定义顺序）
    pub children: Vec<usize>,
}

/// 编译后的条件
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    pub id: String,
    pub property: String,
    pub kwargs: Kwargs,
    pub operator: ComparisonOperator,
    pub value: Value,
}

/// 编译后的动作
#[derive(Debug, Clone)]
pub struct CompiledAction {
    pub id: String,
    pub method: String,
    pub kwargs: Kwargs,
}

/// 规则编译器
pub struct RuleSetCompiler {
    operators: OperatorRegistry,
    providers: ProviderRegistry,
    compile_version: u64,
}

impl RuleSetCompiler {
    pub fn new(operators: OperatorRegistry, providers: ProviderRegistry) -> Self {
        Self {
            operators,
            providers,
            compile_version: 0,
        }
    }

    pub fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// 从 JSON 字符串编译规则集
    pub fn compile_from_json(&mut self, json: &str) -> Result<CompiledRuleSet> {
        let rule_set: BusinessRuleSet = serde_json::from_str(json)?;
        self.compile(&rule_set)
    }

    /// 编译规则集
    pub fn compile(&mut self, rule_set: &BusinessRuleSet) -> Result<CompiledRuleSet> {
        let location = Location::rule_set(&rule_set.id);

        let variables = self
            .providers
            .variables(&rule_set.variables_provider)
            .ok_or_else(|| RuleError::ProviderConstruction {
                provider: rule_set.variables_provider.clone(),
                reason: "变量提供者未注册".to_string(),
                location: location.clone(),
            })?;

        let actions = self
            .providers
            .actions(&rule_set.actions_provider)
            .ok_or_else(|| RuleError::ProviderConstruction {
                provider: rule_set.actions_provider.clone(),
                reason: "动作提供者未注册".to_string(),
                location: location.clone(),
            })?;

        let catalog = Catalog {
            properties: variables
                .properties()
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            actions: actions.actions(),
        };

        let blocks = rule_set
            .rule_blocks
            .iter()
            .filter(|block| block.enabled)
            .map(|block| self.compile_block(block, &catalog, location.clone().block(&block.id)))
            .collect::<Result<Vec<_>>>()?;

        self.compile_version += 1;

        Ok(CompiledRuleSet {
            id: rule_set.id.clone(),
            name: rule_set.name.clone(),
            enabled: rule_set.enabled,
            signal: rule_set.signal.clone(),
            signal_kwargs: rule_set.signal_kwargs.clone(),
            stop_on_first_trigger: rule_set.stop_on_first_trigger,
            variables_provider: rule_set.variables_provider.clone(),
            actions_provider: rule_set.actions_provider.clone(),
            variables,
            actions,
            blocks,
            compile_version: self.compile_version,
        })
    }

    fn compile_block(
        &self,
        block: &RuleBlock,
        catalog: &Catalog,
        location: Location,
    ) -> Result<CompiledBlock> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(block.condition_sets.len());
        for (i, set) in block.condition_sets.iter().enumerate() {
            if index.insert(set.id.as_str(), i).is_some() {
                return Err(RuleError::DuplicateConditionSet {
                    id: set.id.clone(),
                    location: location.clone().condition_set(&set.id),
                });
            }
        }

        let mut sets = block
            .condition_sets
            .iter()
            .map(|set| self.compile_condition_set(set, catalog, location.clone().condition_set(&set.id)))
            .collect::<Result<Vec<_>>>()?;

        // 按定义顺序建立父子关系
        let mut roots = Vec::new();
        for (i, set) in block.condition_sets.iter().enumerate() {
            match &set.parent {
                None => roots.push(i),
                Some(parent) => {
                    let parent_index = *index.get(parent.as_str()).ok_or_else(|| {
                        RuleError::UnknownParentConditionSet {
                            parent: parent.clone(),
                            location: location.clone().condition_set(&set.id),
                        }
                    })?;
                    sets[parent_index].children.push(i);
                }
            }
        }

        if let Some(cyclic) = find_unreachable(&sets, &roots) {
            return Err(RuleError::CyclicConditionSet {
                location: location.condition_set(&sets[cyclic].id),
            });
        }

        let actions = block
            .actions
            .iter()
            .map(|action| compile_action(action, catalog, location.clone().action(&action.id)))
            .collect::<Result<Vec<_>>>()?;

        Ok(CompiledBlock {
            id: block.id.clone(),
            name: block.name.clone(),
            roots,
            sets,
            actions,
        })
    }

    fn compile_condition_set(
        &self,
        set: &ConditionSet,
        catalog: &Catalog,
        location: Location,
    ) -> Result<CompiledConditionSet> {
        let rule = set
            .combination_rule
            .parse::<CombinationRule>()
            .map_err(|rule| RuleError::InvalidCombinationRule {
                rule,
                location: location.clone(),
            })?;

        let conditions = set
            .conditions
            .iter()
            .map(|c| self.compile_condition(c, catalog, location.clone().condition(&c.id)))
            .collect::<Result<Vec<_>>>()?;

        Ok(CompiledConditionSet {
            id: set.id.clone(),
            name: set.name.clone(),
            rule,
            conditions,
            children: Vec::new(),
        })
    }

    fn compile_condition(
        &self,
        condition: &Condition,
        catalog: &Catalog,
        location: Location,
    ) -> Result<CompiledCondition> {
        let property = catalog
            .properties
            .get(&condition.property_method)
            .ok_or_else(|| RuleError::UnknownProperty {
                property: condition.property_method.clone(),
                location: location.clone(),
            })?;

        let operator = self
            .operators
            .get(&condition.comparison_operator)
            .cloned()
            .ok_or_else(|| RuleError::UnknownOperator {
                operator: condition.comparison_operator.clone(),
                location: location.clone(),
            })?;

        if !property.allows(operator.id()) {
            return Err(RuleError::OperatorNotAllowed {
                property: property.name.clone(),
                operator: condition.comparison_operator.clone(),
                allowed: property.operators.clone().unwrap_or_default(),
                location,
            });
        }

        let value = Value::from(condition.value.clone());

        // 正则只在加载时编译一次
        let operator = if is_pattern_operator(operator.id()) {
            let pattern = value.to_text();
            pattern_operator(&pattern).map_err(|e| RuleError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
                location: location.clone(),
            })?
        } else {
            operator
        };

        Ok(CompiledCondition {
            id: condition.id.clone(),
            property: condition.property_method.clone(),
            kwargs: condition.property_kwargs.clone(),
            operator,
            value,
        })
    }
}

/// 提供者能力目录
struct Catalog {
    properties: HashMap<String, PropertyDescriptor>,
    actions: Vec<String>,
}

fn compile_action(action: &Action, catalog: &Catalog, location: Location) -> Result<CompiledAction> {
    if !catalog.actions.iter().any(|a| a == &action.action_method) {
        return Err(RuleError::UnknownAction {
            method: action.action_method.clone(),
            location,
        });
    }

    Ok(CompiledAction {
        id: action.id.clone(),
        method: action.action_method.clone(),
        kwargs: action.action_kwargs.clone(),
    })
}

/// 查找从顶层条件组不可达的节点
///
/// 每个节点最多一个父节点，不可达的节点必然位于环上或挂在环下。
/// 返回环上的一个节点下标。
fn find_unreachable(sets: &[CompiledConditionSet], roots: &[usize]) -> Option<usize> {
    let mut visited = vec![false; sets.len()];
    let mut stack: Vec<usize> = roots.to_vec();

    while let Some(i) = stack.pop() {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        stack.extend(sets[i].children.iter().copied());
    }

    let start = visited.iter().position(|v| !v)?;

    // 沿父链回溯，第一个重复出现的节点在环上
    let parents: HashMap<usize, usize> = sets
        .iter()
        .enumerate()
        .flat_map(|(p, set)| set.children.iter().map(move |&c| (c, p)))
        .collect();

    let mut seen = vec![false; sets.len()];
    let mut current = start;
    while !seen[current] {
        seen[current] = true;
        match parents.get(&current) {
            Some(&parent) => current = parent,
            None => return Some(start),
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, Condition, ConditionSet, RuleBlock};
    use crate::providers::{ActionsTable, VariablesTable};
    use crate::value::EventArgs;

    fn compiler() -> RuleSetCompiler {
        let variables = VariablesTable::new(|args: &EventArgs| Ok(args.clone()))
            .accessor("get_age", |args, _| Ok(args.value("age")))
            .accessor("get_email", |args, _| Ok(args.value("email")))
            .restricted_accessor("get_country", &["eq", "ne"], |args, _| {
                Ok(args.value("country"))
            });
        let actions = ActionsTable::new(|_: &EventArgs| Ok(())).action("grant_access", |_, _, _| Ok(()));

        let mut providers = ProviderRegistry::new();
        providers
            .register_variables("people", Arc::new(variables))
            .register_actions("access", Arc::new(actions));

        RuleSetCompiler::new(OperatorRegistry::with_defaults(), providers)
    }

    fn rule_set(block: RuleBlock) -> BusinessRuleSet {
        BusinessRuleSet::new("test", "people", "access").with_block(block)
    }

    #[test]
    fn test_compile_builds_arena() {
        let outer = ConditionSet::all("outer")
            .with_id("outer")
            .with_condition(Condition::new("get_age", "ge", "18"));
        let inner = ConditionSet::any("inner")
            .with_id("inner")
            .with_parent("outer")
            .with_condition(Condition::new("get_country", "eq", "US"));
        let second_root = ConditionSet::all("second").with_id("second");

        let block = RuleBlock::new("block")
            .with_condition_set(outer)
            .with_condition_set(inner)
            .with_condition_set(second_root)
            .with_action(Action::new("grant_access"));

        let compiled = compiler().compile(&rule_set(block)).unwrap();
        let block = &compiled.blocks[0];

        assert_eq!(block.roots, vec![0, 2]);
        assert_eq!(block.sets[0].children, vec![1]);
        assert_eq!(block.sets[1].rule, CombinationRule::Any);
        assert_eq!(block.sets[0].conditions[0].value, Value::from("18"));
        assert_eq!(block.actions[0].method, "grant_access");
    }

    #[test]
    fn test_compile_version() {
        let mut compiler = compiler();
        let rs = rule_set(RuleBlock::new("block"));

        assert_eq!(compiler.compile(&rs).unwrap().compile_version, 1);
        assert_eq!(compiler.compile(&rs).unwrap().compile_version, 2);
    }

    #[test]
    fn test_unknown_provider() {
        let rs = BusinessRuleSet::new("test", "missing", "access");
        let err = compiler().compile(&rs).unwrap_err();
        assert!(matches!(
            err,
            RuleError::ProviderConstruction { ref provider, .. } if provider == "missing"
        ));
    }

    #[test]
    fn test_unknown_operator_names_condition() {
        let condition = Condition::new("get_age", "op.nonexistent", "18");
        let condition_id = condition.id.clone();
        let block = RuleBlock::new("block")
            .with_condition_set(ConditionSet::all("set").with_condition(condition));

        let err = compiler().compile(&rule_set(block)).unwrap_err();
        match err {
            RuleError::UnknownOperator { operator, location } => {
                assert_eq!(operator, "op.nonexistent");
                assert_eq!(location.condition, Some(condition_id));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_property() {
        let block = RuleBlock::new("block").with_condition_set(
            ConditionSet::all("set").with_condition(Condition::new("get_height", "ge", "1")),
        );

        let err = compiler().compile(&rule_set(block)).unwrap_err();
        assert!(matches!(err, RuleError::UnknownProperty { ref property, .. } if property == "get_height"));
    }

    #[test]
    fn test_unknown_action() {
        let action = Action::new("launch_rocket");
        let action_id = action.id.clone();
        let block = RuleBlock::new("block").with_action(action);

        let err = compiler().compile(&rule_set(block)).unwrap_err();
        assert_eq!(err.location().unwrap().action, Some(action_id));
        assert_eq!(err.kind(), "unknown_action");
    }

    #[test]
    fn test_invalid_combination_rule() {
        let mut set = ConditionSet::all("set");
        set.combination_rule = "most".to_string();
        let block = RuleBlock::new("block").with_condition_set(set);

        let err = compiler().compile(&rule_set(block)).unwrap_err();
        assert!(matches!(err, RuleError::InvalidCombinationRule { ref rule, .. } if rule == "most"));
    }

    #[test]
    fn test_operator_not_allowed() {
        let block = RuleBlock::new("block").with_condition_set(
            ConditionSet::all("set").with_condition(Condition::new("get_country", "startsWith", "U")),
        );

        let err = compiler().compile(&rule_set(block)).unwrap_err();
        match err {
            RuleError::OperatorNotAllowed {
                property, allowed, ..
            } => {
                assert_eq!(property, "get_country");
                assert_eq!(allowed, vec!["eq".to_string(), "ne".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_regex_pattern() {
        let block = RuleBlock::new("block").with_condition_set(
            ConditionSet::all("set").with_condition(Condition::new("get_email", "matches", "[invalid")),
        );

        let err = compiler().compile(&rule_set(block)).unwrap_err();
        assert_eq!(err.kind(), "invalid_pattern");
    }

    #[test]
    fn test_matches_condition_holds_compiled_pattern() {
        let block = RuleBlock::new("block").with_condition_set(
            ConditionSet::all("set").with_condition(Condition::new("get_email", "matches", r"@corp\.io$")),
        );

        let compiled = compiler().compile(&rule_set(block)).unwrap();
        let condition = &compiled.blocks[0].sets[0].conditions[0];
        assert_eq!(condition.operator.id(), "matches");
        assert!(condition.operator.apply(&Value::from("a@corp.io"), &Value::Null).unwrap());
    }

    #[test]
    fn test_disabled_block_not_validated() {
        let live = RuleBlock::new("live").with_action(Action::new("grant_access"));
        let draft = RuleBlock::new("draft")
            .enabled(false)
            .with_condition_set(
                ConditionSet::all("set").with_condition(Condition::new("get_age", "op.nonexistent", "1")),
            )
            .with_action(Action::new("launch_rocket"));

        let rs = BusinessRuleSet::new("test", "people", "access")
            .with_block(live)
            .with_block(draft);

        let compiled = compiler().compile(&rs).unwrap();
        assert_eq!(compiled.blocks.len(), 1);
        assert_eq!(compiled.blocks[0].name, "live");
    }

    #[test]
    fn test_duplicate_condition_set_id_rejected() {
        let block = RuleBlock::new("block")
            .with_condition_set(ConditionSet::any("first").with_id("x"))
            .with_condition_set(ConditionSet::all("second").with_id("x"))
            .with_condition_set(ConditionSet::all("child").with_id("child").with_parent("x"));

        let err = compiler().compile(&rule_set(block)).unwrap_err();
        match err {
            RuleError::DuplicateConditionSet { ref id, ref location } => {
                assert_eq!(id, "x");
                assert_eq!(location.condition_set.as_deref(), Some("x"));
            }
            ref other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.kind(), "duplicate_condition_set");
    }

    #[test]
    fn test_cycle_detection() {
        // a -> b -> c -> a，另有一个合法的顶层组
        let block = RuleBlock::new("block")
            .with_condition_set(ConditionSet::all("root").with_id("root"))
            .with_condition_set(ConditionSet::all("a").with_id("a").with_parent("c"))
            .with_condition_set(ConditionSet::all("b").with_id("b").with_parent("a"))
            .with_condition_set(ConditionSet::all("c").with_id("c").with_parent("b"));

        let err = compiler().compile(&rule_set(block)).unwrap_err();
        let set = err.location().unwrap().condition_set.clone().unwrap();
        assert!(matches!(err, RuleError::CyclicConditionSet { .. }));
        assert!(["a", "b", "c"].contains(&set.as_str()));
    }

    #[test]
    fn test_self_parent_is_cycle() {
        let block = RuleBlock::new("block")
            .with_condition_set(ConditionSet::any("self").with_id("self").with_parent("self"));

        let err = compiler().compile(&rule_set(block)).unwrap_err();
        assert_eq!(err.location().unwrap().condition_set.as_deref(), Some("self"));
    }

    #[test]
    fn test_subtree_under_cycle_reports_cycle_member() {
        let block = RuleBlock::new("block")
            .with_condition_set(ConditionSet::all("x").with_id("x").with_parent("y"))
            .with_condition_set(ConditionSet::all("y").with_id("y").with_parent("x"))
            .with_condition_set(ConditionSet::all("leaf").with_id("leaf").with_parent("x"));

        let err = compiler().compile(&rule_set(block)).unwrap_err();
        let set = err.location().unwrap().condition_set.clone().unwrap();
        assert!(set == "x" || set == "y");
    }

    #[test]
    fn test_parent_in_other_block_rejected() {
        let first = RuleBlock::new("first").with_condition_set(ConditionSet::all("p").with_id("p"));
        let second = RuleBlock::new("second")
            .with_condition_set(ConditionSet::all("child").with_id("child").with_parent("p"));

        let rs = BusinessRuleSet::new("test", "people", "access")
            .with_block(first)
            .with_block(second);

        let err = compiler().compile(&rs).unwrap_err();
        assert!(matches!(
            err,
            RuleError::UnknownParentConditionSet { ref parent, .. } if parent == "p"
        ));
    }

    #[test]
    fn test_compile_from_json() {
        let json = r#"
        {
            "id": "rs-json",
            "name": "json",
            "enabled": true,
            "variables_provider": "people",
            "actions_provider": "access",
            "rule_blocks": [
                {
                    "name": "adults",
                    "enabled": true,
                    "condition_sets": [
                        {
                            "name": "age",
                            "conditions": [
                                {"property_method": "get_age", "comparison_operator": "operator.ge", "value": "18"}
                            ]
                        }
                    ],
                    "actions": [{"action_method": "grant_access"}]
                }
            ]
        }
        "#;

        let compiled = compiler().compile_from_json(json).unwrap();
        assert_eq!(compiled.id, "rs-json");
        assert!(compiled.enabled);
        assert_eq!(compiled.blocks[0].sets[0].conditions[0].operator.id(), "ge");
    }
}
