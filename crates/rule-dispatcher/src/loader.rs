//! 规则文件加载
//!
//! 规则文件是 JSON，可以是规则集数组，也可以是 `{"rule_sets": [...]}`。
//! 每个规则集单独编译，编译失败的规则集记录警告后跳过，其余规则集照常加载。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use business_rules::{BusinessRuleSet, DispatchTable, EventDispatcher, RuleError, RuleSetCompiler};
use parking_lot::Mutex;
use rules_shared::observability::metrics::record_rules_reload;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::DispatcherError;

#[derive(Deserialize)]
#[serde(untagged)]
enum RulesDocument {
    List(Vec<BusinessRuleSet>),
    Wrapped { rule_sets: Vec<BusinessRuleSet> },
}

/// 解析规则文件内容
pub fn parse_rules(content: &str) -> Result<Vec<BusinessRuleSet>, DispatcherError> {
    let document: RulesDocument =
        serde_json::from_str(content).map_err(DispatcherError::RulesParse)?;
    Ok(match document {
        RulesDocument::List(rule_sets) => rule_sets,
        RulesDocument::Wrapped { rule_sets } => rule_sets,
    })
}

/// 一次加载的结果
#[derive(Debug)]
pub struct LoadReport {
    pub table: DispatchTable,
    /// 成功编译的规则集数量（包括未启用的）
    pub compiled: usize,
    /// 编译失败的规则集：(名称, 错误)
    pub rejected: Vec<(String, RuleError)>,
}

/// 规则文件加载器
pub struct RulesLoader {
    path: PathBuf,
    compiler: Mutex<RuleSetCompiler>,
}

impl RulesLoader {
    pub fn new(path: impl Into<PathBuf>, compiler: RuleSetCompiler) -> Self {
        Self {
            path: path.into(),
            compiler: Mutex::new(compiler),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取并编译规则文件
    pub fn load(&self) -> Result<LoadReport, DispatcherError> {
        let content =
            std::fs::read_to_string(&self.path).map_err(|source| DispatcherError::RulesFile {
                path: self.path.clone(),
                source,
            })?;
        Ok(self.compile_all(parse_rules(&content)?))
    }

    /// 编译规则集，失败的规则集被跳过
    pub fn compile_all(&self, rule_sets: Vec<BusinessRuleSet>) -> LoadReport {
        let mut compiler = self.compiler.lock();
        let mut compiled = Vec::with_capacity(rule_sets.len());
        let mut rejected = Vec::new();

        for rule_set in &rule_sets {
            match compiler.compile(rule_set) {
                Ok(rs) => compiled.push(Arc::new(rs)),
                Err(e) => {
                    warn!(
                        rule_set = %rule_set.id,
                        name = %rule_set.name,
                        error = %e,
                        "规则集编译失败，已跳过"
                    );
                    rejected.push((rule_set.name.clone(), e));
                }
            }
        }

        LoadReport {
            compiled: compiled.len(),
            table: DispatchTable::build(compiled),
            rejected,
        }
    }

    /// 重新加载规则文件并替换分发器中的分发表
    ///
    /// 文件读取或解析失败时保留当前分发表。返回分发表中的规则集数量。
    pub fn reload_into(&self, dispatcher: &EventDispatcher) -> Result<usize, DispatcherError> {
        match self.load() {
            Ok(report) => {
                let active = report.table.len();
                info!(
                    path = %self.path.display(),
                    compiled = report.compiled,
                    rejected = report.rejected.len(),
                    active,
                    "规则文件已加载"
                );
                dispatcher.rebuild(report.table);
                record_rules_reload("ok", active);
                Ok(active)
            }
            Err(e) => {
                record_rules_reload(e.status(), dispatcher.len());
                Err(e)
            }
        }
    }
}
