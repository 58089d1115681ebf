//! 配置与可观测性集成测试

use std::fs;

use rules_shared::config::AppConfig;
use rules_shared::observability::metrics::{record_dispatch, record_rules_reload};

#[test]
fn test_env_overrides_file() {
    let dir = std::env::temp_dir().join(format!("rules-shared-env-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("default.toml"),
        "[engine]\ntrigger_timeout_ms = 1000\n\n[observability]\nmetrics_enabled = false\n",
    )
    .unwrap();

    // SAFETY: 本测试文件中只有此测试修改环境变量
    unsafe {
        std::env::set_var("RULES_ENGINE__TRIGGER_TIMEOUT_MS", "250");
        std::env::set_var("RULES_OBSERVABILITY__METRICS_ENABLED", "true");
    }

    let config = AppConfig::load_from("rule-dispatcher", &dir);

    unsafe {
        std::env::remove_var("RULES_ENGINE__TRIGGER_TIMEOUT_MS");
        std::env::remove_var("RULES_OBSERVABILITY__METRICS_ENABLED");
    }

    let config = config.unwrap();
    assert_eq!(config.engine.trigger_timeout_ms, 250);
    assert!(config.observability.metrics_enabled);
}

#[test]
fn test_metrics_without_recorder() {
    record_dispatch("spot.transition", "ok", 0.002);
    record_dispatch("spot.transition", "failed", 0.010);
    record_rules_reload("ok", 2);
}
