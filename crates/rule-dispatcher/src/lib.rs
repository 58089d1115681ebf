//! 规则分发服务
//!
//! 加载规则定义文件，按信号把事件分发给规则集：
//! - [`loader`]: 解析规则文件并编译为分发表
//! - [`host`]: 逐行读取事件，带超时地执行分发
//! - [`watcher`]: 规则文件变化时热更新分发表
//! - [`sales`]: 销售状态流转的示例提供者

pub mod error;
pub mod host;
pub mod loader;
pub mod sales;
pub mod watcher;

pub use error::DispatcherError;
