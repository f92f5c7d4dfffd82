//! # 运行管理
//!
//! 分层配置加载与日志初始化。

pub mod config;
pub mod logging;

pub use config::{ConfigValidator, DeidConfig, LoggingConfig, OutputConfig, PipelineConfig, SheetConfig};
pub use logging::init_logging;
