//! 错误定义模块

use thiserror::Error;

/// 去标识化流水线统一错误类型
#[derive(Error, Debug)]
pub enum DeidError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV错误: {0}")]
    Csv(#[from] csv::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("XML解析错误: {0}")]
    XmlParse(String),

    #[error("DICOM处理错误: {0}")]
    Dicom(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("未找到匹配的身份: {0}")]
    NotFound(String),

    #[error("存在多个匹配的身份: {0}")]
    Ambiguous(String),

    #[error("结构不变量被破坏: {0}")]
    InvariantViolation(String),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, DeidError>;
