//! # DeID Core
//!
//! 去标识化流水线的核心模块，提供统一错误类型、共享数据模型、日期工具和表格读写。

pub mod error;
pub mod models;
pub mod table;
pub mod xml;
pub mod utils;

pub use error::{DeidError, Result};
pub use models::*;
pub use table::{Table, Workbook};
pub use xml::XmlNode;
