//! # 身份解析
//!
//! 加盐假名生成、身份表构建以及与电子表格来源的跨来源身份对账。

pub mod builder;
pub mod pseudonym;
pub mod reconcile;
pub mod report;
pub mod table;

pub use builder::{IdentityAnomalies, IdentityBuild, IdentityTableBuilder, ObservedIdentity, ScanSummary};
pub use pseudonym::{Pseudonym, Salt};
pub use reconcile::{CrossSourceReconciler, MatchKey, Reconciliation, SourceBColumns, SourceBIdentity};
pub use table::{IdentityRecord, IdentityTable};
