//! # 测量记录合并
//!
//! 从三种模态的XML导出中提取测量记录，去除同日重拍，
//! 按眼别和模态外连接为每次就诊一行，最后与临床随访记录对齐。

pub mod clinical;
pub mod export;
pub mod extract;
pub mod fields;
pub mod merge;
pub mod retake;
pub mod summary;

pub use clinical::{ClinicalColumns, ClinicalFields, ClinicalRecords};
pub use extract::{ExtractionBatch, MeasurementRecord, RecordExtractor};
pub use fields::{Column, Family, Layer, MeasurementField, MeasurementGroup, Metric, NamedGroup, Selection};
pub use merge::{ConsolidatedRow, ConsolidatedTable, ModalityMergeEngine};
pub use retake::deduplicate_retakes;
pub use summary::{add_rnfl_summaries, split_eyes};
