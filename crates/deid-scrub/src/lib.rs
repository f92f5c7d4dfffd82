//! # 导出文件脱敏
//!
//! 使用身份表把XML导出、DICOM文件和临床工作簿中的患者身份替换为假名，
//! 并删除姓名、精确出生日期等直接标识信息。

pub mod dicom_scrub;
pub mod sheets;
pub mod xml_scrub;

pub use dicom_scrub::DicomScrubber;
pub use sheets::{anonymise_workbook, KeepList};
pub use xml_scrub::XmlScrubber;

/// 批量脱敏统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrubSummary {
    pub files_seen: usize,
    pub files_written: usize,
    pub files_skipped: usize,
}
