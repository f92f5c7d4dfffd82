//! XML导出脱敏

use crate::ScrubSummary;
use deid_core::utils::{collect_files, file_name_tail, parse_birth_year, parse_examination_timestamp};
use deid_core::{DeidError, Result, XmlNode};
use deid_identity::{IdentityTable, Pseudonym};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// 已脱敏的导出
#[derive(Debug, Clone, PartialEq)]
pub struct ScrubbedExport {
    pub pseudonym: Pseudonym,
    pub examination_date: String,
    pub root: XmlNode,
}

/// XML导出脱敏器
pub struct XmlScrubber<'a> {
    identities: &'a IdentityTable,
}

impl<'a> XmlScrubber<'a> {
    pub fn new(identities: &'a IdentityTable) -> Self {
        Self { identities }
    }

    /// 脱敏单个导出树
    ///
    /// 患者ID替换为假名，姓名清空，出生日期只保留年份（`YYYY-00-00`），
    /// 检查时间只保留日期。
    pub fn scrub_node(&self, mut root: XmlNode) -> Result<ScrubbedExport> {
        let patient = root
            .child_mut("PatientInformation")
            .ok_or_else(|| DeidError::XmlParse("缺少 PatientInformation".to_string()))?;

        let canonical_id = patient
            .child_text("PatientID")
            .ok_or_else(|| DeidError::Validation("缺少患者ID".to_string()))?
            .to_string();
        let pseudonym = self.identities.pseudonym_for_canonical(&canonical_id)?;

        if let Some(id) = patient.child_mut("PatientID") {
            id.set_text(pseudonym.to_string());
        }
        if let Some(name) = patient.child_mut("PatientNameGroup1") {
            name.set_text("");
        }
        let birth = patient
            .child_mut("PatientBirthDate")
            .ok_or_else(|| DeidError::Validation("缺少出生日期".to_string()))?;
        let year = birth
            .text()
            .and_then(parse_birth_year)
            .ok_or_else(|| DeidError::Validation("出生日期格式无效".to_string()))?;
        birth.set_text(format!("{:04}-00-00", year));

        let exam_time = root
            .find_mut("ExaminationInformation/ExaminationDateTime")
            .ok_or_else(|| DeidError::Validation("缺少检查时间".to_string()))?;
        let raw = exam_time.text().unwrap_or_default().to_string();
        let examination_date = parse_examination_timestamp(&raw)
            .ok_or_else(|| DeidError::Validation(format!("检查时间格式无效: {}", raw)))?
            .format("%Y-%m-%d")
            .to_string();
        exam_time.set_text(examination_date.clone());

        Ok(ScrubbedExport {
            pseudonym,
            examination_date,
            root,
        })
    }

    /// 脱敏单个文件，写入 `<out>/<假名>/<检查日期>_<原文件名最后两段>`
    pub fn scrub_file(&self, path: &Path, out_dir: &Path) -> Result<PathBuf> {
        let scrubbed = self.scrub_node(XmlNode::read_file(path)?)?;
        let file_name = format!(
            "{}_{}",
            scrubbed.examination_date,
            file_name_tail(path, 2)
        );
        let target = out_dir
            .join(scrubbed.pseudonym.to_string())
            .join(file_name);
        scrubbed.root.write_file(&target)?;
        debug!("已脱敏 {:?} → {:?}", path, target);
        Ok(target)
    }

    pub fn scrub_directory(&self, root: &Path, out_dir: &Path) -> Result<ScrubSummary> {
        let mut summary = ScrubSummary::default();
        for path in collect_files(root, "xml")? {
            summary.files_seen += 1;
            match self.scrub_file(&path, out_dir) {
                Ok(_) => summary.files_written += 1,
                Err(e) => {
                    error!("跳过XML文件 {:?}: {}", path, e);
                    summary.files_skipped += 1;
                }
            }
        }
        info!(
            "XML脱敏完成: 文件 {} 个, 写出 {} 个, 跳过 {} 个",
            summary.files_seen, summary.files_written, summary.files_skipped
        );
        Ok(summary)
    }
}
