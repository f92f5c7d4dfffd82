//! DICOM文件脱敏

use crate::ScrubSummary;
use deid_core::utils::{collect_files, file_name_tail, parse_birth_year};
use deid_core::{DeidError, Result};
use deid_identity::{IdentityTable, Pseudonym};
use dicom::core::value::PrimitiveValue;
use dicom::core::{DataElement, Tag, VR};
use dicom::dictionary_std::tags;
use dicom::object::meta::FileMetaTableBuilder;
use dicom::object::{open_file, DefaultDicomObject, InMemDicomObject};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// 清空的人员与人口学字段
const BLANKED_PERSONS: [(Tag, VR); 5] = [
    (tags::PATIENT_NAME, VR::PN),
    (tags::PERFORMING_PHYSICIAN_NAME, VR::PN),
    (tags::REFERRING_PHYSICIAN_NAME, VR::PN),
    (tags::OPERATORS_NAME, VR::PN),
    (tags::ETHNIC_GROUP, VR::SH),
];

/// 清空的UID与检查编号
const BLANKED_IDENTIFIERS: [(Tag, VR); 7] = [
    (tags::SOP_CLASS_UID, VR::UI),
    (tags::SOP_INSTANCE_UID, VR::UI),
    (tags::SERIES_INSTANCE_UID, VR::UI),
    (tags::STUDY_INSTANCE_UID, VR::UI),
    (tags::FRAME_OF_REFERENCE_UID, VR::UI),
    (tags::STUDY_ID, VR::SH),
    (tags::ACCESSION_NUMBER, VR::SH),
];

/// 清空的采集时间（日期保留）
const BLANKED_TIMES: [(Tag, VR); 4] = [
    (tags::ACQUISITION_DATE_TIME, VR::DT),
    (tags::STUDY_TIME, VR::TM),
    (tags::SERIES_TIME, VR::TM),
    (tags::CONTENT_TIME, VR::TM),
];

/// 已脱敏的数据集
#[derive(Debug, Clone)]
pub struct ScrubbedDataset {
    pub pseudonym: Pseudonym,
    pub study_date: String,
}

/// DICOM脱敏器
pub struct DicomScrubber<'a> {
    identities: &'a IdentityTable,
}

impl<'a> DicomScrubber<'a> {
    pub fn new(identities: &'a IdentityTable) -> Self {
        Self { identities }
    }

    /// 原地脱敏数据集
    pub fn scrub_object(&self, obj: &mut InMemDicomObject) -> Result<ScrubbedDataset> {
        let canonical_id = string_element(obj, tags::PATIENT_ID)
            .ok_or_else(|| DeidError::Validation("缺少 PatientID".to_string()))?;
        let pseudonym = self.identities.pseudonym_for_canonical(&canonical_id)?;

        let study_date = string_element(obj, tags::STUDY_DATE)
            .ok_or_else(|| DeidError::Validation("缺少 StudyDate".to_string()))?;
        let birth_year = string_element(obj, tags::PATIENT_BIRTH_DATE)
            .as_deref()
            .and_then(parse_birth_year)
            .ok_or_else(|| DeidError::Validation("PatientBirthDate 无效".to_string()))?;

        obj.put(DataElement::new(
            tags::PATIENT_ID,
            VR::LO,
            PrimitiveValue::from(pseudonym.to_string()),
        ));
        obj.put(DataElement::new(
            tags::PATIENT_BIRTH_DATE,
            VR::DA,
            PrimitiveValue::from(format!("{:04}0101", birth_year)),
        ));

        for (tag, vr) in BLANKED_PERSONS
            .iter()
            .chain(BLANKED_IDENTIFIERS.iter())
            .chain(BLANKED_TIMES.iter())
        {
            obj.put(DataElement::new(*tag, *vr, PrimitiveValue::from("")));
        }

        Ok(ScrubbedDataset {
            pseudonym,
            study_date,
        })
    }

    /// 脱敏文件对象
    ///
    /// 文件元信息中的媒体存储UID和实现类UID、实现版本名一并清空，传输语法保留。
    pub fn scrub_file_object(&self, file: DefaultDicomObject) -> Result<(DefaultDicomObject, ScrubbedDataset)> {
        let transfer_syntax = file.meta().transfer_syntax().to_string();
        let mut obj = file.into_inner();
        let scrubbed = self.scrub_object(&mut obj)?;

        let meta = FileMetaTableBuilder::new()
            .transfer_syntax(transfer_syntax)
            .media_storage_sop_class_uid("")
            .media_storage_sop_instance_uid("")
            .implementation_class_uid("")
            .implementation_version_name("");
        let file = obj
            .with_meta(meta)
            .map_err(|e| DeidError::Dicom(format!("无法重建文件元信息: {}", e)))?;

        Ok((file, scrubbed))
    }

    /// 脱敏单个文件，写入 `<out>/<假名>/<StudyDate>_<原文件名最后三段>`
    pub fn scrub_file(&self, path: &Path, out_dir: &Path) -> Result<PathBuf> {
        let file = open_file(path)
            .map_err(|e| DeidError::Dicom(format!("无法读取DICOM文件: {}", e)))?;
        let (file, scrubbed) = self.scrub_file_object(file)?;

        let file_name = format!("{}_{}", scrubbed.study_date, file_name_tail(path, 3));
        let target = out_dir
            .join(scrubbed.pseudonym.to_string())
            .join(file_name);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        file.write_to_file(&target)
            .map_err(|e| DeidError::Dicom(format!("无法写入DICOM文件: {}", e)))?;

        debug!("已脱敏 {:?} → {:?}", path, target);
        Ok(target)
    }

    pub fn scrub_directory(&self, root: &Path, out_dir: &Path) -> Result<ScrubSummary> {
        let mut summary = ScrubSummary::default();
        for path in collect_files(root, "dcm")? {
            summary.files_seen += 1;
            match self.scrub_file(&path, out_dir) {
                Ok(_) => summary.files_written += 1,
                Err(e) => {
                    error!("跳过DICOM文件 {:?}: {}", path, e);
                    summary.files_skipped += 1;
                }
            }
        }
        info!(
            "DICOM脱敏完成: 文件 {} 个, 写出 {} 个, 跳过 {} 个",
            summary.files_seen, summary.files_written, summary.files_skipped
        );
        Ok(summary)
    }
}

/// 读取字符串元素，去掉DICOM填充的空白
fn string_element(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    let element = obj.element(tag).ok()?;
    let value = element.to_str().ok()?;
    let value = value.trim_end_matches(['\0', ' ']).trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
