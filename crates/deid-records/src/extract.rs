//! 测量记录提取
//!
//! 把单个XML导出转换为带类型的测量记录。数值在提取时即解析为 `f64`，
//! 空值视为缺失，无法解析的值使整个文件解析失败。

use crate::fields::{Layer, MeasurementField, MeasurementGroup, Metric};
use chrono::NaiveDateTime;
use deid_core::utils::{collect_files, parse_birth_year, parse_examination_timestamp};
use deid_core::{DeidError, Laterality, Modality, Result, Sex, VisitKey, XmlNode};
use deid_identity::IdentityTable;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// 单个文件的测量记录：一名患者、一只眼、一种模态、一个检查时间
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub modality: Modality,
    pub laterality: Laterality,
    pub examined_at: NaiveDateTime,
    pub patient_id: String,
    pub birth_year: i32,
    pub sex: Sex,
    pub ethnic_group: String,
    pub values: BTreeMap<MeasurementField, f64>,
    pub source: PathBuf,
}

impl MeasurementRecord {
    pub fn visit_key(&self) -> VisitKey {
        VisitKey {
            patient_id: self.patient_id.clone(),
            examination_date: self.examined_at.date(),
            birth_year: self.birth_year,
            sex: self.sex,
            ethnic_group: self.ethnic_group.clone(),
        }
    }
}

/// 目录提取结果
#[derive(Debug, Default)]
pub struct ExtractionBatch {
    pub records: Vec<MeasurementRecord>,
    pub files_seen: usize,
    pub files_skipped: usize,
}

/// 记录提取器
///
/// 给定身份表时，规范ID在提取阶段即替换为假名。
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordExtractor<'a> {
    identities: Option<&'a IdentityTable>,
}

impl<'a> RecordExtractor<'a> {
    pub fn new() -> Self {
        Self { identities: None }
    }

    pub fn with_identities(identities: &'a IdentityTable) -> Self {
        Self {
            identities: Some(identities),
        }
    }

    /// 递归提取目录下的全部XML导出，失败的文件记录日志后跳过
    pub fn extract_directory(&self, root: &Path) -> Result<ExtractionBatch> {
        let files = collect_files(root, "xml")?;
        let mut batch = ExtractionBatch::default();

        for path in files {
            batch.files_seen += 1;
            match self.extract_file(&path) {
                Ok(record) => batch.records.push(record),
                Err(e) => {
                    error!("跳过文件 {:?}: {}", path, e);
                    batch.files_skipped += 1;
                }
            }
        }

        info!(
            "测量记录提取完成: 文件 {} 个, 记录 {} 条, 跳过 {} 个",
            batch.files_seen,
            batch.records.len(),
            batch.files_skipped
        );
        Ok(batch)
    }

    pub fn extract_file(&self, path: &Path) -> Result<MeasurementRecord> {
        let root = XmlNode::read_file(path)?;
        self.extract_node(&root, path)
    }

    /// 从已解析的XML树提取记录，`path` 用于识别模态和交叉校验
    pub fn extract_node(&self, root: &XmlNode, path: &Path) -> Result<MeasurementRecord> {
        let modality = Modality::from_path(path)
            .ok_or_else(|| DeidError::Validation(format!("无法识别文件模态: {:?}", path)))?;

        let patient = root
            .child("PatientInformation")
            .ok_or_else(|| DeidError::XmlParse("缺少 PatientInformation".to_string()))?;
        let exam = root
            .child("ExaminationInformation")
            .ok_or_else(|| DeidError::XmlParse("缺少 ExaminationInformation".to_string()))?;

        let laterality = resolve_laterality(exam, path)?;
        let canonical_id = resolve_patient_id(patient, path)?;

        let raw_birth = patient
            .child_text("PatientBirthDate")
            .ok_or_else(|| DeidError::Validation("缺少出生日期".to_string()))?;
        let birth_year = parse_birth_year(raw_birth)
            .ok_or_else(|| DeidError::Validation("出生日期格式无效".to_string()))?;

        let raw_timestamp = exam
            .child_text("ExaminationDateTime")
            .ok_or_else(|| DeidError::Validation("缺少检查时间".to_string()))?;
        let examined_at = parse_examination_timestamp(raw_timestamp)
            .ok_or_else(|| DeidError::Validation(format!("检查时间格式无效: {}", raw_timestamp)))?;

        let sex = patient
            .child_text("PatientSex")
            .map(Sex::from_code)
            .ok_or_else(|| DeidError::Validation("缺少性别".to_string()))?;

        let patient_id = match self.identities {
            Some(identities) => identities.pseudonym_for_canonical(&canonical_id)?.to_string(),
            None => canonical_id,
        };

        let measurements = root
            .child(modality.measurement_element())
            .ok_or_else(|| {
                DeidError::XmlParse(format!("缺少 {}", modality.measurement_element()))
            })?;
        let values = match modality {
            Modality::Disc => extract_disc(measurements)?,
            Modality::Glaucoma => extract_glaucoma(measurements)?,
            Modality::Macula => extract_macula(measurements)?,
        };

        debug!(
            "提取记录: {:?} {} {} 共 {} 个测量值",
            path,
            modality,
            laterality,
            values.len()
        );

        Ok(MeasurementRecord {
            modality,
            laterality,
            examined_at,
            patient_id,
            birth_year,
            sex,
            ethnic_group: patient.child_text("EthnicGroup").unwrap_or_default().to_string(),
            values,
            source: path.to_path_buf(),
        })
    }
}

/// 以文件声明的眼别为准，与文件名不一致时只告警
fn resolve_laterality(exam: &XmlNode, path: &Path) -> Result<Laterality> {
    let from_name = Laterality::from_file_name(path);
    let declared = exam.child_text("Laterality").and_then(Laterality::from_code);

    match (declared, from_name) {
        (Some(declared), Some(from_name)) => {
            if declared != from_name {
                warn!(
                    "文件 {:?} 的眼别 {} 与文件名 {} 不一致，以文件内容为准",
                    path, declared, from_name
                );
            }
            Ok(declared)
        }
        (Some(declared), None) => Ok(declared),
        (None, Some(from_name)) => {
            warn!("文件 {:?} 未声明眼别，使用文件名中的 {}", path, from_name);
            Ok(from_name)
        }
        (None, None) => Err(DeidError::Validation(format!("无法确定眼别: {:?}", path))),
    }
}

/// 以文件声明的患者ID为准，与所在目录名不一致时只告警
fn resolve_patient_id(patient: &XmlNode, path: &Path) -> Result<String> {
    let directory = path
        .parent()
        .and_then(|dir| dir.file_name())
        .map(|name| name.to_string_lossy().into_owned());

    match (patient.child_text("PatientID"), directory) {
        (Some(declared), Some(directory)) => {
            if declared != directory {
                warn!(
                    "文件 {:?} 的患者ID {} 与目录名 {} 不一致，以文件内容为准",
                    path, declared, directory
                );
            }
            Ok(declared.to_string())
        }
        (Some(declared), None) => Ok(declared.to_string()),
        (None, Some(directory)) => {
            warn!("文件 {:?} 缺少患者ID，使用目录名 {}", path, directory);
            Ok(directory)
        }
        (None, None) => Err(DeidError::Validation(format!("无法确定患者ID: {:?}", path))),
    }
}

fn parse_value(node: &XmlNode, field: &MeasurementField) -> Result<Option<f64>> {
    match node.text() {
        None => Ok(None),
        Some(text) => match text.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Some(value)),
            _ => Err(DeidError::Validation(format!(
                "测量值无法解析为有限数字: {} = {}",
                field.column_suffix(),
                text
            ))),
        },
    }
}

fn insert_value(
    values: &mut BTreeMap<MeasurementField, f64>,
    node: &XmlNode,
    field: MeasurementField,
) -> Result<()> {
    if let Some(value) = parse_value(node, &field)? {
        values.insert(field, value);
    }
    Ok(())
}

fn require<'n>(node: &'n XmlNode, path: &str) -> Result<&'n XmlNode> {
    node.find(path)
        .ok_or_else(|| DeidError::XmlParse(format!("缺少测量分组 {}", path)))
}

fn extract_disc(measurements: &XmlNode) -> Result<BTreeMap<MeasurementField, f64>> {
    let mut values = BTreeMap::new();
    for group_node in &measurements.children {
        let Some(group) = MeasurementGroup::from_xml_tag(&group_node.tag)
            .filter(|group| MeasurementGroup::DISC.contains(group))
        else {
            warn!("忽略未知的 Disc3D 测量分组: {}", group_node.tag);
            continue;
        };
        for element in &group_node.children {
            insert_value(&mut values, element, MeasurementField::new(group, element.tag.clone()))?;
        }
    }
    Ok(values)
}

fn extract_glaucoma(measurements: &XmlNode) -> Result<BTreeMap<MeasurementField, f64>> {
    let mut values = BTreeMap::new();

    // TotalSector/Thickness/<layer> 下只取第一个子元素
    for layer_node in &require(measurements, "TotalSector/Thickness")?.children {
        let Some(layer) = Layer::from_tag(&layer_node.tag) else {
            warn!("忽略未知的 Glaucoma3D 分层: {}", layer_node.tag);
            continue;
        };
        if let Some(first) = layer_node.children.first() {
            let field = MeasurementField::new(MeasurementGroup::TotalSector, "")
                .with_metric(Metric::Thickness)
                .with_layer(layer);
            insert_value(&mut values, first, field)?;
        }
    }

    for group in [MeasurementGroup::TwoSectors, MeasurementGroup::EightSectors] {
        for metric in Metric::ALL {
            for layer in Layer::GLAUCOMA {
                let path = format!("{}/{}/{}", group.xml_tag(), metric.tag(), layer.tag());
                for sector in &require(measurements, &path)?.children {
                    let field = MeasurementField::new(group, sector.tag.clone())
                        .with_metric(metric)
                        .with_layer(layer);
                    insert_value(&mut values, sector, field)?;
                }
            }
        }
    }

    Ok(values)
}

fn extract_macula(measurements: &XmlNode) -> Result<BTreeMap<MeasurementField, f64>> {
    let mut values = BTreeMap::new();
    for group in MeasurementGroup::MACULA {
        for layer_node in &require(measurements, group.xml_tag())?.children {
            let Some(layer) = Layer::from_tag(&layer_node.tag) else {
                warn!("忽略未知的 Macula3D 分层: {}", layer_node.tag);
                continue;
            };
            for element in &layer_node.children {
                let field = MeasurementField::new(group, element.tag.clone()).with_layer(layer);
                insert_value(&mut values, element, field)?;
            }
        }
    }
    Ok(values)
}
