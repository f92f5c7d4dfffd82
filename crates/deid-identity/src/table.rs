//! 身份表
//!
//! 构建完成后不可变，作为显式参数传给所有需要假名的环节。

use crate::pseudonym::{Pseudonym, Salt};
use chrono::{Datelike, NaiveDate};
use deid_core::{DeidError, Result, Sex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// 身份记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    /// 影像设备分配的患者ID，可能缺失
    pub canonical_id: Option<String>,
    pub family_name: String,
    pub given_name: String,
    pub birth_date: NaiveDate,
    pub sex: Sex,
    pub salt: Salt,
    pub pseudonym: Pseudonym,
}

impl IdentityRecord {
    /// 校验假名与盐、人口学字段一致
    pub fn verify(&self) -> bool {
        Pseudonym::derive(&self.family_name, &self.given_name, self.birth_date, &self.salt)
            == self.pseudonym
    }

    /// 规范ID是否缺失或为空
    pub fn has_canonical_id(&self) -> bool {
        self.canonical_id
            .as_deref()
            .map(|id| !id.trim().is_empty())
            .unwrap_or(false)
    }
}

/// 身份映射文件的行格式
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IdentityCsvRow {
    #[serde(rename = "PatientID")]
    pub patient_id: Option<String>,
    #[serde(rename = "FamilyName")]
    pub family_name: String,
    #[serde(rename = "GivenName")]
    pub given_name: String,
    #[serde(rename = "PatientBirthDate")]
    pub birth_date: NaiveDate,
    #[serde(rename = "PatientSex")]
    pub sex: Sex,
    pub salt: String,
    #[serde(rename = "UnifiedPatientID")]
    pub pseudonym: Pseudonym,
}

impl From<&IdentityRecord> for IdentityCsvRow {
    fn from(record: &IdentityRecord) -> Self {
        Self {
            patient_id: record.canonical_id.clone(),
            family_name: record.family_name.clone(),
            given_name: record.given_name.clone(),
            birth_date: record.birth_date,
            sex: record.sex,
            salt: record.salt.to_hex(),
            pseudonym: record.pseudonym,
        }
    }
}

impl TryFrom<IdentityCsvRow> for IdentityRecord {
    type Error = DeidError;

    fn try_from(row: IdentityCsvRow) -> Result<Self> {
        Ok(Self {
            canonical_id: row.patient_id.filter(|id| !id.trim().is_empty()),
            family_name: row.family_name,
            given_name: row.given_name,
            birth_date: row.birth_date,
            sex: row.sex,
            salt: Salt::from_hex(&row.salt)?,
            pseudonym: row.pseudonym,
        })
    }
}

/// 仅含出生年份的精简映射行
#[derive(Debug, Serialize)]
struct ReducedCsvRow<'a> {
    #[serde(rename = "PatientID")]
    patient_id: Option<&'a str>,
    #[serde(rename = "UnifiedPatientID")]
    pseudonym: Pseudonym,
    #[serde(rename = "PatientBirthYear")]
    birth_year: i32,
    #[serde(rename = "PatientSex")]
    sex: Sex,
}

/// 不可变身份表
#[derive(Debug, Clone, Default)]
pub struct IdentityTable {
    records: Vec<IdentityRecord>,
}

impl IdentityTable {
    pub fn from_records(records: Vec<IdentityRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 不同假名的数量
    pub fn distinct_pseudonyms(&self) -> usize {
        self.records
            .iter()
            .map(|record| record.pseudonym)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// 按规范ID查找唯一身份
    ///
    /// 没有匹配返回 `NotFound`；匹配到多个不同假名返回 `Ambiguous`。
    /// 同一假名的多行（例如性别写法不同）视为同一身份。
    pub fn lookup_canonical(&self, canonical_id: &str) -> Result<&IdentityRecord> {
        let canonical_id = canonical_id.trim();
        let matches: Vec<&IdentityRecord> = self
            .records
            .iter()
            .filter(|record| record.canonical_id.as_deref().map(str::trim) == Some(canonical_id))
            .collect();

        let Some(first) = matches.first() else {
            return Err(DeidError::NotFound(format!("规范ID {}", canonical_id)));
        };

        if matches.iter().any(|record| record.pseudonym != first.pseudonym) {
            return Err(DeidError::Ambiguous(format!(
                "规范ID {} 对应 {} 条不同身份",
                canonical_id,
                matches.len()
            )));
        }

        Ok(first)
    }

    pub fn pseudonym_for_canonical(&self, canonical_id: &str) -> Result<Pseudonym> {
        self.lookup_canonical(canonical_id).map(|record| record.pseudonym)
    }

    /// 写出完整身份映射文件
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        write_identity_rows(path, &self.records)?;
        info!("身份映射已写入 {:?}: {} 条记录", path, self.records.len());
        Ok(())
    }

    /// 读取身份映射文件并校验每条假名
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();

        for (line, row) in reader.deserialize::<IdentityCsvRow>().enumerate() {
            let record = IdentityRecord::try_from(row?)?;
            if !record.verify() {
                return Err(DeidError::Validation(format!(
                    "身份映射第 {} 行的假名与盐值不一致",
                    line + 2
                )));
            }
            records.push(record);
        }

        debug!("从 {:?} 读取 {} 条身份记录", path, records.len());
        Ok(Self { records })
    }

    /// 写出精简映射：规范ID → 假名，仅保留出生年份
    pub fn write_reduced_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(ReducedCsvRow {
                patient_id: record.canonical_id.as_deref(),
                pseudonym: record.pseudonym,
                birth_year: record.birth_date.year(),
                sex: record.sex,
            })?;
        }
        writer.flush()?;
        info!("精简映射已写入 {:?}", path);
        Ok(())
    }
}

/// 以身份映射文件的格式写出任意身份记录（异常报告复用）
pub(crate) fn write_identity_rows(path: &Path, records: &[IdentityRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(IdentityCsvRow::from(record))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(canonical_id: Option<&str>, family: &str, salt_byte: u8) -> IdentityRecord {
        let birth_date = NaiveDate::from_ymd_opt(1980, 1, 1).unwrap();
        let salt = Salt::from_bytes([salt_byte; 32]);
        IdentityRecord {
            canonical_id: canonical_id.map(str::to_string),
            family_name: family.to_string(),
            given_name: "Jane".to_string(),
            birth_date,
            sex: Sex::Female,
            pseudonym: Pseudonym::derive(family, "Jane", birth_date, &salt),
            salt,
        }
    }

    #[test]
    fn test_lookup_canonical() {
        let table = IdentityTable::from_records(vec![
            record(Some("A001"), "Doe", 1),
            record(Some("A002"), "Roe", 2),
            record(Some("A002"), "Poe", 3),
            record(None, "Moe", 4),
        ]);

        assert_eq!(table.lookup_canonical(" A001 ").unwrap().family_name, "Doe");
        assert!(matches!(table.lookup_canonical("A002"), Err(DeidError::Ambiguous(_))));
        assert!(matches!(table.lookup_canonical("A404"), Err(DeidError::NotFound(_))));
    }

    #[test]
    fn test_same_pseudonym_is_one_identity() {
        let mut second = record(Some("A001"), "Doe", 1);
        second.sex = Sex::Other;
        let table = IdentityTable::from_records(vec![record(Some("A001"), "Doe", 1), second]);
        assert!(table.lookup_canonical("A001").is_ok());
        assert_eq!(table.distinct_pseudonyms(), 1);
    }

    #[test]
    fn test_csv_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patients_to_id_xml.csv");
        let table = IdentityTable::from_records(vec![
            record(Some("A001"), "Doe", 1),
            record(None, "Moe", 4),
        ]);
        table.write_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(
            "PatientID,FamilyName,GivenName,PatientBirthDate,PatientSex,salt,UnifiedPatientID"
        ));
        assert!(content.contains("1980-01-01"));

        let loaded = IdentityTable::read_csv(&path).unwrap();
        assert_eq!(loaded.records(), table.records());
        assert_eq!(loaded.records()[1].canonical_id, None);
    }

    #[test]
    fn test_tampered_csv_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.csv");
        IdentityTable::from_records(vec![record(Some("A001"), "Doe", 1)])
            .write_csv(&path)
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap().replace("Doe", "Dough");
        std::fs::write(&path, content).unwrap();

        assert!(matches!(IdentityTable::read_csv(&path), Err(DeidError::Validation(_))));
    }

    #[test]
    fn test_reduced_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reduced.csv");
        let table = IdentityTable::from_records(vec![record(Some("A001"), "Doe", 1)]);
        table.write_reduced_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("PatientID,UnifiedPatientID,PatientBirthYear,PatientSex")
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("A001,"));
        assert!(row.ends_with(",1980,F"));
        assert!(!content.contains("Doe"));
    }
}
