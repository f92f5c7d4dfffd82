//! 跨来源身份对账
//!
//! 把身份表（来源A）与电子表格的身份页（来源B）按规范化的
//! `(姓, 名, 性别, 出生日期)` 内连接，得到 `来源B的ID → 假名` 映射。
//! 任一来源在清理后仍存在重复键时对账不可靠，直接报错中止。

use crate::pseudonym::Pseudonym;
use crate::table::{IdentityRecord, IdentityTable};
use chrono::NaiveDate;
use deid_core::utils::{normalize_name, parse_date_with_format};
use deid_core::{DeidError, Result, Sex, Table, Workbook};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, info, warn};

/// 来源B身份页的列名配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceBColumns {
    pub patient_id: String,
    pub last_name: String,
    pub first_name: String,
    pub birth_date: String,
    pub gender: String,
    /// 出生日期格式（chrono格式串）
    pub birth_date_format: String,
}

impl Default for SourceBColumns {
    fn default() -> Self {
        Self {
            patient_id: "Patient ID".to_string(),
            last_name: "Last Name".to_string(),
            first_name: "First Name".to_string(),
            birth_date: "Birth Date".to_string(),
            gender: "Gender".to_string(),
            birth_date_format: "%d.%m.%Y".to_string(),
        }
    }
}

/// 来源B中的一个身份，姓名已规范化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBIdentity {
    pub patient_id: String,
    pub last_name: String,
    pub first_name: String,
    /// 无法解析的出生日期记为缺失，永远不会匹配
    pub birth_date: Option<NaiveDate>,
    pub sex: Sex,
}

impl SourceBIdentity {
    fn coarse_key(&self) -> (String, String, Sex) {
        (self.last_name.clone(), self.first_name.clone(), self.sex)
    }

    fn match_key(&self) -> Option<MatchKey> {
        Some(MatchKey {
            family_name: self.last_name.clone(),
            given_name: self.first_name.clone(),
            sex: self.sex,
            birth_date: self.birth_date?,
        })
    }
}

/// 规范化后的匹配键，两个来源必须以相同方式生成
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchKey {
    pub family_name: String,
    pub given_name: String,
    pub sex: Sex,
    pub birth_date: NaiveDate,
}

impl MatchKey {
    pub fn from_identity(record: &IdentityRecord) -> Self {
        Self {
            family_name: normalize_name(&record.family_name),
            given_name: normalize_name(&record.given_name),
            sex: record.sex,
            birth_date: record.birth_date,
        }
    }
}

/// 对账结果
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// 来源B的ID → 假名
    pub mapping: BTreeMap<String, Pseudonym>,
    /// 来源B内按 `(姓, 名, 性别)` 重复的全部行，已排除在匹配之外
    pub source_b_duplicates: Vec<SourceBIdentity>,
    /// 来源A内规范化键相同但假名不同的记录，已排除在匹配之外
    pub source_a_duplicates: Vec<IdentityRecord>,
    /// 来源A中未匹配的记录
    pub a_not_in_b: Vec<IdentityRecord>,
    /// 来源B中未匹配的行
    pub b_not_in_a: Vec<SourceBIdentity>,
}

/// 跨来源身份对账器
#[derive(Debug, Clone, Default)]
pub struct CrossSourceReconciler {
    columns: SourceBColumns,
}

impl CrossSourceReconciler {
    pub fn new(columns: SourceBColumns) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &SourceBColumns {
        &self.columns
    }

    /// 读取来源B的身份页并规范化
    pub fn read_identification(&self, sheet: &Table) -> Result<Vec<SourceBIdentity>> {
        let id_col = sheet.require_column(&self.columns.patient_id)?;
        let last_col = sheet.require_column(&self.columns.last_name)?;
        let first_col = sheet.require_column(&self.columns.first_name)?;
        let birth_col = sheet.require_column(&self.columns.birth_date)?;
        let gender_col = sheet.require_column(&self.columns.gender)?;

        let mut identities = Vec::with_capacity(sheet.len());
        for row in &sheet.rows {
            let patient_id = row[id_col].trim().to_string();
            if patient_id.is_empty() {
                warn!("身份页存在空的患者ID行, 跳过");
                continue;
            }
            let birth_date = parse_date_with_format(&row[birth_col], &self.columns.birth_date_format);
            if birth_date.is_none() {
                error!("患者 {} 的出生日期无法解析", patient_id);
            }
            identities.push(SourceBIdentity {
                patient_id,
                last_name: normalize_name(&row[last_col]),
                first_name: normalize_name(&row[first_col]),
                birth_date,
                sex: Sex::from_code(&row[gender_col]),
            });
        }
        Ok(identities)
    }

    /// 执行对账
    pub fn reconcile(&self, table: &IdentityTable, source_b: &[SourceBIdentity]) -> Result<Reconciliation> {
        let mut result = Reconciliation::default();

        // 来源B: 按较粗的 (姓, 名, 性别) 检测重复，重复组整体排除
        let mut coarse_counts: BTreeMap<(String, String, Sex), usize> = BTreeMap::new();
        for identity in source_b {
            *coarse_counts.entry(identity.coarse_key()).or_default() += 1;
        }
        let mut b_index: BTreeMap<MatchKey, Vec<&SourceBIdentity>> = BTreeMap::new();
        for identity in source_b {
            if coarse_counts[&identity.coarse_key()] > 1 {
                result.source_b_duplicates.push(identity.clone());
            } else if let Some(key) = identity.match_key() {
                b_index.entry(key).or_default().push(identity);
            }
        }
        if !result.source_b_duplicates.is_empty() {
            error!(
                "来源B中发现疑似重复患者: {} 行, 已排除",
                result.source_b_duplicates.len()
            );
        }

        // 来源A: 同一规范化键下只允许一个假名
        let mut a_groups: BTreeMap<MatchKey, Vec<&IdentityRecord>> = BTreeMap::new();
        for record in table.records() {
            a_groups.entry(MatchKey::from_identity(record)).or_default().push(record);
        }
        let mut a_clean: Vec<(MatchKey, &IdentityRecord)> = Vec::new();
        for (key, group) in a_groups {
            let first = group[0];
            if group.iter().all(|record| record.pseudonym == first.pseudonym) {
                a_clean.push((key, first));
            } else {
                result.source_a_duplicates.extend(group.into_iter().cloned());
            }
        }
        if !result.source_a_duplicates.is_empty() {
            error!(
                "身份表中发现规范化后无法区分的患者: {} 条, 已排除",
                result.source_a_duplicates.len()
            );
        }

        // 内连接
        let mut joined: Vec<(&IdentityRecord, &SourceBIdentity)> = Vec::new();
        for (key, record) in &a_clean {
            if let Some(matches) = b_index.get(key) {
                joined.extend(matches.iter().map(|identity| (*record, *identity)));
            }
        }
        Self::assert_unique(&joined)?;

        for (record, identity) in &joined {
            result.mapping.insert(identity.patient_id.clone(), record.pseudonym);
        }

        let matched_pseudonyms: BTreeSet<Pseudonym> = result.mapping.values().copied().collect();
        result.a_not_in_b = table
            .records()
            .iter()
            .filter(|record| !matched_pseudonyms.contains(&record.pseudonym))
            .cloned()
            .collect();
        result.b_not_in_a = source_b
            .iter()
            .filter(|identity| !result.mapping.contains_key(&identity.patient_id))
            .cloned()
            .collect();

        if !result.a_not_in_b.is_empty() {
            error!("身份表中有 {} 条记录不在来源B中", result.a_not_in_b.len());
        }
        if !result.b_not_in_a.is_empty() {
            error!("来源B中有 {} 行不在身份表中", result.b_not_in_a.len());
        }

        info!(
            "身份对账完成: 匹配 {} 个患者, 来源A {} 条, 来源B {} 行",
            result.mapping.len(),
            table.len(),
            source_b.len()
        );
        Ok(result)
    }

    /// 连接结果中每个人口学键、来源B的ID和假名都必须唯一
    fn assert_unique(joined: &[(&IdentityRecord, &SourceBIdentity)]) -> Result<()> {
        let mut coarse = BTreeSet::new();
        let mut b_ids = BTreeSet::new();
        let mut pseudonyms = BTreeSet::new();

        for (record, identity) in joined {
            if !coarse.insert(identity.coarse_key()) {
                return Err(DeidError::InvariantViolation(format!(
                    "连接结果中人口学键重复 (来源B患者 {})",
                    identity.patient_id
                )));
            }
            if !b_ids.insert(identity.patient_id.as_str()) {
                return Err(DeidError::InvariantViolation(format!(
                    "来源B患者ID {} 在连接结果中出现多次",
                    identity.patient_id
                )));
            }
            if !pseudonyms.insert(record.pseudonym) {
                return Err(DeidError::InvariantViolation(format!(
                    "假名 {} 在连接结果中出现多次",
                    record.pseudonym
                )));
            }
        }
        Ok(())
    }

    /// 把映射应用到工作簿的每个工作表
    ///
    /// 未匹配患者的行被丢弃，患者ID列原地替换为假名；空工作表原样保留。
    pub fn apply(&self, workbook: &Workbook, reconciliation: &Reconciliation) -> Result<Workbook> {
        let mut anonymised = Workbook::new();

        for (name, sheet) in workbook {
            if sheet.is_empty() {
                anonymised.insert(name.clone(), sheet.clone());
                continue;
            }

            let id_col = sheet.require_column(&self.columns.patient_id).map_err(|_| {
                DeidError::Validation(format!(
                    "工作表 {} 缺少 {} 列",
                    name, self.columns.patient_id
                ))
            })?;

            let mut rewritten = Table::new(sheet.headers.clone());
            for row in &sheet.rows {
                if let Some(pseudonym) = reconciliation.mapping.get(row[id_col].trim()) {
                    let mut row = row.clone();
                    row[id_col] = pseudonym.to_string();
                    rewritten.rows.push(row);
                }
            }

            info!(
                "工作表 {}: 保留 {} / {} 行",
                name,
                rewritten.len(),
                sheet.len()
            );
            anonymised.insert(name.clone(), rewritten);
        }

        Ok(anonymised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pseudonym::Salt;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn identity(id: &str, family: &str, given: &str, birth: NaiveDate, sex: Sex, salt: u8) -> IdentityRecord {
        let salt = Salt::from_bytes([salt; 32]);
        IdentityRecord {
            canonical_id: Some(id.to_string()),
            family_name: family.to_string(),
            given_name: given.to_string(),
            birth_date: birth,
            sex,
            pseudonym: Pseudonym::derive(family, given, birth, &salt),
            salt,
        }
    }

    fn identification(rows: &[[&str; 5]]) -> Table {
        let mut sheet = Table::new(
            ["Patient ID", "Last Name", "First Name", "Birth Date", "Gender"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        for row in rows {
            sheet.push_row(row.iter().map(|s| s.to_string()).collect());
        }
        sheet
    }

    fn source_a() -> IdentityTable {
        IdentityTable::from_records(vec![
            identity("A001", "Doe", "Jane", date(1980, 1, 1), Sex::Female, 1),
            identity("A002", "Roe", "John", date(1975, 6, 30), Sex::Male, 2),
            identity("A003", "Poe", "Ann", date(1990, 2, 2), Sex::Female, 3),
        ])
    }

    #[test]
    fn test_normalized_match() {
        let reconciler = CrossSourceReconciler::default();
        let sheet = identification(&[
            ["7", "DOE", "jane", "01.01.1980", "female"],
            ["8", "Roe", "John", "30.06.1975", "M"],
            ["9", "Unknown", "Person", "01.01.2000", "F"],
        ]);
        let b = reconciler.read_identification(&sheet).unwrap();
        let result = reconciler.reconcile(&source_a(), &b).unwrap();

        assert_eq!(result.mapping.len(), 2);
        assert_eq!(result.mapping["7"], source_a().records()[0].pseudonym);
        assert_eq!(result.mapping["8"], source_a().records()[1].pseudonym);
        assert_eq!(result.a_not_in_b.len(), 1);
        assert_eq!(result.a_not_in_b[0].canonical_id.as_deref(), Some("A003"));
        assert_eq!(result.b_not_in_a.len(), 1);
        assert_eq!(result.b_not_in_a[0].patient_id, "9");
    }

    #[test]
    fn test_birth_date_must_match() {
        let reconciler = CrossSourceReconciler::default();
        let sheet = identification(&[["7", "Doe", "Jane", "02.01.1980", "F"]]);
        let b = reconciler.read_identification(&sheet).unwrap();
        let result = reconciler.reconcile(&source_a(), &b).unwrap();
        assert!(result.mapping.is_empty());
        assert_eq!(result.b_not_in_a.len(), 1);
    }

    #[test]
    fn test_unparseable_birth_date_never_matches() {
        let reconciler = CrossSourceReconciler::default();
        let sheet = identification(&[["7", "Doe", "Jane", "1980-01-01", "F"]]);
        let b = reconciler.read_identification(&sheet).unwrap();
        assert_eq!(b[0].birth_date, None);
        let result = reconciler.reconcile(&source_a(), &b).unwrap();
        assert!(result.mapping.is_empty());
        assert_eq!(result.b_not_in_a.len(), 1);
    }

    #[test]
    fn test_source_b_duplicates_excluded() {
        let reconciler = CrossSourceReconciler::default();
        // 粗键相同，即使出生日期不同也一并排除
        let sheet = identification(&[
            ["7", "Doe", "Jane", "01.01.1980", "F"],
            ["17", "doe", "JANE", "05.05.1985", "F"],
            ["8", "Roe", "John", "30.06.1975", "M"],
        ]);
        let b = reconciler.read_identification(&sheet).unwrap();
        let result = reconciler.reconcile(&source_a(), &b).unwrap();

        assert_eq!(result.source_b_duplicates.len(), 2);
        assert!(!result.mapping.contains_key("7"));
        assert!(!result.mapping.contains_key("17"));
        assert!(result.mapping.contains_key("8"));
        assert_eq!(result.b_not_in_a.len(), 2);
    }

    #[test]
    fn test_source_a_ambiguity_excluded() {
        let reconciler = CrossSourceReconciler::default();
        let table = IdentityTable::from_records(vec![
            identity("A001", "Doe", "Jane", date(1980, 1, 1), Sex::Female, 1),
            identity("A009", "DOE", "Jane", date(1980, 1, 1), Sex::Female, 9),
        ]);
        let sheet = identification(&[["7", "Doe", "Jane", "01.01.1980", "F"]]);
        let b = reconciler.read_identification(&sheet).unwrap();
        let result = reconciler.reconcile(&table, &b).unwrap();

        assert_eq!(result.source_a_duplicates.len(), 2);
        assert!(result.mapping.is_empty());
    }

    #[test]
    fn test_same_pseudonym_rows_collapse() {
        let reconciler = CrossSourceReconciler::default();
        let mut second = identity("A001", "Doe", "Jane", date(1980, 1, 1), Sex::Female, 1);
        second.canonical_id = Some("A002".to_string());
        let table = IdentityTable::from_records(vec![
            identity("A001", "Doe", "Jane", date(1980, 1, 1), Sex::Female, 1),
            second,
        ]);
        let sheet = identification(&[["7", "Doe", "Jane", "01.01.1980", "F"]]);
        let b = reconciler.read_identification(&sheet).unwrap();
        let result = reconciler.reconcile(&table, &b).unwrap();

        assert!(result.source_a_duplicates.is_empty());
        assert_eq!(result.mapping.len(), 1);
        assert!(result.a_not_in_b.is_empty());
    }

    #[test]
    fn test_duplicate_patient_id_in_join_is_invariant_violation() {
        let reconciler = CrossSourceReconciler::default();
        let b = vec![
            SourceBIdentity {
                patient_id: "7".to_string(),
                last_name: "doe".to_string(),
                first_name: "jane".to_string(),
                birth_date: Some(date(1980, 1, 1)),
                sex: Sex::Female,
            },
            SourceBIdentity {
                patient_id: "7".to_string(),
                last_name: "roe".to_string(),
                first_name: "john".to_string(),
                birth_date: Some(date(1975, 6, 30)),
                sex: Sex::Male,
            },
        ];
        let result = reconciler.reconcile(&source_a(), &b);
        assert!(matches!(result, Err(DeidError::InvariantViolation(_))));
    }

    #[test]
    fn test_apply_rewrites_every_sheet() {
        let reconciler = CrossSourceReconciler::default();
        let sheet = identification(&[
            ["7", "Doe", "Jane", "01.01.1980", "F"],
            ["9", "Unknown", "Person", "01.01.2000", "F"],
        ]);
        let b = reconciler.read_identification(&sheet).unwrap();
        let result = reconciler.reconcile(&source_a(), &b).unwrap();

        let mut visits = Table::new(vec!["Patient ID".to_string(), "EDSS".to_string()]);
        visits.push_row(vec!["7".to_string(), "2,5".to_string()]);
        visits.push_row(vec!["9".to_string(), "1,0".to_string()]);
        visits.push_row(vec!["7".to_string(), "3,0".to_string()]);

        let mut workbook = Workbook::new();
        workbook.insert("Identification".to_string(), sheet);
        workbook.insert("Visits".to_string(), visits);
        workbook.insert("Empty".to_string(), Table::new(vec!["Anything".to_string()]));

        let anonymised = reconciler.apply(&workbook, &result).unwrap();
        let pseudonym = source_a().records()[0].pseudonym.to_string();

        assert_eq!(anonymised["Visits"].len(), 2);
        assert!(anonymised["Visits"].rows.iter().all(|row| row[0] == pseudonym));
        assert_eq!(anonymised["Identification"].len(), 1);
        assert_eq!(anonymised["Identification"].rows[0][0], pseudonym);
        assert!(anonymised["Empty"].is_empty());
    }

    #[test]
    fn test_apply_requires_patient_id_column() {
        let reconciler = CrossSourceReconciler::default();
        let mut other = Table::new(vec!["Code".to_string()]);
        other.push_row(vec!["x".to_string()]);
        let mut workbook = Workbook::new();
        workbook.insert("Lookup".to_string(), other);

        let result = reconciler.apply(&workbook, &Reconciliation::default());
        assert!(matches!(result, Err(DeidError::Validation(_))));
    }
}
