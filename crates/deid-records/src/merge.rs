//! 多模态合并引擎
//!
//! 第一阶段在模态内把左右眼外连接为一行；第二阶段把三种模态依次外连接；
//! 第三阶段与临床随访内连接（见 `clinical`）。所有连接都以 `VisitKey` 对齐，
//! 只出现在一侧的就诊保留该行，缺失的测量列为空。

use crate::clinical::ClinicalFields;
use crate::extract::MeasurementRecord;
use crate::fields::{Column, Selection};
use crate::retake::deduplicate_retakes;
use deid_core::{DeidError, Modality, Result, VisitKey};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// 合并后的一行：一名患者一个检查日期
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedRow {
    pub key: VisitKey,
    pub values: BTreeMap<Column, f64>,
    pub modalities: BTreeSet<Modality>,
    pub clinical: Option<ClinicalFields>,
}

impl ConsolidatedRow {
    pub fn new(key: VisitKey) -> Self {
        Self {
            key,
            values: BTreeMap::new(),
            modalities: BTreeSet::new(),
            clinical: None,
        }
    }

    pub fn get(&self, column: &Column) -> Option<f64> {
        self.values.get(column).copied()
    }

    pub fn has_modality(&self, modality: Modality) -> bool {
        self.modalities.contains(&modality)
    }

    fn absorb_record(&mut self, record: MeasurementRecord) -> Result<()> {
        self.modalities.insert(record.modality);
        for (field, value) in record.values {
            self.insert(Column::new(record.laterality, field), value)?;
        }
        Ok(())
    }

    /// 外连接的一侧并入本行，两侧出现同名列视为结构错误
    fn absorb_row(&mut self, other: ConsolidatedRow) -> Result<()> {
        self.modalities.extend(other.modalities);
        for (column, value) in other.values {
            self.insert(column, value)?;
        }
        if other.clinical.is_some() {
            self.clinical = other.clinical;
        }
        Ok(())
    }

    fn insert(&mut self, column: Column, value: f64) -> Result<()> {
        if self.values.contains_key(&column) {
            return Err(DeidError::InvariantViolation(format!(
                "合并时列 {} 在 {} {} 两侧重复",
                column, self.key.patient_id, self.key.examination_date
            )));
        }
        self.values.insert(column, value);
        Ok(())
    }
}

/// 合并结果，每个 `VisitKey` 恰好一行，按键排序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidatedTable {
    rows: BTreeMap<VisitKey, ConsolidatedRow>,
}

impl ConsolidatedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &ConsolidatedRow> {
        self.rows.values()
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut ConsolidatedRow> {
        self.rows.values_mut()
    }

    pub fn get(&self, key: &VisitKey) -> Option<&ConsolidatedRow> {
        self.rows.get(key)
    }

    /// 所有行出现过的测量列
    pub fn columns(&self) -> BTreeSet<Column> {
        self.rows
            .values()
            .flat_map(|row| row.values.keys().cloned())
            .collect()
    }

    pub fn has_clinical(&self) -> bool {
        self.rows.values().any(|row| row.clinical.is_some())
    }

    /// 按选择条件丢弃测量列
    pub fn retain_columns(&mut self, selection: &Selection) {
        if selection.is_empty() {
            return;
        }
        for row in self.rows.values_mut() {
            row.values.retain(|column, _| selection.keeps(&column.field));
        }
    }

    pub(crate) fn from_rows(rows: impl IntoIterator<Item = ConsolidatedRow>) -> Self {
        Self {
            rows: rows.into_iter().map(|row| (row.key.clone(), row)).collect(),
        }
    }

    pub fn into_rows(self) -> impl Iterator<Item = ConsolidatedRow> {
        self.rows.into_values()
    }

    /// 外连接另一张表
    fn outer_join(&mut self, other: ConsolidatedTable) -> Result<()> {
        for (key, row) in other.rows {
            match self.rows.get_mut(&key) {
                Some(existing) => existing.absorb_row(row)?,
                None => {
                    self.rows.insert(key, row);
                }
            }
        }
        Ok(())
    }
}

/// 多模态合并引擎
#[derive(Debug, Clone, Copy, Default)]
pub struct ModalityMergeEngine;

impl ModalityMergeEngine {
    pub fn new() -> Self {
        Self
    }

    /// 第一阶段：同一模态的左右眼记录去重后外连接
    pub fn merge_eyes(
        &self,
        modality: Modality,
        records: Vec<MeasurementRecord>,
    ) -> Result<ConsolidatedTable> {
        if let Some(other) = records.iter().find(|record| record.modality != modality) {
            return Err(DeidError::Internal(format!(
                "{} 的合并输入中混入了 {} 记录: {:?}",
                modality, other.modality, other.source
            )));
        }

        let input = records.len();
        let mut rows: BTreeMap<VisitKey, ConsolidatedRow> = BTreeMap::new();
        for record in deduplicate_retakes(records) {
            let key = record.visit_key();
            rows.entry(key.clone())
                .or_insert_with(|| ConsolidatedRow::new(key))
                .absorb_record(record)?;
        }

        debug!("{} 左右眼合并: 记录 {} 条 → {} 行", modality, input, rows.len());
        Ok(ConsolidatedTable { rows })
    }

    /// 第二阶段：按给定顺序依次外连接各模态的表
    pub fn merge_modalities(&self, tables: Vec<ConsolidatedTable>) -> Result<ConsolidatedTable> {
        let mut merged = ConsolidatedTable::default();
        for table in tables {
            merged.outer_join(table)?;
        }
        Ok(merged)
    }

    /// 第一、二阶段：按模态分组后合并全部测量记录
    pub fn consolidate(&self, records: Vec<MeasurementRecord>) -> Result<ConsolidatedTable> {
        let mut by_modality: BTreeMap<Modality, Vec<MeasurementRecord>> = BTreeMap::new();
        for record in records {
            by_modality.entry(record.modality).or_default().push(record);
        }

        let mut tables = Vec::new();
        for modality in Modality::ALL {
            match by_modality.remove(&modality) {
                Some(records) => tables.push(self.merge_eyes(modality, records)?),
                None => debug!("没有 {} 记录", modality),
            }
        }

        let merged = self.merge_modalities(tables)?;
        info!("多模态合并完成: {} 行, {} 列", merged.len(), merged.columns().len());
        Ok(merged)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fields::{Layer, MeasurementField, MeasurementGroup, Metric};
    use chrono::{NaiveDate, NaiveDateTime};
    use deid_core::{Laterality, Sex};
    use std::path::PathBuf;

    pub(crate) fn field_for(modality: Modality) -> MeasurementField {
        match modality {
            Modality::Disc => MeasurementField::new(MeasurementGroup::FourSectors, "Temporal"),
            Modality::Glaucoma => MeasurementField::new(MeasurementGroup::TotalSector, "")
                .with_metric(Metric::Thickness)
                .with_layer(Layer::GclIpl),
            Modality::Macula => {
                MeasurementField::new(MeasurementGroup::EtdrsSectors, "Central").with_layer(Layer::IlmBm)
            }
        }
    }

    pub(crate) fn measurement(
        modality: Modality,
        pid: &str,
        laterality: Laterality,
        timestamp: &str,
        value: f64,
    ) -> MeasurementRecord {
        let mut values = BTreeMap::new();
        values.insert(field_for(modality), value);
        MeasurementRecord {
            modality,
            laterality,
            examined_at: NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S").unwrap(),
            patient_id: pid.to_string(),
            birth_year: 1980,
            sex: Sex::Male,
            ethnic_group: String::new(),
            values,
            source: PathBuf::from(format!("{}/{}_{}_{}.xml", pid, timestamp, modality, laterality)),
        }
    }

    pub(crate) fn key(pid: &str, date: &str) -> VisitKey {
        VisitKey {
            patient_id: pid.to_string(),
            examination_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            birth_year: 1980,
            sex: Sex::Male,
            ethnic_group: String::new(),
        }
    }

    #[test]
    fn test_right_only_scan_keeps_row() {
        let engine = ModalityMergeEngine::new();
        let table = engine
            .merge_eyes(
                Modality::Disc,
                vec![measurement(Modality::Disc, "P1", Laterality::Right, "2020-05-01T09:00:00", 80.0)],
            )
            .unwrap();

        assert_eq!(table.len(), 1);
        let row = table.get(&key("P1", "2020-05-01")).unwrap();
        assert_eq!(row.get(&Column::new(Laterality::Right, field_for(Modality::Disc))), Some(80.0));
        assert_eq!(row.get(&Column::new(Laterality::Left, field_for(Modality::Disc))), None);
    }

    #[test]
    fn test_merge_eyes_dedupes_each_eye() {
        let engine = ModalityMergeEngine::new();
        let table = engine
            .merge_eyes(
                Modality::Disc,
                vec![
                    measurement(Modality::Disc, "P1", Laterality::Right, "2020-05-01T09:00:00", 1.0),
                    measurement(Modality::Disc, "P1", Laterality::Right, "2020-05-01T10:00:00", 2.0),
                    measurement(Modality::Disc, "P1", Laterality::Left, "2020-05-01T09:05:00", 3.0),
                ],
            )
            .unwrap();

        assert_eq!(table.len(), 1);
        let row = table.get(&key("P1", "2020-05-01")).unwrap();
        assert_eq!(row.get(&Column::new(Laterality::Right, field_for(Modality::Disc))), Some(2.0));
        assert_eq!(row.get(&Column::new(Laterality::Left, field_for(Modality::Disc))), Some(3.0));
    }

    #[test]
    fn test_merge_eyes_rejects_foreign_modality() {
        let engine = ModalityMergeEngine::new();
        let result = engine.merge_eyes(
            Modality::Disc,
            vec![measurement(Modality::Macula, "P1", Laterality::Right, "2020-05-01T09:00:00", 1.0)],
        );
        assert!(matches!(result, Err(DeidError::Internal(_))));
    }

    #[test]
    fn test_glaucoma_only_visit_keeps_row() {
        let engine = ModalityMergeEngine::new();
        let table = engine
            .consolidate(vec![
                measurement(Modality::Disc, "P1", Laterality::Right, "2020-05-01T09:00:00", 80.0),
                measurement(Modality::Glaucoma, "P2", Laterality::Left, "2020-05-01T09:00:00", 70.0),
            ])
            .unwrap();

        assert_eq!(table.len(), 2);
        let row = table.get(&key("P2", "2020-05-01")).unwrap();
        assert!(row.has_modality(Modality::Glaucoma));
        assert!(!row.has_modality(Modality::Disc));
        assert!(!row.has_modality(Modality::Macula));
        assert_eq!(row.values.len(), 1);
        // 其他模态的列仍出现在整张表中
        assert!(table
            .columns()
            .contains(&Column::new(Laterality::Right, field_for(Modality::Disc))));
    }

    #[test]
    fn test_all_modalities_same_day_one_row() {
        let engine = ModalityMergeEngine::new();
        let mut records = Vec::new();
        for modality in Modality::ALL {
            records.push(measurement(modality, "P1", Laterality::Right, "2020-05-01T09:00:00", 1.0));
            records.push(measurement(modality, "P1", Laterality::Left, "2020-05-01T09:10:00", 2.0));
        }

        let table = engine.consolidate(records).unwrap();
        assert_eq!(table.len(), 1);
        let row = table.get(&key("P1", "2020-05-01")).unwrap();
        assert_eq!(row.modalities.len(), 3);
        assert_eq!(row.values.len(), 6);
    }

    #[test]
    fn test_overlapping_columns_violate_invariant() {
        let engine = ModalityMergeEngine::new();
        let first = engine
            .merge_eyes(
                Modality::Disc,
                vec![measurement(Modality::Disc, "P1", Laterality::Right, "2020-05-01T09:00:00", 1.0)],
            )
            .unwrap();
        let second = first.clone();

        let result = engine.merge_modalities(vec![first, second]);
        assert!(matches!(result, Err(DeidError::InvariantViolation(_))));
    }
}
