//! 临床随访对齐
//!
//! 合并后的影像表先按患者与识别表内连接（取发病日期），
//! 再按 (患者, 检查日期 == 随访日期) 与随访表内连接（取 EDSS）。
//! 没有同日随访的影像行、没有同日影像的随访都会被丢弃。

use crate::merge::{ConsolidatedTable, ModalityMergeEngine};
use chrono::NaiveDate;
use deid_core::utils::{parse_date_with_format, parse_iso_date_prefix};
use deid_core::{DeidError, Result, Table, Workbook};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// 临床表格的工作表名与列名
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClinicalColumns {
    pub identification_sheet: String,
    pub visits_sheet: String,
    pub patient_id: String,
    pub date_of_onset: String,
    pub visit_date: String,
    pub edss: String,
    pub date_format: String,
}

impl Default for ClinicalColumns {
    fn default() -> Self {
        Self {
            identification_sheet: "Identification".to_string(),
            visits_sheet: "Visits".to_string(),
            patient_id: "Patient ID".to_string(),
            date_of_onset: "Date of onset".to_string(),
            visit_date: "Visit Date".to_string(),
            edss: "EDSS".to_string(),
            date_format: "%d.%m.%Y".to_string(),
        }
    }
}

/// 并入影像行的临床字段
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClinicalFields {
    pub date_of_onset: Option<NaiveDate>,
    pub edss: Option<f64>,
}

impl ClinicalFields {
    pub const COLUMNS: [&'static str; 2] = ["Date of onset", "EDSS"];

    pub fn values(&self) -> [String; 2] {
        [
            self.date_of_onset
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            self.edss.map(|edss| edss.to_string()).unwrap_or_default(),
        ]
    }
}

/// 从临床工作簿读取的识别与随访数据
#[derive(Debug, Clone, Default)]
pub struct ClinicalRecords {
    onsets: BTreeMap<String, Vec<Option<NaiveDate>>>,
    visits: BTreeMap<(String, NaiveDate), Vec<Option<f64>>>,
}

impl ClinicalRecords {
    /// 读取识别表和随访表
    pub fn from_workbook(workbook: &Workbook, columns: &ClinicalColumns) -> Result<Self> {
        let identification = require_sheet(workbook, &columns.identification_sheet)?;
        let visits = require_sheet(workbook, &columns.visits_sheet)?;

        let mut records = ClinicalRecords::default();

        let id_col = identification.require_column(&columns.patient_id)?;
        let onset_col = identification.require_column(&columns.date_of_onset)?;
        for row in &identification.rows {
            let patient_id = row[id_col].trim();
            if patient_id.is_empty() {
                continue;
            }
            let onset = parse_sheet_date(&row[onset_col], &columns.date_format);
            if onset.is_none() && !row[onset_col].trim().is_empty() {
                warn!("患者 {} 的发病日期无法解析: {}", patient_id, row[onset_col]);
            }
            records.add_onset(patient_id, onset);
        }

        let id_col = visits.require_column(&columns.patient_id)?;
        let date_col = visits.require_column(&columns.visit_date)?;
        let edss_col = visits.require_column(&columns.edss)?;
        for row in &visits.rows {
            let patient_id = row[id_col].trim();
            if patient_id.is_empty() {
                continue;
            }
            let Some(date) = parse_sheet_date(&row[date_col], &columns.date_format) else {
                warn!("患者 {} 的随访日期无法解析: {}", patient_id, row[date_col]);
                continue;
            };
            let edss = parse_edss(&row[edss_col]);
            if edss.is_none() && !row[edss_col].trim().is_empty() {
                warn!("患者 {} 在 {} 的 EDSS 无法解析: {}", patient_id, date, row[edss_col]);
            }
            records.add_visit(patient_id, date, edss);
        }

        info!(
            "临床记录: 识别 {} 名患者, 随访 {} 条",
            records.onsets.len(),
            records.visits.len()
        );
        Ok(records)
    }

    pub fn add_onset(&mut self, patient_id: &str, onset: Option<NaiveDate>) {
        self.onsets.entry(patient_id.to_string()).or_default().push(onset);
    }

    pub fn add_visit(&mut self, patient_id: &str, date: NaiveDate, edss: Option<f64>) {
        self.visits
            .entry((patient_id.to_string(), date))
            .or_default()
            .push(edss);
    }

    /// 查找同日随访，多条匹配返回 `Ambiguous`
    pub fn lookup(&self, patient_id: &str, date: NaiveDate) -> Result<ClinicalFields> {
        let onset = match self.onsets.get(patient_id).map(Vec::as_slice) {
            None | Some([]) => {
                return Err(DeidError::NotFound(format!("识别表中没有患者 {}", patient_id)))
            }
            Some([onset]) => *onset,
            Some(many) => {
                return Err(DeidError::Ambiguous(format!(
                    "识别表中患者 {} 出现 {} 次",
                    patient_id,
                    many.len()
                )))
            }
        };

        let edss = match self
            .visits
            .get(&(patient_id.to_string(), date))
            .map(Vec::as_slice)
        {
            None | Some([]) => {
                return Err(DeidError::NotFound(format!(
                    "患者 {} 在 {} 没有随访",
                    patient_id, date
                )))
            }
            Some([edss]) => *edss,
            Some(many) => {
                return Err(DeidError::Ambiguous(format!(
                    "患者 {} 在 {} 有 {} 条随访",
                    patient_id,
                    date,
                    many.len()
                )))
            }
        };

        Ok(ClinicalFields {
            date_of_onset: onset,
            edss,
        })
    }
}

impl ModalityMergeEngine {
    /// 第三阶段：与临床随访内连接
    pub fn align_with_visits(
        &self,
        table: ConsolidatedTable,
        clinical: &ClinicalRecords,
    ) -> ConsolidatedTable {
        let before = table.len();
        let mut ambiguous = 0usize;

        let rows = table.into_rows().filter_map(|mut row| {
            match clinical.lookup(&row.key.patient_id, row.key.examination_date) {
                Ok(fields) => {
                    row.clinical = Some(fields);
                    Some(row)
                }
                Err(DeidError::Ambiguous(message)) => {
                    error!("跳过影像行: {}", message);
                    ambiguous += 1;
                    None
                }
                Err(e) => {
                    debug!("没有同日随访，丢弃影像行: {}", e);
                    None
                }
            }
        });
        let aligned = ConsolidatedTable::from_rows(rows.collect::<Vec<_>>());

        info!(
            "临床对齐完成: {} 行 → {} 行 (歧义 {} 行)",
            before,
            aligned.len(),
            ambiguous
        );
        aligned
    }
}

fn require_sheet<'w>(workbook: &'w Workbook, name: &str) -> Result<&'w Table> {
    workbook
        .get(name)
        .ok_or_else(|| DeidError::Validation(format!("工作簿缺少工作表: {}", name)))
}

/// 表格中的日期可能保留原格式，也可能已经是ISO格式
fn parse_sheet_date(value: &str, format: &str) -> Option<NaiveDate> {
    parse_date_with_format(value, format).or_else(|| parse_iso_date_prefix(value))
}

/// EDSS 使用逗号作小数点
fn parse_edss(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value.replace(',', ".").parse().ok()
}
