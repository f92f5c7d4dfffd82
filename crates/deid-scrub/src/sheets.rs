//! 临床工作簿脱敏
//!
//! 先用对账结果替换患者ID，再按保留列清单裁剪每个工作表。

use deid_core::table::read_workbook;
use deid_core::{DeidError, Result, Workbook};
use deid_identity::{CrossSourceReconciler, Reconciliation};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// 每个工作表需要保留的列
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepList {
    columns: BTreeMap<String, Vec<String>>,
}

impl KeepList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, sheet: impl Into<String>, columns: Vec<String>) -> Self {
        self.columns.insert(sheet.into(), columns);
        self
    }

    /// 从目录读取，每个 `<sheet>.csv` 的表头即该工作表的保留列
    pub fn read_dir(dir: &Path) -> Result<Self> {
        let columns = read_workbook(dir)?
            .into_iter()
            .map(|(sheet, table)| (sheet, table.headers))
            .collect();
        Ok(Self { columns })
    }

    pub fn columns_for(&self, sheet: &str) -> Option<&[String]> {
        self.columns.get(sheet).map(Vec::as_slice)
    }

    /// 裁剪工作簿，没有保留清单的工作表被丢弃
    pub fn apply(&self, workbook: Workbook) -> Result<Workbook> {
        let mut kept = Workbook::new();
        for (sheet, table) in workbook {
            let Some(columns) = self.columns_for(&sheet) else {
                warn!("工作表 {} 没有保留列清单，已丢弃", sheet);
                continue;
            };
            let selected = table.select_columns(columns).map_err(|e| {
                DeidError::Config(format!("工作表 {} 的保留列清单无效: {}", sheet, e))
            })?;
            kept.insert(sheet, selected);
        }
        Ok(kept)
    }
}

/// 替换患者ID并按需裁剪列
pub fn anonymise_workbook(
    reconciler: &CrossSourceReconciler,
    workbook: &Workbook,
    reconciliation: &Reconciliation,
    keep: Option<&KeepList>,
) -> Result<Workbook> {
    let anonymised = reconciler.apply(workbook, reconciliation)?;
    let anonymised = match keep {
        Some(keep) => keep.apply(anonymised)?,
        None => anonymised,
    };
    info!("工作簿脱敏完成: {} 个工作表", anonymised.len());
    Ok(anonymised)
}
