//! 宽表导出

use crate::clinical::ClinicalFields;
use crate::merge::ConsolidatedTable;
use deid_core::{Result, Table, VisitKey};
use std::path::Path;
use tracing::info;

pub(crate) fn format_value(value: Option<f64>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

pub(crate) fn key_headers() -> Vec<String> {
    VisitKey::COLUMNS.iter().map(|column| column.to_string()).collect()
}

impl ConsolidatedTable {
    /// 转换为宽表：键列、测量列，对齐过临床数据时追加临床列
    pub fn to_table(&self) -> Table {
        let columns: Vec<_> = self.columns().into_iter().collect();
        let with_clinical = self.has_clinical();

        let mut headers = key_headers();
        headers.extend(columns.iter().map(|column| column.name()));
        if with_clinical {
            headers.extend(ClinicalFields::COLUMNS.iter().map(|column| column.to_string()));
        }

        let mut table = Table::new(headers);
        for row in self.rows() {
            let mut cells: Vec<String> = row.key.values().into_iter().collect();
            cells.extend(columns.iter().map(|column| format_value(row.get(column))));
            if with_clinical {
                match &row.clinical {
                    Some(fields) => cells.extend(fields.values()),
                    None => cells.extend([String::new(), String::new()]),
                }
            }
            table.push_row(cells);
        }
        table
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let table = self.to_table();
        table.write_csv(path)?;
        info!(
            "合并表已写入 {:?}: {} 行, {} 列",
            path,
            table.len(),
            table.headers.len()
        );
        Ok(())
    }
}
