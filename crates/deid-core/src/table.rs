//! 表格数据
//!
//! 电子表格来源按工作表导出为CSV，每个工作表对应一个 `<sheet>.csv` 文件。

use crate::error::{DeidError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// 多个工作表组成的工作簿，按工作表名排序
pub type Workbook = BTreeMap<String, Table>;

/// 单个工作表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    /// 获取必需列的下标，缺失时返回验证错误
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| DeidError::Validation(format!("缺少必需的列: {}", name)))
    }

    /// 追加一行，长度不足时补空值
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    /// 只保留指定列，顺序按 `columns` 给出
    pub fn select_columns(&self, columns: &[String]) -> Result<Table> {
        let indices = columns
            .iter()
            .map(|column| self.require_column(column))
            .collect::<Result<Vec<_>>>()?;

        let mut selected = Table::new(columns.to_vec());
        for row in &self.rows {
            selected
                .rows
                .push(indices.iter().map(|&i| row[i].clone()).collect());
        }
        Ok(selected)
    }

    /// 从CSV文件读取，第一行为表头
    pub fn read_csv(path: &Path) -> Result<Table> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;

        let headers = reader
            .headers()?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();
        let mut table = Table::new(headers);

        for record in reader.records() {
            let record = record?;
            table.push_row(record.iter().map(|value| value.to_string()).collect());
        }

        debug!("读取表格 {:?}: {} 行", path, table.len());
        Ok(table)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// 读取目录下所有工作表
pub fn read_workbook(dir: &Path) -> Result<Workbook> {
    if !dir.is_dir() {
        return Err(DeidError::Config(format!("工作簿目录不存在: {:?}", dir)));
    }

    let mut workbook = Workbook::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if !is_csv {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        workbook.insert(name.to_string(), Table::read_csv(&path)?);
    }

    info!("从 {:?} 读取了 {} 个工作表", dir, workbook.len());
    Ok(workbook)
}

/// 将工作簿写为目录，每个工作表一个CSV文件
pub fn write_workbook(dir: &Path, workbook: &Workbook) -> Result<()> {
    fs::create_dir_all(dir)?;
    for (name, table) in workbook {
        table.write_csv(&dir.join(format!("{}.csv", name)))?;
    }
    info!("工作簿已写入 {:?}: {} 个工作表", dir, workbook.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut table = Table::new(vec!["Patient ID".to_string(), "EDSS".to_string()]);
        table.push_row(vec!["7".to_string(), "3,5".to_string()]);
        table.push_row(vec!["8".to_string()]);
        table
    }

    #[test]
    fn test_push_row_pads() {
        let table = sample();
        assert_eq!(table.rows[1], vec!["8".to_string(), String::new()]);
    }

    #[test]
    fn test_select_columns() {
        let table = sample();
        let selected = table.select_columns(&["EDSS".to_string()]).unwrap();
        assert_eq!(selected.headers, vec!["EDSS".to_string()]);
        assert_eq!(selected.rows[0], vec!["3,5".to_string()]);

        assert!(table.select_columns(&["Missing".to_string()]).is_err());
    }

    #[test]
    fn test_workbook_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut workbook = Workbook::new();
        workbook.insert("Visits".to_string(), sample());
        write_workbook(dir.path(), &workbook).unwrap();

        let loaded = read_workbook(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["Visits"], sample());
    }
}
