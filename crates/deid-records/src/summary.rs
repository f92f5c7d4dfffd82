//! RNFL 汇总与眼别拆分

use crate::clinical::ClinicalFields;
use crate::export::{format_value, key_headers};
use crate::fields::{Column, MeasurementField, MeasurementGroup};
use crate::merge::ConsolidatedTable;
use deid_core::{Laterality, Table};
use std::collections::BTreeSet;
use tracing::debug;

/// 十二钟点扇区
pub const TWELVE_SECTORS: [&str; 12] = [
    "Temporal",
    "TemporalSuperiorTemporal",
    "SuperiorSuperiorTemporal",
    "Superior",
    "SuperiorSuperiorNasal",
    "NasalSuperiorNasal",
    "Nasal",
    "NasalInferiorNasal",
    "InferiorInferiorNasal",
    "Inferior",
    "InferiorInferiorTemporal",
    "TemporalInferiorTemporal",
];

pub const SUMMARY_MINIMUM: &str = "Minimum";
pub const SUMMARY_MAXIMUM: &str = "Maximum";
pub const SUMMARY_MEAN: &str = "Mean";

const EYES: [Laterality; 2] = [Laterality::Right, Laterality::Left];

/// 为每只眼追加十二扇区的最小值、最大值和均值
///
/// 缺失的扇区不参与计算；一只眼没有任何扇区值时不生成汇总。
pub fn add_rnfl_summaries(table: &mut ConsolidatedTable) {
    let mut summarized = 0usize;
    for row in table.rows_mut() {
        for laterality in EYES {
            let sectors: Vec<f64> = TWELVE_SECTORS
                .iter()
                .filter_map(|sector| {
                    row.get(&Column::new(
                        laterality,
                        MeasurementField::new(MeasurementGroup::TwelveSectors, *sector),
                    ))
                })
                .collect();
            if sectors.is_empty() {
                continue;
            }

            let minimum = sectors.iter().copied().fold(f64::INFINITY, f64::min);
            let maximum = sectors.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = sectors.iter().sum::<f64>() / sectors.len() as f64;

            for (name, value) in [
                (SUMMARY_MINIMUM, minimum),
                (SUMMARY_MAXIMUM, maximum),
                (SUMMARY_MEAN, mean),
            ] {
                let field = MeasurementField::new(MeasurementGroup::RnflParameters, name);
                row.values.insert(Column::new(laterality, field), value);
            }
            summarized += 1;
        }
    }
    debug!("RNFL 汇总: {} 只眼", summarized);
}

/// 把宽表拆成每只眼一行
///
/// 列名去掉眼别前缀并追加 `Eye` 列；每个就诊固定输出右眼、左眼两行，
/// 某只眼没有测量时该行测量列为空。
pub fn split_eyes(table: &ConsolidatedTable) -> Table {
    let fields: BTreeSet<MeasurementField> =
        table.columns().into_iter().map(|column| column.field).collect();
    let with_clinical = table.has_clinical();

    let mut headers = key_headers();
    if with_clinical {
        headers.extend(ClinicalFields::COLUMNS.iter().map(|column| column.to_string()));
    }
    headers.push("Eye".to_string());
    headers.extend(fields.iter().map(MeasurementField::column_suffix));

    let mut split = Table::new(headers);
    for row in table.rows() {
        for laterality in EYES {
            let mut cells: Vec<String> = row.key.values().into_iter().collect();
            if with_clinical {
                match &row.clinical {
                    Some(fields) => cells.extend(fields.values()),
                    None => cells.extend([String::new(), String::new()]),
                }
            }
            cells.push(laterality.prefix().to_string());
            cells.extend(
                fields
                    .iter()
                    .map(|field| format_value(row.get(&Column::new(laterality, field.clone())))),
            );
            split.push_row(cells);
        }
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::tests::{key, measurement};
    use crate::merge::ModalityMergeEngine;
    use deid_core::Modality;

    fn with_sectors(values: &[f64]) -> ConsolidatedTable {
        let mut record = measurement(Modality::Disc, "P1", Laterality::Right, "2020-05-01T09:00:00", 80.0);
        for (sector, value) in TWELVE_SECTORS.iter().zip(values) {
            record
                .values
                .insert(MeasurementField::new(MeasurementGroup::TwelveSectors, *sector), *value);
        }
        ModalityMergeEngine::new().consolidate(vec![record]).unwrap()
    }

    fn summary(table: &ConsolidatedTable, laterality: Laterality, name: &str) -> Option<f64> {
        table.get(&key("P1", "2020-05-01")).unwrap().get(&Column::new(
            laterality,
            MeasurementField::new(MeasurementGroup::RnflParameters, name),
        ))
    }

    #[test]
    fn test_rnfl_summaries() {
        let mut table = with_sectors(&[100.0, 120.0, 80.0, 60.0]);
        add_rnfl_summaries(&mut table);

        assert_eq!(summary(&table, Laterality::Right, SUMMARY_MINIMUM), Some(60.0));
        assert_eq!(summary(&table, Laterality::Right, SUMMARY_MAXIMUM), Some(120.0));
        assert_eq!(summary(&table, Laterality::Right, SUMMARY_MEAN), Some(90.0));
        assert_eq!(summary(&table, Laterality::Left, SUMMARY_MEAN), None);
    }

    #[test]
    fn test_split_eyes() {
        let engine = ModalityMergeEngine::new();
        let table = engine
            .consolidate(vec![
                measurement(Modality::Disc, "P1", Laterality::Right, "2020-05-01T09:00:00", 80.0),
                measurement(Modality::Disc, "P1", Laterality::Left, "2020-05-01T09:00:00", 82.0),
                measurement(Modality::Macula, "P1", Laterality::Left, "2020-05-01T09:00:00", 250.0),
            ])
            .unwrap();

        let split = split_eyes(&table);
        assert_eq!(split.len(), 2);
        assert_eq!(&split.headers[5..], &["Eye", "FourSectors_Temporal", "ETDRSSectors_ILM_BM_Central"]);
        assert_eq!(&split.rows[0][5..], &["R", "80", ""]);
        assert_eq!(&split.rows[1][5..], &["L", "82", "250"]);
    }
}
