//! 同日重拍去重
//!
//! 同一患者、同一只眼、同一模态在同一天的多次测量只保留检查时间最晚的一次。
//! 时间完全相同时保留输入顺序中靠后的一条。

use crate::extract::MeasurementRecord;
use deid_core::{Laterality, Modality, VisitKey};
use std::collections::BTreeMap;
use tracing::debug;

type RetakeKey = (Modality, Laterality, VisitKey);

/// 去除同日重拍，结果按 (模态, 眼别, 就诊键) 排序
pub fn deduplicate_retakes(records: Vec<MeasurementRecord>) -> Vec<MeasurementRecord> {
    let mut latest: BTreeMap<RetakeKey, MeasurementRecord> = BTreeMap::new();
    let mut discarded = 0usize;

    for record in records {
        let key = (record.modality, record.laterality, record.visit_key());
        match latest.get(&key) {
            Some(kept) if kept.examined_at > record.examined_at => {
                debug!("丢弃较早的重拍: {:?}", record.source);
                discarded += 1;
            }
            Some(kept) => {
                debug!("丢弃较早的重拍: {:?}", kept.source);
                discarded += 1;
                latest.insert(key, record);
            }
            None => {
                latest.insert(key, record);
            }
        }
    }

    if discarded > 0 {
        debug!("同日重拍去重: 丢弃 {} 条, 保留 {} 条", discarded, latest.len());
    }
    latest.into_values().collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fields::{MeasurementField, MeasurementGroup};
    use chrono::{NaiveDate, NaiveDateTime};
    use deid_core::Sex;
    use std::path::PathBuf;

    pub(crate) fn record(
        pid: &str,
        laterality: Laterality,
        timestamp: &str,
        value: f64,
    ) -> MeasurementRecord {
        let mut values = BTreeMap::new();
        values.insert(MeasurementField::new(MeasurementGroup::FourSectors, "Temporal"), value);
        MeasurementRecord {
            modality: Modality::Disc,
            laterality,
            examined_at: NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S").unwrap(),
            patient_id: pid.to_string(),
            birth_year: 1980,
            sex: Sex::Female,
            ethnic_group: "1".to_string(),
            values,
            source: PathBuf::from(format!("{}/{}_{}.xml", pid, timestamp, value)),
        }
    }

    fn temporal(record: &MeasurementRecord) -> f64 {
        record.values[&MeasurementField::new(MeasurementGroup::FourSectors, "Temporal")]
    }

    #[test]
    fn test_later_retake_wins() {
        let kept = deduplicate_retakes(vec![
            record("P1", Laterality::Right, "2020-05-01T11:00:00", 2.0),
            record("P1", Laterality::Right, "2020-05-01T09:00:00", 1.0),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(temporal(&kept[0]), 2.0);
    }

    #[test]
    fn test_timestamp_tie_keeps_later_input() {
        let kept = deduplicate_retakes(vec![
            record("P1", Laterality::Right, "2020-05-01T09:00:00", 1.0),
            record("P1", Laterality::Right, "2020-05-01T09:00:00", 2.0),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(temporal(&kept[0]), 2.0);
    }

    #[test]
    fn test_different_days_and_eyes_are_kept() {
        let kept = deduplicate_retakes(vec![
            record("P1", Laterality::Right, "2020-05-01T09:00:00", 1.0),
            record("P1", Laterality::Left, "2020-05-01T09:30:00", 2.0),
            record("P1", Laterality::Right, "2020-06-01T09:00:00", 3.0),
            record("P2", Laterality::Right, "2020-05-01T09:00:00", 4.0),
        ]);
        assert_eq!(kept.len(), 4);
        assert_eq!(
            kept.iter()
                .filter(|record| record.examined_at.date() == NaiveDate::from_ymd_opt(2020, 5, 1).unwrap())
                .count(),
            3
        );
    }
}
