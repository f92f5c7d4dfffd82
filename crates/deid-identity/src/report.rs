//! 异常报告
//!
//! 重复、缺失ID、来源间不一致等情况写成独立的CSV文件供人工核查，
//! 不回流到主流程。列表为空时不生成文件，上次运行留下的同名报告被删除。

use crate::reconcile::SourceBIdentity;
use crate::table::{write_identity_rows, IdentityRecord};
use chrono::NaiveDate;
use deid_core::{Result, Sex};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct SourceBReportRow<'a> {
    #[serde(rename = "Patient ID")]
    patient_id: &'a str,
    #[serde(rename = "Last Name")]
    last_name: &'a str,
    #[serde(rename = "First Name")]
    first_name: &'a str,
    #[serde(rename = "Birth Date")]
    birth_date: Option<NaiveDate>,
    #[serde(rename = "Gender")]
    sex: Sex,
}

/// 删除过期报告
fn remove_stale_report(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
        info!("本次没有异常，已删除旧报告 {:?}", path);
    }
    Ok(())
}

/// 写出身份表记录组成的报告，返回是否生成了文件
pub fn write_identity_report(path: &Path, records: &[IdentityRecord]) -> Result<bool> {
    if records.is_empty() {
        remove_stale_report(path)?;
        return Ok(false);
    }
    write_identity_rows(path, records)?;
    warn!("{} 条记录已写入报告 {:?}", records.len(), path);
    Ok(true)
}

/// 写出来源B身份行组成的报告，返回是否生成了文件
pub fn write_source_b_report(path: &Path, identities: &[SourceBIdentity]) -> Result<bool> {
    if identities.is_empty() {
        remove_stale_report(path)?;
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for identity in identities {
        writer.serialize(SourceBReportRow {
            patient_id: &identity.patient_id,
            last_name: &identity.last_name,
            first_name: &identity.first_name,
            birth_date: identity.birth_date,
            sex: identity.sex,
        })?;
    }
    writer.flush()?;
    warn!("{} 行已写入报告 {:?}", identities.len(), path);
    Ok(true)
}
