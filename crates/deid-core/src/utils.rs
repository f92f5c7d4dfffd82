//! 通用工具函数

use crate::error::{DeidError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 解析以 `YYYY-MM-DD` 开头的日期字符串（允许后接时间部分）
pub fn parse_iso_date_prefix(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let prefix = value.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// 按给定格式解析日期
pub fn parse_date_with_format(value: &str, format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), format).ok()
}

/// 提取出生年份
///
/// 同时兼容原始导出（`1980-01-01T00:00:00`）、脱敏导出（`1980-00-00`）
/// 和DICOM日期（`19800101`）。
pub fn parse_birth_year(value: &str) -> Option<i32> {
    let value = value.trim();
    let year = value.get(..4)?;
    if !year.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    year.parse().ok()
}

/// 解析检查时间戳
///
/// 完整时间戳形如 `2020-05-01T10:15:30.1234567+01`，小数秒和尾部时区均可选；
/// 只有日期时取当天零点。
pub fn parse_examination_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    let date = parse_iso_date_prefix(value)?;

    if value.len() < 19 || value.as_bytes().get(10) != Some(&b'T') {
        return Some(date.and_time(NaiveTime::MIN));
    }

    let time = NaiveTime::parse_from_str(value.get(11..19)?, "%H:%M:%S").ok()?;
    let mut timestamp = date.and_time(time);

    if let Some(fraction) = value.get(19..).and_then(|rest| rest.strip_prefix('.')) {
        let digits: String = fraction
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .take(9)
            .collect();
        if !digits.is_empty() {
            let scale = 10u32.pow(9 - digits.len() as u32);
            let nanos: u32 = digits.parse().ok()?;
            timestamp = timestamp.with_nanosecond(nanos * scale)?;
        }
    }

    Some(timestamp)
}

/// 用于跨来源比较的姓名规范化
pub fn normalize_name(value: &str) -> String {
    value.trim().to_lowercase()
}

/// 拆分 `Family^Given` 形式的姓名
///
/// 姓取第一段，名取最后一段。
pub fn split_person_name(value: &str) -> (String, String) {
    let mut parts = value.split('^');
    let family = parts.next().unwrap_or_default().trim().to_string();
    let given = value.rsplit('^').next().unwrap_or_default().trim().to_string();
    (family, given)
}

/// 递归收集目录下指定扩展名的文件，按路径排序
pub fn collect_files(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(DeidError::Config(format!("输入目录不存在: {:?}", root)));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("无法访问目录项: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        })
        .collect();

    files.sort();
    debug!("在 {:?} 下找到 {} 个 .{} 文件", root, files.len(), extension);
    Ok(files)
}

/// 取文件名按 `_` 分割后的最后 `count` 段，用于生成输出文件名
pub fn file_name_tail(path: &Path, count: usize) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parts: Vec<&str> = name.split('_').collect();
    let start = parts.len().saturating_sub(count);
    parts[start..].join("_")
}
