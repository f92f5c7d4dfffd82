//! 身份表构建器
//!
//! 扫描主来源的XML导出，按完整身份元组去重，
//! 再为每个不同的 `(姓, 名, 出生日期)` 生成一个盐和一个假名。

use crate::pseudonym::{Pseudonym, Salt};
use crate::table::{IdentityRecord, IdentityTable};
use chrono::NaiveDate;
use deid_core::utils::{collect_files, parse_iso_date_prefix, split_person_name};
use deid_core::{DeidError, Result, Sex, XmlNode};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// 从单个导出文件观察到的身份
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservedIdentity {
    pub family_name: String,
    pub given_name: String,
    pub birth_date: NaiveDate,
    pub canonical_id: Option<String>,
    pub sex: Sex,
}

/// 生成盐值的人口学三元组
type DemographicTriple = (String, String, NaiveDate);

impl ObservedIdentity {
    /// 从导出文件的 `PatientInformation` 中提取身份
    pub fn from_export(root: &XmlNode) -> Result<Self> {
        let info = root
            .child("PatientInformation")
            .ok_or_else(|| DeidError::XmlParse("缺少 PatientInformation".to_string()))?;

        let name = info
            .child_text("PatientNameGroup1")
            .ok_or_else(|| DeidError::Validation("缺少患者姓名".to_string()))?;
        let (family_name, given_name) = split_person_name(name);

        let raw_birth = info
            .child_text("PatientBirthDate")
            .ok_or_else(|| DeidError::Validation("缺少出生日期".to_string()))?;
        let birth_date = parse_iso_date_prefix(raw_birth)
            .ok_or_else(|| DeidError::Validation("出生日期格式无效".to_string()))?;

        let sex = info
            .child_text("PatientSex")
            .map(Sex::from_code)
            .ok_or_else(|| DeidError::Validation("缺少性别".to_string()))?;

        Ok(Self {
            family_name,
            given_name,
            birth_date,
            canonical_id: info.child_text("PatientID").map(str::to_string),
            sex,
        })
    }

    fn triple(&self) -> DemographicTriple {
        (self.family_name.clone(), self.given_name.clone(), self.birth_date)
    }
}

/// 目录扫描统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub files_seen: usize,
    pub files_skipped: usize,
    pub identities: usize,
}

/// 构建过程中发现的异常，只报告不处理
#[derive(Debug, Clone, Default)]
pub struct IdentityAnomalies {
    /// 人口学三元组相同但其余字段（通常是规范ID）不同的全部记录
    pub possible_duplicates: Vec<IdentityRecord>,
    /// 缺少规范ID的记录
    pub missing_canonical_id: Vec<IdentityRecord>,
}

impl IdentityAnomalies {
    pub fn is_empty(&self) -> bool {
        self.possible_duplicates.is_empty() && self.missing_canonical_id.is_empty()
    }
}

/// 构建结果
#[derive(Debug, Clone)]
pub struct IdentityBuild {
    pub table: IdentityTable,
    pub anomalies: IdentityAnomalies,
}

/// 身份表构建器
#[derive(Debug, Default)]
pub struct IdentityTableBuilder {
    observed: BTreeSet<ObservedIdentity>,
}

impl IdentityTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个观察到的身份，完全相同的元组自动合并
    pub fn observe(&mut self, identity: ObservedIdentity) -> bool {
        self.observed.insert(identity)
    }

    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    /// 扫描单个导出文件
    pub fn scan_file(&mut self, path: &Path) -> Result<()> {
        let root = XmlNode::read_file(path)?;
        let identity = ObservedIdentity::from_export(&root)?;
        if self.observe(identity) {
            debug!("新身份来自 {:?}", path);
        }
        Ok(())
    }

    /// 递归扫描目录下所有XML导出，解析失败的文件记录后跳过
    pub fn scan_directory(&mut self, root: &Path) -> Result<ScanSummary> {
        let files = collect_files(root, "xml")?;
        let mut summary = ScanSummary {
            files_seen: files.len(),
            ..Default::default()
        };

        info!("开始扫描身份来源: {:?}, {} 个文件", root, files.len());
        for file in &files {
            if let Err(e) = self.scan_file(file) {
                error!("读取 {:?} 失败: {}, 跳过", file, e);
                summary.files_skipped += 1;
            }
        }

        summary.identities = self.observed.len();
        info!(
            "身份扫描完成: {} 个文件, 跳过 {} 个, {} 个不同身份",
            summary.files_seen, summary.files_skipped, summary.identities
        );
        Ok(summary)
    }

    /// 使用操作系统随机源生成盐并构建身份表
    pub fn build(self) -> IdentityBuild {
        self.build_with_rng(&mut OsRng)
    }

    /// 使用给定的密码学随机源构建身份表
    pub fn build_with_rng<R: RngCore + CryptoRng>(self, rng: &mut R) -> IdentityBuild {
        let mut assigned: BTreeMap<DemographicTriple, (Salt, Pseudonym)> = BTreeMap::new();
        for identity in &self.observed {
            assigned.entry(identity.triple()).or_insert_with(|| {
                let salt = Salt::generate(rng);
                let pseudonym = Pseudonym::derive(
                    &identity.family_name,
                    &identity.given_name,
                    identity.birth_date,
                    &salt,
                );
                (salt, pseudonym)
            });
        }

        let mut groups: BTreeMap<DemographicTriple, Vec<IdentityRecord>> = BTreeMap::new();
        for identity in self.observed {
            let triple = identity.triple();
            let (salt, pseudonym) = assigned[&triple].clone();
            groups.entry(triple).or_default().push(IdentityRecord {
                canonical_id: identity.canonical_id,
                family_name: identity.family_name,
                given_name: identity.given_name,
                birth_date: identity.birth_date,
                sex: identity.sex,
                salt,
                pseudonym,
            });
        }

        let mut anomalies = IdentityAnomalies::default();
        let mut records = Vec::new();
        for group in groups.into_values() {
            if group.len() > 1 {
                anomalies.possible_duplicates.extend(group.iter().cloned());
            }
            anomalies
                .missing_canonical_id
                .extend(group.iter().filter(|r| !r.has_canonical_id()).cloned());
            records.extend(group);
        }

        if !anomalies.possible_duplicates.is_empty() {
            warn!(
                "发现可能重复的患者: {} 条记录共享姓名和出生日期",
                anomalies.possible_duplicates.len()
            );
        }
        if !anomalies.missing_canonical_id.is_empty() {
            warn!(
                "发现缺少PatientID的患者: {} 条",
                anomalies.missing_canonical_id.len()
            );
        }

        info!(
            "身份表构建完成: {} 条记录, {} 个假名",
            records.len(),
            assigned.len()
        );

        IdentityBuild {
            table: IdentityTable::from_records(records),
            anomalies,
        }
    }
}
