//! 核心数据模型定义

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// 性别枚举
///
/// 身份表与临床表格的性别写法不同（`M`、`male`、`Male` ...），
/// 统一解析为枚举后再比较。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sex {
    #[serde(rename = "M", alias = "m", alias = "male", alias = "Male")]
    Male,
    #[serde(rename = "F", alias = "f", alias = "female", alias = "Female")]
    Female,
    #[serde(rename = "O", alias = "o", alias = "other", alias = "Other")]
    Other,
}

impl Sex {
    /// 从来源文件中的性别代码解析，无法识别的值归为 `Other`
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_lowercase().as_str() {
            "m" | "male" | "man" => Sex::Male,
            "f" | "female" | "woman" => Sex::Female,
            _ => Sex::Other,
        }
    }

    /// 输出文件中使用的单字母代码
    pub fn code(&self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
            Sex::Other => "O",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 眼别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Laterality {
    #[serde(rename = "R")]
    Right,
    #[serde(rename = "L")]
    Left,
}

impl Laterality {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "R" | "r" => Some(Laterality::Right),
            "L" | "l" => Some(Laterality::Left),
            _ => None,
        }
    }

    /// 宽表列名前缀
    pub fn prefix(&self) -> &'static str {
        match self {
            Laterality::Right => "R",
            Laterality::Left => "L",
        }
    }

    /// 从文件名推断眼别（`..._R.xml` 形式，扩展名前的最后一个字符）
    pub fn from_file_name(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?;
        let last = stem.chars().last()?;
        Self::from_code(&last.to_string())
    }
}

impl fmt::Display for Laterality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// 检查模态
///
/// 三种模态分别对应一种XML导出结构。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modality {
    Disc,
    Glaucoma,
    Macula,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Disc, Modality::Glaucoma, Modality::Macula];

    /// 文件名中的模态标记
    pub fn file_tag(&self) -> &'static str {
        match self {
            Modality::Disc => "Disc3D",
            Modality::Glaucoma => "Glaucoma3D",
            Modality::Macula => "Macula3D",
        }
    }

    /// XML中测量数据所在的元素名
    pub fn measurement_element(&self) -> &'static str {
        match self {
            Modality::Disc => "DiscMeasurementData",
            Modality::Glaucoma => "GlaucomaMeasurementData",
            Modality::Macula => "MaculaMeasurementData",
        }
    }

    /// 根据路径中的模态标记识别模态
    pub fn from_path(path: &Path) -> Option<Self> {
        let text = path.to_string_lossy();
        Self::ALL
            .into_iter()
            .find(|modality| text.contains(modality.file_tag()))
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_tag())
    }
}

/// 就诊合并键
///
/// 同一患者同一检查日期的所有测量合并为一行，所有合并都以该键对齐。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VisitKey {
    pub patient_id: String,
    pub examination_date: NaiveDate,
    pub birth_year: i32,
    pub sex: Sex,
    pub ethnic_group: String,
}

impl VisitKey {
    /// 宽表中键列的列名，顺序与 `values` 一致
    pub const COLUMNS: [&'static str; 5] = [
        "PatientID",
        "PatientBirthDate",
        "PatientSex",
        "EthnicGroup",
        "ExaminationDate",
    ];

    pub fn values(&self) -> [String; 5] {
        [
            self.patient_id.clone(),
            self.birth_year.to_string(),
            self.sex.code().to_string(),
            self.ethnic_group.clone(),
            self.examination_date.format("%Y-%m-%d").to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_sex_normalization() {
        assert_eq!(Sex::from_code("M"), Sex::Male);
        assert_eq!(Sex::from_code(" female "), Sex::Female);
        assert_eq!(Sex::from_code("F"), Sex::Female);
        assert_eq!(Sex::from_code("U"), Sex::Other);
        assert_eq!(Sex::Male.code(), "M");
    }

    #[test]
    fn test_laterality_from_file_name() {
        let path = PathBuf::from("P1/2020_Macula3D_R.xml");
        assert_eq!(Laterality::from_file_name(&path), Some(Laterality::Right));

        let path = PathBuf::from("P1/2020_Macula3D_L.xml");
        assert_eq!(Laterality::from_file_name(&path), Some(Laterality::Left));

        let path = PathBuf::from("P1/report.xml");
        assert_eq!(Laterality::from_file_name(&path), None);
    }

    #[test]
    fn test_modality_from_path() {
        assert_eq!(
            Modality::from_path(&PathBuf::from("a/b/x_Glaucoma3D_L.xml")),
            Some(Modality::Glaucoma)
        );
        assert_eq!(
            Modality::from_path(&PathBuf::from("a/b/x_Disc3D_R.xml")),
            Some(Modality::Disc)
        );
        assert_eq!(Modality::from_path(&PathBuf::from("a/b/x_Other_R.xml")), None);
    }
}
