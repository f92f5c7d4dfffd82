//! 配置管理
//!
//! 配置按以下顺序分层覆盖：内置默认值 → TOML 配置文件 → `DEID` 前缀的环境变量
//! （层级分隔符 `__`，例如 `DEID_OUTPUT__DIR`）。命令行参数由调用方最后覆盖。

use ::config::{Config, Environment, File};
use anyhow::{Context, Result};
use deid_identity::SourceBColumns;
use deid_records::ClinicalColumns;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// 完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeidConfig {
    pub logging: LoggingConfig,
    pub output: OutputConfig,
    pub sheets: SheetConfig,
    pub pipeline: PipelineConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别，`RUST_LOG` 优先
    pub level: String,
    /// 日志文件路径，未设置时输出到标准错误
    pub file_path: Option<PathBuf>,
    /// 终端输出是否带颜色
    pub ansi: bool,
}

/// 输出目录与各产物文件名
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub identity_mapping: String,
    pub reduced_mapping: String,
    pub possible_duplicates: String,
    pub no_canonical_id: String,
    pub source_b_duplicates: String,
    pub a_not_in_b: String,
    pub b_not_in_a: String,
    pub id_duplicates: String,
    pub consolidated: String,
    pub consolidated_per_eye: String,
    /// 脱敏后工作簿的目录名
    pub anonymised_sheets: String,
}

/// 临床工作簿的工作表与列名
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SheetConfig {
    pub identification: SourceBColumns,
    pub clinical: ClinicalColumns,
}

/// 流水线行为
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// 输入目录不存在时直接失败
    pub fail_on_missing_inputs: bool,
    /// 合并后追加 RNFL 汇总列
    pub rnfl_summaries: bool,
}

impl DeidConfig {
    /// 加载配置，`path` 为可选的 TOML 文件
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&DeidConfig::default())
            .context("无法序列化默认配置")?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("DEID")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("无法加载配置: {:?}", path))?;

        let config: DeidConfig = settings
            .try_deserialize()
            .context("配置反序列化失败")?;

        ConfigValidator::new().validate(&config)?;
        match path {
            Some(path) => info!("配置加载完成: {:?}", path),
            None => info!("使用默认配置"),
        }
        Ok(config)
    }
}

impl OutputConfig {
    /// 输出目录下的产物路径
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            ansi: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./out"),
            identity_mapping: "id.csv".to_string(),
            reduced_mapping: "id_reduced.csv".to_string(),
            possible_duplicates: "possible_duplicates.csv".to_string(),
            no_canonical_id: "no_cannon_id.csv".to_string(),
            source_b_duplicates: "imed_duplicates.csv".to_string(),
            a_not_in_b: "id_not_in_imed.csv".to_string(),
            b_not_in_a: "imed_not_in_id.csv".to_string(),
            id_duplicates: "id_duplicates.csv".to_string(),
            consolidated: "consolidated.csv".to_string(),
            consolidated_per_eye: "consolidated_per_eye.csv".to_string(),
            anonymised_sheets: "anon_imed".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fail_on_missing_inputs: true,
            rnfl_summaries: false,
        }
    }
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    field_path: &'static str,
    validator: fn(&DeidConfig) -> Result<()>,
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    rules: Vec<ValidationRule>,
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn require_non_empty(values: &[(&str, &str)]) -> Result<()> {
    match values.iter().find(|(_, value)| value.trim().is_empty()) {
        Some((name, _)) => Err(anyhow::anyhow!("{} 不能为空", name)),
        None => Ok(()),
    }
}

impl ConfigValidator {
    pub fn new() -> Self {
        let rules = vec![
            ValidationRule {
                field_path: "logging.level",
                validator: |config| require_non_empty(&[("level", config.logging.level.as_str())]),
            },
            ValidationRule {
                field_path: "output",
                validator: |config| {
                    let output = &config.output;
                    require_non_empty(&[
                        ("identity_mapping", output.identity_mapping.as_str()),
                        ("reduced_mapping", output.reduced_mapping.as_str()),
                        ("possible_duplicates", output.possible_duplicates.as_str()),
                        ("no_canonical_id", output.no_canonical_id.as_str()),
                        ("source_b_duplicates", output.source_b_duplicates.as_str()),
                        ("a_not_in_b", output.a_not_in_b.as_str()),
                        ("b_not_in_a", output.b_not_in_a.as_str()),
                        ("id_duplicates", output.id_duplicates.as_str()),
                        ("consolidated", output.consolidated.as_str()),
                        ("consolidated_per_eye", output.consolidated_per_eye.as_str()),
                        ("anonymised_sheets", output.anonymised_sheets.as_str()),
                    ])
                },
            },
            ValidationRule {
                field_path: "sheets",
                validator: |config| {
                    let sheets = &config.sheets;
                    require_non_empty(&[
                        ("clinical.identification_sheet", sheets.clinical.identification_sheet.as_str()),
                        ("clinical.visits_sheet", sheets.clinical.visits_sheet.as_str()),
                        ("identification.patient_id", sheets.identification.patient_id.as_str()),
                        ("clinical.patient_id", sheets.clinical.patient_id.as_str()),
                    ])
                },
            },
        ];

        Self { rules }
    }

    pub fn validate(&self, config: &DeidConfig) -> Result<()> {
        for rule in &self.rules {
            if let Err(e) = (rule.validator)(config) {
                error!("配置验证失败 {}: {}", rule.field_path, e);
                return Err(e.context(format!("无效配置项 {}", rule.field_path)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config_is_valid() {
        let config = DeidConfig::default();
        assert!(ConfigValidator::new().validate(&config).is_ok());
        assert_eq!(config.sheets.clinical.visits_sheet, "Visits");
        assert_eq!(config.sheets.identification.gender, "Gender");
        assert_eq!(config.output.path("id.csv"), PathBuf::from("./out/id.csv"));
    }

    #[test]
    fn test_empty_file_name_rejected() {
        let mut config = DeidConfig::default();
        config.output.consolidated = " ".to_string();
        assert!(ConfigValidator::new().validate(&config).is_err());

        let mut config = DeidConfig::default();
        config.sheets.clinical.visits_sheet.clear();
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_load_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deid.toml");
        fs::write(
            &path,
            "[output]\nconsolidated = \"merged.csv\"\n\n[sheets.clinical]\nvisits_sheet = \"Follow-up\"\n",
        )
        .unwrap();

        let config = DeidConfig::load(Some(&path)).unwrap();
        assert_eq!(config.output.consolidated, "merged.csv");
        assert_eq!(config.output.identity_mapping, "id.csv");
        assert_eq!(config.sheets.clinical.visits_sheet, "Follow-up");
        assert_eq!(config.sheets.clinical.identification_sheet, "Identification");
        assert!(config.pipeline.fail_on_missing_inputs);
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deid.toml");
        fs::write(&path, "[output]\ndir = \"/srv/from-file\"\n").unwrap();

        std::env::set_var("DEID_OUTPUT__DIR", "/srv/from-env");
        std::env::set_var("DEID_PIPELINE__RNFL_SUMMARIES", "true");
        let loaded = DeidConfig::load(Some(&path));
        std::env::remove_var("DEID_OUTPUT__DIR");
        std::env::remove_var("DEID_PIPELINE__RNFL_SUMMARIES");

        let config = loaded.unwrap();
        assert_eq!(config.output.dir, PathBuf::from("/srv/from-env"));
        assert!(config.pipeline.rnfl_summaries);
        assert_eq!(config.output.identity_mapping, "id.csv");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DeidConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
