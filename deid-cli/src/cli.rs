//! 命令行参数

use clap::{Parser, Subcommand};
use deid_admin::DeidConfig;
use deid_records::{Layer, NamedGroup};
use std::path::PathBuf;

/// 临床影像数据脱敏与多模态合并
#[derive(Parser, Debug)]
#[command(name = "deid")]
#[command(about = "临床影像数据脱敏与多模态合并工具")]
pub struct Cli {
    /// 配置文件路径 (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 日志级别
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// 输出目录
    #[arg(short, long, global = true)]
    pub out: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 扫描XML导出，生成身份映射、精简映射和异常报告
    BuildIds {
        /// XML导出根目录
        #[arg(short, long)]
        input: PathBuf,
    },

    /// 与临床工作簿对账并生成脱敏工作簿
    Reconcile {
        /// 身份映射文件
        #[arg(long)]
        ids: PathBuf,
        /// 工作簿目录（每个工作表一个CSV）
        #[arg(long)]
        workbook: PathBuf,
        /// 保留列清单目录
        #[arg(long)]
        keep_columns: Option<PathBuf>,
    },

    /// 脱敏XML导出
    ScrubXml {
        #[arg(long)]
        ids: PathBuf,
        #[arg(short, long)]
        input: PathBuf,
    },

    /// 脱敏DICOM文件
    ScrubDicom {
        #[arg(long)]
        ids: PathBuf,
        #[arg(short, long)]
        input: PathBuf,
    },

    /// 合并测量记录为每次就诊一行
    Consolidate {
        /// XML导出根目录
        #[arg(short, long)]
        input: PathBuf,
        /// 脱敏后的临床工作簿目录，给出时与随访对齐
        #[arg(long)]
        clinical: Option<PathBuf>,
        /// 身份映射文件，给出时把规范ID替换为假名
        #[arg(long)]
        ids: Option<PathBuf>,
        /// 保留的测量组，例如 rnfl-tsnit-average,macula-etdrs
        #[arg(long = "keep", value_delimiter = ',')]
        keep: Vec<NamedGroup>,
        /// 保留的分层，例如 gcl-ipl,ilm-bm
        #[arg(long = "layer", value_delimiter = ',')]
        layers: Vec<Layer>,
        /// 额外输出每只眼一行的表
        #[arg(long)]
        per_eye: bool,
        /// 追加 RNFL 汇总列
        #[arg(long)]
        rnfl_summaries: bool,
    },
}

impl Cli {
    /// 命令行参数覆盖配置
    pub fn apply_overrides(&self, config: &mut DeidConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(out) = &self.out {
            config.output.dir = out.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_consolidate_arguments() {
        let cli = Cli::try_parse_from([
            "deid",
            "--out",
            "/tmp/deid",
            "consolidate",
            "--input",
            "exports",
            "--keep",
            "rnfl-tsnit-average,macula-etdrs",
            "--layer",
            "ilm-bm",
            "--per-eye",
        ])
        .unwrap();

        let mut config = DeidConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.output.dir, PathBuf::from("/tmp/deid"));

        match cli.command {
            Command::Consolidate {
                keep,
                layers,
                per_eye,
                clinical,
                ..
            } => {
                assert_eq!(keep, vec![NamedGroup::RnflTsnitAverage, NamedGroup::MaculaEtdrs]);
                assert_eq!(layers, vec![Layer::IlmBm]);
                assert!(per_eye);
                assert!(clinical.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_group_rejected() {
        let result = Cli::try_parse_from(["deid", "consolidate", "--input", "x", "--keep", "everything"]);
        assert!(result.is_err());
    }
}
