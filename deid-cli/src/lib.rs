//! # deid
//!
//! 各处理阶段的命令行封装：身份表构建、跨来源对账、XML/DICOM 脱敏、多模态合并。

pub mod cli;
pub mod commands;

use anyhow::Result;
use cli::{Cli, Command};
use deid_admin::{init_logging, DeidConfig};
use deid_records::Selection;
use tracing::info;

/// 加载配置、初始化日志并执行子命令
pub fn run(cli: Cli) -> Result<()> {
    let mut config = DeidConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    init_logging(&config.logging)?;

    info!("输出目录: {:?}", config.output.dir);
    match cli.command {
        Command::BuildIds { input } => {
            commands::build_ids(&config, &input)?;
        }
        Command::Reconcile {
            ids,
            workbook,
            keep_columns,
        } => {
            commands::reconcile(&config, &ids, &workbook, keep_columns.as_deref())?;
        }
        Command::ScrubXml { ids, input } => {
            commands::scrub_xml(&config, &ids, &input)?;
        }
        Command::ScrubDicom { ids, input } => {
            commands::scrub_dicom(&config, &ids, &input)?;
        }
        Command::Consolidate {
            input,
            clinical,
            ids,
            keep,
            layers,
            per_eye,
            rnfl_summaries,
        } => {
            if rnfl_summaries {
                config.pipeline.rnfl_summaries = true;
            }
            let options = commands::ConsolidateOptions {
                clinical,
                ids,
                selection: Selection::new(keep, layers),
                per_eye,
            };
            commands::consolidate(&config, &input, &options)?;
        }
    }
    Ok(())
}
