//! 子命令实现
//!
//! 每个命令读取配置中的输出位置，写出产物与异常报告，返回统计结果。
//! 单个文件或单行的问题只记录日志；身份不变量被破坏等无法继续的情况返回错误。

use anyhow::{Context, Result};
use deid_admin::DeidConfig;
use deid_core::table::{read_workbook, write_workbook};
use deid_identity::report::{write_identity_report, write_source_b_report};
use deid_identity::{CrossSourceReconciler, IdentityTable, IdentityTableBuilder, ScanSummary};
use deid_records::{
    add_rnfl_summaries, split_eyes, ClinicalRecords, ModalityMergeEngine, RecordExtractor,
    Selection,
};
use deid_scrub::{anonymise_workbook, DicomScrubber, KeepList, ScrubSummary, XmlScrubber};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// `build-ids` 结果
#[derive(Debug, Clone, Default)]
pub struct BuildIdsOutcome {
    pub scan: ScanSummary,
    pub records: usize,
    pub pseudonyms: usize,
    /// 实际生成的异常报告
    pub reports: Vec<PathBuf>,
}

/// `reconcile` 结果
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub matched: usize,
    pub reports: Vec<PathBuf>,
    pub sheets: usize,
}

/// `consolidate` 结果
#[derive(Debug, Clone, Default)]
pub struct ConsolidateOutcome {
    pub files_seen: usize,
    pub files_skipped: usize,
    pub rows: usize,
    pub columns: usize,
}

/// `consolidate` 的可选输入
#[derive(Debug, Clone, Default)]
pub struct ConsolidateOptions {
    pub clinical: Option<PathBuf>,
    pub ids: Option<PathBuf>,
    pub selection: Selection,
    pub per_eye: bool,
}

/// 输入不存在时按配置决定失败还是跳过
fn input_available(config: &DeidConfig, path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(true);
    }
    if config.pipeline.fail_on_missing_inputs {
        anyhow::bail!("输入不存在: {:?}", path);
    }
    warn!("输入不存在，跳过: {:?}", path);
    Ok(false)
}

fn push_report(reports: &mut Vec<PathBuf>, written: bool, path: PathBuf) {
    if written {
        reports.push(path);
    }
}

/// 扫描导出并生成身份映射
pub fn build_ids(config: &DeidConfig, input: &Path) -> Result<BuildIdsOutcome> {
    if !input_available(config, input)? {
        return Ok(BuildIdsOutcome::default());
    }

    let mut builder = IdentityTableBuilder::new();
    let scan = builder.scan_directory(input)?;
    let build = builder.build();

    let output = &config.output;
    build
        .table
        .write_csv(&output.path(&output.identity_mapping))
        .context("写出身份映射失败")?;
    build
        .table
        .write_reduced_csv(&output.path(&output.reduced_mapping))
        .context("写出精简映射失败")?;

    let mut reports = Vec::new();
    let path = output.path(&output.possible_duplicates);
    let written = write_identity_report(&path, &build.anomalies.possible_duplicates)?;
    push_report(&mut reports, written, path);
    let path = output.path(&output.no_canonical_id);
    let written = write_identity_report(&path, &build.anomalies.missing_canonical_id)?;
    push_report(&mut reports, written, path);

    let outcome = BuildIdsOutcome {
        scan,
        records: build.table.len(),
        pseudonyms: build.table.distinct_pseudonyms(),
        reports,
    };
    info!(
        "身份映射完成: {} 条记录, {} 个假名, {} 份异常报告",
        outcome.records,
        outcome.pseudonyms,
        outcome.reports.len()
    );
    Ok(outcome)
}

/// 与临床工作簿对账并写出脱敏工作簿
pub fn reconcile(
    config: &DeidConfig,
    ids: &Path,
    workbook_dir: &Path,
    keep_columns: Option<&Path>,
) -> Result<ReconcileOutcome> {
    let table = IdentityTable::read_csv(ids).context("读取身份映射失败")?;
    let workbook = read_workbook(workbook_dir)?;

    let sheet_name = &config.sheets.clinical.identification_sheet;
    let sheet = workbook
        .get(sheet_name)
        .with_context(|| format!("工作簿缺少工作表: {}", sheet_name))?;

    let reconciler = CrossSourceReconciler::new(config.sheets.identification.clone());
    let source_b = reconciler.read_identification(sheet)?;
    let reconciliation = reconciler.reconcile(&table, &source_b)?;

    let output = &config.output;
    let mut reports = Vec::new();
    let path = output.path(&output.source_b_duplicates);
    let written = write_source_b_report(&path, &reconciliation.source_b_duplicates)?;
    push_report(&mut reports, written, path);
    let path = output.path(&output.a_not_in_b);
    let written = write_identity_report(&path, &reconciliation.a_not_in_b)?;
    push_report(&mut reports, written, path);
    let path = output.path(&output.b_not_in_a);
    let written = write_source_b_report(&path, &reconciliation.b_not_in_a)?;
    push_report(&mut reports, written, path);
    let path = output.path(&output.id_duplicates);
    let written = write_identity_report(&path, &reconciliation.source_a_duplicates)?;
    push_report(&mut reports, written, path);

    let keep = keep_columns.map(KeepList::read_dir).transpose()?;
    let anonymised = anonymise_workbook(&reconciler, &workbook, &reconciliation, keep.as_ref())?;
    write_workbook(&output.path(&output.anonymised_sheets), &anonymised)?;

    Ok(ReconcileOutcome {
        matched: reconciliation.mapping.len(),
        reports,
        sheets: anonymised.len(),
    })
}

/// 脱敏XML导出，写入输出目录
pub fn scrub_xml(config: &DeidConfig, ids: &Path, input: &Path) -> Result<ScrubSummary> {
    if !input_available(config, input)? {
        return Ok(ScrubSummary::default());
    }
    let table = IdentityTable::read_csv(ids).context("读取身份映射失败")?;
    let summary = XmlScrubber::new(&table).scrub_directory(input, &config.output.dir)?;
    Ok(summary)
}

/// 脱敏DICOM文件，写入输出目录
pub fn scrub_dicom(config: &DeidConfig, ids: &Path, input: &Path) -> Result<ScrubSummary> {
    if !input_available(config, input)? {
        return Ok(ScrubSummary::default());
    }
    let table = IdentityTable::read_csv(ids).context("读取身份映射失败")?;
    let summary = DicomScrubber::new(&table).scrub_directory(input, &config.output.dir)?;
    Ok(summary)
}

/// 提取、去重、合并测量记录，可选与临床随访对齐
pub fn consolidate(
    config: &DeidConfig,
    input: &Path,
    options: &ConsolidateOptions,
) -> Result<ConsolidateOutcome> {
    if !input_available(config, input)? {
        return Ok(ConsolidateOutcome::default());
    }

    let identities = options
        .ids
        .as_deref()
        .map(IdentityTable::read_csv)
        .transpose()
        .context("读取身份映射失败")?;
    let extractor = match &identities {
        Some(table) => RecordExtractor::with_identities(table),
        None => RecordExtractor::new(),
    };
    let batch = extractor.extract_directory(input)?;

    let engine = ModalityMergeEngine::new();
    let mut table = engine.consolidate(batch.records)?;
    table.retain_columns(&options.selection);
    if config.pipeline.rnfl_summaries {
        add_rnfl_summaries(&mut table);
    }

    if let Some(clinical) = &options.clinical {
        let workbook = read_workbook(clinical)?;
        let records = ClinicalRecords::from_workbook(&workbook, &config.sheets.clinical)?;
        table = engine.align_with_visits(table, &records);
    }

    let output = &config.output;
    table.write_csv(&output.path(&output.consolidated))?;
    if options.per_eye {
        split_eyes(&table).write_csv(&output.path(&output.consolidated_per_eye))?;
    }

    let outcome = ConsolidateOutcome {
        files_seen: batch.files_seen,
        files_skipped: batch.files_skipped,
        rows: table.len(),
        columns: table.columns().len(),
    };
    info!(
        "合并完成: {} 行, {} 个测量列, 跳过文件 {} 个",
        outcome.rows, outcome.columns, outcome.files_skipped
    );
    Ok(outcome)
}
