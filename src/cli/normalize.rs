use super::ui;
use crate::core::batch::{self, BatchReport};
use crate::core::error::RecordError;
use crate::core::folder::{self, FolderValidation, SKIP_LIST_FILE, TRANSFORMED_SUFFIX, file_label};
use crate::core::normalize::Normalizer;
use crate::core::validation;
use anyhow::{Context, Result};
use comfy_table::Cell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Options of the `normalize` command.
#[derive(Debug, Clone)]
pub struct NormalizeArgs {
    pub input: PathBuf,
    pub output: PathBuf,
    pub workers: usize,
    /// Treat `input` as one file rather than a folder.
    pub single: bool,
}

/// What normalizing one file produced.
#[derive(Debug, Clone)]
pub struct NormalizedFile {
    pub output: PathBuf,
    pub fund: String,
    pub category: String,
    pub cutoff: Option<String>,
    /// Value groups whose sum fell outside the tolerance.
    pub off_tolerance: Vec<&'static str>,
}

/// Normalizes one input file and writes `<stem>_transformed.json` into
/// `output`. Invalid sheets are rejected and nothing is written.
pub async fn normalize_file(
    normalizer: &Normalizer,
    path: &Path,
    output: &Path,
) -> Result<NormalizedFile, RecordError> {
    let source = file_label(path);
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RecordError::Read {
            path: source.clone(),
            message: e.to_string(),
        })?;

    let normalized = normalizer.normalize_json(&json, &source)?;
    let off_tolerance = normalized
        .off_tolerance()
        .map(|r| r.kind.section_key())
        .collect();
    let sheet = validation::validate(normalized.sheet).map_err(|e| RecordError::Validation {
        path: source.clone(),
        source: e,
    })?;

    let text = serde_json::to_string_pretty(&sheet).map_err(|e| RecordError::Parse {
        path: source.clone(),
        message: e.to_string(),
    })?;
    let target = output.join(folder::transformed_name(path));
    tokio::fs::write(&target, text)
        .await
        .map_err(|e| RecordError::Persistence {
            path: source.clone(),
            message: format!("failed to write {}: {e}", target.display()),
        })?;
    debug!("Wrote {}", target.display());

    let (fund, category, cutoff) = match &sheet.fic {
        Some(fic) => (
            fic.nombre_fic.clone(),
            fic.tipo.clone(),
            fic.fecha_corte.as_ref().map(|d| d.text()),
        ),
        None => (String::new(), String::new(), None),
    };
    Ok(NormalizedFile {
        output: target,
        fund,
        category,
        cutoff,
        off_tolerance,
    })
}

fn input_files(args: &NormalizeArgs) -> Result<Vec<PathBuf>> {
    if args.single {
        if !args.input.is_file() {
            anyhow::bail!("Input file not found: {}", args.input.display());
        }
        return Ok(vec![args.input.clone()]);
    }
    let files = folder::list_json_files(&args.input, None)?
        .into_iter()
        .filter(|p| !file_label(p).ends_with(&format!("{TRANSFORMED_SUFFIX}.json")))
        .collect();
    Ok(files)
}

fn display_report(report: &BatchReport<NormalizedFile>) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("File"),
        ui::header_cell("Fund"),
        ui::header_cell("Category"),
        ui::header_cell("Cutoff"),
        ui::header_cell("Status"),
    ]);

    for (path, result) in &report.results {
        match result {
            Ok(file) => {
                let status = if file.off_tolerance.is_empty() {
                    ui::status_cell("ok", false)
                } else {
                    Cell::new(format!("sum off: {}", file.off_tolerance.join(", ")))
                        .fg(comfy_table::Color::Yellow)
                };
                table.add_row(vec![
                    Cell::new(file_label(path)),
                    Cell::new(&file.fund),
                    Cell::new(&file.category),
                    ui::format_optional_cell(file.cutoff.clone(), |c| c),
                    status,
                ]);
            }
            Err(e) => {
                table.add_row(vec![
                    Cell::new(file_label(path)),
                    ui::na_cell(true),
                    ui::na_cell(true),
                    ui::na_cell(true),
                    ui::status_cell(&e.to_string(), true),
                ]);
            }
        }
    }
    table.to_string()
}

fn display_validation(validation: &FolderValidation) -> String {
    let expected = validation
        .expected
        .map_or("unknown".to_string(), |(y, m)| format!("{y}-{m:02}"));
    let mut output = format!(
        "Cutoff check against {}: {}/{} outputs match",
        ui::style_text(&expected, ui::StyleType::TotalLabel),
        validation.matches,
        validation.checked
    );
    for name in &validation.mismatched {
        output.push_str(&format!(
            "\n  {}",
            ui::style_text(name, ui::StyleType::Error)
        ));
    }
    output
}

pub async fn run(normalizer: Normalizer, args: NormalizeArgs, cancel: &CancellationToken) -> Result<()> {
    let files = input_files(&args)?;
    if files.is_empty() {
        warn!(input = %args.input.display(), "No JSON files to normalize");
        return Ok(());
    }
    std::fs::create_dir_all(&args.output).with_context(|| {
        format!("Failed to create output directory: {}", args.output.display())
    })?;
    info!("Normalizing {} files into {}", files.len(), args.output.display());

    let pb = ui::new_progress_bar(files.len() as u64, true);
    pb.set_message("Normalizing...");

    let normalizer = Arc::new(normalizer);
    let output = Arc::new(args.output.clone());
    let report = batch::run_batch(files, args.workers, cancel, &|| pb.inc(1), move |path| {
        let normalizer = Arc::clone(&normalizer);
        let output = Arc::clone(&output);
        async move { normalize_file(&normalizer, &path, &output).await }
    })
    .await;
    pb.finish_and_clear();

    println!("{}", display_report(&report));
    println!(
        "\n{}: {} normalized, {} failed",
        ui::style_text("Total", ui::StyleType::TotalLabel),
        ui::style_text(&report.succeeded().count().to_string(), ui::StyleType::TotalValue),
        report.failure_count()
    );
    if report.not_started > 0 {
        println!(
            "{}",
            ui::style_text(
                &format!("{} files not started (interrupted)", report.not_started),
                ui::StyleType::Subtle
            )
        );
    }

    if args.single {
        let outputs: Vec<PathBuf> = report.succeeded().map(|(_, f)| f.output.clone()).collect();
        if let Some(input_folder) = args.input.parent() {
            let validation = folder::validate_files(input_folder, &outputs);
            if !validation.mismatched.is_empty() {
                ui::print_separator();
                println!("{}", display_validation(&validation));
            }
        }
    } else {
        let validation = folder::validate_outputs(&args.input, &args.output)?;
        let skip_path = args.output.join(SKIP_LIST_FILE);
        folder::write_skip_list(&skip_path, &validation.mismatched)?;
        ui::print_separator();
        println!("{}", display_validation(&validation));
        if !validation.mismatched.is_empty() {
            println!(
                "{}",
                ui::style_text(
                    &format!("Skip list written to {}", skip_path.display()),
                    ui::StyleType::Subtle
                )
            );
        }
    }
    Ok(())
}
