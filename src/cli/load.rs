use super::ui;
use crate::core::batch::{self, BatchReport};
use crate::core::error::RecordError;
use crate::core::folder::{self, SKIP_LIST_FILE, SkipList, TRANSFORMED_SUFFIX, file_label};
use crate::core::persistence::FundStore;
use crate::core::reconcile::{self, ReconcileDecision, ReconcileOutcome};
use crate::core::record::{FundIdentity, FundRecord};
use crate::core::sheet::FactSheet;
use anyhow::Result;
use comfy_table::Cell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Options of the `load` command.
#[derive(Debug, Clone, Default)]
pub struct LoadArgs {
    /// A `_transformed.json` file or a folder of them.
    pub input: PathBuf,
    pub skip_list: Option<PathBuf>,
    pub skip_files: Vec<String>,
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct LoadedFund {
    pub identity: FundIdentity,
    pub outcome: ReconcileOutcome,
}

/// Reads a normalized output file, validates it and reconciles it against
/// the store. Values are taken as written; nothing is rescaled.
pub async fn load_file(store: &dyn FundStore, path: &Path) -> Result<LoadedFund, RecordError> {
    let source = file_label(path);
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RecordError::Read {
            path: source.clone(),
            message: e.to_string(),
        })?;
    let sheet: FactSheet = serde_json::from_str(&json).map_err(|e| RecordError::Parse {
        path: source.clone(),
        message: e.to_string(),
    })?;
    let record = FundRecord::from_sheet(sheet, &source)?;
    let outcome = reconcile::reconcile(store, &record)
        .await
        .map_err(|e| RecordError::persistence(&source, &e))?;
    Ok(LoadedFund {
        identity: record.identity,
        outcome,
    })
}

/// Skip list from `--skip-list` and `--skip-files`. Without `--skip-list`, a
/// `skip_list.txt` inside the input folder is used when present.
pub fn build_skip_list(args: &LoadArgs) -> Result<SkipList> {
    let mut list = SkipList::from_names(&args.skip_files);
    let default_path = args.input.join(SKIP_LIST_FILE);
    match &args.skip_list {
        Some(path) => list.extend(SkipList::read(path)?),
        None if args.input.is_dir() && default_path.exists() => {
            debug!("Using skip list {}", default_path.display());
            list.extend(SkipList::read(&default_path)?);
        }
        None => {}
    }
    Ok(list)
}

/// Files to load and the names left out by the skip list.
pub fn select_files(args: &LoadArgs, skip: &SkipList) -> Result<(Vec<PathBuf>, Vec<String>)> {
    let candidates = if args.input.is_file() {
        vec![args.input.clone()]
    } else {
        folder::list_json_files(&args.input, Some(TRANSFORMED_SUFFIX))?
    };
    let (skipped, files): (Vec<PathBuf>, Vec<PathBuf>) = candidates
        .into_iter()
        .partition(|p| skip.contains(&file_label(p)));
    Ok((files, skipped.iter().map(|p| file_label(p)).collect()))
}

fn decision_label(decision: &ReconcileDecision) -> &'static str {
    match decision {
        ReconcileDecision::Insert => "inserted",
        ReconcileDecision::ReplaceCascade { .. } => "replaced",
        ReconcileDecision::Skip { .. } => "skipped (not newer)",
        ReconcileDecision::InsertAsNewVariant { .. } => "new variant",
    }
}

fn display_report(report: &BatchReport<LoadedFund>) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("File"),
        ui::header_cell("Fund"),
        ui::header_cell("Decision"),
        ui::header_cell("Id"),
        ui::header_cell("Rows deleted"),
        ui::header_cell("Rows inserted"),
    ]);

    for (path, result) in &report.results {
        match result {
            Ok(loaded) => {
                let outcome = &loaded.outcome;
                table.add_row(vec![
                    Cell::new(file_label(path)),
                    Cell::new(&loaded.identity),
                    ui::status_cell(decision_label(&outcome.decision), false),
                    ui::format_optional_cell(outcome.id, |id| id.to_string()),
                    ui::count_cell(outcome.rows_deleted),
                    ui::count_cell(outcome.rows_inserted),
                ]);
            }
            Err(e) => {
                table.add_row(vec![
                    Cell::new(file_label(path)),
                    ui::na_cell(true),
                    ui::status_cell(&e.to_string(), true),
                    ui::na_cell(true),
                    ui::na_cell(true),
                    ui::na_cell(true),
                ]);
            }
        }
    }
    table.to_string()
}

pub async fn run(store: Arc<dyn FundStore>, args: LoadArgs, cancel: &CancellationToken) -> Result<()> {
    let skip = build_skip_list(&args)?;
    let (files, skipped) = select_files(&args, &skip)?;
    for name in &skipped {
        info!(file = %name, "Skipped by skip list");
    }
    if files.is_empty() {
        warn!(input = %args.input.display(), "No transformed files to load");
        return Ok(());
    }

    let pb = ui::new_progress_bar(files.len() as u64, true);
    pb.set_message("Loading...");

    let job_store = Arc::clone(&store);
    let report = batch::run_batch(files, args.workers, cancel, &|| pb.inc(1), move |path| {
        let store = Arc::clone(&job_store);
        async move { load_file(store.as_ref(), &path).await }
    })
    .await;
    pb.finish_and_clear();

    println!("{}", display_report(&report));
    let written = report
        .succeeded()
        .filter(|(_, l)| l.outcome.decision.writes())
        .count();
    println!(
        "\n{}: {} written, {} unchanged, {} failed, {} skipped",
        ui::style_text("Total", ui::StyleType::TotalLabel),
        ui::style_text(&written.to_string(), ui::StyleType::TotalValue),
        report.succeeded().count() - written,
        report.failure_count(),
        skipped.len()
    );
    if !skipped.is_empty() {
        println!(
            "{}",
            ui::style_text(
                &format!("Skipped: {}", skipped.join(", ")),
                ui::StyleType::Subtle
            )
        );
    }
    if report.not_started > 0 {
        println!(
            "{}",
            ui::style_text(
                &format!("{} files not started (interrupted)", report.not_started),
                ui::StyleType::Subtle
            )
        );
    }
    debug!("Store holds {} funds", store.funds().await?.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::normalize::normalize_file;
    use crate::core::config::AppConfig;
    use crate::core::normalize::Normalizer;
    use crate::core::record::DependentRow;
    use crate::store::memory::MemoryFundStore;
    use std::fs;
    use tempfile::TempDir;

    fn sheet(cutoff: &str) -> String {
        format!(
            r#"{{
                "fic": {{"nombre_fic": "Fondo A", "url": "https://banco.example", "fecha_corte": "{cutoff}"}},
                "composicion_portafolio": {{"por_activo": [{{"activo": "CDT", "participacion": 1.0}}]}}
            }}"#
        )
    }

    #[tokio::test]
    async fn test_load_file_reconciles() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let june = temp_dir.path().join("B_A_2025_06_raw_transformed.json");
        let july = temp_dir.path().join("B_A_2025_07_raw_transformed.json");
        fs::write(&june, sheet("2025-06-30"))?;
        fs::write(&july, sheet("2025-07-31"))?;
        let store = MemoryFundStore::new();

        let first = load_file(&store, &june).await?;
        assert_eq!(first.outcome.decision, ReconcileDecision::Insert);
        let second = load_file(&store, &july).await?;
        assert!(matches!(
            second.outcome.decision,
            ReconcileDecision::ReplaceCascade { .. }
        ));
        assert_eq!(second.outcome.id, first.outcome.id);
        let again = load_file(&store, &june).await?;
        assert!(matches!(again.outcome.decision, ReconcileDecision::Skip { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_loaded_rates_keep_normalized_scale() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let raw = temp_dir.path().join("Banco_A_raw.json");
        fs::write(
            &raw,
            r#"{
                "fic": {"nombre_fic": "Fondo A", "url": "https://banco.example", "fecha_corte": "31/07/2025"},
                "composicion_portafolio": {"por_activo": [{"activo": "CDT", "participacion": 100}]},
                "rentabilidad_volatilidad": [{
                    "tipo_de_participacion": "A",
                    "rentabilidad_historica_ea": {"ultimo_anio": 150}
                }]
            }"#,
        )?;
        let normalizer = Normalizer::from_config(&AppConfig::default());
        let written = normalize_file(&normalizer, &raw, temp_dir.path()).await?;
        let output: serde_json::Value = serde_json::from_str(&fs::read_to_string(&written.output)?)?;
        assert_eq!(
            output["rentabilidad_volatilidad"][0]["rentabilidad_historica_ea"]["ultimo_anio"],
            serde_json::json!(1.5)
        );

        let store = MemoryFundStore::new();
        let loaded = load_file(&store, &written.output).await?;
        let id = loaded.outcome.id.expect("inserted fund has an id");
        let rows = store.dependents(id).await?;
        let horizons = rows
            .iter()
            .find_map(|row| match row {
                DependentRow::Return { horizons, .. } => Some(horizons),
                _ => None,
            })
            .expect("return row is stored");
        assert_eq!(horizons.ultimo_anio, Some(1.5));
        Ok(())
    }

    #[tokio::test]
    async fn test_same_fund_name_without_url_stays_apart_per_bank() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let content = r#"{
            "fic": {"nombre_fic": "Fondo Renta Fija", "fecha_corte": "2025-07-31"},
            "composicion_portafolio": {"por_activo": [{"activo": "CDT", "participacion": 1.0}]}
        }"#;
        let first = temp_dir.path().join("Bancolombia_RF_raw_transformed.json");
        let second = temp_dir.path().join("Davivienda_RF_raw_transformed.json");
        fs::write(&first, content)?;
        fs::write(&second, content)?;
        let store = MemoryFundStore::new();

        let a = load_file(&store, &first).await?;
        let b = load_file(&store, &second).await?;
        assert_eq!(a.outcome.decision, ReconcileDecision::Insert);
        assert_eq!(b.outcome.decision, ReconcileDecision::Insert);
        assert_ne!(a.identity, b.identity);
        assert_eq!(store.funds().await?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_select_files_applies_skip_list() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let dir = temp_dir.path();
        fs::write(dir.join("A_raw_transformed.json"), "{}")?;
        fs::write(dir.join("B_raw_transformed.json"), "{}")?;
        fs::write(dir.join("C_raw_transformed.json"), "{}")?;
        fs::write(dir.join("C_raw.json"), "{}")?;
        fs::write(dir.join(SKIP_LIST_FILE), "B_raw_transformed.json\n")?;

        let args = LoadArgs {
            input: dir.to_path_buf(),
            skip_files: vec!["C_raw".to_string()],
            workers: 1,
            ..LoadArgs::default()
        };
        let skip = build_skip_list(&args)?;
        let (files, skipped) = select_files(&args, &skip)?;
        assert_eq!(files, vec![dir.join("A_raw_transformed.json")]);
        assert_eq!(skipped, vec!["B_raw_transformed.json", "C_raw_transformed.json"]);
        Ok(())
    }
}
