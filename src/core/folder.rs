//! Folder conventions: monthly input folders named `*_<YYYY>_<MM>`, output
//! files suffixed `_transformed.json`, and skip lists of base names.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::dates::parse_to_date;

pub const TRANSFORMED_SUFFIX: &str = "_transformed";
pub const SKIP_LIST_FILE: &str = "skip_list.txt";

/// Year and month encoded at the end of a folder name, as in
/// `json_raw_2025_07` or `fondos-2025-7`.
pub fn folder_year_month(folder: &Path) -> Option<(i32, u32)> {
    let name = folder.file_name()?.to_str()?;
    let mut parts = name.rsplit(['_', '-']);
    let month = parts.next()?;
    let year = parts.next()?;
    if !(1..=2).contains(&month.len()) || year.len() != 4 {
        return None;
    }
    let month: u32 = month.parse().ok()?;
    let year: i32 = year.parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

/// Whether a cutoff date belongs to the folder's month. Missing information
/// on either side counts as a match.
pub fn cutoff_matches(folder: Option<(i32, u32)>, cutoff: Option<NaiveDate>) -> bool {
    match (folder, cutoff) {
        (Some((year, month)), Some(date)) => date.year() == year && date.month() == month,
        _ => true,
    }
}

/// File name without `.json` and without the `_transformed` suffix.
pub fn base_name(file_name: &str) -> &str {
    let name = file_name.trim();
    let name = name.strip_suffix(".json").unwrap_or(name);
    name.strip_suffix(TRANSFORMED_SUFFIX).unwrap_or(name)
}

/// File name of `path` for reports and record context.
pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Bank token of a source file named `<Bank>_<Fund>_....json`.
pub fn bank_token(source_file: &str) -> Option<&str> {
    let name = Path::new(source_file).file_name()?.to_str()?;
    let (bank, _) = name.split_once('_')?;
    let bank = bank.trim();
    (!bank.is_empty()).then_some(bank)
}

pub fn transformed_name(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{stem}{TRANSFORMED_SUFFIX}.json")
}

/// JSON files directly inside `dir`, sorted. With `suffix`, only files whose
/// name ends in `<suffix>.json`.
pub fn list_json_files(dir: &Path, suffix: Option<&str>) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let wanted = match suffix {
            Some(suffix) => name.ends_with(&format!("{suffix}.json")),
            None => name.ends_with(".json"),
        };
        if wanted && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderValidation {
    pub expected: Option<(i32, u32)>,
    pub checked: usize,
    pub matches: usize,
    pub mismatched: Vec<String>,
}

fn output_cutoff(path: &Path) -> Result<Option<NaiveDate>> {
    let text = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    Ok(value["fic"]["fecha_corte"].as_str().and_then(parse_to_date))
}

/// Checks `outputs` against the year and month of `input_folder`.
/// Unreadable outputs count as mismatches.
pub fn validate_files(input_folder: &Path, outputs: &[PathBuf]) -> FolderValidation {
    let expected = folder_year_month(input_folder);
    if expected.is_none() {
        warn!(folder = %input_folder.display(), "Folder name carries no year and month");
    }

    let mut validation = FolderValidation {
        expected,
        ..FolderValidation::default()
    };
    for path in outputs {
        validation.checked += 1;
        let name = file_label(path);
        match output_cutoff(path) {
            Ok(cutoff) => {
                if cutoff.is_none() {
                    warn!(file = %name, "No parseable cutoff date");
                }
                if cutoff_matches(expected, cutoff) {
                    validation.matches += 1;
                } else {
                    warn!(file = %name, ?expected, ?cutoff, "Cutoff date does not match folder");
                    validation.mismatched.push(name);
                }
            }
            Err(e) => {
                warn!(file = %name, error = %e, "Failed to read output");
                validation.mismatched.push(name);
            }
        }
    }
    validation
}

/// Checks every transformed output in `output_folder`.
pub fn validate_outputs(input_folder: &Path, output_folder: &Path) -> Result<FolderValidation> {
    let outputs = list_json_files(output_folder, Some(TRANSFORMED_SUFFIX))?;
    Ok(validate_files(input_folder, &outputs))
}

/// Base names excluded from loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipList {
    names: HashSet<String>,
}

impl SkipList {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|n| base_name(n.as_ref()).to_string())
            .filter(|n| !n.is_empty())
            .collect();
        Self { names }
    }

    /// Reads one name per line, ignoring blank lines and `#` comments. A
    /// missing file yields an empty list.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Skip list not found");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read skip list: {}", path.display()))?;
        let list = Self::from_names(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#')),
        );
        debug!("Read {} names from skip list {}", list.len(), path.display());
        Ok(list)
    }

    pub fn extend(&mut self, other: SkipList) {
        self.names.extend(other.names);
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.names.contains(base_name(file_name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

pub fn write_skip_list(path: &Path, names: &[String]) -> Result<()> {
    let mut text = String::from(
        "# Files whose cutoff date does not match the folder\n# Generated by fundsheet normalize\n\n",
    );
    for name in names {
        text.push_str(name);
        text.push('\n');
    }
    fs::write(path, text)
        .with_context(|| format!("Failed to write skip list: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_folder_year_month() {
        assert_eq!(
            folder_year_month(Path::new("/data/json_raw_2025_07")),
            Some((2025, 7))
        );
        assert_eq!(folder_year_month(Path::new("fondos-2025-9")), Some((2025, 9)));
        assert_eq!(folder_year_month(Path::new("json_raw")), None);
        assert_eq!(folder_year_month(Path::new("json_2025_13")), None);
    }

    #[test]
    fn test_cutoff_matches() {
        let july = NaiveDate::from_ymd_opt(2025, 7, 31);
        assert!(cutoff_matches(Some((2025, 7)), july));
        assert!(!cutoff_matches(Some((2025, 6)), july));
        assert!(cutoff_matches(None, july));
        assert!(cutoff_matches(Some((2025, 6)), None));
    }

    #[test]
    fn test_skip_list_matches_with_or_without_suffix() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join(SKIP_LIST_FILE);
        fs::write(
            &path,
            "# comment\n\nBank_FondoA_raw\nBank_FondoB_raw_transformed.json\n  Bank_FondoC.json  \n",
        )?;
        let list = SkipList::read(&path)?;
        assert_eq!(list.len(), 3);
        assert!(list.contains("Bank_FondoA_raw_transformed.json"));
        assert!(list.contains("Bank_FondoB_raw.json"));
        assert!(list.contains("Bank_FondoC_transformed.json"));
        assert!(!list.contains("Bank_FondoD_raw_transformed.json"));

        assert!(SkipList::read(&temp_dir.path().join("missing.txt"))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_validate_outputs_writes_mismatches() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let input = temp_dir.path().join("json_raw_2025_07");
        let output = temp_dir.path().join("out");
        fs::create_dir_all(&input)?;
        fs::create_dir_all(&output)?;
        fs::write(
            output.join("A_raw_transformed.json"),
            r#"{"fic": {"fecha_corte": "2025-07-31"}}"#,
        )?;
        fs::write(
            output.join("B_raw_transformed.json"),
            r#"{"fic": {"fecha_corte": "2025-06-30"}}"#,
        )?;
        fs::write(output.join("C_raw_transformed.json"), r#"{"fic": {}}"#)?;
        fs::write(output.join("D_raw_transformed.json"), "not json")?;
        fs::write(output.join("notes.txt"), "ignored")?;

        let validation = validate_outputs(&input, &output)?;
        assert_eq!(validation.expected, Some((2025, 7)));
        assert_eq!(validation.checked, 4);
        assert_eq!(validation.matches, 2);
        assert_eq!(
            validation.mismatched,
            vec!["B_raw_transformed.json", "D_raw_transformed.json"]
        );

        let skip_path = output.join(SKIP_LIST_FILE);
        write_skip_list(&skip_path, &validation.mismatched)?;
        let list = SkipList::read(&skip_path)?;
        assert!(list.contains("B_raw_transformed.json"));
        assert!(!list.contains("A_raw_transformed.json"));
        Ok(())
    }

    #[test]
    fn test_validate_single_output_against_its_folder() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let input = temp_dir.path().join("fondos_2025_07");
        fs::create_dir_all(&input)?;
        let output = temp_dir.path().join("A_raw_transformed.json");
        fs::write(&output, r#"{"fic": {"fecha_corte": "2025-06-30"}}"#)?;

        let validation = validate_files(&input, &[output]);
        assert_eq!(validation.checked, 1);
        assert_eq!(validation.mismatched, vec!["A_raw_transformed.json"]);
        Ok(())
    }

    #[test]
    fn test_names() {
        assert_eq!(base_name("X_raw_transformed.json"), "X_raw");
        assert_eq!(base_name("X_raw.json"), "X_raw");
        assert_eq!(transformed_name(Path::new("/in/X_raw.json")), "X_raw_transformed.json");
        assert_eq!(file_label(Path::new("/in/X_raw.json")), "X_raw.json");
    }

    #[test]
    fn test_bank_token() {
        assert_eq!(bank_token("Bancolombia_Fondo_raw.json"), Some("Bancolombia"));
        assert_eq!(bank_token("/data/json_2025_07/Davivienda_F.json"), Some("Davivienda"));
        assert_eq!(bank_token("nofund.json"), None);
    }
}
