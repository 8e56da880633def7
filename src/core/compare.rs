//! Reliability check of normalized outputs against hand-verified copies.
//!
//! A folder holds `<Bank>_<Fund>_raw_transformed.json` files produced by the
//! pipeline next to `<Bank>_<Fund>_raw_transformed_PRUEBA.json` references.
//! Each pair is compared section by section; list sections are matched by
//! their label key when both sides carry it.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::folder::list_json_files;
use crate::core::sheet::GroupKind;

const MISSING: &str = "MISSING";
const FLOAT_TOLERANCE: f64 = 1e-10;
const PAIR_SUFFIX: &str = "_raw_transformed";
const REFERENCE_SUFFIX: &str = "_PRUEBA";

const SECTIONS: [&str; 7] = [
    "fic",
    "plazo_duracion",
    "composicion_portafolio",
    "caracteristicas",
    "calificacion",
    "principales_inversiones",
    "rentabilidad_volatilidad",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Difference {
    pub path: String,
    pub etl: String,
    pub reference: String,
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn push(out: &mut Vec<Difference>, path: &str, etl: String, reference: String) {
    out.push(Difference {
        path: path.to_string(),
        etl,
        reference,
    });
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Number of keys in the tree, nested ones included.
pub fn count_fields(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.values().map(|v| 1 + count_fields(v)).sum(),
        Value::Array(items) => items.iter().map(count_fields).sum(),
        _ => 0,
    }
}

pub fn compare_values(etl: &Value, reference: &Value, path: &str, out: &mut Vec<Difference>) {
    match (etl, reference) {
        (Value::Object(a), Value::Object(b)) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                let child = join(path, key);
                match (a.get(key), b.get(key)) {
                    (Some(x), Some(y)) => compare_values(x, y, &child, out),
                    (Some(x), None) => push(out, &child, display(x), MISSING.to_string()),
                    (None, Some(y)) => push(out, &child, MISSING.to_string(), display(y)),
                    (None, None) => {}
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            if a.len() != b.len() {
                push(
                    out,
                    path,
                    format!("list of {}", a.len()),
                    format!("list of {}", b.len()),
                );
            } else {
                for (i, (x, y)) in a.iter().zip(b).enumerate() {
                    compare_values(x, y, &format!("{path}[{i}]"), out);
                }
            }
        }
        (Value::Number(a), Value::Number(b)) => {
            let equal = match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => (x - y).abs() <= FLOAT_TOLERANCE,
                _ => a == b,
            };
            if !equal {
                push(out, path, a.to_string(), b.to_string());
            }
        }
        (a, b) if kind_name(a) != kind_name(b) => push(
            out,
            path,
            format!("{}: {}", kind_name(a), display(a)),
            format!("{}: {}", kind_name(b), display(b)),
        ),
        (a, b) => {
            if a != b {
                push(out, path, display(a), display(b));
            }
        }
    }
}

/// Compares two lists, pairing items by `key` when the first item of each
/// side has it, positionally otherwise.
fn compare_lists(etl: &[Value], reference: &[Value], path: &str, key: &str, out: &mut Vec<Difference>) {
    if etl.len() != reference.len() {
        push(
            out,
            path,
            format!("list of {}", etl.len()),
            format!("list of {}", reference.len()),
        );
    }

    let keyed = |items: &[Value]| items.first().is_some_and(|v| v.get(key).is_some());
    if !(keyed(etl) && keyed(reference)) {
        for (i, (x, y)) in etl.iter().zip(reference).enumerate() {
            compare_values(x, y, &format!("{path}[{i}]"), out);
        }
        return;
    }

    let by_key = |items: &[Value]| -> BTreeMap<String, Value> {
        items
            .iter()
            .map(|item| (item.get(key).map(display).unwrap_or_default(), item.clone()))
            .collect()
    };
    let (a, b) = (by_key(etl), by_key(reference));
    let labels: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    for label in labels {
        let child = format!("{path}[{label}]");
        match (a.get(label), b.get(label)) {
            (Some(x), Some(y)) => compare_values(x, y, &child, out),
            (Some(x), None) => push(out, &child, display(x), MISSING.to_string()),
            (None, Some(y)) => push(out, &child, MISSING.to_string(), display(y)),
            (None, None) => {}
        }
    }
}

fn list_key(section: &str) -> Option<&'static str> {
    match section {
        "plazo_duracion" => Some(GroupKind::Duration.label_key()),
        "principales_inversiones" => Some(GroupKind::Holdings.label_key()),
        "rentabilidad_volatilidad" => Some("tipo_de_participacion"),
        _ => GroupKind::COMPOSITION
            .iter()
            .find(|k| k.section_key() == section)
            .map(|k| k.label_key()),
    }
}

fn compare_section(etl: &Value, reference: &Value, path: &str, out: &mut Vec<Difference>) {
    match (etl, reference, list_key(path.rsplit('.').next().unwrap_or(path))) {
        (Value::Array(a), Value::Array(b), Some(key)) => compare_lists(a, b, path, key, out),
        _ => compare_values(etl, reference, path, out),
    }
}

/// Differences between a pipeline output and its reference, plus the number
/// of fields in the pipeline output.
pub fn compare_sheets(etl: &Value, reference: &Value) -> (Vec<Difference>, usize) {
    let mut out = Vec::new();
    for section in SECTIONS {
        match (etl.get(section), reference.get(section)) {
            (Some(Value::Object(a)), Some(Value::Object(b))) if section == "composicion_portafolio" => {
                for (sub, value) in a {
                    let path = format!("{section}.{sub}");
                    match b.get(sub) {
                        Some(other) => compare_section(value, other, &path, &mut out),
                        None => push(&mut out, &path, display(value), MISSING.to_string()),
                    }
                }
            }
            (Some(a), Some(b)) => compare_section(a, b, section, &mut out),
            (Some(a), None) => push(&mut out, section, display(a), MISSING.to_string()),
            (None, Some(b)) => push(&mut out, section, MISSING.to_string(), display(b)),
            (None, None) => {}
        }
    }
    (out, count_fields(etl))
}

/// Percentage of fields that agree, floored at zero.
pub fn reliability(total_fields: usize, differences: usize) -> f64 {
    if total_fields == 0 {
        return 0.0;
    }
    (1.0 - differences as f64 / total_fields as f64).max(0.0) * 100.0
}

/// `(bank, fund, is_reference)` for names following the pair convention.
pub fn pair_name(file_name: &str) -> Option<(String, String, bool)> {
    let stem = file_name.strip_suffix(".json")?;
    let (stem, is_reference) = match stem.strip_suffix(REFERENCE_SUFFIX) {
        Some(stem) => (stem, true),
        None => (stem, false),
    };
    let stem = stem.strip_suffix(PAIR_SUFFIX)?;
    let (bank, fund) = stem.split_once('_')?;
    if bank.is_empty() || fund.is_empty() {
        return None;
    }
    Some((bank.to_string(), fund.to_string(), is_reference))
}

#[derive(Debug, Clone)]
pub struct PairReport {
    pub bank: String,
    pub fund: String,
    pub etl_file: String,
    pub reference_file: String,
    pub total_fields: usize,
    pub differences: Vec<Difference>,
    pub reliability: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FolderComparison {
    pub pairs: Vec<PairReport>,
    /// Files missing their counterpart or failing to load.
    pub incomplete: Vec<String>,
}

impl FolderComparison {
    pub fn average_reliability(&self) -> Option<f64> {
        if self.pairs.is_empty() {
            return None;
        }
        Some(self.pairs.iter().map(|p| p.reliability).sum::<f64>() / self.pairs.len() as f64)
    }
}

fn load(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn compare_folder(folder: &Path) -> Result<FolderComparison> {
    let mut groups: BTreeMap<(String, String), (Option<PathBuf>, Option<PathBuf>)> = BTreeMap::new();
    for path in list_json_files(folder, None)? {
        let Some((bank, fund, is_reference)) = pair_name(&file_name(&path)) else {
            continue;
        };
        let entry = groups.entry((bank, fund)).or_default();
        if is_reference {
            entry.1 = Some(path);
        } else {
            entry.0 = Some(path);
        }
    }

    let mut comparison = FolderComparison::default();
    for ((bank, fund), files) in groups {
        let (Some(etl_path), Some(reference_path)) = files else {
            warn!(bank = %bank, fund = %fund, "File has no counterpart to compare with");
            comparison.incomplete.push(format!("{bank}_{fund}"));
            continue;
        };
        let (etl, reference) = match (load(&etl_path), load(&reference_path)) {
            (Ok(etl), Ok(reference)) => (etl, reference),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %format!("{e:#}"), "Skipping pair");
                comparison.incomplete.push(format!("{bank}_{fund}"));
                continue;
            }
        };
        let (differences, total_fields) = compare_sheets(&etl, &reference);
        let reliability = reliability(total_fields, differences.len());
        debug!(
            "Compared {bank}_{fund}: {} differences over {total_fields} fields",
            differences.len()
        );
        comparison.pairs.push(PairReport {
            bank,
            fund,
            etl_file: file_name(&etl_path),
            reference_file: file_name(&reference_path),
            total_fields,
            differences,
            reliability,
        });
    }
    Ok(comparison)
}
