//! Persistable form of a validated fact sheet: the fund root keyed by its
//! identity, plus flattened dependent rows.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::warn;

use crate::core::error::RecordError;
use crate::core::folder::bank_token;
use crate::core::sheet::{FactSheet, FundRoot, Horizons, ValueGroup};
use crate::core::validation;

/// Natural key of a fund across extractions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FundIdentity {
    pub source_url: String,
    pub fund_name: String,
}

impl FundIdentity {
    pub fn new(source_url: &str, fund_name: &str) -> Self {
        Self {
            source_url: source_url.trim().to_string(),
            fund_name: fund_name.trim().to_string(),
        }
    }

    /// Lookup key; fund names compare case-insensitively.
    pub fn key(&self) -> String {
        format!("{}\u{1f}{}", self.source_url, self.fund_name.to_uppercase())
    }
}

impl Display for FundIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.source_url.is_empty() {
            write!(f, "{}", self.fund_name)
        } else {
            write!(f, "{} ({})", self.fund_name, self.source_url)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependentRow {
    Composition {
        tipo_composicion: String,
        categoria: String,
        participacion: Option<f64>,
    },
    Duration {
        plazo: String,
        participacion: Option<f64>,
    },
    Characteristics {
        tipo: Option<String>,
        valor: Option<f64>,
        fecha_inicio_operaciones: Option<String>,
        no_unidades_en_circulacion: Option<f64>,
    },
    Rating {
        calificacion: Option<String>,
        fecha_ultima_calificacion: Option<String>,
        entidad_calificadora: Option<String>,
        entidad_calificadora_normalizada: bool,
    },
    Holding {
        emisor: String,
        participacion: Option<f64>,
    },
    Return {
        tipo_participacion: String,
        horizons: Horizons,
    },
    Volatility {
        tipo_participacion: String,
        horizons: Horizons,
    },
    Snapshot {
        filename: String,
        json_data: serde_json::Value,
    },
}

impl DependentRow {
    pub fn kind(&self) -> &'static str {
        match self {
            DependentRow::Composition { .. } => "composition",
            DependentRow::Duration { .. } => "duration",
            DependentRow::Characteristics { .. } => "characteristics",
            DependentRow::Rating { .. } => "rating",
            DependentRow::Holding { .. } => "holding",
            DependentRow::Return { .. } => "return",
            DependentRow::Volatility { .. } => "volatility",
            DependentRow::Snapshot { .. } => "snapshot",
        }
    }
}

fn shares<'a>(
    group: Option<&'a ValueGroup>,
) -> impl Iterator<Item = (&'a str, Option<f64>)> + 'a {
    group
        .into_iter()
        .flat_map(|g| g.shares.iter())
        .map(|s| (s.label.as_str(), s.participacion))
}

/// Flattens a validated sheet into dependent rows, ending with a snapshot of
/// the whole normalized document.
pub fn rows_from_sheet(sheet: &FactSheet, source_file: &str) -> serde_json::Result<Vec<DependentRow>> {
    let mut rows = Vec::new();

    if let Some(composition) = &sheet.composicion_portafolio {
        for group in composition.groups() {
            let Some(tag) = group.kind.composition_tag() else {
                continue;
            };
            rows.extend(group.shares.iter().map(|s| DependentRow::Composition {
                tipo_composicion: tag.to_string(),
                categoria: s.label.clone(),
                participacion: s.participacion,
            }));
        }
    }

    rows.extend(
        shares(sheet.plazo_duracion.as_ref()).map(|(plazo, participacion)| DependentRow::Duration {
            plazo: plazo.to_string(),
            participacion,
        }),
    );

    let c = &sheet.caracteristicas;
    rows.push(DependentRow::Characteristics {
        tipo: c.tipo.clone(),
        valor: c.valor,
        fecha_inicio_operaciones: c.fecha_inicio_operaciones.as_ref().map(|d| d.text()),
        no_unidades_en_circulacion: c.no_unidades_en_circulacion,
    });

    let r = &sheet.calificacion;
    rows.push(DependentRow::Rating {
        calificacion: r.calificacion.clone(),
        fecha_ultima_calificacion: r.fecha_ultima_calificacion.as_ref().map(|d| d.text()),
        entidad_calificadora: r.entidad_calificadora.clone(),
        entidad_calificadora_normalizada: r.entidad_calificadora_normalizada,
    });

    rows.extend(
        shares(sheet.principales_inversiones.as_ref()).map(|(emisor, participacion)| {
            DependentRow::Holding {
                emisor: emisor.to_string(),
                participacion,
            }
        }),
    );

    for perf in sheet.rentabilidad_volatilidad.iter().flatten() {
        rows.push(DependentRow::Return {
            tipo_participacion: perf.tipo_de_participacion.clone(),
            horizons: perf.rentabilidad_historica_ea.clone(),
        });
        rows.push(DependentRow::Volatility {
            tipo_participacion: perf.tipo_de_participacion.clone(),
            horizons: perf.volatilidad_historica.clone(),
        });
    }

    rows.push(DependentRow::Snapshot {
        filename: source_file.to_string(),
        json_data: serde_json::to_value(sheet)?,
    });
    Ok(rows)
}

/// A validated sheet ready for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct FundRecord {
    pub identity: FundIdentity,
    pub root: FundRoot,
    pub rows: Vec<DependentRow>,
    pub source_file: String,
}

/// Source half of the identity: the fund URL, else the bank named in the
/// file name. Without either, funds of different banks would share a key.
fn identity_source(root: &FundRoot, source_file: &str) -> Result<String, RecordError> {
    if let Some(url) = root.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        return Ok(url.to_string());
    }
    match bank_token(source_file) {
        Some(bank) => {
            let key = format!("bank:{}", bank.to_uppercase());
            warn!(source = source_file, fund = %root.nombre_fic, key = %key, "No fund URL, keying by bank");
            Ok(key)
        }
        None => Err(RecordError::Identity {
            path: source_file.to_string(),
        }),
    }
}

impl FundRecord {
    pub fn from_sheet(sheet: FactSheet, source_file: &str) -> Result<Self, RecordError> {
        let sheet = validation::validate(sheet).map_err(|source| RecordError::Validation {
            path: source_file.to_string(),
            source,
        })?;
        let rows = rows_from_sheet(&sheet, source_file).map_err(|e| RecordError::Parse {
            path: source_file.to_string(),
            message: e.to_string(),
        })?;
        let Some(root) = sheet.fic else {
            return Err(RecordError::Validation {
                path: source_file.to_string(),
                source: validation::ValidationError::MissingFundBlock,
            });
        };
        let source_url = identity_source(&root, source_file)?;
        Ok(Self {
            identity: FundIdentity::new(&source_url, &root.nombre_fic),
            root,
            rows,
            source_file: source_file.to_string(),
        })
    }

    pub fn cutoff(&self) -> Option<NaiveDate> {
        self.root.fecha_corte.as_ref().and_then(|d| d.iso)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dates::DateField;
    use crate::core::sheet::{
        Characteristics, Composition, GroupKind, Performance, Rating, Share,
    };

    fn group(kind: GroupKind, shares: &[(&str, f64)]) -> ValueGroup {
        ValueGroup {
            kind,
            shares: shares
                .iter()
                .map(|(label, v)| Share {
                    label: label.to_string(),
                    participacion: Some(*v),
                })
                .collect(),
        }
    }

    fn sheet() -> FactSheet {
        FactSheet {
            fic: Some(FundRoot {
                nombre_fic: "Fondo A".to_string(),
                gestor: Some("Gestor".to_string()),
                custodio: None,
                fecha_corte: Some(DateField::parse("2025-07-31")),
                politica_de_inversion: None,
                url: Some("https://u1".to_string()),
                tipo: "Otro".to_string(),
            }),
            plazo_duracion: None,
            composicion_portafolio: Some(Composition {
                por_activo: group(GroupKind::Asset, &[("CDT", 0.6), ("TES", 0.4)]),
                por_tipo_de_renta: group(GroupKind::IncomeType, &[("Renta Fija", 1.0)]),
                por_sector_economico: ValueGroup::empty(GroupKind::Sector),
                por_pais_emisor: ValueGroup::empty(GroupKind::IssuerCountry),
                por_moneda: group(GroupKind::Currency, &[("COP", 1.0)]),
                por_calificacion: ValueGroup::empty(GroupKind::CreditRating),
            }),
            caracteristicas: Characteristics::default(),
            calificacion: Rating::default(),
            principales_inversiones: Some(group(GroupKind::Holdings, &[("Banco X", 0.1)])),
            rentabilidad_volatilidad: Some(vec![Performance {
                tipo_de_participacion: "A".to_string(),
                rentabilidad_historica_ea: Horizons::default(),
                volatilidad_historica: Horizons::default(),
            }]),
        }
    }

    #[test]
    fn test_rows_are_tagged_per_composition_group() {
        let rows = rows_from_sheet(&sheet(), "f.json").unwrap();
        let tags: Vec<&str> = rows
            .iter()
            .filter_map(|r| match r {
                DependentRow::Composition {
                    tipo_composicion, ..
                } => Some(tipo_composicion.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tags, vec!["activo", "activo", "tipo_renta", "moneda"]);

        let kinds: Vec<&str> = rows.iter().map(DependentRow::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "composition",
                "composition",
                "composition",
                "composition",
                "characteristics",
                "rating",
                "holding",
                "return",
                "volatility",
                "snapshot"
            ]
        );
    }

    #[test]
    fn test_snapshot_holds_normalized_document() {
        let rows = rows_from_sheet(&sheet(), "Bank_FondoA_raw.json").unwrap();
        let Some(DependentRow::Snapshot {
            filename,
            json_data,
        }) = rows.last()
        else {
            panic!("Expected a snapshot row last");
        };
        assert_eq!(filename, "Bank_FondoA_raw.json");
        assert_eq!(json_data["fic"]["fecha_corte"], "2025-07-31");
        assert_eq!(json_data["composicion_portafolio"]["por_moneda"][0]["moneda"], "COP");
    }

    #[test]
    fn test_record_from_sheet() {
        let record = FundRecord::from_sheet(sheet(), "f.json").unwrap();
        assert_eq!(record.identity, FundIdentity::new("https://u1", "Fondo A"));
        assert_eq!(record.cutoff(), NaiveDate::from_ymd_opt(2025, 7, 31));

        let mut invalid = sheet();
        invalid.composicion_portafolio = None;
        let err = FundRecord::from_sheet(invalid, "f.json").unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_missing_url_is_keyed_by_bank() {
        let without_url = || {
            let mut sheet = sheet();
            if let Some(fic) = sheet.fic.as_mut() {
                fic.url = None;
            }
            sheet
        };
        let a = FundRecord::from_sheet(without_url(), "Bancolombia_RF_raw_transformed.json")
            .unwrap();
        let b = FundRecord::from_sheet(without_url(), "Davivienda_RF_raw_transformed.json")
            .unwrap();
        assert_eq!(a.identity.source_url, "bank:BANCOLOMBIA");
        assert_ne!(a.identity.key(), b.identity.key());

        let err = FundRecord::from_sheet(without_url(), "fondo.json").unwrap_err();
        assert_eq!(err.kind(), "identity");
    }

    #[test]
    fn test_identity_key_ignores_name_case() {
        assert_eq!(
            FundIdentity::new("u1", "Fondo A").key(),
            FundIdentity::new(" u1 ", "FONDO A ").key()
        );
        assert_ne!(
            FundIdentity::new("u1", "Fondo A").key(),
            FundIdentity::new("u2", "Fondo A").key()
        );
    }

    #[test]
    fn test_rows_survive_storage_encoding() {
        let rows = rows_from_sheet(&sheet(), "f.json").unwrap();
        let bytes = serde_json::to_vec(&rows).unwrap();
        let back: Vec<DependentRow> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(rows, back);
    }
}
