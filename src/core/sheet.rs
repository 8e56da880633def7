//! Typed fact-sheet payloads.
//!
//! `RawFactSheet` mirrors what the extractor emits: every section optional and
//! every numeric member a [`RawValue`]. `FactSheet` is the normalized shape
//! written back out and persisted.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};

use crate::core::dates::DateField;

/// A numeric field as extracted: a JSON number or a numeric-looking string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFund {
    #[serde(default)]
    pub nombre_fic: Option<String>,
    #[serde(default)]
    pub gestor: Option<String>,
    #[serde(default)]
    pub custodio: Option<String>,
    #[serde(default)]
    pub fecha_corte: Option<String>,
    #[serde(default)]
    pub politica_de_inversion: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// One `(label, participacion)` entry of any value group. The label key
/// differs per group, so all known keys deserialize into `label`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawShare {
    #[serde(
        default,
        alias = "activo",
        alias = "tipo",
        alias = "sector",
        alias = "pais",
        alias = "moneda",
        alias = "calificacion",
        alias = "plazo",
        alias = "emisor"
    )]
    pub label: Option<String>,
    #[serde(default, alias = "porcentaje_participacion")]
    pub participacion: Option<RawValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawComposition {
    #[serde(default)]
    pub por_activo: Option<Vec<RawShare>>,
    #[serde(default)]
    pub por_tipo_de_renta: Option<Vec<RawShare>>,
    #[serde(default)]
    pub por_sector_economico: Option<Vec<RawShare>>,
    #[serde(default)]
    pub por_pais_emisor: Option<Vec<RawShare>>,
    #[serde(default)]
    pub por_moneda: Option<Vec<RawShare>>,
    #[serde(default)]
    pub por_calificacion: Option<Vec<RawShare>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCharacteristics {
    #[serde(default)]
    pub tipo: Option<String>,
    #[serde(default)]
    pub valor: Option<RawValue>,
    #[serde(default)]
    pub fecha_inicio_operaciones: Option<String>,
    #[serde(default)]
    pub no_unidades_en_circulacion: Option<RawValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRating {
    #[serde(default)]
    pub calificacion: Option<String>,
    #[serde(default)]
    pub fecha_ultima_calificacion: Option<String>,
    #[serde(default)]
    pub entidad_calificadora: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHorizons {
    #[serde(default)]
    pub ultimo_mes: Option<RawValue>,
    #[serde(default)]
    pub ultimos_6_meses: Option<RawValue>,
    #[serde(default)]
    pub anio_corrido: Option<RawValue>,
    #[serde(default)]
    pub ultimo_anio: Option<RawValue>,
    #[serde(default)]
    pub ultimos_2_anios: Option<RawValue>,
    #[serde(default)]
    pub ultimos_3_anios: Option<RawValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPerformance {
    #[serde(default)]
    pub tipo_de_participacion: Option<String>,
    #[serde(default, alias = "rentabilidad_histórica_ea")]
    pub rentabilidad_historica_ea: Option<RawHorizons>,
    #[serde(default)]
    pub volatilidad_historica: Option<RawHorizons>,
}

/// A fact sheet exactly as extracted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFactSheet {
    #[serde(default)]
    pub fic: Option<RawFund>,
    #[serde(default, alias = "plazoDuracion")]
    pub plazo_duracion: Option<Vec<RawShare>>,
    #[serde(default)]
    pub composicion_portafolio: Option<RawComposition>,
    #[serde(default)]
    pub caracteristicas: Option<RawCharacteristics>,
    #[serde(default)]
    pub calificacion: Option<RawRating>,
    #[serde(default)]
    pub principales_inversiones: Option<Vec<RawShare>>,
    #[serde(default)]
    pub rentabilidad_volatilidad: Option<Vec<RawPerformance>>,
}

/// Which value group a list of shares belongs to. Determines the label key
/// used on output and the row tag used in persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    Duration,
    Asset,
    IncomeType,
    Sector,
    IssuerCountry,
    Currency,
    CreditRating,
    Holdings,
}

impl GroupKind {
    pub const COMPOSITION: [GroupKind; 6] = [
        GroupKind::Asset,
        GroupKind::IncomeType,
        GroupKind::Sector,
        GroupKind::IssuerCountry,
        GroupKind::Currency,
        GroupKind::CreditRating,
    ];

    pub fn label_key(&self) -> &'static str {
        match self {
            GroupKind::Duration => "plazo",
            GroupKind::Asset => "activo",
            GroupKind::IncomeType => "tipo",
            GroupKind::Sector => "sector",
            GroupKind::IssuerCountry => "pais",
            GroupKind::Currency => "moneda",
            GroupKind::CreditRating => "calificacion",
            GroupKind::Holdings => "emisor",
        }
    }

    /// Section key inside `composicion_portafolio`, or the top-level key.
    pub fn section_key(&self) -> &'static str {
        match self {
            GroupKind::Duration => "plazo_duracion",
            GroupKind::Asset => "por_activo",
            GroupKind::IncomeType => "por_tipo_de_renta",
            GroupKind::Sector => "por_sector_economico",
            GroupKind::IssuerCountry => "por_pais_emisor",
            GroupKind::Currency => "por_moneda",
            GroupKind::CreditRating => "por_calificacion",
            GroupKind::Holdings => "principales_inversiones",
        }
    }

    /// Whether the group is expected to add up to 1. Top holdings list only
    /// the largest positions, so their sum is open.
    pub fn is_closed(&self) -> bool {
        !matches!(self, GroupKind::Holdings)
    }

    /// Composition tag stored with persisted composition rows.
    pub fn composition_tag(&self) -> Option<&'static str> {
        match self {
            GroupKind::Asset => Some("activo"),
            GroupKind::IncomeType => Some("tipo_renta"),
            GroupKind::Sector => Some("sector_economico"),
            GroupKind::IssuerCountry => Some("pais_emisor"),
            GroupKind::Currency => Some("moneda"),
            GroupKind::CreditRating => Some("calificacion"),
            GroupKind::Duration | GroupKind::Holdings => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Share {
    pub label: String,
    pub participacion: Option<f64>,
}

/// A normalized value group. Serializes as a list of
/// `{"<label_key>": label, "participacion": value}` objects.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueGroup {
    pub kind: GroupKind,
    pub shares: Vec<Share>,
}

impl ValueGroup {
    pub fn empty(kind: GroupKind) -> Self {
        Self {
            kind,
            shares: Vec::new(),
        }
    }

    pub fn sum(&self) -> f64 {
        self.shares.iter().filter_map(|s| s.participacion).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

struct ShareEntry<'a> {
    key: &'static str,
    share: &'a Share,
}

impl Serialize for ShareEntry<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(self.key, &self.share.label)?;
        map.serialize_entry("participacion", &self.share.participacion)?;
        map.end()
    }
}

/// One entry of a normalized value group as written to disk.
#[derive(Debug, Clone, Deserialize)]
struct ShareRecord {
    #[serde(
        default,
        alias = "activo",
        alias = "tipo",
        alias = "sector",
        alias = "pais",
        alias = "moneda",
        alias = "calificacion",
        alias = "plazo",
        alias = "emisor"
    )]
    label: String,
    #[serde(default)]
    participacion: Option<f64>,
}

impl ValueGroup {
    fn from_records(kind: GroupKind, records: Option<Vec<ShareRecord>>) -> Self {
        let shares = records
            .unwrap_or_default()
            .into_iter()
            .map(|r| Share {
                label: r.label,
                participacion: r.participacion,
            })
            .collect();
        Self { kind, shares }
    }
}

impl Serialize for ValueGroup {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let key = self.kind.label_key();
        let mut seq = serializer.serialize_seq(Some(self.shares.len()))?;
        for share in &self.shares {
            seq.serialize_element(&ShareEntry { key, share })?;
        }
        seq.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundRoot {
    pub nombre_fic: String,
    pub gestor: Option<String>,
    pub custodio: Option<String>,
    pub fecha_corte: Option<DateField>,
    pub politica_de_inversion: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub tipo: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CompositionRecord")]
pub struct Composition {
    pub por_activo: ValueGroup,
    pub por_tipo_de_renta: ValueGroup,
    pub por_sector_economico: ValueGroup,
    pub por_pais_emisor: ValueGroup,
    pub por_moneda: ValueGroup,
    pub por_calificacion: ValueGroup,
}

#[derive(Deserialize)]
struct CompositionRecord {
    #[serde(default)]
    por_activo: Option<Vec<ShareRecord>>,
    #[serde(default)]
    por_tipo_de_renta: Option<Vec<ShareRecord>>,
    #[serde(default)]
    por_sector_economico: Option<Vec<ShareRecord>>,
    #[serde(default)]
    por_pais_emisor: Option<Vec<ShareRecord>>,
    #[serde(default)]
    por_moneda: Option<Vec<ShareRecord>>,
    #[serde(default)]
    por_calificacion: Option<Vec<ShareRecord>>,
}

impl From<CompositionRecord> for Composition {
    fn from(record: CompositionRecord) -> Self {
        Composition {
            por_activo: ValueGroup::from_records(GroupKind::Asset, record.por_activo),
            por_tipo_de_renta: ValueGroup::from_records(
                GroupKind::IncomeType,
                record.por_tipo_de_renta,
            ),
            por_sector_economico: ValueGroup::from_records(
                GroupKind::Sector,
                record.por_sector_economico,
            ),
            por_pais_emisor: ValueGroup::from_records(
                GroupKind::IssuerCountry,
                record.por_pais_emisor,
            ),
            por_moneda: ValueGroup::from_records(GroupKind::Currency, record.por_moneda),
            por_calificacion: ValueGroup::from_records(
                GroupKind::CreditRating,
                record.por_calificacion,
            ),
        }
    }
}

impl Composition {
    pub fn groups(&self) -> [&ValueGroup; 6] {
        [
            &self.por_activo,
            &self.por_tipo_de_renta,
            &self.por_sector_economico,
            &self.por_pais_emisor,
            &self.por_moneda,
            &self.por_calificacion,
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Characteristics {
    pub tipo: Option<String>,
    pub valor: Option<f64>,
    pub fecha_inicio_operaciones: Option<DateField>,
    pub no_unidades_en_circulacion: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rating {
    pub calificacion: Option<String>,
    pub fecha_ultima_calificacion: Option<DateField>,
    pub entidad_calificadora: Option<String>,
    pub entidad_calificadora_normalizada: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Horizons {
    pub ultimo_mes: Option<f64>,
    pub ultimos_6_meses: Option<f64>,
    pub anio_corrido: Option<f64>,
    pub ultimo_anio: Option<f64>,
    pub ultimos_2_anios: Option<f64>,
    pub ultimos_3_anios: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    #[serde(default)]
    pub tipo_de_participacion: String,
    #[serde(default)]
    pub rentabilidad_historica_ea: Horizons,
    #[serde(default)]
    pub volatilidad_historica: Horizons,
}

/// A normalized fact sheet. The root and composition blocks stay optional
/// until the validation gate has seen the sheet.
///
/// Deserializing reads a sheet that is already normalized, such as a
/// `_transformed.json` file: values are taken as they are, never rescaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FactSheetRecord")]
pub struct FactSheet {
    pub fic: Option<FundRoot>,
    pub plazo_duracion: Option<ValueGroup>,
    pub composicion_portafolio: Option<Composition>,
    pub caracteristicas: Characteristics,
    pub calificacion: Rating,
    pub principales_inversiones: Option<ValueGroup>,
    pub rentabilidad_volatilidad: Option<Vec<Performance>>,
}

#[derive(Deserialize)]
struct FactSheetRecord {
    #[serde(default)]
    fic: Option<FundRoot>,
    #[serde(default)]
    plazo_duracion: Option<Vec<ShareRecord>>,
    #[serde(default)]
    composicion_portafolio: Option<Composition>,
    #[serde(default)]
    caracteristicas: Characteristics,
    #[serde(default)]
    calificacion: Rating,
    #[serde(default)]
    principales_inversiones: Option<Vec<ShareRecord>>,
    #[serde(default)]
    rentabilidad_volatilidad: Option<Vec<Performance>>,
}

impl From<FactSheetRecord> for FactSheet {
    fn from(record: FactSheetRecord) -> Self {
        FactSheet {
            fic: record.fic,
            plazo_duracion: record
                .plazo_duracion
                .map(|r| ValueGroup::from_records(GroupKind::Duration, Some(r))),
            composicion_portafolio: record.composicion_portafolio,
            caracteristicas: record.caracteristicas,
            calificacion: record.calificacion,
            principales_inversiones: record
                .principales_inversiones
                .map(|r| ValueGroup::from_records(GroupKind::Holdings, Some(r))),
            rentabilidad_volatilidad: record.rentabilidad_volatilidad,
        }
    }
}
