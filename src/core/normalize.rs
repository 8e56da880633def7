//! Turns one extracted fact sheet into its normalized form.
//!
//! The pipeline runs value groups through scale inference, categorical
//! fields through the entity matchers and date fields through the date
//! parser. It holds only immutable state and can be shared across workers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::category::FundCategory;
use crate::core::config::AppConfig;
use crate::core::context::RecordContext;
use crate::core::dates::DateField;
use crate::core::entity::{EntityMatcher, Vocabulary};
use crate::core::error::RecordError;
use crate::core::folder::bank_token;
use crate::core::scale::{self, GroupReport};
use crate::core::sheet::{
    Characteristics, Composition, FactSheet, FundRoot, GroupKind, Horizons, Performance,
    RawCharacteristics, RawComposition, RawFactSheet, RawFund, RawHorizons, RawPerformance,
    RawRating, RawShare, RawValue, Rating, ValueGroup,
};

/// Result of normalizing one sheet.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub sheet: FactSheet,
    pub reports: Vec<GroupReport>,
}

impl Normalized {
    /// Groups whose normalized sum fell outside the tolerance.
    pub fn off_tolerance(&self) -> impl Iterator<Item = &GroupReport> {
        self.reports.iter().filter(|r| !r.within_tolerance)
    }
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    agencies: EntityMatcher,
    banks: EntityMatcher,
    bank_urls: Arc<HashMap<String, String>>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Normalizer {
    pub fn new(agencies: EntityMatcher, banks: EntityMatcher, bank_urls: HashMap<String, String>) -> Self {
        Self {
            agencies,
            banks,
            bank_urls: Arc::new(bank_urls),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let agencies = EntityMatcher::new(
            "rating_agency",
            Arc::new(Vocabulary::new(&config.rating_agencies)),
            config.similarity_cutoff,
        );
        let bank_urls: HashMap<String, String> = config
            .directory
            .iter()
            .map(|entry| (entry.bank.trim().to_uppercase(), entry.url.clone()))
            .collect();
        let banks = EntityMatcher::new(
            "bank",
            Arc::new(Vocabulary::new(bank_urls.keys())),
            config.similarity_cutoff,
        );
        Self::new(agencies, banks, bank_urls)
    }

    /// Directory URL for the bank named in `source_file`, if any.
    pub fn resolve_bank_url(&self, source_file: &str, ctx: &RecordContext) -> Option<String> {
        if self.banks.vocabulary().is_empty() {
            return None;
        }
        let token = bank_token(source_file)?;
        let entity = self.banks.resolve(token, ctx);
        if !entity.matched {
            return None;
        }
        self.bank_urls.get(&entity.canonical_text).cloned()
    }

    /// Parses and normalizes a JSON payload.
    pub fn normalize_json(&self, json: &str, source_file: &str) -> Result<Normalized, RecordError> {
        let raw: RawFactSheet = serde_json::from_str(json).map_err(|e| RecordError::Parse {
            path: source_file.to_string(),
            message: e.to_string(),
        })?;
        Ok(self.normalize(&raw, source_file))
    }

    pub fn normalize(&self, raw: &RawFactSheet, source_file: &str) -> Normalized {
        let fund = raw.fic.as_ref();
        let ctx = RecordContext::new(source_file).with_fund(
            fund.and_then(|f| f.nombre_fic.as_deref()),
            fund.and_then(|f| f.gestor.as_deref()),
        );
        debug!(source = source_file, fund = ?ctx.fund, "Normalizing fact sheet");

        let mut reports = Vec::new();
        let mut group = |kind: GroupKind, shares: Option<&Vec<RawShare>>| -> ValueGroup {
            match shares {
                Some(shares) => {
                    let (group, report) = scale::normalize_group(kind, shares, &ctx);
                    reports.push(report);
                    group
                }
                None => ValueGroup::empty(kind),
            }
        };

        let plazo_duracion = raw
            .plazo_duracion
            .as_ref()
            .map(|shares| group(GroupKind::Duration, Some(shares)));
        let composicion_portafolio = raw
            .composicion_portafolio
            .as_ref()
            .map(|composition| normalize_composition(composition, &mut group));
        let principales_inversiones = raw
            .principales_inversiones
            .as_ref()
            .map(|shares| group(GroupKind::Holdings, Some(shares)));

        let fic = fund.map(|f| {
            self.normalize_fund(
                f,
                composicion_portafolio.as_ref().map(|c| &c.por_tipo_de_renta),
                source_file,
                &ctx,
            )
        });

        let sheet = FactSheet {
            fic,
            plazo_duracion,
            composicion_portafolio,
            caracteristicas: raw
                .caracteristicas
                .as_ref()
                .map(|c| normalize_characteristics(c, &ctx))
                .unwrap_or_default(),
            calificacion: raw
                .calificacion
                .as_ref()
                .map(|r| self.normalize_rating(r, &ctx))
                .unwrap_or_default(),
            principales_inversiones,
            rentabilidad_volatilidad: raw.rentabilidad_volatilidad.as_ref().map(|items| {
                items
                    .iter()
                    .map(|p| normalize_performance(p, &ctx))
                    .collect()
            }),
        };

        Normalized { sheet, reports }
    }

    fn normalize_fund(
        &self,
        fund: &RawFund,
        income_types: Option<&ValueGroup>,
        source_file: &str,
        ctx: &RecordContext,
    ) -> FundRoot {
        let nombre_fic = non_empty(&fund.nombre_fic).unwrap_or_else(|| {
            warn!(source = %ctx.source, "Fund block without a fund name");
            String::new()
        });
        let politica_de_inversion = non_empty(&fund.politica_de_inversion);
        let tipo = FundCategory::infer(&nombre_fic, politica_de_inversion.as_deref(), income_types);
        let url = non_empty(&fund.url).or_else(|| self.resolve_bank_url(source_file, ctx));

        FundRoot {
            nombre_fic,
            gestor: non_empty(&fund.gestor),
            custodio: non_empty(&fund.custodio),
            fecha_corte: non_empty(&fund.fecha_corte).map(|d| DateField::parse(&d)),
            politica_de_inversion,
            url,
            tipo: tipo.to_string(),
        }
    }

    fn normalize_rating(&self, rating: &RawRating, ctx: &RecordContext) -> Rating {
        let agency = non_empty(&rating.entidad_calificadora).map(|a| self.agencies.resolve(&a, ctx));
        Rating {
            calificacion: non_empty(&rating.calificacion),
            fecha_ultima_calificacion: non_empty(&rating.fecha_ultima_calificacion)
                .map(|d| DateField::parse(&d)),
            entidad_calificadora_normalizada: agency.as_ref().is_some_and(|a| a.matched),
            entidad_calificadora: agency.map(|a| a.canonical_text),
        }
    }
}

fn normalize_composition(
    composition: &RawComposition,
    group: &mut impl FnMut(GroupKind, Option<&Vec<RawShare>>) -> ValueGroup,
) -> Composition {
    Composition {
        por_activo: group(GroupKind::Asset, composition.por_activo.as_ref()),
        por_tipo_de_renta: group(GroupKind::IncomeType, composition.por_tipo_de_renta.as_ref()),
        por_sector_economico: group(GroupKind::Sector, composition.por_sector_economico.as_ref()),
        por_pais_emisor: group(GroupKind::IssuerCountry, composition.por_pais_emisor.as_ref()),
        por_moneda: group(GroupKind::Currency, composition.por_moneda.as_ref()),
        por_calificacion: group(GroupKind::CreditRating, composition.por_calificacion.as_ref()),
    }
}

fn amount(raw: &RawValue, field: &str, ctx: &RecordContext) -> Option<f64> {
    match raw {
        RawValue::Number(n) if n.is_finite() => Some(*n),
        RawValue::Text(text) if text.trim().is_empty() => None,
        RawValue::Text(text) => {
            let parsed = scale::parse_amount(text);
            if parsed.is_none() {
                warn!(source = %ctx.source, fund = ?ctx.fund, field, value = %text, "Unparseable amount");
            }
            parsed
        }
        RawValue::Number(_) => scale::raw_to_f64(raw, field, ctx),
    }
}

fn normalize_characteristics(raw: &RawCharacteristics, ctx: &RecordContext) -> Characteristics {
    Characteristics {
        tipo: non_empty(&raw.tipo),
        valor: raw.valor.as_ref().and_then(|v| amount(v, "valor", ctx)),
        fecha_inicio_operaciones: non_empty(&raw.fecha_inicio_operaciones)
            .map(|d| DateField::parse(&d)),
        no_unidades_en_circulacion: raw
            .no_unidades_en_circulacion
            .as_ref()
            .and_then(|v| amount(v, "no_unidades_en_circulacion", ctx)),
    }
}

fn normalize_horizons(raw: Option<&RawHorizons>, ctx: &RecordContext) -> Horizons {
    let Some(raw) = raw else {
        return Horizons::default();
    };
    let rate = |value: &Option<RawValue>, field: &str| {
        value
            .as_ref()
            .and_then(|v| scale::normalize_rate(v, field, ctx))
    };
    Horizons {
        ultimo_mes: rate(&raw.ultimo_mes, "ultimo_mes"),
        ultimos_6_meses: rate(&raw.ultimos_6_meses, "ultimos_6_meses"),
        anio_corrido: rate(&raw.anio_corrido, "anio_corrido"),
        ultimo_anio: rate(&raw.ultimo_anio, "ultimo_anio"),
        ultimos_2_anios: rate(&raw.ultimos_2_anios, "ultimos_2_anios"),
        ultimos_3_anios: rate(&raw.ultimos_3_anios, "ultimos_3_anios"),
    }
}

fn normalize_performance(raw: &RawPerformance, ctx: &RecordContext) -> Performance {
    Performance {
        tipo_de_participacion: non_empty(&raw.tipo_de_participacion).unwrap_or_default(),
        rentabilidad_historica_ea: normalize_horizons(raw.rentabilidad_historica_ea.as_ref(), ctx),
        volatilidad_historica: normalize_horizons(raw.volatilidad_historica.as_ref(), ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BankEntry;
    use serde_json::json;

    fn normalizer() -> Normalizer {
        let config = AppConfig {
            directory: vec![BankEntry {
                bank: "Bancolombia".to_string(),
                url: "https://www.bancolombia.com/fondos".to_string(),
            }],
            ..AppConfig::default()
        };
        Normalizer::from_config(&config)
    }

    fn sample() -> serde_json::Value {
        json!({
            "fic": {
                "nombre_fic": "Fondo Renta Fija Plazo",
                "gestor": "Fiduciaria X",
                "custodio": "Custodio Y",
                "fecha_corte": "31/07/2025",
                "politica_de_inversion": "Invertir en titulos de deuda"
            },
            "plazoDuracion": [
                {"plazo": "1 a 180 dias", "participacion": "60,5%"},
                {"plazo": "180 a 365 dias", "participacion": 39.5}
            ],
            "composicion_portafolio": {
                "por_activo": [
                    {"activo": "CDT", "porcentaje_participacion": 0.7},
                    {"activo": "TES", "porcentaje_participacion": 0.3}
                ],
                "por_pais_emisor": [{"pais": "Colombia", "participacion": "100"}]
            },
            "caracteristicas": {
                "tipo": "Abierto",
                "valor": "$ 1.234.567,89",
                "fecha_inicio_operaciones": "jul-15",
                "no_unidades_en_circulacion": 15000
            },
            "calificacion": {
                "calificacion": "AAA",
                "fecha_ultima_calificacion": "15-ene-25",
                "entidad_calificadora": "FITCH RATINGS COLOMBIA"
            },
            "principales_inversiones": [{"emisor": "Banco X", "participacion": 12.5}],
            "rentabilidad_volatilidad": [{
                "tipo_de_participacion": "A",
                "rentabilidad_histórica_ea": {"ultimo_mes": "8,52%", "ultimo_anio": 0.091},
                "volatilidad_historica": {"ultimo_mes": 0.35}
            }]
        })
    }

    #[test]
    fn test_full_sheet_normalization() {
        let normalized = normalizer()
            .normalize_json(&sample().to_string(), "Bancolombia_FondoRF_raw.json")
            .unwrap();
        let sheet = &normalized.sheet;

        let fic = sheet.fic.as_ref().unwrap();
        assert_eq!(fic.tipo, "Renta Fija");
        assert_eq!(fic.url.as_deref(), Some("https://www.bancolombia.com/fondos"));
        assert_eq!(fic.fecha_corte.as_ref().unwrap().text(), "2025-07-31");

        let duration = sheet.plazo_duracion.as_ref().unwrap();
        assert_eq!(duration.shares[0].participacion, Some(0.605));
        assert_eq!(duration.shares[1].participacion, Some(0.395));

        let composition = sheet.composicion_portafolio.as_ref().unwrap();
        assert_eq!(composition.por_activo.shares[0].participacion, Some(0.7));
        assert_eq!(composition.por_pais_emisor.shares[0].participacion, Some(1.0));
        assert!(composition.por_moneda.is_empty());

        assert_eq!(sheet.caracteristicas.valor, Some(1234567.89));
        assert_eq!(sheet.caracteristicas.no_unidades_en_circulacion, Some(15000.0));
        assert_eq!(
            sheet.caracteristicas.fecha_inicio_operaciones.as_ref().unwrap().text(),
            "2015-07-01"
        );

        assert_eq!(
            sheet.calificacion.entidad_calificadora.as_deref(),
            Some("FITCH RATINGS COLOMBIA S.A.")
        );
        assert!(sheet.calificacion.entidad_calificadora_normalizada);

        let holdings = sheet.principales_inversiones.as_ref().unwrap();
        // A single holding of 12.5 classifies as unknown and falls back per value.
        assert_eq!(holdings.shares[0].participacion, Some(0.125));

        let perf = &sheet.rentabilidad_volatilidad.as_ref().unwrap()[0];
        assert_eq!(perf.rentabilidad_historica_ea.ultimo_mes, Some(0.0852));
        assert_eq!(perf.rentabilidad_historica_ea.ultimo_anio, Some(0.091));
        assert_eq!(perf.volatilidad_historica.ultimo_mes, Some(0.35));
        assert_eq!(perf.volatilidad_historica.ultimos_3_anios, None);

        // Absent composition groups are filled in without a report.
        assert_eq!(normalized.reports.len(), 4);
        // 0.7 + 0.3 and 100 are fine; a lone 12.5% holding is not summed.
        assert_eq!(normalized.off_tolerance().count(), 0);
    }

    #[test]
    fn test_output_shape() {
        let normalized = normalizer()
            .normalize_json(&sample().to_string(), "Bancolombia_FondoRF_raw.json")
            .unwrap();
        let value = serde_json::to_value(&normalized.sheet).unwrap();
        assert_eq!(
            value["composicion_portafolio"]["por_activo"][1],
            json!({"activo": "TES", "participacion": 0.3})
        );
        assert_eq!(
            value["plazo_duracion"][0],
            json!({"plazo": "1 a 180 dias", "participacion": 0.605})
        );
        assert_eq!(value["calificacion"]["fecha_ultima_calificacion"], "2025-01-15");
        assert_eq!(value["fic"]["tipo"], "Renta Fija");
    }

    #[test]
    fn test_normalizing_output_again_changes_nothing() {
        let normalizer = normalizer();
        let first = normalizer
            .normalize_json(&sample().to_string(), "Bancolombia_FondoRF_raw.json")
            .unwrap();
        let output = serde_json::to_string(&first.sheet).unwrap();
        let second = normalizer
            .normalize_json(&output, "Bancolombia_FondoRF_raw_transformed.json")
            .unwrap();
        assert_eq!(
            serde_json::to_value(&first.sheet).unwrap(),
            serde_json::to_value(&second.sheet).unwrap()
        );
    }

    #[test]
    fn test_payload_url_wins_and_unknown_bank_has_none() {
        let normalizer = normalizer();
        let mut payload = sample();
        payload["fic"]["url"] = json!("https://example.com/fondo");
        let sheet = normalizer
            .normalize_json(&payload.to_string(), "Bancolombia_FondoRF_raw.json")
            .unwrap()
            .sheet;
        assert_eq!(sheet.fic.unwrap().url.as_deref(), Some("https://example.com/fondo"));

        let sheet = normalizer
            .normalize_json(&sample().to_string(), "Otro_FondoRF_raw.json")
            .unwrap()
            .sheet;
        assert_eq!(sheet.fic.unwrap().url, None);
    }

    #[test]
    fn test_missing_sections_stay_absent() {
        let sheet = normalizer()
            .normalize_json(r#"{"caracteristicas": {"valor": "n/d"}}"#, "x.json")
            .unwrap()
            .sheet;
        assert!(sheet.fic.is_none());
        assert!(sheet.composicion_portafolio.is_none());
        assert!(sheet.plazo_duracion.is_none());
        assert_eq!(sheet.caracteristicas.valor, None);
    }

    #[test]
    fn test_invalid_json_is_a_parse_error() {
        let err = normalizer().normalize_json("{not json", "bad.json").unwrap_err();
        assert_eq!(err.kind(), "parse");
    }
}
