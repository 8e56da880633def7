use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::core::sheet::ValueGroup;

/// Share of fixed or variable income above which a fund is classified by it.
const DOMINANT_SHARE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FundCategory {
    RentaFija,
    RentaVariable,
    Balanceado,
    MercadoMonetario,
    Otro,
}

impl From<&str> for FundCategory {
    /// Keyword match over a fund name or investment policy.
    fn from(s: &str) -> Self {
        let text = s.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| text.contains(w));

        if has(&["mercado monetario", "money market", "liquidez", "vista"]) {
            FundCategory::MercadoMonetario
        } else if has(&["balanceado", "mixto", "multiactivo", "balanced"]) {
            FundCategory::Balanceado
        } else if has(&["renta variable", "acciones", "accionario", "equity"]) {
            FundCategory::RentaVariable
        } else if has(&["renta fija", "deuda", "bonos", "tes ", "cdt", "fixed income"]) {
            FundCategory::RentaFija
        } else {
            FundCategory::Otro
        }
    }
}

impl Display for FundCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                FundCategory::RentaFija => "Renta Fija",
                FundCategory::RentaVariable => "Renta Variable",
                FundCategory::Balanceado => "Balanceado",
                FundCategory::MercadoMonetario => "Mercado Monetario",
                FundCategory::Otro => "Otro",
            }
        )
    }
}

impl FundCategory {
    /// Classifies from the normalized `por_tipo_de_renta` group.
    pub fn from_income_types(group: &ValueGroup) -> Self {
        let share_of = |words: &[&str]| -> f64 {
            group
                .shares
                .iter()
                .filter(|s| {
                    let label = s.label.to_lowercase();
                    words.iter().any(|w| label.contains(w))
                })
                .filter_map(|s| s.participacion)
                .sum()
        };
        let fixed = share_of(&["fija", "fixed", "deuda"]);
        let variable = share_of(&["variable", "acciones", "equity"]);

        if fixed >= DOMINANT_SHARE {
            FundCategory::RentaFija
        } else if variable >= DOMINANT_SHARE {
            FundCategory::RentaVariable
        } else if fixed > 0.0 && variable > 0.0 {
            FundCategory::Balanceado
        } else {
            FundCategory::Otro
        }
    }

    /// Name first, then investment policy, then the income-type composition.
    pub fn infer(name: &str, policy: Option<&str>, income_types: Option<&ValueGroup>) -> Self {
        [Some(name), policy]
            .into_iter()
            .flatten()
            .map(FundCategory::from)
            .find(|c| *c != FundCategory::Otro)
            .or_else(|| income_types.map(FundCategory::from_income_types))
            .unwrap_or(FundCategory::Otro)
    }
}
