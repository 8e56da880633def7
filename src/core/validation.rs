use thiserror::Error;

use crate::core::sheet::{FactSheet, GroupKind, ValueGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing fund block `fic`")]
    MissingFundBlock,
    #[error("missing portfolio composition block `composicion_portafolio`")]
    MissingCompositionBlock,
}

/// Checks the required blocks without touching the sheet.
pub fn check(sheet: &FactSheet) -> Result<(), ValidationError> {
    if sheet.fic.is_none() {
        return Err(ValidationError::MissingFundBlock);
    }
    if sheet.composicion_portafolio.is_none() {
        return Err(ValidationError::MissingCompositionBlock);
    }
    Ok(())
}

pub fn is_valid(sheet: &FactSheet) -> bool {
    check(sheet).is_ok()
}

/// Rejects sheets without a fund or composition block and fills every other
/// absent list with an empty one.
pub fn validate(mut sheet: FactSheet) -> Result<FactSheet, ValidationError> {
    check(&sheet)?;
    sheet
        .plazo_duracion
        .get_or_insert_with(|| ValueGroup::empty(GroupKind::Duration));
    sheet
        .principales_inversiones
        .get_or_insert_with(|| ValueGroup::empty(GroupKind::Holdings));
    sheet.rentabilidad_volatilidad.get_or_insert_with(Vec::new);
    Ok(sheet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sheet::{Characteristics, Composition, FundRoot, Rating};

    fn composition() -> Composition {
        Composition {
            por_activo: ValueGroup::empty(GroupKind::Asset),
            por_tipo_de_renta: ValueGroup::empty(GroupKind::IncomeType),
            por_sector_economico: ValueGroup::empty(GroupKind::Sector),
            por_pais_emisor: ValueGroup::empty(GroupKind::IssuerCountry),
            por_moneda: ValueGroup::empty(GroupKind::Currency),
            por_calificacion: ValueGroup::empty(GroupKind::CreditRating),
        }
    }

    fn sheet(with_fund: bool, with_composition: bool) -> FactSheet {
        FactSheet {
            fic: with_fund.then(|| FundRoot {
                nombre_fic: "Fondo A".to_string(),
                gestor: None,
                custodio: None,
                fecha_corte: None,
                politica_de_inversion: None,
                url: None,
                tipo: "Otro".to_string(),
            }),
            plazo_duracion: None,
            composicion_portafolio: with_composition.then(composition),
            caracteristicas: Characteristics::default(),
            calificacion: Rating::default(),
            principales_inversiones: None,
            rentabilidad_volatilidad: None,
        }
    }

    #[test]
    fn test_missing_blocks_are_rejected() {
        assert_eq!(
            validate(sheet(false, true)).unwrap_err(),
            ValidationError::MissingFundBlock
        );
        assert_eq!(
            validate(sheet(true, false)).unwrap_err(),
            ValidationError::MissingCompositionBlock
        );
        assert!(!is_valid(&sheet(false, false)));
        assert!(is_valid(&sheet(true, true)));
    }

    #[test]
    fn test_absent_lists_become_empty() {
        let validated = validate(sheet(true, true)).unwrap();
        assert_eq!(
            validated.plazo_duracion,
            Some(ValueGroup::empty(GroupKind::Duration))
        );
        assert_eq!(
            validated.principales_inversiones,
            Some(ValueGroup::empty(GroupKind::Holdings))
        );
        assert_eq!(validated.rentabilidad_volatilidad, Some(Vec::new()));

        let json = serde_json::to_value(&validated).unwrap();
        assert_eq!(json["plazo_duracion"], serde_json::json!([]));
        assert_eq!(json["composicion_portafolio"]["por_moneda"], serde_json::json!([]));
    }
}
