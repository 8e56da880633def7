//! Magnitude inference and value normalization for participation groups.
//!
//! Extracted participations arrive either as fractions (`0.45`) or as
//! percentages (`45`, `"45,0%"`), and the convention can change from one
//! group to the next inside the same document. Classification is therefore
//! done per group, from the group's own value distribution.

use std::fmt::Display;

use tracing::{debug, warn};

use crate::core::context::RecordContext;
use crate::core::sheet::{GroupKind, RawShare, RawValue, Share, ValueGroup};

const PERCENT_BAND: (f64, f64) = (90.0, 110.0);
const FRACTION_BAND: (f64, f64) = (0.9, 1.1);

/// Allowed distance of a normalized group sum from 1.0 before it is reported.
pub const SUM_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleConvention {
    Fraction,
    Percent,
    Unknown,
}

impl Display for ScaleConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ScaleConvention::Fraction => "FRACTION_SCALE",
                ScaleConvention::Percent => "PERCENT_SCALE",
                ScaleConvention::Unknown => "UNKNOWN",
            }
        )
    }
}

fn within(value: f64, band: (f64, f64)) -> bool {
    value >= band.0 && value <= band.1
}

/// Rounds to 6 decimal places.
pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Minus-like characters found in extracted text, read as `-`.
fn unify_minus(c: char) -> char {
    match c {
        '\u{2212}' | '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}'
        | '\u{FE63}' | '\u{FF0D}' => '-',
        other => other,
    }
}

/// Strips everything except digits, separators, sign and `%`, turns a decimal
/// comma into a dot and parses the rest. Returns `None` when nothing numeric
/// survives.
pub fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .map(unify_minus)
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+' | '%'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let cleaned = cleaned.trim_end_matches('%');
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses a monetary amount or unit count, where `.` and `,` may both appear
/// as thousands and decimal separators (`1.234.567,89`, `1,234,567.89`).
pub fn parse_amount(text: &str) -> Option<f64> {
    let kept: String = text
        .chars()
        .map(unify_minus)
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if kept.is_empty() {
        return None;
    }

    let dots = kept.matches('.').count();
    let commas = kept.matches(',').count();
    let decimal = match (dots, commas) {
        (0, 0) => None,
        (_, 0) if dots > 1 => None,
        (0, _) if commas > 1 => None,
        (_, 0) => Some('.'),
        (0, _) => Some(','),
        // Both present: whichever comes last separates the decimals.
        _ => kept.rfind(['.', ',']).and_then(|i| kept[i..].chars().next()),
    };

    let normalized: String = kept
        .chars()
        .filter_map(|c| match c {
            '.' | ',' if Some(c) == decimal => Some('.'),
            '.' | ',' => None,
            other => Some(other),
        })
        .collect();
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Converts a raw value into a float, warning when it cannot be read.
pub fn raw_to_f64(raw: &RawValue, field: &str, ctx: &RecordContext) -> Option<f64> {
    match raw {
        RawValue::Number(n) if n.is_finite() => Some(*n),
        RawValue::Number(n) => {
            warn!(source = %ctx.source, fund = ?ctx.fund, field, value = %n, "Non-finite numeric value");
            None
        }
        RawValue::Text(text) if text.trim().is_empty() => None,
        RawValue::Text(text) => {
            let parsed = parse_number(text);
            if parsed.is_none() {
                warn!(source = %ctx.source, fund = ?ctx.fund, field, value = %text, "Unparseable numeric value");
            }
            parsed
        }
    }
}

/// Classifies the magnitude convention of one group of values.
pub fn infer_scale(values: &[f64]) -> ScaleConvention {
    let sum: f64 = values.iter().sum();
    let n_gt1 = values.iter().filter(|v| **v > 1.0).count();
    let n_le1 = values.len() - n_gt1;

    if n_gt1 > n_le1 && within(sum, PERCENT_BAND) {
        ScaleConvention::Percent
    } else if n_le1 > n_gt1 && within(sum, FRACTION_BAND) {
        ScaleConvention::Fraction
    } else if within(sum, PERCENT_BAND) {
        ScaleConvention::Percent
    } else if within(sum, FRACTION_BAND) {
        ScaleConvention::Fraction
    } else {
        ScaleConvention::Unknown
    }
}

/// Converts one already-parsed value to a fraction under `scale`.
pub fn to_fraction(value: f64, scale: ScaleConvention) -> f64 {
    let converted = match scale {
        ScaleConvention::Percent => value / 100.0,
        ScaleConvention::Fraction => value,
        ScaleConvention::Unknown => {
            let magnitude = value.abs();
            if within(magnitude, FRACTION_BAND) {
                value
            } else if within(magnitude, PERCENT_BAND) || magnitude > FRACTION_BAND.1 {
                value / 100.0
            } else {
                value
            }
        }
    };
    round6(converted)
}

/// Normalizes a single raw value under a group classification.
pub fn normalize_value(
    raw: &RawValue,
    scale: ScaleConvention,
    ctx: &RecordContext,
) -> Option<f64> {
    raw_to_f64(raw, "participacion", ctx).map(|v| to_fraction(v, scale))
}

/// Normalizes a return or volatility figure. These are not tied to a group
/// sum: anything above 1 in magnitude is taken as a percentage.
pub fn normalize_rate(raw: &RawValue, field: &str, ctx: &RecordContext) -> Option<f64> {
    raw_to_f64(raw, field, ctx).map(|v| if v.abs() > 1.0 { round6(v / 100.0) } else { round6(v) })
}

/// What the normalizer concluded about one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupReport {
    pub kind: GroupKind,
    pub scale: ScaleConvention,
    pub sum: f64,
    pub within_tolerance: bool,
}

/// Normalizes one value group into a new [`ValueGroup`].
///
/// Values are parsed once, the group is classified from the parsed values,
/// and each value is scaled and clamped into `[0, 1]`. For closed groups a
/// sum outside `1.0 ± SUM_TOLERANCE` is logged, never fatal.
pub fn normalize_group(
    kind: GroupKind,
    shares: &[RawShare],
    ctx: &RecordContext,
) -> (ValueGroup, GroupReport) {
    let parsed: Vec<(String, Option<f64>)> = shares
        .iter()
        .map(|share| {
            let label = share.label.clone().unwrap_or_default().trim().to_string();
            let value = share
                .participacion
                .as_ref()
                .and_then(|raw| raw_to_f64(raw, kind.section_key(), ctx));
            (label, value)
        })
        .collect();

    let present: Vec<f64> = parsed.iter().filter_map(|(_, v)| *v).collect();
    let scale = infer_scale(&present);
    debug!(group = kind.section_key(), %scale, values = present.len(), "Classified value group");

    let shares: Vec<Share> = parsed
        .into_iter()
        .map(|(label, value)| {
            let participacion = value.map(|v| {
                let fraction = to_fraction(v, scale);
                if !(0.0..=1.0).contains(&fraction) {
                    warn!(
                        source = %ctx.source,
                        fund = ?ctx.fund,
                        group = kind.section_key(),
                        label = %label,
                        value = fraction,
                        "Participation outside [0, 1], clamping"
                    );
                }
                fraction.clamp(0.0, 1.0)
            });
            Share {
                label,
                participacion,
            }
        })
        .collect();

    let group = ValueGroup { kind, shares };
    let sum = round6(group.sum());
    let within_tolerance =
        !kind.is_closed() || group.is_empty() || (sum - 1.0).abs() <= SUM_TOLERANCE;
    if !within_tolerance {
        warn!(
            source = %ctx.source,
            fund = ?ctx.fund,
            group = kind.section_key(),
            %scale,
            sum,
            "Value group does not add up to 1"
        );
    }

    let report = GroupReport {
        kind,
        scale,
        sum,
        within_tolerance,
    };
    (group, report)
}
