//! Date parsing for the free-form dates found in fact sheets.
//!
//! Each supported spelling is one entry in [`PATTERNS`], tried in priority
//! order; the first entry that yields a plausible date wins. Anything that no
//! entry understands is handed back unchanged.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

/// Dates before this year are treated as extraction noise.
pub const MIN_YEAR: i32 = 1990;

/// Spanish month names as `(abbreviation, full name)`, January first.
pub const SPANISH_MONTHS: [(&str, &str); 12] = [
    ("ene", "enero"),
    ("feb", "febrero"),
    ("mar", "marzo"),
    ("abr", "abril"),
    ("may", "mayo"),
    ("jun", "junio"),
    ("jul", "julio"),
    ("ago", "agosto"),
    ("sep", "septiembre"),
    ("oct", "octubre"),
    ("nov", "noviembre"),
    ("dic", "diciembre"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldOrder {
    DayMonthYear,
    MonthDayYear,
}

/// Two-digit-year layout, read as `20YY`. chrono's `%y` would put 70..99
/// in the 1900s.
#[derive(Debug, Clone, Copy)]
struct NumericLayout {
    separator: char,
    order: FieldOrder,
}

#[derive(Debug, Clone, Copy)]
struct MonthNameLayout {
    separator: char,
    with_day: bool,
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    /// A chrono format string with a four-digit year.
    Format(&'static str),
    Numeric(NumericLayout),
    MonthName(MonthNameLayout),
}

#[derive(Debug, Clone, Copy)]
struct DatePattern {
    name: &'static str,
    layout: Layout,
}

const fn format(name: &'static str, format: &'static str) -> DatePattern {
    DatePattern {
        name,
        layout: Layout::Format(format),
    }
}

const fn numeric(name: &'static str, separator: char, order: FieldOrder) -> DatePattern {
    DatePattern {
        name,
        layout: Layout::Numeric(NumericLayout { separator, order }),
    }
}

const fn month_name(name: &'static str, separator: char, with_day: bool) -> DatePattern {
    DatePattern {
        name,
        layout: Layout::MonthName(MonthNameLayout {
            separator,
            with_day,
        }),
    }
}

const PATTERNS: [DatePattern; 11] = [
    format("YYYY-MM-DD", "%Y-%m-%d"),
    format("DD/MM/YYYY", "%d/%m/%Y"),
    format("DD-MM-YYYY", "%d-%m-%Y"),
    format("MM/DD/YYYY", "%m/%d/%Y"),
    numeric("DD/MM/YY", '/', FieldOrder::DayMonthYear),
    numeric("DD-MM-YY", '-', FieldOrder::DayMonthYear),
    numeric("MM/DD/YY", '/', FieldOrder::MonthDayYear),
    month_name("mon-yy", '-', false),
    month_name("dd-mon-yy", '-', true),
    month_name("mon/yy", '/', false),
    month_name("dd/mon/yy", '/', true),
];

fn is_digits(text: &str, max_len: usize) -> bool {
    !text.is_empty() && text.len() <= max_len && text.chars().all(|c| c.is_ascii_digit())
}

fn parse_day_or_month(text: &str) -> Option<u32> {
    is_digits(text, 2).then(|| text.parse().ok()).flatten()
}

fn parse_year(text: &str, four_digit: bool) -> Option<i32> {
    if !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match (four_digit, text.len()) {
        (true, 4) => text.parse().ok(),
        (false, 2) => text.parse::<i32>().ok().map(|yy| 2000 + yy),
        _ => None,
    }
}

/// Looks up a Spanish month by abbreviation or full name, case-insensitive.
pub fn spanish_month(token: &str) -> Option<u32> {
    let token = token.trim().trim_end_matches('.').to_lowercase();
    SPANISH_MONTHS
        .iter()
        .position(|(abbr, full)| token == *abbr || token == *full)
        .map(|i| i as u32 + 1)
}

impl NumericLayout {
    fn parse(&self, text: &str) -> Option<NaiveDate> {
        let parts: Vec<&str> = text.split(self.separator).collect();
        let [a, b, c] = parts.as_slice() else {
            return None;
        };
        let (year, month, day) = match self.order {
            FieldOrder::DayMonthYear => (c, b, a),
            FieldOrder::MonthDayYear => (c, a, b),
        };
        NaiveDate::from_ymd_opt(
            parse_year(year, false)?,
            parse_day_or_month(month)?,
            parse_day_or_month(day)?,
        )
    }
}

impl MonthNameLayout {
    fn parse(&self, text: &str) -> Option<NaiveDate> {
        let parts: Vec<&str> = text.split(self.separator).collect();
        let (day, month, year) = match (self.with_day, parts.as_slice()) {
            (true, [d, m, y]) => (parse_day_or_month(d)?, *m, *y),
            (false, [m, y]) => (1, *m, *y),
            _ => return None,
        };
        let year = parse_year(year, year.len() == 4)?;
        NaiveDate::from_ymd_opt(year, spanish_month(month)?, day)
    }
}

impl DatePattern {
    fn parse(&self, text: &str) -> Option<NaiveDate> {
        let date = match self.layout {
            Layout::Format(format) => NaiveDate::parse_from_str(text, format).ok(),
            Layout::Numeric(layout) => layout.parse(text),
            Layout::MonthName(layout) => layout.parse(text),
        }?;
        (date.year() >= MIN_YEAR).then_some(date)
    }
}

/// Drops a trailing time part from ISO timestamps (`2025-07-31T00:00:00`).
fn strip_time(text: &str) -> &str {
    match text.find(['T', ' ']) {
        Some(10) => &text[..10],
        _ => text,
    }
}

/// Parses any supported spelling into a date.
pub fn parse_to_date(text: &str) -> Option<NaiveDate> {
    let candidate = strip_time(text.trim());
    PATTERNS.iter().find_map(|pattern| {
        let date = pattern.parse(candidate)?;
        debug!(input = text, pattern = pattern.name, %date, "Parsed date");
        Some(date)
    })
}

/// Returns `YYYY-MM-DD` for recognised dates and the input unchanged otherwise.
pub fn parse_date(text: &str) -> String {
    parse_to_date(text).map_or_else(|| text.to_string(), |d| d.format("%Y-%m-%d").to_string())
}

/// A date as extracted together with its ISO reading, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateField {
    pub raw_text: String,
    pub iso: Option<NaiveDate>,
}

impl DateField {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw_text: raw.to_string(),
            iso: parse_to_date(raw),
        }
    }

    /// ISO text when parsed, the original text otherwise.
    pub fn text(&self) -> String {
        self.iso
            .map_or_else(|| self.raw_text.clone(), |d| d.format("%Y-%m-%d").to_string())
    }
}

impl Serialize for DateField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text())
    }
}

impl<'de> Deserialize<'de> for DateField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(DateField::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_examples() {
        assert_eq!(parse_date("31/07/2025"), "2025-07-31");
        assert_eq!(parse_date("jul-25"), "2025-07-01");
        assert_eq!(parse_date("31-jul-25"), "2025-07-31");
        assert_eq!(parse_date("not-a-date"), "not-a-date");
    }

    #[test]
    fn test_numeric_layouts_in_priority_order() {
        assert_eq!(parse_date("2025-07-31"), "2025-07-31");
        assert_eq!(parse_date("31-07-2025"), "2025-07-31");
        // Day-first wins for ambiguous dates.
        assert_eq!(parse_date("01/02/2025"), "2025-02-01");
        // Month-first only when day-first is impossible.
        assert_eq!(parse_date("07/31/2025"), "2025-07-31");
        assert_eq!(parse_date("31/07/25"), "2025-07-31");
        assert_eq!(parse_date("31-07-25"), "2025-07-31");
        assert_eq!(parse_date("07/31/25"), "2025-07-31");
        assert_eq!(parse_date(" 2025-07-31T00:00:00 "), "2025-07-31");
        assert_eq!(parse_date("1/7/2025"), "2025-07-01");
        assert_eq!(parse_date("2025-02-30"), "2025-02-30");
    }

    #[test]
    fn test_spanish_month_forms() {
        assert_eq!(parse_date("Ago-25"), "2025-08-01");
        assert_eq!(parse_date("dic/24"), "2024-12-01");
        assert_eq!(parse_date("15/ene/25"), "2025-01-15");
        assert_eq!(parse_date("30-septiembre-2025"), "2025-09-30");
        assert_eq!(parse_date("31-feb-25"), "31-feb-25");
    }

    #[test]
    fn test_month_table() {
        assert_eq!(spanish_month("ENE"), Some(1));
        assert_eq!(spanish_month("diciembre"), Some(12));
        assert_eq!(spanish_month("sep."), Some(9));
        assert_eq!(spanish_month("aug"), None);
    }

    #[test]
    fn test_rejects_implausible_and_invalid_dates() {
        assert_eq!(parse_date("1985-01-01"), "1985-01-01");
        assert_eq!(parse_date("31/02/2025"), "31/02/2025");
        assert_eq!(parse_date(""), "");
        assert_eq!(parse_to_date("2025/07/31"), None);
        // A two-digit year never reaches the four-digit layouts.
        assert_eq!(parse_date("31-07-85"), "2085-07-31");
    }

    #[test]
    fn test_date_field_keeps_original_text() {
        let parsed = DateField::parse("31/07/2025");
        assert_eq!(parsed.iso, NaiveDate::from_ymd_opt(2025, 7, 31));
        assert_eq!(parsed.raw_text, "31/07/2025");
        assert_eq!(serde_json::to_value(&parsed).unwrap(), "2025-07-31");

        let unparsed = DateField::parse("cierre de mes");
        assert_eq!(unparsed.iso, None);
        assert_eq!(serde_json::to_value(&unparsed).unwrap(), "cierre de mes");
    }
}
