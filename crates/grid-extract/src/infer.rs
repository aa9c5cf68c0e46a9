//! Best-effort column type inference and date handling

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{ColumnType, DateVariable};

const BOOLEAN_WORDS: &[&str] = &["true", "false", "yes", "no", "on", "off"];
const TEXT_WITH_DATE_SHARE: f64 = 0.6;

static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b",
        r"\b\d{4}-\d{2}-\d{2}\b",
        r"\b[A-Za-z]+\s\d{1,2},\s\d{4}\b",
        r"\b\d{2}-[A-Za-z]{3}-\d{4}\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("date regex"))
    .collect()
});

static ANY_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b\d{4}-\d{2}-\d{2}\b|\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b|\b\d{2}-[A-Za-z]{3}-\d{4}\b|\b[A-Za-z]+\s\d{1,2},\s\d{4}\b",
    )
    .expect("date regex")
});

/// Result of inferring a column from sample values
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnInference {
    pub column_type: ColumnType,
    pub variables: Vec<DateVariable>,
}

fn contains_date(value: &str) -> bool {
    DATE_PATTERNS.iter().any(|p| p.is_match(value))
}

fn is_boolean_word(value: &str) -> bool {
    BOOLEAN_WORDS.contains(&value.trim().to_ascii_lowercase().as_str())
}

fn is_numeric(value: &str) -> bool {
    let trimmed = value.trim();
    let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let digits: String = unsigned
        .chars()
        .filter(|c| !matches!(c, ',' | '.' | '$' | '€' | '£' | '%') && !c.is_whitespace())
        .collect();
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Date substrings of `value`, left to right
pub fn find_dates(value: &str) -> Vec<&str> {
    ANY_DATE.find_iter(value).map(|m| m.as_str()).collect()
}

pub fn infer_date_format(date: &str) -> &'static str {
    let full = |pattern: &Regex| {
        pattern
            .find(date)
            .map_or(false, |m| m.start() == 0 && m.end() == date.len())
    };
    if full(&DATE_PATTERNS[1]) {
        "yyyy-MM-dd"
    } else if full(&DATE_PATTERNS[0]) {
        "dd/MM/yyyy"
    } else if full(&DATE_PATTERNS[3]) {
        "dd-MMM-yyyy"
    } else if full(&DATE_PATTERNS[2]) {
        "MMMM d, yyyy"
    } else {
        "unknown"
    }
}

/// Parse one date in any supported format. Day-first wins for numeric dates.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    const FORMATS: &[&str] = &[
        "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%m/%d/%Y", "%m-%d-%Y", "%d/%m/%y", "%d-%m-%y",
        "%d-%b-%Y", "%B %d, %Y", "%b %d, %Y",
    ];
    FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

/// Infer a column type from its non-empty sample values
pub fn infer_column<S: AsRef<str>>(samples: &[S]) -> ColumnInference {
    let values: Vec<&str> = samples
        .iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .collect();
    let plain = |column_type| ColumnInference {
        column_type,
        variables: Vec::new(),
    };

    if values.is_empty() {
        return plain(ColumnType::Text);
    }
    if values.iter().all(|v| is_boolean_word(v)) {
        return plain(ColumnType::Boolean);
    }
    if values.iter().all(|v| is_numeric(v)) {
        return plain(ColumnType::Number);
    }
    if values.iter().all(|v| contains_date(v)) {
        return plain(ColumnType::Date);
    }

    let dated = values.iter().filter(|v| contains_date(v)).count();
    if dated as f64 / values.len() as f64 >= TEXT_WITH_DATE_SHARE {
        let mut variables: Vec<DateVariable> = Vec::new();
        for value in &values {
            for (position, date) in find_dates(value).into_iter().enumerate() {
                if position >= variables.len() {
                    variables.push(DateVariable {
                        name: format!("date{}", position + 1),
                        format: infer_date_format(date).to_string(),
                    });
                }
            }
        }
        return ColumnInference {
            column_type: ColumnType::TextWithDate,
            variables,
        };
    }

    plain(ColumnType::Text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_simple_types() {
        assert_eq!(infer_column(&["Yes", "no", "ON"]).column_type, ColumnType::Boolean);
        assert_eq!(
            infer_column(&["$1,200.50", "-3", "45 %"]).column_type,
            ColumnType::Number
        );
        assert_eq!(
            infer_column(&["2024-01-31", "5/6/2023", "March 3, 2022"]).column_type,
            ColumnType::Date
        );
        assert_eq!(infer_column(&["alpha", "beta"]).column_type, ColumnType::Text);
        assert_eq!(infer_column::<&str>(&[]).column_type, ColumnType::Text);
        assert_eq!(infer_column(&["", "  "]).column_type, ColumnType::Text);
    }

    #[test]
    fn text_with_date_collects_variables_by_position() {
        let inference = infer_column(&[
            "Invoice due 2024-02-01, paid 03/02/2024",
            "Due 2024-05-10",
            "Due 2023-12-01",
            "pending",
        ]);
        assert_eq!(inference.column_type, ColumnType::TextWithDate);
        assert_eq!(
            inference.variables,
            vec![
                DateVariable {
                    name: "date1".into(),
                    format: "yyyy-MM-dd".into()
                },
                DateVariable {
                    name: "date2".into(),
                    format: "dd/MM/yyyy".into()
                },
            ]
        );

        assert_eq!(infer_column(&["Due 2024-01-01", "x", "y"]).column_type, ColumnType::Text);
    }

    #[test]
    fn parses_supported_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        for raw in ["2024-01-31", "31/01/2024", "01/31/2024", "31-Jan-2024", "January 31, 2024"] {
            assert_eq!(parse_date(raw), Some(expected), "{raw}");
        }
        assert_eq!(parse_date("soon"), None);
        assert_eq!(infer_date_format("31-Jan-2024"), "dd-MMM-yyyy");
        assert_eq!(infer_date_format("January 31, 2024"), "MMMM d, yyyy");
    }
}
