//! Typed filter evaluation

use std::cmp::Ordering;

use chrono::NaiveDate;
use regex::RegexBuilder;
use tracing::debug;

use crate::errors::GridError;
use crate::infer::{find_dates, parse_date};
use crate::types::{CellValue, ColumnMapping, ColumnType, FilterCriterion, RowData};

const TRUTHY_WORDS: &[&str] = &["true", "yes", "y", "1", "on", "checked"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOperator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    Contains,
    NotContains,
    Equals,
    NotEquals,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    Regex,
    IsTrue,
    IsFalse,
}

impl FilterOperator {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        Some(match normalized.as_str() {
            ">" => FilterOperator::Gt,
            "<" => FilterOperator::Lt,
            ">=" => FilterOperator::Ge,
            "<=" => FilterOperator::Le,
            "=" | "==" => FilterOperator::Eq,
            "!=" => FilterOperator::Ne,
            "contains" => FilterOperator::Contains,
            "does not contain" => FilterOperator::NotContains,
            "equals" => FilterOperator::Equals,
            "does not equal" => FilterOperator::NotEquals,
            "starts with" => FilterOperator::StartsWith,
            "does not start with" => FilterOperator::NotStartsWith,
            "ends with" => FilterOperator::EndsWith,
            "does not end with" => FilterOperator::NotEndsWith,
            "regex" => FilterOperator::Regex,
            "is true" => FilterOperator::IsTrue,
            "is false" => FilterOperator::IsFalse,
            _ => return None,
        })
    }

    fn is_comparison(&self) -> bool {
        matches!(
            self,
            FilterOperator::Gt
                | FilterOperator::Lt
                | FilterOperator::Ge
                | FilterOperator::Le
                | FilterOperator::Eq
                | FilterOperator::Ne
        )
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            FilterOperator::Gt => ordering == Ordering::Greater,
            FilterOperator::Lt => ordering == Ordering::Less,
            FilterOperator::Ge => ordering != Ordering::Less,
            FilterOperator::Le => ordering != Ordering::Greater,
            FilterOperator::Eq => ordering == Ordering::Equal,
            FilterOperator::Ne => ordering != Ordering::Equal,
            _ => false,
        }
    }
}

pub fn truthy(value: &CellValue) -> bool {
    match value {
        CellValue::Flag(flag) => *flag,
        CellValue::Text(text) => TRUTHY_WORDS.contains(&text.trim().to_lowercase().as_str()),
        CellValue::Null => false,
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '€' | '£' | '%') && !c.is_whitespace())
        .collect();
    cleaned.parse().ok()
}

/// 1-based position from a `dateN` variable name
fn variable_position(variable: Option<&str>) -> usize {
    variable
        .and_then(|name| name.trim().trim_start_matches("date").parse::<usize>().ok())
        .filter(|n| *n > 0)
        .map_or(0, |n| n - 1)
}

fn date_in(raw: &str, position: usize) -> Option<NaiveDate> {
    match find_dates(raw).get(position) {
        Some(found) => parse_date(found),
        None if position == 0 => parse_date(raw),
        None => None,
    }
}

/// Evaluate one criterion against a row
pub fn evaluate(
    criterion: &FilterCriterion,
    row: &RowData,
    column_type: ColumnType,
) -> Result<bool, GridError> {
    let column = criterion.column.as_str();
    let op_name = criterion.operator.as_str();
    let operator = FilterOperator::parse(op_name)
        .ok_or_else(|| GridError::filter(column, op_name, "unknown operator"))?;
    let actual = row.get(column).cloned().unwrap_or(CellValue::Null);

    match operator {
        FilterOperator::IsTrue => return Ok(truthy(&actual)),
        FilterOperator::IsFalse => return Ok(!truthy(&actual)),
        _ => {}
    }

    let actual_text = actual.as_text().trim().to_lowercase();
    let expected_text = criterion.value.trim().to_lowercase();

    if !operator.is_comparison() {
        return Ok(match operator {
            FilterOperator::Contains => actual_text.contains(&expected_text),
            FilterOperator::NotContains => !actual_text.contains(&expected_text),
            FilterOperator::Equals => actual_text == expected_text,
            FilterOperator::NotEquals => actual_text != expected_text,
            FilterOperator::StartsWith => actual_text.starts_with(&expected_text),
            FilterOperator::NotStartsWith => !actual_text.starts_with(&expected_text),
            FilterOperator::EndsWith => actual_text.ends_with(&expected_text),
            FilterOperator::NotEndsWith => !actual_text.ends_with(&expected_text),
            FilterOperator::Regex => RegexBuilder::new(&criterion.value)
                .case_insensitive(true)
                .build()
                .map_err(|err| GridError::filter(column, op_name, err.to_string()))?
                .is_match(actual.as_text().trim()),
            _ => false,
        });
    }

    let ordering = match column_type {
        ColumnType::Number => {
            let a = parse_number(&actual.as_text())
                .ok_or_else(|| GridError::filter(column, op_name, "cell is not a number"))?;
            let b = parse_number(&criterion.value)
                .ok_or_else(|| GridError::filter(column, op_name, "value is not a number"))?;
            a.partial_cmp(&b)
                .ok_or_else(|| GridError::filter(column, op_name, "numbers are not comparable"))?
        }
        ColumnType::Date | ColumnType::TextWithDate => {
            let position = if column_type == ColumnType::TextWithDate {
                variable_position(criterion.variable.as_deref())
            } else {
                0
            };
            let a = date_in(&actual.as_text(), position)
                .ok_or_else(|| GridError::filter(column, op_name, "cell holds no date"))?;
            let b = date_in(&criterion.value, 0)
                .ok_or_else(|| GridError::filter(column, op_name, "value is not a date"))?;
            a.cmp(&b)
        }
        ColumnType::Boolean => {
            if !matches!(operator, FilterOperator::Eq | FilterOperator::Ne) {
                return Err(GridError::filter(
                    column,
                    op_name,
                    "boolean columns only support = and !=",
                ));
            }
            truthy(&actual).cmp(&truthy(&CellValue::Text(criterion.value.clone())))
        }
        ColumnType::Text | ColumnType::Img | ColumnType::Auto => actual_text.cmp(&expected_text),
    };
    Ok(operator.accepts(ordering))
}

/// All filters must pass. Evaluation errors reject the row.
pub fn row_matches(row: &RowData, filters: &[FilterCriterion], columns: &[ColumnMapping]) -> bool {
    filters.iter().all(|criterion| {
        let column_type = columns
            .iter()
            .find(|mapping| mapping.name() == criterion.column)
            .map_or(ColumnType::Text, ColumnMapping::column_type);
        match evaluate(criterion, row, column_type) {
            Ok(passed) => passed,
            Err(err) => {
                debug!(error = %err, "filter evaluation failed, row rejected");
                false
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(value: &str) -> RowData {
        RowData::new().with("c", CellValue::Text(value.into()))
    }

    fn check(value: &str, operator: &str, expected: &str, column_type: ColumnType) -> bool {
        evaluate(&FilterCriterion::new("c", operator, expected), &row(value), column_type).unwrap()
    }

    #[test]
    fn string_operators_ignore_case() {
        assert!(check(" Hello World ", "contains", "WORLD", ColumnType::Text));
        assert!(check("Hello", "does not contain", "bye", ColumnType::Text));
        assert!(check("Hello", "Equals", "hello", ColumnType::Text));
        assert!(check("Hello", "does not equal", "help", ColumnType::Text));
        assert!(check("Hello", "starts with", "HE", ColumnType::Text));
        assert!(check("Hello", "does not start with", "lo", ColumnType::Text));
        assert!(check("Hello", "ends with", "LO", ColumnType::Text));
        assert!(check("Hello", "does not end with", "he", ColumnType::Text));
        assert!(check("Order #123", "regex", r"order #\d+", ColumnType::Text));
    }

    #[test]
    fn truthiness() {
        for yes in ["true", "Yes", "y", "1", "ON", "checked"] {
            assert!(check(yes, "is true", "", ColumnType::Text), "{yes}");
        }
        assert!(check("nope", "is false", "", ColumnType::Text));
        let flagged = RowData::new().with("c", CellValue::Flag(true));
        assert!(evaluate(&FilterCriterion::new("c", "is true", ""), &flagged, ColumnType::Img).unwrap());
        let missing = RowData::new();
        assert!(evaluate(&FilterCriterion::new("c", "is false", ""), &missing, ColumnType::Text).unwrap());
    }

    #[test]
    fn comparisons_follow_column_type() {
        assert!(check("$1,250.00", ">", "1000", ColumnType::Number));
        assert!(check("10", "<", "9.5", ColumnType::Text));
        assert!(!check("10", "<", "9.5", ColumnType::Number));
        assert!(check("12", "==", "12.0", ColumnType::Number));
        assert!(check("31/01/2024", ">=", "2024-01-31", ColumnType::Date));
        assert!(check("Jan 5, 2024", "<", "2024-02-01", ColumnType::Date));
        assert!(check("yes", "=", "true", ColumnType::Boolean));
        assert!(check("b", ">", "a", ColumnType::Text));
    }

    #[test]
    fn text_with_date_uses_variable() {
        let criterion = FilterCriterion {
            variable: Some("date2".into()),
            ..FilterCriterion::new("c", ">", "2024-03-01")
        };
        let value = row("Opened 2024-01-10, closed 2024-04-02");
        assert!(evaluate(&criterion, &value, ColumnType::TextWithDate).unwrap());
        let first = FilterCriterion::new("c", ">", "2024-03-01");
        assert!(!evaluate(&first, &value, ColumnType::TextWithDate).unwrap());
    }

    #[test]
    fn evaluation_errors() {
        let bad_op = evaluate(&FilterCriterion::new("c", "near", "x"), &row("x"), ColumnType::Text);
        assert!(matches!(bad_op, Err(GridError::FilterEvaluationError { .. })));
        let bad_regex = evaluate(&FilterCriterion::new("c", "regex", "("), &row("x"), ColumnType::Text);
        assert!(bad_regex.is_err());
        let not_number = evaluate(&FilterCriterion::new("c", ">", "3"), &row("abc"), ColumnType::Number);
        assert!(not_number.is_err());

        let columns = vec![ColumnMapping::new("c", ColumnType::Number, 0)];
        assert!(!row_matches(&row("abc"), &[FilterCriterion::new("c", ">", "3")], &columns));
        assert!(row_matches(&row("5"), &[FilterCriterion::new("c", ">", "3")], &columns));
        assert!(row_matches(&row("5"), &[], &columns));
    }
}
