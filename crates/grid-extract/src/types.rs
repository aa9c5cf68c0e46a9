//! Grid definitions and extracted values

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Column type used to evaluate filters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Boolean,
    TextWithDate,
    Img,
    /// Not recorded; inferred from the extracted values
    #[default]
    Auto,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Number => "number",
            ColumnType::Date => "date",
            ColumnType::Boolean => "boolean",
            ColumnType::TextWithDate => "text_with_date",
            ColumnType::Img => "img",
            ColumnType::Auto => "auto",
        }
    }
}

impl From<String> for ColumnType {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "string" => ColumnType::Text,
            "number" | "numeric" => ColumnType::Number,
            "date" => ColumnType::Date,
            "boolean" | "bool" => ColumnType::Boolean,
            "text_with_date" => ColumnType::TextWithDate,
            "img" | "image" => ColumnType::Img,
            _ => ColumnType::Auto,
        }
    }
}

impl From<ColumnType> for String {
    fn from(kind: ColumnType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named date found inside a text_with_date column (`date1`, `date2`, ...)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateVariable {
    pub name: String,
    #[serde(default)]
    pub format: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnHeader {
    pub header: String,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<DateVariable>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub header: ColumnHeader,
    #[serde(default)]
    pub column_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

impl ColumnMapping {
    pub fn new(header: &str, column_type: ColumnType, column_index: usize) -> Self {
        Self {
            header: ColumnHeader {
                header: header.to_string(),
                column_type,
                variables: Vec::new(),
            },
            column_index,
            selector: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.header.header
    }

    pub fn column_type(&self) -> ColumnType {
        self.header.column_type
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterCriterion {
    pub column: String,
    pub operator: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: String,
    /// Which date of a text_with_date cell to compare (`date2`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
}

impl FilterCriterion {
    pub fn new(column: &str, operator: &str, value: &str) -> Self {
        Self {
            column: column.to_string(),
            operator: operator.to_string(),
            value: value.to_string(),
            variable: None,
        }
    }
}

/// Recorded description of a grid, registered under its gridExtract step id
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractDefinition {
    #[serde(default)]
    pub grid_selector: String,
    #[serde(default)]
    pub row_selector: String,
    #[serde(default)]
    pub column_mappings: Vec<ColumnMapping>,
    #[serde(default)]
    pub filters: Vec<FilterCriterion>,
}

impl ExtractDefinition {
    pub fn is_defined(&self) -> bool {
        !self.grid_selector.trim().is_empty() || !self.row_selector.trim().is_empty()
    }

    pub fn column(&self, header: &str) -> Option<&ColumnMapping> {
        self.column_mappings.iter().find(|m| m.name() == header)
    }
}

/// One extracted cell
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    /// Presence flag of an img column
    Flag(bool),
    Null,
}

impl CellValue {
    /// String form used for placeholder substitution and string filters
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Text(text) => text.clone(),
            CellValue::Flag(flag) => flag.to_string(),
            CellValue::Null => String::new(),
        }
    }

    /// Null, empty text and an absent image all count as blank
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Text(text) => text.trim().is_empty(),
            CellValue::Flag(flag) => !flag,
            CellValue::Null => true,
        }
    }
}

/// Header -> value for one row, in column order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowData {
    entries: Vec<(String, CellValue)>,
}

impl RowData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, header: impl Into<String>, value: CellValue) {
        let header = header.into();
        match self.entries.iter_mut().find(|(name, _)| *name == header) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((header, value)),
        }
    }

    pub fn with(mut self, header: &str, value: CellValue) -> Self {
        self.insert(header, value);
        self
    }

    pub fn get(&self, header: &str) -> Option<&CellValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == header)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when every value is blank; such rows are spacer rows
    pub fn is_blank(&self) -> bool {
        self.entries.iter().all(|(_, value)| value.is_blank())
    }
}

impl Serialize for RowData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_parses_recorded_json() {
        let raw = r##"{
            "gridSelector": "#grid",
            "rowSelector": "#grid tr",
            "columnMappings": [
                {"header": {"header": "Name", "type": "text"}, "columnIndex": 0, "selector": "td.name"},
                {"header": {"header": "Due", "type": "text_with_date",
                            "variables": [{"name": "date1", "type": "date", "format": "yyyy-MM-dd"}]},
                 "columnIndex": 1},
                {"header": {"header": "Logo", "type": ""}, "columnIndex": 2}
            ],
            "filters": [{"column": "Amount", "operator": ">", "value": 10}]
        }"##;
        let def: ExtractDefinition = serde_json::from_str(raw).unwrap();
        assert_eq!(def.column_mappings.len(), 3);
        assert_eq!(def.column("Due").unwrap().column_type(), ColumnType::TextWithDate);
        assert_eq!(def.column("Due").unwrap().header.variables[0].name, "date1");
        assert_eq!(def.column("Logo").unwrap().column_type(), ColumnType::Auto);
        assert_eq!(def.filters[0].value, "10");
    }

    #[test]
    fn row_data_keeps_column_order() {
        let row = RowData::new()
            .with("b", CellValue::Text("2".into()))
            .with("a", CellValue::Flag(true))
            .with("b", CellValue::Text("3".into()));
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"b":"3","a":true}"#);
        assert_eq!(row.get("a"), Some(&CellValue::Flag(true)));
    }

    #[test]
    fn spacer_rows_are_blank() {
        let spacer = RowData::new()
            .with("a", CellValue::Text("  ".into()))
            .with("b", CellValue::Flag(false))
            .with("c", CellValue::Null);
        assert!(spacer.is_blank());
        assert!(!spacer.clone().with("d", CellValue::Text("x".into())).is_blank());
    }
}
