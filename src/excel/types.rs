use serde::{Deserialize, Serialize};

/// Represents a cell value with type information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum CellValue {
    Empty,
    String(String),
    Number(f64),
    Boolean(bool),
    DateTime(String), // ISO 8601 format
    Error(String),
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Empty
    }
}

impl CellValue {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            CellValue::Empty => "empty",
            CellValue::String(_) => "string",
            CellValue::Number(_) => "number",
            CellValue::Boolean(_) => "boolean",
            CellValue::DateTime(_) => "date",
            CellValue::Error(_) => "error",
        }
    }
}

/// Column metadata for the data grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub index: u32,
    pub name: String,      // Column letter (A, B, C, etc.)
    pub header: Option<String>, // First row value if it's a header
    pub data_type: Option<String>, // Inferred type: "string", "number", "date", "boolean", "error"
}

/// One decoded worksheet, ready to hand to a grid renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub index: u32,
    pub rows: Vec<Vec<CellValue>>,
    pub columns: Vec<ColumnInfo>,
}

impl Sheet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.columns.len()
    }
}

/// Ordered set of decoded sheets.
///
/// An empty set means "not loaded yet"; a failed load is reported through
/// [`SyncOutcome`](crate::sync::SyncOutcome), never by an empty set alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetSet(Vec<Sheet>);

impl SheetSet {
    pub fn new(sheets: Vec<Sheet>) -> Self {
        SheetSet(sheets)
    }

    /// The "not yet loaded" sentinel
    pub const fn empty() -> Self {
        SheetSet(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.0
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Sheet> {
        self.0.iter().find(|s| s.name == name)
    }
}

impl<'a> IntoIterator for &'a SheetSet {
    type Item = &'a Sheet;
    type IntoIter = std::slice::Iter<'a, Sheet>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Error reported by a [`SheetDecoder`](super::SheetDecoder) when it aborts
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DecoderError {
    pub message: String,
}

impl DecoderError {
    pub fn new(message: impl Into<String>) -> Self {
        DecoderError {
            message: message.into(),
        }
    }
}

/// Why a document could not be turned into a [`SheetSet`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", content = "detail", rename_all = "kebab-case")]
pub enum DecodeFailure {
    /// The decoder found no sheets it could extract
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),
    /// The decoder gave up part way through the document
    #[error("document could not be decoded: {0}")]
    DecoderException(String),
}

impl DecodeFailure {
    /// Stable reason tag
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeFailure::UnsupportedFormat(_) => "unsupported-format",
            DecodeFailure::DecoderException(_) => "decoder-exception",
        }
    }

    /// Advice shown to the user
    pub fn remediation(&self) -> &'static str {
        match self {
            DecodeFailure::UnsupportedFormat(_) => {
                "This file type cannot be previewed. Only .xlsx workbooks are supported."
            }
            DecodeFailure::DecoderException(_) => {
                "The workbook structure appears to be damaged, possibly by the last edit. \
                 Try undoing the change or re-uploading the original file."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_failure_reason_tags_are_distinct() {
        let unsupported = DecodeFailure::UnsupportedFormat("no sheets".to_string());
        let corrupt = DecodeFailure::DecoderException("bad zip".to_string());

        assert_eq!(unsupported.reason(), "unsupported-format");
        assert_eq!(corrupt.reason(), "decoder-exception");
        assert_ne!(unsupported.remediation(), corrupt.remediation());
    }

    #[test]
    fn test_decode_failure_serializes_with_reason_tag() {
        let failure = DecodeFailure::UnsupportedFormat("legacy container".to_string());
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["reason"], "unsupported-format");
        assert_eq!(json["detail"], "legacy container");
    }

    #[test]
    fn test_sheet_set_sentinel() {
        let set = SheetSet::empty();
        assert!(set.is_empty());
        assert_eq!(set, SheetSet::default());

        let set = SheetSet::new(vec![Sheet {
            name: "Sheet1".to_string(),
            index: 0,
            rows: vec![],
            columns: vec![],
        }]);
        assert!(!set.is_empty());
        assert_eq!(set.names(), vec!["Sheet1"]);
        assert!(set.get("Sheet1").is_some());
        assert!(set.get("Missing").is_none());

        let mut indices = Vec::new();
        for sheet in &set {
            indices.push(sheet.index);
        }
        assert_eq!(indices, vec![0]);
    }
}
