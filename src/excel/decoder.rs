use async_trait::async_trait;
use bytes::Bytes;
use calamine::{open_workbook_from_rs, Data, Range, Reader, Xlsx};
use std::collections::HashMap;
use std::io::Cursor;
use tracing::{debug, warn};

use super::types::*;

/// Signature of an OLE compound file (the legacy binary .xls container)
const OLE_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Turns raw document bytes into sheets.
///
/// Each call is single-shot: it either yields the complete sheet list or a
/// diagnostic, never partial results. An `Ok` with no sheets means the decoder
/// found nothing it could extract.
#[async_trait]
pub trait SheetDecoder: Send + Sync {
    async fn decode(&self, bytes: Bytes) -> Result<Vec<Sheet>, DecoderError>;
}

/// Decoder for the open XML workbook container (.xlsx)
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxDecoder;

#[async_trait]
impl SheetDecoder for XlsxDecoder {
    async fn decode(&self, bytes: Bytes) -> Result<Vec<Sheet>, DecoderError> {
        tokio::task::spawn_blocking(move || decode_xlsx(&bytes))
            .await
            .map_err(|e| DecoderError::new(format!("Decoder task failed: {}", e)))?
    }
}

/// Feed bytes through `decoder` and classify the result
pub async fn decode_document<D>(decoder: &D, bytes: Bytes) -> Result<SheetSet, DecodeFailure>
where
    D: SheetDecoder + ?Sized,
{
    let byte_len = bytes.len();

    match decoder.decode(bytes).await {
        Ok(sheets) if sheets.is_empty() => {
            warn!(byte_len, "decoder found no sheets");
            Err(DecodeFailure::UnsupportedFormat(
                "no sheets could be extracted from the document".to_string(),
            ))
        }
        Ok(sheets) => {
            debug!(byte_len, sheet_count = sheets.len(), "document decoded");
            Ok(SheetSet::new(sheets))
        }
        Err(e) => {
            warn!(byte_len, error = %e, "decoder aborted");
            Err(DecodeFailure::DecoderException(e.message))
        }
    }
}

/// Decode an in-memory .xlsx workbook
pub fn decode_xlsx(bytes: &[u8]) -> Result<Vec<Sheet>, DecoderError> {
    // Legacy binary workbooks are not readable here; report them as sheetless
    if bytes.starts_with(&OLE_SIGNATURE) {
        return Ok(Vec::new());
    }

    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))
        .map_err(|e| DecoderError::new(format!("Failed to open workbook: {}", e)))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let mut sheets = Vec::with_capacity(sheet_names.len());

    for (index, name) in sheet_names.iter().enumerate() {
        let range = workbook
            .worksheet_range(name)
            .map_err(|e| DecoderError::new(format!("Failed to read sheet '{}': {}", name, e)))?;

        let (rows, columns) = read_range(&range);
        sheets.push(Sheet {
            name: name.clone(),
            index: index as u32,
            rows,
            columns,
        });
    }

    Ok(sheets)
}

/// Read a whole range, inferring column headers and types.
///
/// The range starts at its first used cell; column indices and letters are
/// reported in sheet coordinates.
fn read_range(range: &Range<Data>) -> (Vec<Vec<CellValue>>, Vec<ColumnInfo>) {
    let (row_count, col_count) = range.get_size();
    let first_col = range.start().map(|(_, col)| col).unwrap_or(0);

    let mut columns: Vec<ColumnInfo> = (0..col_count)
        .map(|col_idx| ColumnInfo {
            index: first_col + col_idx as u32,
            name: column_index_to_letter(first_col + col_idx as u32),
            header: None,
            data_type: None,
        })
        .collect();

    let mut rows = Vec::with_capacity(row_count);
    let mut col_type_counts: HashMap<usize, HashMap<&'static str, u32>> = HashMap::new();

    for row_idx in 0..row_count {
        let mut row_data = Vec::with_capacity(col_count);

        for col_idx in 0..col_count {
            let cell_value = convert_cell_value(range.get((row_idx, col_idx)));

            *col_type_counts
                .entry(col_idx)
                .or_default()
                .entry(cell_value.type_name())
                .or_insert(0) += 1;

            if row_idx == 0 {
                columns[col_idx].header = match &cell_value {
                    CellValue::String(s) if !s.is_empty() => Some(s.clone()),
                    CellValue::Number(n) => Some(n.to_string()),
                    _ => None,
                };
            }

            row_data.push(cell_value);
        }

        rows.push(row_data);
    }

    for (col_idx, type_counts) in col_type_counts {
        let dominant_type = type_counts
            .into_iter()
            .filter(|(t, _)| *t != "empty")
            // Ties resolve by name so repeated decodes of the same bytes agree
            .max_by(|(ta, ca), (tb, cb)| ca.cmp(cb).then_with(|| tb.cmp(ta)))
            .map(|(t, _)| t)
            .unwrap_or("string");

        columns[col_idx].data_type = Some(dominant_type.to_string());
    }

    (rows, columns)
}

/// Convert calamine Data to our CellValue
fn convert_cell_value(cell: Option<&Data>) -> CellValue {
    match cell {
        None => CellValue::Empty,
        Some(data) => match data {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::String(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Bool(b) => CellValue::Boolean(*b),
            Data::DateTime(dt) => CellValue::DateTime(format_excel_datetime(dt.as_f64())),
            Data::DateTimeIso(s) => CellValue::DateTime(s.clone()),
            Data::DurationIso(s) => CellValue::String(s.clone()),
            Data::Error(e) => CellValue::Error(format!("{:?}", e)),
        },
    }
}

/// Format Excel datetime (days since 1899-12-30) to ISO 8601
fn format_excel_datetime(value: f64) -> String {
    let seconds = (value * 86400.0).round() as i64;
    let datetime = chrono::NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|epoch| epoch.and_hms_opt(0, 0, 0))
        .zip(chrono::Duration::try_seconds(seconds))
        .and_then(|(epoch, offset)| epoch.checked_add_signed(offset));

    match datetime {
        Some(datetime) => datetime.format("%Y-%m-%dT%H:%M:%S").to_string(),
        None => value.to_string(),
    }
}

/// Convert column index (0-based) to Excel column letter (A, B, ..., Z, AA, AB, ...)
fn column_index_to_letter(index: u32) -> String {
    let mut result = String::new();
    let mut n = index + 1;

    while n > 0 {
        n -= 1;
        let c = (b'A' + (n % 26) as u8) as char;
        result.insert(0, c);
        n /= 26;
    }

    result
}
