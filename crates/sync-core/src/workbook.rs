//! Workbook parsing, normalization, and derived-field computation.

use std::collections::BTreeMap;
use std::io::Cursor;

use calamine::{open_workbook_from_rs, Reader, Xlsx};
use chrono::NaiveDate;
use chrono_tz::Tz;
use sync_types::{SyncError, SyncErrorKind};

/// The due-date variance classification derived for production rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueDateFlag {
    Normal,
    Extended,
    Express,
}

impl DueDateFlag {
    pub fn from_delta_days(delta: i64) -> Self {
        match delta.cmp(&0) {
            std::cmp::Ordering::Equal => DueDateFlag::Normal,
            std::cmp::Ordering::Greater => DueDateFlag::Extended,
            std::cmp::Ordering::Less => DueDateFlag::Express,
        }
    }
}

/// A single coerced, normalized workbook row, field-name keyed. External
/// injected fields (`cost_center`, `store_code`, `run_id`, `run_date`,
/// `source_system`) are merged in by the caller before this row is staged.
#[derive(Debug, Clone, Default)]
pub struct ParsedRow {
    pub fields: BTreeMap<String, FieldValue>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Null,
}

impl ParsedRow {
    pub fn text(&self, field: &str) -> Option<&str> {
        match self.fields.get(field) {
            Some(FieldValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        match self.fields.get(field) {
            Some(FieldValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        match self.fields.get(field) {
            Some(FieldValue::Date(d)) => Some(*d),
            _ => None,
        }
    }
}

/// Normalizes a raw header label for case/whitespace-insensitive matching
/// against the canonical column map.
pub fn normalize_header(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace([' ', '_'], "")
}

/// A column in the canonical schema: its normalized header aliases, the
/// canonical field name, whether it is part of the dedup key (failing a row
/// on parse error), and how to coerce it.
pub struct ColumnSpec {
    pub aliases: &'static [&'static str],
    pub canonical: &'static str,
    pub kind: ColumnKind,
    pub is_key: bool,
}

#[derive(Clone, Copy)]
pub enum ColumnKind {
    Text,
    Numeric,
    Date,
    Phone,
}

/// Strip thousands separators and tolerate a trailing `.00`; unparseable
/// values default to `0.0` with a warning rather than failing the row.
pub fn coerce_numeric(raw: &str, warnings: &mut Vec<String>, field: &str) -> f64 {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-').collect();
    cleaned.parse().unwrap_or_else(|_| {
        warnings.push(format!("unparseable numeric value in {field}: '{raw}'"));
        0.0
    })
}

/// Strip `+91`, spaces, and hyphens; accept exactly 10 digits, else `None`.
pub fn coerce_phone(raw: &str) -> Option<String> {
    let digits: String = raw
        .trim_start_matches("+91")
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    if digits.len() == 10 { Some(digits) } else { None }
}

/// Parse a date cell in the operational timezone. Accepts a handful of
/// common spreadsheet date text shapes; callers own whether failure to parse
/// is fatal for the row (key columns) or a null-with-warning (non-key).
pub fn coerce_date(raw: &str, _tz: Tz) -> Option<NaiveDate> {
    const FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%d %b %Y", "%m/%d/%Y"];
    FORMATS.iter().find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
}

/// `order_date + 3 days`, the TD orders default due date used both to fill
/// an absent `Due Date` column and as the baseline for `due_days_delta`.
pub fn default_due_date(order_date: NaiveDate) -> NaiveDate {
    order_date + chrono::Duration::days(3)
}

/// Production-row derived fields computed after parsing: the baseline due
/// date, the signed delta against the actual due date, its classification,
/// and the processing deadline.
pub struct DerivedDueFields {
    pub default_due_date: NaiveDate,
    pub due_days_delta: i64,
    pub due_date_flag: DueDateFlag,
    pub complete_processing_by: NaiveDate,
}

pub fn derive_due_fields(order_date: NaiveDate, due_date: NaiveDate) -> DerivedDueFields {
    let default_due = default_due_date(order_date);
    let delta = (due_date - default_due).num_days();
    DerivedDueFields {
        default_due_date: default_due,
        due_days_delta: delta,
        due_date_flag: DueDateFlag::from_delta_days(delta),
        complete_processing_by: default_due - chrono::Duration::days(1),
    }
}

/// `tax_amount = cgst + sgst` for UC orders rows.
pub fn uc_tax_amount(cgst: f64, sgst: f64) -> f64 {
    cgst + sgst
}

/// Read an xlsx byte buffer, locate the header row (first non-empty row),
/// normalize headers, and map each subsequent row through `columns`.
/// Missing required (non-optional) columns fail the whole workbook with
/// `KindSchema`; unrecognized columns are ignored with a per-workbook
/// warning collected into the first row's warning list.
pub fn parse_workbook(
    bytes: &[u8],
    columns: &[ColumnSpec],
    tz: Tz,
) -> Result<Vec<ParsedRow>, SyncError> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook: Xlsx<_> = open_workbook_from_rs(cursor)
        .map_err(|e| SyncError::with_source(SyncErrorKind::Parse, "failed to open workbook", e))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| SyncError::schema("workbook has no sheets"))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| SyncError::with_source(SyncErrorKind::Parse, "failed to read worksheet", e))?;

    let mut rows = range.rows();
    let header_row = rows.next().ok_or_else(|| SyncError::schema("workbook has no header row"))?;
    let normalized_headers: Vec<String> =
        header_row.iter().map(|c| normalize_header(&c.to_string())).collect();

    let mut column_index = BTreeMap::new();
    for spec in columns {
        let found = spec
            .aliases
            .iter()
            .find_map(|alias| normalized_headers.iter().position(|h| h == alias));
        match found {
            Some(idx) => {
                column_index.insert(spec.canonical, idx);
            }
            None if spec.is_key => {
                return Err(SyncError::schema(format!(
                    "required column '{}' not found in workbook headers",
                    spec.canonical
                )));
            }
            None => {}
        }
    }

    let mut parsed_rows = Vec::new();
    for raw_row in rows {
        let mut row = ParsedRow::default();
        let mut key_parse_failed = false;

        for spec in columns {
            let Some(&idx) = column_index.get(spec.canonical) else { continue };
            let Some(cell) = raw_row.get(idx) else { continue };
            let raw_text = cell.to_string();

            let value = match spec.kind {
                ColumnKind::Text => FieldValue::Text(raw_text.trim().to_string()),
                ColumnKind::Numeric => {
                    FieldValue::Number(coerce_numeric(&raw_text, &mut row.warnings, spec.canonical))
                }
                ColumnKind::Phone => match coerce_phone(&raw_text) {
                    Some(p) => FieldValue::Text(p),
                    None => {
                        if spec.is_key {
                            key_parse_failed = true;
                        } else {
                            row.warnings.push(format!("invalid phone in {}: '{raw_text}'", spec.canonical));
                        }
                        FieldValue::Null
                    }
                },
                ColumnKind::Date => match coerce_date(&raw_text, tz) {
                    Some(d) => FieldValue::Date(d),
                    None => {
                        if spec.is_key {
                            key_parse_failed = true;
                        } else {
                            row.warnings.push(format!("invalid date in {}: '{raw_text}'", spec.canonical));
                        }
                        FieldValue::Null
                    }
                },
            };
            row.fields.insert(spec.canonical.to_string(), value);
        }

        if key_parse_failed {
            continue;
        }
        parsed_rows.push(row);
    }

    Ok(parsed_rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_header_is_case_and_space_insensitive() {
        assert_eq!(normalize_header("Order Number"), "ordernumber");
        assert_eq!(normalize_header("  ORDER_NUMBER "), "ordernumber");
    }

    #[test]
    fn coerce_numeric_strips_separators_and_defaults_to_zero() {
        let mut warnings = Vec::new();
        assert_eq!(coerce_numeric("1,234.00", &mut warnings, "amount"), 1234.00);
        assert!(warnings.is_empty());

        let mut warnings = Vec::new();
        assert_eq!(coerce_numeric("not-a-number-$$$", &mut warnings, "amount"), 0.0);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn coerce_phone_accepts_only_ten_digits_after_stripping() {
        assert_eq!(coerce_phone("+91 98765 43210"), Some("9876543210".to_string()));
        assert_eq!(coerce_phone("12345"), None);
    }

    #[test]
    fn coerce_date_tries_multiple_formats() {
        let tz: Tz = "Asia/Kolkata".parse().unwrap();
        assert_eq!(
            coerce_date("2025-03-01", tz),
            NaiveDate::from_ymd_opt(2025, 3, 1)
        );
        assert_eq!(
            coerce_date("01/03/2025", tz),
            NaiveDate::from_ymd_opt(2025, 3, 1)
        );
        assert_eq!(coerce_date("garbage", tz), None);
    }

    #[test]
    fn default_due_date_is_three_days_after_order_date() {
        let order_date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert_eq!(default_due_date(order_date), NaiveDate::from_ymd_opt(2025, 3, 4).unwrap());
    }

    #[test]
    fn derive_due_fields_classifies_extended_and_express() {
        let order_date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let default_due = default_due_date(order_date);

        let extended = derive_due_fields(order_date, default_due + chrono::Duration::days(2));
        assert_eq!(extended.due_date_flag, DueDateFlag::Extended);
        assert_eq!(extended.due_days_delta, 2);

        let express = derive_due_fields(order_date, default_due - chrono::Duration::days(1));
        assert_eq!(express.due_date_flag, DueDateFlag::Express);

        let normal = derive_due_fields(order_date, default_due);
        assert_eq!(normal.due_date_flag, DueDateFlag::Normal);
        assert_eq!(normal.complete_processing_by, default_due - chrono::Duration::days(1));
    }

    #[test]
    fn uc_tax_amount_sums_cgst_and_sgst() {
        assert_eq!(uc_tax_amount(9.0, 9.0), 18.0);
    }
}
