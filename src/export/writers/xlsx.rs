//! Excel workbook document
//!
//! Sheets share one `rust_xlsxwriter` workbook behind a mutex; each sheet
//! task locks it only for the duration of a single row. The workbook is
//! serialized and written to the output when the document is closed.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::format::{Fixed, Item, Numeric, Pad, StrftimeItems};
use chrono::{Datelike, NaiveDateTime};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Result, SinkError};
use crate::export::converter::{Cell, Converter, DateLayout};

use super::sheet::{Document, Sheet};

/// Largest integer magnitude a spreadsheet cell stores without losing precision
const MAX_EXACT_INT: u64 = 1 << 53;

/// Whether `n` survives the trip through a floating-point cell
fn exact_in_cell(n: i64) -> bool {
    n.unsigned_abs() <= MAX_EXACT_INT
}

/// Excel number format matching a strftime layout, field order included.
///
/// Layouts using items Excel has no code for get an ISO date, with the time
/// of day when the layout shows one.
fn excel_date_format(layout: &DateLayout) -> String {
    let pattern = layout.pattern();
    let mut format = String::new();
    for item in StrftimeItems::new(pattern) {
        let code = match item {
            Item::Literal(s) | Item::Space(s) => Some(escape_literal(s)),
            Item::OwnedLiteral(s) | Item::OwnedSpace(s) => Some(escape_literal(&s)),
            Item::Numeric(numeric, pad) => numeric_code(&numeric, pad).map(str::to_string),
            Item::Fixed(fixed) => fixed_code(&fixed).map(str::to_string),
            _ => None,
        };
        match code {
            Some(code) => format.push_str(&code),
            None => return iso_format(pattern).to_string(),
        }
    }
    format
}

fn numeric_code(numeric: &Numeric, pad: Pad) -> Option<&'static str> {
    let padded = pad == Pad::Zero;
    Some(match numeric {
        Numeric::Year => "yyyy",
        Numeric::YearMod100 => "yy",
        Numeric::Month if padded => "mm",
        Numeric::Month => "m",
        Numeric::Day if padded => "dd",
        Numeric::Day => "d",
        Numeric::Hour | Numeric::Hour12 if padded => "hh",
        Numeric::Hour | Numeric::Hour12 => "h",
        Numeric::Minute if padded => "mm",
        Numeric::Minute => "m",
        Numeric::Second if padded => "ss",
        Numeric::Second => "s",
        _ => return None,
    })
}

fn fixed_code(fixed: &Fixed) -> Option<&'static str> {
    Some(match fixed {
        Fixed::ShortMonthName => "mmm",
        Fixed::LongMonthName => "mmmm",
        Fixed::ShortWeekdayName => "ddd",
        Fixed::LongWeekdayName => "dddd",
        Fixed::UpperAmPm | Fixed::LowerAmPm => "AM/PM",
        Fixed::Nanosecond3 => ".000",
        _ => return None,
    })
}

/// Excel reads letters as codes; anything but plain punctuation is escaped
fn escape_literal(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if !matches!(c, '-' | '/' | ':' | '.' | ',' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn iso_format(pattern: &str) -> &'static str {
    let has_time = ["%H", "%I", "%M", "%S", "%T", "%R", "%X", "%c"]
        .iter()
        .any(|spec| pattern.contains(spec));
    if has_time { "yyyy-mm-dd hh:mm:ss" } else { "yyyy-mm-dd" }
}

/// Worksheet column index for position `col`
fn column_index(col: usize) -> std::result::Result<u16, String> {
    u16::try_from(col).map_err(|_| format!("column {} is beyond the sheet width", col + 1))
}

fn lock(workbook: &Mutex<Workbook>) -> std::result::Result<MutexGuard<'_, Workbook>, String> {
    workbook.lock().map_err(|_| "workbook lock poisoned".to_string())
}

/// Workbook written to an async output on close
pub struct XlsxDocument<W: AsyncWrite + Unpin + Send> {
    workbook: Arc<Mutex<Workbook>>,
    output: W,
    date_format: Format,
    sheets: usize,
    closed: bool,
}

impl<W: AsyncWrite + Unpin + Send> XlsxDocument<W> {
    /// Create an empty workbook
    ///
    /// # Arguments
    /// * `output` - Destination of the finished `.xlsx` bytes
    /// * `layout` - Date layout, mapped to the closest Excel date format
    pub fn new(output: W, layout: &DateLayout) -> Self {
        Self {
            workbook: Arc::new(Mutex::new(Workbook::new())),
            output,
            date_format: Format::new().set_num_format(&excel_date_format(layout)),
            sheets: 0,
            closed: false,
        }
    }

    /// Recover the output writer
    pub fn into_inner(self) -> W {
        self.output
    }

    fn add_sheet(&mut self, name: &str, header: &[String]) -> std::result::Result<u32, String> {
        let mut workbook = lock(&self.workbook)?;
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(name).map_err(|e| e.to_string())?;

        if header.iter().all(|label| label.is_empty()) {
            return Ok(0);
        }
        let bold = Format::new().set_bold();
        for (col, label) in header.iter().enumerate() {
            worksheet
                .write_string_with_format(0, column_index(col)?, label, &bold)
                .map_err(|e| e.to_string())?;
        }
        Ok(1)
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Document for XlsxDocument<W> {
    async fn new_sheet(&mut self, name: &str, header: &[String]) -> Result<Box<dyn Sheet>> {
        let next_row = self.add_sheet(name, header).map_err(|cause| SinkError::NewSheet {
            sheet: name.to_string(),
            cause,
        })?;
        let index = self.sheets;
        self.sheets += 1;
        debug!("Created sheet {} ({:?})", index, name);

        Ok(Box::new(XlsxSheet {
            workbook: Arc::clone(&self.workbook),
            index,
            name: name.to_string(),
            next_row,
            date_format: self.date_format.clone(),
        }))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let buffer = {
            let mut workbook = lock(&self.workbook).map_err(SinkError::Close)?;
            workbook.save_to_buffer().map_err(|e| SinkError::Close(e.to_string()))?
        };
        self.output.write_all(&buffer).await.map_err(SinkError::Write)?;
        self.output.shutdown().await.map_err(SinkError::Write)?;

        debug!("Wrote workbook: {} sheets, {} bytes", self.sheets, buffer.len());
        Ok(())
    }
}

struct XlsxSheet {
    workbook: Arc<Mutex<Workbook>>,
    index: usize,
    name: String,
    next_row: u32,
    date_format: Format,
}

impl XlsxSheet {
    fn write_cell(&self, worksheet: &mut Worksheet, col: u16, cell: Cell<'_>) -> std::result::Result<(), XlsxError> {
        let row = self.next_row;
        match cell {
            Cell::Empty => {}
            Cell::Text(s) => {
                worksheet.write_string(row, col, s)?;
            }
            Cell::Int(n) if exact_in_cell(n) => {
                worksheet.write_number(row, col, n as f64)?;
            }
            Cell::Int(n) => {
                worksheet.write_string(row, col, n.to_string())?;
            }
            Cell::Float(f) if f.is_finite() => {
                worksheet.write_number(row, col, f)?;
            }
            Cell::Float(f) => {
                worksheet.write_string(row, col, f.to_string())?;
            }
            // Excel dates start at 1900
            Cell::Time(t) if t.year() < 1900 => {
                worksheet.write_string(row, col, format_plain(&t))?;
            }
            Cell::Time(t) => {
                worksheet.write_datetime_with_format(row, col, &t, &self.date_format)?;
            }
        }
        Ok(())
    }
}

fn format_plain(value: &NaiveDateTime) -> String {
    value.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[async_trait]
impl Sheet for XlsxSheet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append_row(&mut self, row: &[Converter]) -> Result<()> {
        let append_error = |cause: String| SinkError::Append {
            sheet: self.name.clone(),
            cause,
        };

        {
            let mut workbook = lock(&self.workbook).map_err(append_error)?;
            let worksheet = workbook
                .worksheet_from_index(self.index)
                .map_err(|e| append_error(e.to_string()))?;
            for (col, converter) in row.iter().enumerate() {
                let col = column_index(col).map_err(append_error)?;
                self.write_cell(worksheet, col, converter.cell())
                    .map_err(|e| append_error(e.to_string()))?;
            }
        }

        self.next_row += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        debug!("Closed sheet {:?} after {} rows", self.name, self.next_row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn excel(pattern: &str) -> String {
        excel_date_format(&DateLayout::new(pattern).unwrap())
    }

    #[test]
    fn test_excel_date_format() {
        assert_eq!(excel_date_format(&DateLayout::default()), "yyyy-mm-dd");
        assert_eq!(excel("%Y-%m-%d %H:%M:%S"), "yyyy-mm-dd hh:mm:ss");
        assert_eq!(excel("%F"), "yyyy-mm-dd");
    }

    #[test]
    fn test_excel_date_format_keeps_field_order() {
        assert_eq!(excel("%d.%m.%Y"), "dd.mm.yyyy");
        assert_eq!(excel("%m/%d/%y %I:%M %p"), "mm/dd/yy hh:mm AM/PM");
        assert_eq!(excel("%d %B %Y"), "dd mmmm yyyy");
        assert_eq!(excel("%Y-%m-%dT%H:%M"), "yyyy-mm-dd\\Thh:mm");
    }

    #[test]
    fn test_excel_date_format_falls_back_to_iso() {
        assert_eq!(excel("%Y/%j"), "yyyy-mm-dd");
        assert_eq!(excel("%s %H"), "yyyy-mm-dd hh:mm:ss");
    }

    #[test]
    fn test_exact_in_cell() {
        assert!(exact_in_cell(0));
        assert!(exact_in_cell(1 << 53));
        assert!(exact_in_cell(-(1 << 53)));
        assert!(!exact_in_cell((1 << 53) + 1));
        assert!(!exact_in_cell(i64::MAX));
        assert!(!exact_in_cell(i64::MIN));
    }

    #[tokio::test]
    async fn test_extreme_integers_written_as_text() {
        let mut doc = XlsxDocument::new(Vec::new(), &DateLayout::default());
        let mut sheet = doc.new_sheet("Big", &["N".to_string()]).await.unwrap();
        for n in [i64::MIN, i64::MAX, -1] {
            sheet.append_row(&[Converter::Int(Some(n))]).await.unwrap();
        }
        doc.close().await.unwrap();
        assert!(doc.into_inner().starts_with(b"PK"));
    }

    #[tokio::test]
    async fn test_row_wider_than_sheet_rejected() {
        let mut doc = XlsxDocument::new(Vec::new(), &DateLayout::default());
        let mut sheet = doc.new_sheet("Wide", &[]).await.unwrap();
        let row = vec![Converter::Int(None); usize::from(u16::MAX) + 2];
        let err = sheet.append_row(&row).await.unwrap_err();
        assert!(matches!(err, crate::error::DumpError::Sink(SinkError::Append { .. })));
    }

    #[tokio::test]
    async fn test_workbook_written_on_close() {
        let mut out = Vec::new();
        {
            let mut doc = XlsxDocument::new(&mut out, &DateLayout::default());
            let header = vec!["ID".to_string(), "WHEN".to_string()];
            let mut sheet = doc.new_sheet("Users", &header).await.unwrap();

            let when = NaiveDate::from_ymd_opt(2024, 2, 29)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap();
            let factory = crate::export::converter::ConverterFactory::sheet(Arc::new(DateLayout::default()));
            let mut row = vec![
                factory.select(&crate::source::ScanType::Integer),
                factory.select(&crate::source::ScanType::Time),
            ];
            crate::source::scan_row(
                vec![crate::source::Value::Int(1), crate::source::Value::Time(when)],
                &mut row,
            )
            .unwrap();
            sheet.append_row(&row).await.unwrap();
            sheet.close().await.unwrap();
            doc.close().await.unwrap();
        }

        // xlsx files are zip archives
        assert!(out.starts_with(b"PK"));
    }

    #[tokio::test]
    async fn test_invalid_sheet_name_rejected() {
        let mut doc = XlsxDocument::new(Vec::new(), &DateLayout::default());
        let err = doc.new_sheet("bad[name]", &[]).await.err().unwrap();
        assert!(matches!(err, crate::error::DumpError::Sink(SinkError::NewSheet { .. })));
    }

    #[tokio::test]
    async fn test_sheets_without_header_start_at_first_row() {
        let mut doc = XlsxDocument::new(Vec::new(), &DateLayout::default());
        let header = vec![String::new(), String::new()];
        let mut sheet = doc.new_sheet("Sheet1", &header).await.unwrap();
        sheet.append_row(&[Converter::Int(Some(1)), Converter::Float(Some(f64::NAN))]).await.unwrap();
        doc.close().await.unwrap();
        assert!(doc.into_inner().starts_with(b"PK"));
    }
}
