//! Column converters
//!
//! A converter is selected once per result column from the column's scan type
//! and then reused for every row of the cursor: the cursor scans each cell into
//! the converter's slot, and sinks read the slot back either as text (CSV) or
//! as a typed cell (sheets).

use std::borrow::Cow;
use std::fmt::Write;
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::ConfigError;
use crate::source::{ColumnDescriptor, ScanType, Value};

/// Layout used when rendering a time value that falls back to text
const FALLBACK_TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// Date layout together with its precomputed "maximum date" sentinel.
///
/// The sentinel is the layout rendered for 9999-12-31 23:59:59, wrapped in
/// double quotes. It replaces any time value whose year is negative, which is
/// how drivers report an open-ended upper date bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateLayout {
    pattern: String,
    sentinel: String,
}

impl DateLayout {
    /// Default layout (ISO date)
    pub const DEFAULT: &'static str = "%Y-%m-%d";

    /// Validate a strftime layout and derive its sentinel
    ///
    /// # Arguments
    /// * `pattern` - chrono strftime layout, e.g. `%Y-%m-%d`
    ///
    /// # Returns
    /// * `Result<Self, ConfigError>` - Layout or an invalid-value error
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            field: "date_format".to_string(),
            value: pattern.to_string(),
        };

        if pattern.is_empty() || StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            return Err(invalid());
        }

        let max = NaiveDate::from_ymd_opt(9999, 12, 31)
            .and_then(|d| d.and_hms_opt(23, 59, 59))
            .ok_or_else(invalid)?;

        // Offset and zone items parse but cannot render a naive value
        let mut sentinel = String::from("\"");
        write!(sentinel, "{}", max.format(pattern)).map_err(|_| invalid())?;
        sentinel.push('"');

        Ok(Self {
            pattern: pattern.to_string(),
            sentinel,
        })
    }

    /// The strftime pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Quoted sentinel, e.g. `"9999-12-31"`
    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// Sentinel without the surrounding quotes
    pub fn sentinel_unquoted(&self) -> &str {
        &self.sentinel[1..self.sentinel.len() - 1]
    }

    /// Render a time value with this layout
    pub fn format(&self, value: &NaiveDateTime) -> String {
        value.format(&self.pattern).to_string()
    }
}

impl Default for DateLayout {
    fn default() -> Self {
        Self {
            pattern: Self::DEFAULT.to_string(),
            sentinel: "\"9999-12-31\"".to_string(),
        }
    }
}

/// Whether a CSV field has to be quoted for `separator`.
///
/// An empty separator never matches; only a double quote or a newline force
/// quoting then.
pub fn needs_quote(separator: &str, field: &str) -> bool {
    (!separator.is_empty() && field.contains(separator)) || field.contains(['"', '\n'])
}

/// Quote a CSV field if needed, doubling inner double quotes
pub fn quote_field<'a>(separator: &str, field: &'a str) -> Cow<'a, str> {
    if needs_quote(separator, field) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Canonical float rendering: shortest decimal that round-trips to the same bits
pub fn format_float(value: f64) -> String {
    format!("{value}")
}

/// Go-style zero time (0001-01-01T00:00:00), which drivers use for "no date"
fn is_zero_time(value: &NaiveDateTime) -> bool {
    value.year() == 1 && value.ordinal() == 1 && value.time() == NaiveTime::MIN
}

/// Converter tag, resolved once per column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterKind {
    String,
    Int,
    Float,
    Time,
    /// Unrecognised scan type handled as a string
    Fallback,
}

impl ConverterKind {
    /// Kind the factory selects for `scan_type`
    pub fn of(scan_type: &ScanType) -> Self {
        match scan_type {
            ScanType::Text => ConverterKind::String,
            ScanType::Float => ConverterKind::Float,
            ScanType::Integer => ConverterKind::Int,
            ScanType::Time => ConverterKind::Time,
            ScanType::Other(_) => ConverterKind::Fallback,
        }
    }

    /// Short name used in scan error snapshots
    pub fn name(self) -> &'static str {
        match self {
            ConverterKind::String => "string",
            ConverterKind::Int => "int",
            ConverterKind::Float => "float",
            ConverterKind::Time => "time",
            ConverterKind::Fallback => "fallback",
        }
    }
}

/// Typed view of a converter's current value, used by sheet writers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    Empty,
    Text(&'a str),
    Int(i64),
    Float(f64),
    Time(NaiveDateTime),
}

/// Number scanned into a fallback slot, kept for typed sheet cells
#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Int(i64),
    Float(f64),
}

/// String slot with its quoting context
#[derive(Debug, Clone)]
pub struct StringSlot {
    value: Option<String>,
    number: Option<Number>,
    /// `None` in sheet context: values pass through unquoted
    separator: Option<Arc<str>>,
    fallback: bool,
}

/// Time slot with its layout and quoting flag
#[derive(Debug, Clone)]
pub struct TimeSlot {
    value: Option<NaiveDateTime>,
    quote: bool,
    layout: Arc<DateLayout>,
}

/// Per-column value holder
#[derive(Debug, Clone)]
pub enum Converter {
    String(StringSlot),
    Int(Option<i64>),
    Float(Option<f64>),
    Time(TimeSlot),
}

impl Converter {
    /// Converter tag
    pub fn kind(&self) -> ConverterKind {
        match self {
            Converter::String(slot) if slot.fallback => ConverterKind::Fallback,
            Converter::String(_) => ConverterKind::String,
            Converter::Int(_) => ConverterKind::Int,
            Converter::Float(_) => ConverterKind::Float,
            Converter::Time(_) => ConverterKind::Time,
        }
    }

    /// Whether the last scanned value was NULL
    pub fn is_null(&self) -> bool {
        match self {
            Converter::String(slot) => slot.value.is_none(),
            Converter::Int(v) => v.is_none(),
            Converter::Float(v) => v.is_none(),
            Converter::Time(slot) => slot.value.is_none(),
        }
    }

    /// Store a scanned value, coercing it to the slot's type.
    ///
    /// The previous value is overwritten in place; the converter itself is
    /// never reallocated between rows.
    pub fn assign(&mut self, value: Value) -> Result<(), String> {
        match self {
            Converter::String(slot) => {
                slot.number = match &value {
                    Value::Int(n) => Some(Number::Int(*n)),
                    Value::Float(f) => Some(Number::Float(*f)),
                    _ => None,
                };
                slot.value = match value {
                    Value::Null => None,
                    Value::Text(s) => Some(s),
                    Value::Int(n) => Some(n.to_string()),
                    Value::Float(f) => Some(format_float(f)),
                    Value::Time(t) => Some(t.format(FALLBACK_TIME_LAYOUT).to_string()),
                };
            }
            Converter::Int(slot) => {
                *slot = match value {
                    Value::Null => None,
                    Value::Int(n) => Some(n),
                    Value::Float(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                        Some(f as i64)
                    }
                    Value::Text(s) => Some(
                        s.trim()
                            .parse::<i64>()
                            .map_err(|e| format!("converting {s:?} to int: {e}"))?,
                    ),
                    other => return Err(format!("cannot scan {other:?} into int")),
                };
            }
            Converter::Float(slot) => {
                *slot = match value {
                    Value::Null => None,
                    Value::Float(f) => Some(f),
                    Value::Int(n) => Some(n as f64),
                    Value::Text(s) => Some(
                        s.trim()
                            .parse::<f64>()
                            .map_err(|e| format!("converting {s:?} to float: {e}"))?,
                    ),
                    other => return Err(format!("cannot scan {other:?} into float")),
                };
            }
            Converter::Time(slot) => {
                slot.value = match value {
                    Value::Null => None,
                    Value::Time(t) => Some(t),
                    other => return Err(format!("unknown scan source {other:?} for time")),
                };
            }
        }
        Ok(())
    }

    /// CSV rendering: null becomes "", strings and dates are quoted as needed
    pub fn render(&self) -> Cow<'_, str> {
        match self {
            Converter::String(slot) => match (&slot.value, &slot.separator) {
                (None, _) => Cow::Borrowed(""),
                (Some(s), Some(sep)) => quote_field(sep, s),
                (Some(s), None) => Cow::Borrowed(s),
            },
            Converter::Time(slot) => slot.render(slot.quote),
            _ => self.render_raw(),
        }
    }

    /// Raw rendering: the value without any CSV quoting
    pub fn render_raw(&self) -> Cow<'_, str> {
        match self {
            Converter::String(slot) => Cow::Borrowed(slot.value.as_deref().unwrap_or("")),
            Converter::Int(v) => v.map_or(Cow::Borrowed(""), |n| Cow::Owned(n.to_string())),
            Converter::Float(v) => v.map_or(Cow::Borrowed(""), |f| Cow::Owned(format_float(f))),
            Converter::Time(slot) => slot.render(false),
        }
    }

    /// Typed cell for sheet writers
    pub fn cell(&self) -> Cell<'_> {
        match self {
            // Untyped columns holding numbers stay numeric
            Converter::String(slot) => match (slot.fallback, slot.number, slot.value.as_deref()) {
                (true, Some(Number::Int(n)), _) => Cell::Int(n),
                (true, Some(Number::Float(f)), _) => Cell::Float(f),
                (_, _, Some(s)) => Cell::Text(s),
                (_, _, None) => Cell::Empty,
            },
            Converter::Int(v) => v.map_or(Cell::Empty, Cell::Int),
            Converter::Float(v) => v.map_or(Cell::Empty, Cell::Float),
            Converter::Time(slot) => match &slot.value {
                None => Cell::Empty,
                Some(t) if is_zero_time(t) => Cell::Empty,
                Some(t) if t.year() < 0 => Cell::Text(slot.layout.sentinel_unquoted()),
                Some(t) => Cell::Time(*t),
            },
        }
    }
}

impl TimeSlot {
    fn render(&self, quote: bool) -> Cow<'_, str> {
        match &self.value {
            None => Cow::Borrowed(""),
            Some(t) if is_zero_time(t) => Cow::Borrowed(""),
            Some(t) if t.year() < 0 => Cow::Borrowed(self.layout.sentinel()),
            Some(t) if quote => Cow::Owned(format!("\"{}\"", self.layout.format(t))),
            Some(t) => Cow::Owned(self.layout.format(t)),
        }
    }
}

/// Selects a converter for each column.
///
/// One factory is built per output context: CSV (with a separator) or sheet
/// (no separator, values are handed over typed).
#[derive(Debug, Clone)]
pub struct ConverterFactory {
    separator: Option<Arc<str>>,
    layout: Arc<DateLayout>,
}

impl ConverterFactory {
    /// Factory for CSV output
    pub fn csv(separator: &str, layout: Arc<DateLayout>) -> Self {
        Self {
            separator: Some(Arc::from(separator)),
            layout,
        }
    }

    /// Factory for sheet output
    pub fn sheet(layout: Arc<DateLayout>) -> Self {
        Self {
            separator: None,
            layout,
        }
    }

    /// Pick the converter for one scan type. Never fails: unknown types
    /// degrade to a string converter.
    pub fn select(&self, scan_type: &ScanType) -> Converter {
        match ConverterKind::of(scan_type) {
            ConverterKind::String => self.string(false),
            ConverterKind::Float => Converter::Float(None),
            ConverterKind::Int => Converter::Int(None),
            ConverterKind::Time => Converter::Time(TimeSlot {
                value: None,
                quote: self.quote_dates(),
                layout: Arc::clone(&self.layout),
            }),
            ConverterKind::Fallback => self.string(true),
        }
    }

    /// Converters for every column, in column order
    pub fn converters(&self, columns: &[ColumnDescriptor]) -> Vec<Converter> {
        columns.iter().map(|c| self.select(&c.scan_type)).collect()
    }

    /// Dates are quoted when the layout itself contains the separator
    pub fn quote_dates(&self) -> bool {
        self.separator
            .as_deref()
            .is_some_and(|sep| !sep.is_empty() && self.layout.pattern().contains(sep))
    }

    fn string(&self, fallback: bool) -> Converter {
        Converter::String(StringSlot {
            value: None,
            number: None,
            separator: self.separator.clone(),
            fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(pattern: &str) -> Arc<DateLayout> {
        Arc::new(DateLayout::new(pattern).unwrap())
    }

    fn datetime(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(10, 20, 30).unwrap()
    }

    /// Reverse the CSV quoting rule
    fn unquote(field: &str) -> String {
        match field.strip_prefix('"').and_then(|f| f.strip_suffix('"')) {
            Some(inner) => inner.replace("\"\"", "\""),
            None => field.to_string(),
        }
    }

    #[test]
    fn test_factory_dispatch() {
        let factory = ConverterFactory::csv(";", layout("%Y-%m-%d"));
        assert_eq!(factory.select(&ScanType::Text).kind(), ConverterKind::String);
        assert_eq!(factory.select(&ScanType::Float).kind(), ConverterKind::Float);
        assert_eq!(factory.select(&ScanType::Integer).kind(), ConverterKind::Int);
        assert_eq!(factory.select(&ScanType::Time).kind(), ConverterKind::Time);
        assert_eq!(
            factory.select(&ScanType::Other("NUMBER".into())).kind(),
            ConverterKind::Fallback
        );
    }

    #[test]
    fn test_quote_field() {
        assert_eq!(quote_field(";", "plain"), "plain");
        assert_eq!(quote_field(";", "Al;ice"), "\"Al;ice\"");
        assert_eq!(quote_field(";", "say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(quote_field(";", "two\nlines"), "\"two\nlines\"");
        assert_eq!(quote_field("", "a;b"), "a;b");
        assert_eq!(quote_field("::", "a:b"), "a:b");
        assert_eq!(quote_field("::", "a::b"), "\"a::b\"");
    }

    #[test]
    fn test_quoted_fields_unquote_to_original() {
        let samples = [
            "a;b",
            "\"",
            "\"\"",
            "line\nbreak",
            ";\"\n",
            "trailing\"",
            "\"leading",
            "mixed \"x\"; y\nz",
        ];
        for s in samples {
            let quoted = quote_field(";", s);
            assert!(quoted.starts_with('"'), "{s:?} should be quoted");
            assert_eq!(unquote(&quoted), s);
        }
    }

    #[test]
    fn test_float_round_trip() {
        let samples = [
            0.0,
            -0.0,
            0.1,
            0.1 + 0.2,
            1.0 / 3.0,
            123456789.125,
            1e21,
            1e-7,
            f64::MAX,
            f64::MIN_POSITIVE,
            5e-324,
            -2.5e300,
        ];
        let mut conv = Converter::Float(None);
        for x in samples {
            conv.assign(Value::Float(x)).unwrap();
            let rendered = conv.render();
            let parsed: f64 = rendered.parse().unwrap();
            assert_eq!(parsed.to_bits(), x.to_bits(), "{x} rendered as {rendered}");
            assert!(!rendered.contains('e'), "{rendered} should not use exponent");
        }
        conv.assign(Value::Float(2.5)).unwrap();
        assert_eq!(conv.render(), "2.5");
    }

    #[test]
    fn test_null_renders_empty_for_every_kind() {
        let factory = ConverterFactory::csv(";", layout("%Y-%m-%d"));
        for scan_type in [
            ScanType::Text,
            ScanType::Float,
            ScanType::Integer,
            ScanType::Time,
            ScanType::Other("CLOB".into()),
        ] {
            let mut conv = factory.select(&scan_type);
            conv.assign(Value::Null).unwrap();
            assert!(conv.is_null());
            assert_eq!(conv.render(), "");
            assert_eq!(conv.render_raw(), "");
            assert_eq!(conv.cell(), Cell::Empty);
        }
    }

    #[test]
    fn test_negative_year_renders_sentinel() {
        let factory = ConverterFactory::csv(";", layout("%Y-%m-%d %H:%M:%S"));
        let mut conv = factory.select(&ScanType::Time);
        for (m, d) in [(1, 1), (6, 15), (12, 31)] {
            conv.assign(Value::Time(datetime(-4712, m, d))).unwrap();
            assert_eq!(conv.render(), "\"9999-12-31 23:59:59\"");
            assert_eq!(conv.render_raw(), "\"9999-12-31 23:59:59\"");
        }
        assert_eq!(conv.cell(), Cell::Text("9999-12-31 23:59:59"));
    }

    #[test]
    fn test_sentinel_follows_layout() {
        assert_eq!(DateLayout::new("%d.%m.%Y").unwrap().sentinel(), "\"31.12.9999\"");
        assert_eq!(DateLayout::new("%Y%m%d%H%M").unwrap().sentinel(), "\"999912312359\"");
        assert_eq!(DateLayout::default(), DateLayout::new(DateLayout::DEFAULT).unwrap());
    }

    #[test]
    fn test_invalid_layout_rejected() {
        assert!(DateLayout::new("%Y-%Q").is_err());
        assert!(DateLayout::new("").is_err());
    }

    #[test]
    fn test_zone_layout_rejected() {
        for pattern in ["%Y-%m-%d %z", "%Y-%m-%d %:z", "%H:%M %Z"] {
            let err = DateLayout::new(pattern).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }), "{pattern}");
        }
    }

    #[test]
    fn test_zero_time_renders_empty() {
        let factory = ConverterFactory::csv(";", layout("%Y-%m-%d"));
        let mut conv = factory.select(&ScanType::Time);
        let zero = NaiveDate::from_ymd_opt(1, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        conv.assign(Value::Time(zero)).unwrap();
        assert_eq!(conv.render(), "");
        assert_eq!(conv.cell(), Cell::Empty);
    }

    #[test]
    fn test_date_quoting_depends_on_separator() {
        let iso = layout("%Y-%m-%d");
        let value = Value::Time(datetime(1990, 5, 17));

        let mut unquoted = ConverterFactory::csv(";", Arc::clone(&iso)).select(&ScanType::Time);
        unquoted.assign(value.clone()).unwrap();
        assert_eq!(unquoted.render(), "1990-05-17");

        let mut quoted = ConverterFactory::csv("-", Arc::clone(&iso)).select(&ScanType::Time);
        quoted.assign(value.clone()).unwrap();
        assert_eq!(quoted.render(), "\"1990-05-17\"");
        assert_eq!(quoted.render_raw(), "1990-05-17");

        let mut sheet = ConverterFactory::sheet(iso).select(&ScanType::Time);
        sheet.assign(value).unwrap();
        assert_eq!(sheet.render(), "1990-05-17");
    }

    #[test]
    fn test_string_contexts() {
        let mut csv = ConverterFactory::csv(";", layout("%Y-%m-%d")).select(&ScanType::Text);
        csv.assign(Value::Text("Al;ice".into())).unwrap();
        assert_eq!(csv.render(), "\"Al;ice\"");
        assert_eq!(csv.render_raw(), "Al;ice");

        let mut sheet = ConverterFactory::sheet(layout("%Y-%m-%d")).select(&ScanType::Text);
        sheet.assign(Value::Text("Al;ice".into())).unwrap();
        assert_eq!(sheet.render(), "Al;ice");
        assert_eq!(sheet.cell(), Cell::Text("Al;ice"));
    }

    #[test]
    fn test_assign_coercions() {
        let mut int = Converter::Int(None);
        int.assign(Value::Text(" 42 ".into())).unwrap();
        assert_eq!(int.render(), "42");
        int.assign(Value::Float(7.0)).unwrap();
        assert_eq!(int.cell(), Cell::Int(7));
        assert!(int.assign(Value::Float(7.5)).is_err());
        assert!(int.assign(Value::Text("x".into())).is_err());

        let mut float = Converter::Float(None);
        float.assign(Value::Int(3)).unwrap();
        assert_eq!(float.render(), "3");

        let mut fallback =
            ConverterFactory::csv(",", layout("%Y-%m-%d")).select(&ScanType::Other("NUMBER".into()));
        fallback.assign(Value::Float(1.5)).unwrap();
        assert_eq!(fallback.render(), "1.5");

        let mut time = ConverterFactory::sheet(layout("%Y-%m-%d")).select(&ScanType::Time);
        assert!(time.assign(Value::Text("2020-01-01".into())).is_err());
    }

    #[test]
    fn test_fallback_sheet_cells_keep_numbers() {
        let factory = ConverterFactory::sheet(layout("%Y-%m-%d"));
        let mut untyped = factory.select(&ScanType::Other("NULL".into()));
        untyped.assign(Value::Int(2)).unwrap();
        assert_eq!(untyped.cell(), Cell::Int(2));
        assert_eq!(untyped.render(), "2");
        untyped.assign(Value::Float(0.5)).unwrap();
        assert_eq!(untyped.cell(), Cell::Float(0.5));
        untyped.assign(Value::Text("x".into())).unwrap();
        assert_eq!(untyped.cell(), Cell::Text("x"));

        let mut text = factory.select(&ScanType::Text);
        text.assign(Value::Int(2)).unwrap();
        assert_eq!(text.cell(), Cell::Text("2"));
    }

    #[test]
    fn test_converter_reused_across_rows() {
        let mut conv = ConverterFactory::csv(";", layout("%Y-%m-%d")).select(&ScanType::Text);
        conv.assign(Value::Text("first".into())).unwrap();
        assert_eq!(conv.render(), "first");
        conv.assign(Value::Null).unwrap();
        assert_eq!(conv.render(), "");
        conv.assign(Value::Text("third".into())).unwrap();
        assert_eq!(conv.render(), "third");
    }
}
