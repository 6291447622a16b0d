//! Row parser for tabular price entries
//!
//! The first line of an entry is always a header. Data rows carry five
//! fields, by default in the order
//!
//! ```text
//! productID, name, category, price, createdAt
//! ```
//!
//! When the header names all five columns with known names (for instance the
//! `id,created_at,name,category,price` header written by the export), columns
//! are located by header position instead, so exported files can be imported
//! back. Any other header is accepted and ignored.
//!
//! Parsing is lazy: [`parse`] returns an iterator that reads one record per
//! step and reports every row either as a [`PriceRecord`] or a [`RowError`].
//! Row errors never end the iteration, except [`RowError::Unreadable`], after
//! which the underlying stream has nothing more to give.

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::NaiveDate;
use csv::{StringRecord, StringRecordsIntoIter, Trim};
use prices_common::{PriceRecord, PRICE_SCALE};
use std::io::Read;
use std::str::FromStr;
use thiserror::Error;

/// Number of fields in a data row
pub const FIELD_COUNT: usize = 5;

/// Date format of the `createdAt` column
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Digits allowed before the decimal point, matching `NUMERIC(14,2)`
pub const MAX_PRICE_INTEGER_DIGITS: usize = 12;

/// Digits allowed after the decimal point before rounding
pub const MAX_PRICE_FRACTION_DIGITS: usize = 10;

/// Why a single row was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("malformed row: {0}")]
    Malformed(String),

    #[error("invalid product id '{0}'")]
    InvalidId(String),

    #[error("invalid price '{0}'")]
    InvalidPrice(String),

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    /// The byte stream itself failed (e.g. corrupt compressed data)
    #[error("entry is unreadable: {0}")]
    Unreadable(String),
}

impl RowError {
    /// Whether the error ends the entry rather than a single row
    pub fn is_fatal(&self) -> bool {
        matches!(self, RowError::Unreadable(_))
    }
}

/// Field positions within a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub id: usize,
    pub name: usize,
    pub category: usize,
    pub price: usize,
    pub created_at: usize,
}

impl ColumnLayout {
    /// `productID, name, category, price, createdAt`
    pub const CANONICAL: ColumnLayout = ColumnLayout {
        id: 0,
        name: 1,
        category: 2,
        price: 3,
        created_at: 4,
    };

    /// Locate columns by header names. `None` unless exactly the five known
    /// columns are present.
    pub fn from_header(header: &StringRecord) -> Option<Self> {
        if header.len() != FIELD_COUNT {
            return None;
        }

        let mut slots: [Option<usize>; FIELD_COUNT] = [None; FIELD_COUNT];
        for (position, raw) in header.iter().enumerate() {
            let column = normalize_header(raw);
            let slot = match column.as_str() {
                "id" | "product_id" | "productid" => 0,
                "name" => 1,
                "category" => 2,
                "price" => 3,
                "created_at" | "createdat" | "create_date" | "date" => 4,
                _ => return None,
            };
            if slots[slot].replace(position).is_some() {
                return None;
            }
        }

        Some(ColumnLayout {
            id: slots[0]?,
            name: slots[1]?,
            category: slots[2]?,
            price: slots[3]?,
            created_at: slots[4]?,
        })
    }
}

fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .trim()
        .to_ascii_lowercase()
        .replace([' ', '-'], "_")
}

/// Lazy row iterator over one tabular entry
pub struct Rows<R: Read> {
    records: Option<StringRecordsIntoIter<R>>,
    layout: ColumnLayout,
    /// Header failure to report before anything else
    pending: Option<RowError>,
    /// Rows read so far, header excluded
    rows_read: u64,
}

/// Start parsing `reader`. The header is consumed immediately.
pub fn parse<R: Read>(reader: R) -> Rows<R> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let (layout, pending) = match csv_reader.headers() {
        Ok(header) => (
            ColumnLayout::from_header(header).unwrap_or(ColumnLayout::CANONICAL),
            None,
        ),
        Err(err) if is_io_error(&err) => (ColumnLayout::CANONICAL, Some(unreadable(err))),
        Err(err) => {
            // A broken header line is still just the header; keep going
            tracing::debug!(error = %err, "Ignoring undecodable header line");
            (ColumnLayout::CANONICAL, None)
        },
    };

    let records = match pending {
        Some(_) => None,
        None => Some(csv_reader.into_records()),
    };

    Rows {
        records,
        layout,
        pending,
        rows_read: 0,
    }
}

impl<R: Read> Rows<R> {
    pub fn layout(&self) -> ColumnLayout {
        self.layout
    }
}

impl<R: Read> Iterator for Rows<R> {
    /// (1-based line number in the entry, outcome)
    type Item = (u64, Result<PriceRecord, RowError>);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending.take() {
            return Some((1, Err(err)));
        }

        let records = self.records.as_mut()?;
        let next = records.next()?;
        self.rows_read += 1;

        match next {
            Ok(record) => {
                let line = record
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(self.rows_read + 1);
                Some((line, parse_record(&record, &self.layout)))
            },
            Err(err) => {
                let line = err
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(self.rows_read + 1);
                if is_io_error(&err) {
                    self.records = None;
                    Some((line, Err(unreadable(err))))
                } else {
                    Some((line, Err(RowError::Malformed(err.to_string()))))
                }
            },
        }
    }
}

fn is_io_error(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(_))
}

fn unreadable(err: csv::Error) -> RowError {
    RowError::Unreadable(err.to_string())
}

/// Validate one data row against `layout`
pub fn parse_record(record: &StringRecord, layout: &ColumnLayout) -> Result<PriceRecord, RowError> {
    if record.len() != FIELD_COUNT {
        return Err(RowError::Malformed(format!(
            "expected {} fields, found {}",
            FIELD_COUNT,
            record.len()
        )));
    }

    let field = |index: usize| record.get(index).map(str::trim).unwrap_or_default();

    let raw_id = field(layout.id);
    let id = raw_id
        .parse::<i64>()
        .ok()
        .filter(|id| *id >= 0)
        .ok_or_else(|| RowError::InvalidId(raw_id.to_string()))?;

    let name = field(layout.name);
    if name.is_empty() {
        return Err(RowError::Malformed("name is empty".to_string()));
    }

    let category = field(layout.category);
    if category.is_empty() {
        return Err(RowError::Malformed("category is empty".to_string()));
    }

    let raw_price = field(layout.price);
    let price = parse_price(raw_price).ok_or_else(|| RowError::InvalidPrice(raw_price.to_string()))?;

    let raw_date = field(layout.created_at);
    let created_at =
        parse_date(raw_date).ok_or_else(|| RowError::InvalidDate(raw_date.to_string()))?;

    Ok(PriceRecord::new(id, created_at, name, category, price))
}

fn is_digits(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

/// Plain `digits[.digits]` that still fits the price column once rounded
fn parse_price(raw: &str) -> Option<BigDecimal> {
    let (integer, fraction) = match raw.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (raw, None),
    };

    if !is_digits(integer) || integer.len() > MAX_PRICE_INTEGER_DIGITS {
        return None;
    }
    if let Some(fraction) = fraction {
        if !is_digits(fraction) || fraction.len() > MAX_PRICE_FRACTION_DIGITS {
            return None;
        }
    }

    let price = BigDecimal::from_str(raw)
        .ok()?
        .with_scale_round(PRICE_SCALE, RoundingMode::HalfEven);

    // Rounding up can carry into a thirteenth integer digit
    let limit = BigDecimal::from(10_i64.pow(MAX_PRICE_INTEGER_DIGITS as u32));
    (price < limit).then_some(price)
}

/// Exactly `YYYY-MM-DD`, zero-padded and unsigned
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let bytes = raw.as_bytes();
    let shaped = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });

    if !shaped {
        return None;
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}
