use crate::ingest::Sample;
use crate::telemetry::DEFAULT_TEMPERATURE;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::{Cursor, Read};

const VOLTAGE: (&str, &str) = ("Voltage", "voltage_measured");
const CURRENT: (&str, &str) = ("Current", "current_measured");
const TEMPERATURE: (&str, &str) = ("Temperature", "temperature_measured");

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("unsupported file type {0:?}; expected .csv, .xlsx or .xls")]
    UnsupportedFileType(String),
    #[error("multipart field \"file\" is missing")]
    MissingFile,
    #[error("upload exceeds the size limit: {0}")]
    TooLarge(String),
    #[error("failed to read upload: {0}")]
    Multipart(String),
    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to read workbook: {0}")]
    Excel(#[from] calamine::Error),
    #[error("row {row}: {column} is not a finite number: {raw:?}")]
    InvalidNumber {
        row: usize,
        column: &'static str,
        raw: String,
    },
}

/// Values used for a column that is absent from the file or a cell that is empty.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColumnDefaults {
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
}

impl ColumnDefaults {
    /// Defaults for uploaded batches.
    pub const UPLOAD: Self = Self {
        voltage: 0.0,
        current: 0.0,
        temperature: DEFAULT_TEMPERATURE,
    };

    /// Defaults for replaying a recorded discharge onto the bus.
    pub const REPLAY: Self = Self {
        voltage: 3.7,
        current: 0.0,
        temperature: DEFAULT_TEMPERATURE,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TabularFormat {
    Csv,
    Excel,
}

impl TabularFormat {
    pub fn from_filename(filename: &str) -> Result<Self, UploadError> {
        let lower = filename.trim().to_ascii_lowercase();
        if lower.ends_with(".csv") {
            Ok(Self::Csv)
        } else if [".xlsx", ".xlsm", ".xls"].iter().any(|ext| lower.ends_with(ext)) {
            Ok(Self::Excel)
        } else {
            Err(UploadError::UnsupportedFileType(filename.to_string()))
        }
    }
}

/// Read at most `max_rows` samples from a headered table. `voltage_measured`,
/// `current_measured` and `temperature_measured` stand in for the canonical columns when
/// those are missing. Every returned row has been validated.
pub fn read_samples(
    format: TabularFormat,
    bytes: Vec<u8>,
    defaults: ColumnDefaults,
    max_rows: usize,
) -> Result<Vec<Sample>, UploadError> {
    match format {
        TabularFormat::Csv => read_csv_samples(bytes.as_slice(), defaults, max_rows),
        TabularFormat::Excel => read_excel_samples(bytes, defaults, max_rows),
    }
}

pub fn read_csv_samples<R: Read>(
    reader: R,
    defaults: ColumnDefaults,
    max_rows: usize,
) -> Result<Vec<Sample>, UploadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let columns = ColumnMap::from_headers(reader.headers()?.iter());

    let mut samples = Vec::new();
    for (idx, record) in reader.records().take(max_rows).enumerate() {
        let record = record?;
        samples.push(columns.sample(idx + 1, defaults, |col| {
            record.get(col).map_or(Cell::Empty, Cell::Text)
        })?);
    }
    Ok(samples)
}

/// First worksheet of an `.xlsx`/`.xls` workbook, first row as header.
pub fn read_excel_samples(
    bytes: Vec<u8>,
    defaults: ColumnDefaults,
    max_rows: usize,
) -> Result<Vec<Sample>, UploadError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range?,
        None => return Ok(Vec::new()),
    };
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(Vec::new());
    };
    let names: Vec<String> = header.iter().map(|cell| cell.to_string()).collect();
    let columns = ColumnMap::from_headers(names.iter().map(String::as_str));

    rows.take(max_rows)
        .enumerate()
        .map(|(idx, row)| {
            columns.sample(idx + 1, defaults, |col| {
                row.get(col).map_or(Cell::Empty, Cell::from_excel)
            })
        })
        .collect()
}

/// One table cell, independent of the file format it came from.
enum Cell<'a> {
    Empty,
    Text(&'a str),
    Number(f64),
    Other(String),
}

impl<'a> Cell<'a> {
    fn from_excel(data: &'a Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::Float(value) => Cell::Number(*value),
            Data::Int(value) => Cell::Number(*value as f64),
            Data::String(raw) => Cell::Text(raw),
            other => Cell::Other(other.to_string()),
        }
    }

    fn value(&self, row: usize, column: &'static str, default: f64) -> Result<f64, UploadError> {
        let invalid = |raw: &str| UploadError::InvalidNumber {
            row,
            column,
            raw: raw.to_string(),
        };
        match self {
            Cell::Empty => Ok(default),
            Cell::Text(raw) => {
                let raw = raw.trim();
                if raw.is_empty() {
                    return Ok(default);
                }
                raw.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| invalid(raw))
            }
            Cell::Number(value) if value.is_finite() => Ok(*value),
            Cell::Number(value) => Err(invalid(&value.to_string())),
            Cell::Other(raw) => Err(invalid(raw)),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct ColumnMap {
    voltage: Option<usize>,
    current: Option<usize>,
    temperature: Option<usize>,
}

impl ColumnMap {
    fn from_headers<'h>(headers: impl Iterator<Item = &'h str>) -> Self {
        let headers: Vec<&str> = headers.map(str::trim).collect();
        let find = |(canonical, measured): (&str, &str)| {
            let position = |name: &str| headers.iter().position(|h| *h == name);
            position(canonical).or_else(|| position(measured))
        };
        Self {
            voltage: find(VOLTAGE),
            current: find(CURRENT),
            temperature: find(TEMPERATURE),
        }
    }

    fn sample<'c>(
        &self,
        row: usize,
        defaults: ColumnDefaults,
        cell: impl Fn(usize) -> Cell<'c>,
    ) -> Result<Sample, UploadError> {
        let read = |column: Option<usize>, name: &'static str, default: f64| match column {
            Some(idx) => cell(idx).value(row, name, default),
            None => Ok(default),
        };
        Ok(Sample::new(
            read(self.voltage, VOLTAGE.0, defaults.voltage)?,
            read(self.current, CURRENT.0, defaults.current)?,
            read(self.temperature, TEMPERATURE.0, defaults.temperature)?,
        ))
    }
}
