//! Reading message rows out of spreadsheet exports.
//!
//! `.xlsx`/`.xlsm` workbooks are streamed cell by cell on a reader thread, so memory
//! stays bounded by the row buffer no matter how large the sheet is. `.xls`, `.xlsb`
//! and `.ods` have no cell reader in calamine and their first sheet is loaded whole.
//! `.csv` files are read with the csv crate. In every case only the first sheet is
//! read and its first row is a header naming the plan, departure and arrival columns.

use anyhow::{Context, Result, bail};
use calamine::{Data, Range, Reader, Xlsx, open_workbook, open_workbook_auto};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::mpsc;

use crate::flight_plans::RawRecord;
use crate::ingest_config::ColumnNames;

/// Rows buffered between the xlsx reader thread and the feed
const XLSX_ROW_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    /// Office Open XML, streamed
    Xlsx,
    /// Other workbook formats, loaded whole
    Workbook,
    Csv,
}

impl SheetFormat {
    pub fn detect(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "xlsx" | "xlsm" => Ok(SheetFormat::Xlsx),
            "xlsb" | "xls" | "ods" => Ok(SheetFormat::Workbook),
            "csv" => Ok(SheetFormat::Csv),
            other => bail!("Unsupported file type '{}' for {}", other, path.display()),
        }
    }
}

/// Positions of the three message columns in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnIndexes {
    plan: usize,
    departure: usize,
    arrival: usize,
}

impl ColumnIndexes {
    fn from_header<S: AsRef<str>>(header: &[S], columns: &ColumnNames) -> Result<Self> {
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h.as_ref().trim().eq_ignore_ascii_case(name.trim()))
                .with_context(|| format!("Column '{}' not found in header", name))
        };
        Ok(Self {
            plan: find(&columns.plan)?,
            departure: find(&columns.departure)?,
            arrival: find(&columns.arrival)?,
        })
    }

    /// Header cells arrive as (column, text) and may skip empty columns
    fn from_sparse_header(cells: &[(usize, String)], columns: &ColumnNames) -> Result<Self> {
        let width = cells.iter().map(|(col, _)| col + 1).max().context("Sheet is empty")?;
        let mut header = vec![String::new(); width];
        for (col, text) in cells {
            header[*col] = text.clone();
        }
        Self::from_header(&header, columns)
    }
}

fn cell_text(cell: Option<&Data>) -> String {
    match cell {
        None | Some(Data::Empty) => String::new(),
        Some(Data::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Source of rows consumed a window at a time.
pub trait RowFeed: Send {
    /// Up to `size` rows; an empty vector means the feed is exhausted.
    /// Rows whose three cells are all blank are dropped.
    fn next_window(&mut self, size: usize) -> Result<Vec<RawRecord>>;
}

struct WorkbookFeed {
    range: Range<Data>,
    columns: ColumnIndexes,
    /// Absolute sheet row of the header
    header_row: usize,
    /// Next row to read, relative to the range start
    next_row: usize,
}

impl RowFeed for WorkbookFeed {
    fn next_window(&mut self, size: usize) -> Result<Vec<RawRecord>> {
        let mut window = Vec::new();
        let height = self.range.height();
        while window.len() < size && self.next_row < height {
            let row = self.next_row;
            self.next_row += 1;
            let record = RawRecord {
                row_number: self.header_row + row + 1,
                plan_message: cell_text(self.range.get((row, self.columns.plan))),
                departure_message: cell_text(self.range.get((row, self.columns.departure))),
                arrival_message: cell_text(self.range.get((row, self.columns.arrival))),
            };
            if !record.is_blank() {
                window.push(record);
            }
        }
        Ok(window)
    }
}

/// Cells of the data row currently being assembled
struct PendingRow {
    row: usize,
    plan: String,
    departure: String,
    arrival: String,
}

impl PendingRow {
    fn new(row: usize) -> Self {
        Self {
            row,
            plan: String::new(),
            departure: String::new(),
            arrival: String::new(),
        }
    }

    fn into_record(self) -> RawRecord {
        RawRecord {
            row_number: self.row + 1,
            plan_message: self.plan,
            departure_message: self.departure,
            arrival_message: self.arrival,
        }
    }
}

/// Turns a row-major stream of `(row, column, value)` cells into records.
///
/// The first row seen is the header. Only the message columns are kept, and with
/// `plan_only` set only the plan column, so a row never costs more than three strings.
struct RowAssembler<'a> {
    names: &'a ColumnNames,
    plan_only: bool,
    header_row: Option<usize>,
    header: Vec<(usize, String)>,
    columns: Option<ColumnIndexes>,
    pending: Option<PendingRow>,
}

impl<'a> RowAssembler<'a> {
    fn new(names: &'a ColumnNames, plan_only: bool) -> Self {
        Self {
            names,
            plan_only,
            header_row: None,
            header: Vec::new(),
            columns: None,
            pending: None,
        }
    }

    /// Feed one cell. Returns the previous row once a later row starts, and
    /// reports through `header_ready` the moment the header has been resolved.
    fn push(
        &mut self,
        row: usize,
        col: usize,
        value: &Data,
        header_ready: &mut impl FnMut(),
    ) -> Result<Option<RawRecord>> {
        let columns = match self.columns {
            Some(columns) => columns,
            None => {
                let header_row = *self.header_row.get_or_insert(row);
                if row == header_row {
                    self.header.push((col, cell_text(Some(value))));
                    return Ok(None);
                }
                self.resolve_header(header_ready)?
            }
        };

        let mut finished = None;
        if self.pending.as_ref().is_some_and(|p| p.row != row) {
            finished = self.pending.take().map(PendingRow::into_record);
        }
        let pending = self.pending.get_or_insert_with(|| PendingRow::new(row));
        if col == columns.plan {
            pending.plan = cell_text(Some(value));
        } else if !self.plan_only && col == columns.departure {
            pending.departure = cell_text(Some(value));
        } else if !self.plan_only && col == columns.arrival {
            pending.arrival = cell_text(Some(value));
        }
        Ok(finished.filter(|record| !record.is_blank()))
    }

    /// End of sheet; returns the last row if any
    fn finish(&mut self, header_ready: &mut impl FnMut()) -> Result<Option<RawRecord>> {
        if self.columns.is_none() {
            self.resolve_header(header_ready)?;
        }
        Ok(self
            .pending
            .take()
            .map(PendingRow::into_record)
            .filter(|record| !record.is_blank()))
    }

    fn resolve_header(&mut self, header_ready: &mut impl FnMut()) -> Result<ColumnIndexes> {
        let columns = ColumnIndexes::from_sparse_header(&self.header, self.names)?;
        self.columns = Some(columns);
        header_ready();
        Ok(columns)
    }
}

/// Walk the first worksheet of an xlsx file, handing every non-blank data row to
/// `emit` as soon as it is complete. `emit` returns false to stop early.
fn walk_xlsx(
    path: &Path,
    names: &ColumnNames,
    plan_only: bool,
    mut header_ready: impl FnMut(),
    mut emit: impl FnMut(RawRecord) -> bool,
) -> Result<()> {
    let mut workbook: Xlsx<BufReader<File>> = open_workbook(path)
        .with_context(|| format!("Failed to open workbook {}", path.display()))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .context("Workbook has no sheets")?;
    let mut cells = workbook
        .worksheet_cells_reader(&sheet)
        .with_context(|| format!("Failed to read sheet '{}'", sheet))?;

    let mut assembler = RowAssembler::new(names, plan_only);
    while let Some(cell) = cells.next_cell().context("Failed to read worksheet cell")? {
        let (row, col) = cell.get_position();
        let value: Data = cell.get_value().clone().into();
        if let Some(record) =
            assembler.push(row as usize, col as usize, &value, &mut header_ready)?
            && !emit(record)
        {
            return Ok(());
        }
    }
    if let Some(record) = assembler.finish(&mut header_ready)? {
        emit(record);
    }
    Ok(())
}

enum XlsxEvent {
    HeaderReady,
    Row(RawRecord),
    Failed(anyhow::Error),
}

/// Rows produced by a reader thread; dropping the feed stops the thread at its
/// next send.
struct XlsxFeed {
    events: mpsc::Receiver<XlsxEvent>,
}

impl RowFeed for XlsxFeed {
    fn next_window(&mut self, size: usize) -> Result<Vec<RawRecord>> {
        let mut window = Vec::new();
        while window.len() < size {
            match self.events.recv() {
                Ok(XlsxEvent::Row(record)) => window.push(record),
                Ok(XlsxEvent::Failed(e)) => return Err(e),
                Ok(XlsxEvent::HeaderReady) => {}
                Err(_) => break,
            }
        }
        Ok(window)
    }
}

fn open_xlsx_feed(path: &Path, names: &ColumnNames) -> Result<Box<dyn RowFeed>> {
    let (tx, events) = mpsc::sync_channel(XLSX_ROW_BUFFER);
    let owned_path = path.to_path_buf();
    let names = names.clone();
    std::thread::Builder::new()
        .name("xlsx-reader".to_string())
        .spawn(move || {
            let ready = tx.clone();
            let result = walk_xlsx(
                &owned_path,
                &names,
                false,
                || {
                    let _ = ready.send(XlsxEvent::HeaderReady);
                },
                |record| tx.send(XlsxEvent::Row(record)).is_ok(),
            );
            if let Err(e) = result {
                let _ = tx.send(XlsxEvent::Failed(e));
            }
        })
        .context("Failed to start workbook reader thread")?;

    // Header problems are reported from open_feed, not from the first window
    match events.recv() {
        Ok(XlsxEvent::HeaderReady) => Ok(Box::new(XlsxFeed { events })),
        Ok(XlsxEvent::Failed(e)) => Err(e),
        Ok(XlsxEvent::Row(_)) | Err(_) => {
            bail!("Workbook reader stopped before reading the header of {}", path.display())
        }
    }
}

struct CsvFeed {
    records: csv::StringRecordsIntoIter<File>,
    columns: ColumnIndexes,
    row_number: usize,
}

impl RowFeed for CsvFeed {
    fn next_window(&mut self, size: usize) -> Result<Vec<RawRecord>> {
        let mut window = Vec::new();
        while window.len() < size {
            let Some(record) = self.records.next() else {
                break;
            };
            self.row_number += 1;
            let record =
                record.with_context(|| format!("Failed to read CSV row {}", self.row_number))?;
            let field = |idx: usize| record.get(idx).unwrap_or_default().to_string();
            let raw = RawRecord {
                row_number: self.row_number,
                plan_message: field(self.columns.plan),
                departure_message: field(self.columns.departure),
                arrival_message: field(self.columns.arrival),
            };
            if !raw.is_blank() {
                window.push(raw);
            }
        }
        Ok(window)
    }
}

fn open_first_sheet(path: &Path) -> Result<Range<Data>> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open workbook {}", path.display()))?;
    workbook
        .worksheet_range_at(0)
        .context("Workbook has no sheets")?
        .context("Failed to read first sheet")
}

fn workbook_header(range: &Range<Data>, columns: &ColumnNames) -> Result<ColumnIndexes> {
    let header: Vec<String> = range
        .rows()
        .next()
        .context("Sheet is empty")?
        .iter()
        .map(|cell| cell_text(Some(cell)))
        .collect();
    ColumnIndexes::from_header(&header, columns)
}

fn csv_reader(path: &Path) -> Result<csv::Reader<File>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))
}

/// Open a row feed positioned after the header
pub fn open_feed(path: &Path, columns: &ColumnNames) -> Result<Box<dyn RowFeed>> {
    match SheetFormat::detect(path)? {
        SheetFormat::Xlsx => open_xlsx_feed(path, columns),
        SheetFormat::Workbook => {
            let range = open_first_sheet(path)?;
            let columns = workbook_header(&range, columns)?;
            let header_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
            Ok(Box::new(WorkbookFeed {
                range,
                columns,
                header_row,
                // Skip the header itself
                next_row: 1,
            }))
        }
        SheetFormat::Csv => {
            let mut reader = csv_reader(path)?;
            let header: Vec<String> = reader
                .headers()
                .context("Failed to read CSV header")?
                .iter()
                .map(str::to_string)
                .collect();
            let columns = ColumnIndexes::from_header(&header, columns)?;
            Ok(Box::new(CsvFeed {
                records: reader.into_records(),
                columns,
                row_number: 1,
            }))
        }
    }
}

/// Every non-blank row of the file
pub fn read_all(path: &Path, columns: &ColumnNames) -> Result<Vec<RawRecord>> {
    open_feed(path, columns)?.next_window(usize::MAX)
}

/// Rows with a non-empty plan cell. Only the plan column is inspected.
pub fn count_plan_rows(path: &Path, columns: &ColumnNames) -> Result<usize> {
    match SheetFormat::detect(path)? {
        SheetFormat::Xlsx => {
            let mut count = 0;
            walk_xlsx(
                path,
                columns,
                true,
                || {},
                |record| {
                    if !record.plan_message.trim().is_empty() {
                        count += 1;
                    }
                    true
                },
            )?;
            Ok(count)
        }
        SheetFormat::Workbook => {
            let range = open_first_sheet(path)?;
            let plan = workbook_header(&range, columns)?.plan;
            Ok((1..range.height())
                .filter(|&row| !cell_text(range.get((row, plan))).trim().is_empty())
                .count())
        }
        SheetFormat::Csv => {
            let mut reader = csv_reader(path)?;
            let header: Vec<String> = reader
                .headers()
                .context("Failed to read CSV header")?
                .iter()
                .map(str::to_string)
                .collect();
            let plan = ColumnIndexes::from_header(&header, columns)?.plan;
            let mut count = 0;
            for record in reader.records() {
                let record = record.context("Failed to read CSV row")?;
                if !record.get(plan).unwrap_or_default().trim().is_empty() {
                    count += 1;
                }
            }
            Ok(count)
        }
    }
}
