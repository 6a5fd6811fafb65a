//! The attendance spreadsheet: a header row followed by one
//! `(date, time, name)` row per student per day, in the order marked.

use crate::error::Error;
use calamine::{open_workbook, Data, DataType, Reader, Xlsx};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_xlsxwriter::Workbook;
use std::path::{Path, PathBuf};

pub const HEADER: [&str; 3] = ["Date", "Time", "Student Name"];
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Text of one stored cell. Spreadsheet programs may turn the date and time
/// columns into native date cells on re-save; those are printed back in the
/// ledger's own formats.
fn cell_text(col: usize, cell: &Data) -> String {
    let native = match (col, cell) {
        (0, Data::DateTime(_) | Data::DateTimeIso(_)) => {
            cell.as_date().map(|d| d.format(DATE_FORMAT).to_string())
        }
        (1, Data::DateTime(_) | Data::DateTimeIso(_)) => {
            cell.as_time().map(|t| t.format(TIME_FORMAT).to_string())
        }
        _ => None,
    };
    native.unwrap_or_else(|| cell.to_string().trim().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRow {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub name: String,
}

impl AttendanceRow {
    pub fn cells(&self) -> [String; 3] {
        [
            self.date.format(DATE_FORMAT).to_string(),
            self.time.format(TIME_FORMAT).to_string(),
            self.name.clone(),
        ]
    }

    fn parse(row: usize, cells: &[String]) -> Result<Self, Error> {
        let malformed = |reason: String| Error::MalformedLedger { row, reason };
        let [date, time, name] = cells else {
            return Err(malformed(format!("expected 3 cells, found {}", cells.len())));
        };
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT)
            .map_err(|e| malformed(format!("date {:?}: {}", date, e)))?;
        let time = NaiveTime::parse_from_str(time, TIME_FORMAT)
            .map_err(|e| malformed(format!("time {:?}: {}", time, e)))?;
        if name.is_empty() {
            return Err(malformed("empty name".to_string()));
        }
        Ok(Self {
            date,
            time,
            name: name.clone(),
        })
    }
}

/// Result of [`Ledger::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    AlreadyMarked,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    rows: Vec<AttendanceRow>,
}

impl Ledger {
    /// An empty ledger that will be saved to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: Vec::new(),
        }
    }

    /// Load `path` if it exists; otherwise create it with just the header.
    pub fn load_or_create(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        if path.exists() {
            return Self::load(path);
        }
        let ledger = Self::new(path);
        ledger.save()?;
        log::info!("Created attendance ledger {}", ledger.path.display());
        Ok(ledger)
    }

    /// Read the first worksheet of an existing ledger.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let mut workbook: Xlsx<_> = open_workbook(&path)?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| Error::Spreadsheet(format!("{} has no worksheet", path.display())))??;

        let mut lines = range.rows().enumerate().map(|(i, cells)| {
            let cells: Vec<String> = cells
                .iter()
                .enumerate()
                .map(|(col, c)| cell_text(col, c))
                .collect();
            (i + 1, cells)
        });

        if let Some((row, header)) = lines.next() {
            if header != HEADER {
                return Err(Error::MalformedLedger {
                    row,
                    reason: format!("expected header {:?}, found {:?}", HEADER, header),
                });
            }
        }

        let mut rows = Vec::new();
        for (row, mut cells) in lines {
            while cells.last().is_some_and(|c| c.is_empty()) {
                cells.pop();
            }
            if cells.is_empty() {
                continue;
            }
            rows.push(AttendanceRow::parse(row, &cells)?);
        }

        log::debug!("loaded {} attendance row(s) from {}", rows.len(), path.display());
        Ok(Self { path, rows })
    }

    /// Write header and rows to the ledger file, replacing its contents.
    pub fn save(&self) -> Result<(), Error> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, title) in HEADER.iter().enumerate() {
            sheet.write_string(0, col as u16, *title)?;
        }
        for (i, row) in self.rows.iter().enumerate() {
            for (col, value) in row.cells().iter().enumerate() {
                sheet.write_string(i as u32 + 1, col as u16, value.as_str())?;
            }
        }
        workbook.save(&self.path)?;
        log::debug!("saved {} attendance row(s) to {}", self.rows.len(), self.path.display());
        Ok(())
    }

    /// Record `name` as present at `now` unless already recorded that day.
    pub fn mark(&mut self, name: &str, now: NaiveDateTime) -> MarkOutcome {
        let date = now.date();
        if self.is_marked(date, name) {
            log::info!(
                "Attendance already marked for {} on {}",
                name,
                date.format(DATE_FORMAT)
            );
            return MarkOutcome::AlreadyMarked;
        }
        let time = now.time().with_nanosecond(0).unwrap_or(now.time());
        self.rows.push(AttendanceRow {
            date,
            time,
            name: name.to_string(),
        });
        log::info!(
            "Marked {} present at {} {}",
            name,
            date.format(DATE_FORMAT),
            time.format(TIME_FORMAT)
        );
        MarkOutcome::Marked
    }

    pub fn is_marked(&self, date: NaiveDate, name: &str) -> bool {
        self.rows.iter().any(|r| r.date == date && r.name == name)
    }

    pub fn rows(&self) -> &[AttendanceRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn mark_is_idempotent_per_day() {
        let mut ledger = Ledger::new("unused.xlsx");
        assert_eq!(ledger.mark("Alice", at("2024-03-01", "09:00:00")), MarkOutcome::Marked);
        assert_eq!(
            ledger.mark("Alice", at("2024-03-01", "15:30:00")),
            MarkOutcome::AlreadyMarked
        );
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.rows()[0].time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }

    #[test]
    fn new_day_and_other_names_append_in_order() {
        let mut ledger = Ledger::new("unused.xlsx");
        ledger.mark("Alice", at("2024-03-01", "09:00:00"));
        ledger.mark("Bob", at("2024-03-01", "09:00:01"));
        ledger.mark("Alice", at("2024-03-02", "08:59:59"));
        let names: Vec<&str> = ledger.rows().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob", "Alice"]);
    }

    #[test]
    fn time_is_truncated_to_seconds() {
        let mut ledger = Ledger::new("unused.xlsx");
        ledger.mark(
            "Alice",
            at("2024-03-01", "09:00:00") + chrono::Duration::milliseconds(750),
        );
        assert_eq!(ledger.rows()[0].cells()[1], "09:00:00");
    }

    #[test]
    fn cells_format() {
        let row = AttendanceRow {
            date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            time: NaiveTime::from_hms_opt(7, 3, 9).unwrap(),
            name: "Unknown".to_string(),
        };
        assert_eq!(row.cells(), ["2024-01-05", "07:03:09", "Unknown"].map(String::from));
    }

    #[test]
    fn native_date_cells_use_ledger_formats() {
        let date = Data::DateTimeIso("2024-03-01".to_string());
        let time = Data::DateTimeIso("09:05:07".to_string());
        assert_eq!(cell_text(0, &date), "2024-03-01");
        assert_eq!(cell_text(1, &time), "09:05:07");
        assert_eq!(cell_text(2, &Data::String(" Alice ".to_string())), "Alice");
        assert_eq!(cell_text(0, &Data::String("2024-03-01".to_string())), "2024-03-01");
    }

    #[test]
    fn parse_rejects_bad_cells() {
        let cells = |v: [&str; 3]| v.map(String::from).to_vec();
        assert!(AttendanceRow::parse(2, &cells(["2024-13-01", "09:00:00", "A"])).is_err());
        assert!(AttendanceRow::parse(2, &cells(["2024-01-01", "9am", "A"])).is_err());
        assert!(AttendanceRow::parse(2, &cells(["2024-01-01", "09:00:00", ""])).is_err());
        assert!(matches!(
            AttendanceRow::parse(7, &["2024-01-01".to_string()]),
            Err(Error::MalformedLedger { row: 7, .. })
        ));
    }
}
