use std::path::PathBuf;
use thiserror::Error;

/// Failures the attendance workflow reports to its caller.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no face detected in reference image {} for '{identity}'", .path.display())]
    NoFaceDetected { identity: String, path: PathBuf },
    #[error("invalid student name {0:?}")]
    InvalidIdentity(String),
    #[error("malformed ledger row {row}: {reason}")]
    MalformedLedger { row: usize, reason: String },
    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<calamine::XlsxError> for Error {
    fn from(e: calamine::XlsxError) -> Self {
        Error::Spreadsheet(e.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for Error {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        Error::Spreadsheet(e.to_string())
    }
}
