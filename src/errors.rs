use std::{fmt, io};

use crate::duration::DurationError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Serial(rppal::uart::Error),
    Io(io::Error),
    JPEGDecoder(zune_jpeg::errors::DecodeErrors),
    Csv(csv::Error),
    Json(serde_json::Error),
    Duration(DurationError),
    /// The Sangaboard answered with an error or something we could not parse.
    Controller(String),
    Camera(String),
    Preview(String),
    Interrupted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Serial(e) => write!(f, "serial link: {e}"),
            Error::Io(e) => write!(f, "io: {e}"),
            Error::JPEGDecoder(e) => write!(f, "jpeg: {e:?}"),
            Error::Csv(e) => write!(f, "csv: {e}"),
            Error::Json(e) => write!(f, "json: {e}"),
            Error::Duration(e) => write!(f, "{e}"),
            Error::Controller(msg) => write!(f, "sangaboard: {msg}"),
            Error::Camera(msg) => write!(f, "camera: {msg}"),
            Error::Preview(msg) => write!(f, "preview: {msg}"),
            Error::Interrupted => write!(f, "interrupted by user"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Ctrl-C, or a system call cut short by the signal.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Error::Interrupted => true,
            Error::Io(e) => e.kind() == io::ErrorKind::Interrupted,
            _ => false,
        }
    }
}

impl From<rppal::uart::Error> for Error {
    fn from(value: rppal::uart::Error) -> Self {
        Error::Serial(value)
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<zune_jpeg::errors::DecodeErrors> for Error {
    fn from(value: zune_jpeg::errors::DecodeErrors) -> Self {
        Error::JPEGDecoder(value)
    }
}

impl From<csv::Error> for Error {
    fn from(value: csv::Error) -> Self {
        Error::Csv(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Json(value)
    }
}

impl From<DurationError> for Error {
    fn from(value: DurationError) -> Self {
        Error::Duration(value)
    }
}
