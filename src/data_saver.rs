use std::{fs, io::BufWriter, path::Path, time::Duration};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{stage::Position, Result};

/// One row of `captures.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub index: u64,
    /// Schedule slot the frame was taken for.
    pub tick: u64,
    pub timestamp: String,
    pub elapsed_secs: f64,
    pub file: String,
}

/// Written once per run as `session.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub started: DateTime<Local>,
    pub duration_secs: u64,
    pub interval_secs: u64,
    pub led_level: f32,
    pub position: Option<Position>,
}

impl SessionManifest {
    pub fn new(
        started: DateTime<Local>,
        duration: Duration,
        interval: Duration,
        led_level: f32,
        position: Option<Position>,
    ) -> Self {
        SessionManifest {
            started,
            duration_secs: duration.as_secs(),
            interval_secs: interval.as_secs(),
            led_level,
            position,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

pub trait DataFile {
    type Data;
    fn is_started(&self) -> bool;
    fn start_new(&mut self, path: &Path) -> Result<()>;
    fn record(&mut self, data: &Self::Data) -> Result<()>;
    fn end(&mut self) -> Result<()>;
}

pub struct CSVFile<FD> {
    csv_wtr: Option<csv::Writer<BufWriter<fs::File>>>,
    _p: std::marker::PhantomData<FD>,
}

impl<FD> CSVFile<FD> {
    pub fn new() -> Self {
        Self {
            csv_wtr: None,
            _p: std::marker::PhantomData,
        }
    }
}

impl<FD> Default for CSVFile<FD> {
    fn default() -> Self {
        Self::new()
    }
}

impl<FD: Serialize> DataFile for CSVFile<FD> {
    type Data = FD;

    fn is_started(&self) -> bool {
        self.csv_wtr.is_some()
    }

    fn start_new(&mut self, path: &Path) -> Result<()> {
        let f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let wtr = csv::WriterBuilder::new()
            .has_headers(true)
            .from_writer(BufWriter::new(f));
        self.csv_wtr = Some(wtr);
        Ok(())
    }

    /// Rows are flushed one by one so the log survives the process being
    /// killed mid run.
    fn record(&mut self, data: &Self::Data) -> Result<()> {
        if let Some(wtr) = self.csv_wtr.as_mut() {
            wtr.serialize(data)?;
            wtr.flush()?;
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if let Some(mut wtr) = self.csv_wtr.take() {
            wtr.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_log_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captures.csv");
        let mut log = CSVFile::<CaptureRecord>::new();
        assert!(!log.is_started());
        log.start_new(&path).unwrap();
        assert!(log.is_started());
        for i in 0..2 {
            log.record(&CaptureRecord {
                index: i,
                tick: i,
                timestamp: format!("20240101_00000{i}"),
                elapsed_secs: i as f64,
                file: format!("20240101_00000{i}.jpg"),
            })
            .unwrap();
        }
        log.end().unwrap();
        assert!(!log.is_started());

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<CaptureRecord> = rdr.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].file, "20240101_000001.jpg");
    }

    #[test]
    fn manifest_is_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let manifest = SessionManifest::new(
            Local::now(),
            Duration::from_secs(60),
            Duration::from_secs(10),
            0.33,
            Some(Position::new(1, 2, 3)),
        );
        manifest.write(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["duration_secs"], 60);
        assert_eq!(value["interval_secs"], 10);
    }
}
