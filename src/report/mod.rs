use crate::analyzer::pitch::{PitchEstimate, PitchUnit};
use crate::analyzer::FileResult;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Column order of the persisted table.
pub const HEADER: [&str; 3] = ["File", "Pitch", "Confidence"];

/// One persisted row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    #[serde(rename = "File")]
    pub file: String,
    #[serde(rename = "Pitch")]
    pub pitch: f32,
    #[serde(rename = "Confidence")]
    pub confidence: f32,
}

/// All estimates of one file, already converted to the output unit.
#[derive(Debug, Clone)]
struct FileRows {
    file: String,
    estimates: Vec<PitchEstimate>,
}

/// Cumulative result table, grouped by file in arrival order.
///
/// Only the orchestrating thread touches the table; workers hand over
/// complete [`FileResult`]s.
#[derive(Debug, Clone)]
pub struct ResultTable {
    unit: PitchUnit,
    window_size: usize,
    groups: Vec<FileRows>,
}

impl ResultTable {
    pub fn new(unit: PitchUnit, window_size: usize) -> Self {
        Self {
            unit,
            window_size,
            groups: Vec::new(),
        }
    }

    /// Append a file's estimates after everything received so far.
    pub fn push(&mut self, result: FileResult) {
        let sample_rate = result.file.sample_rate;
        let estimates = result
            .estimates
            .into_iter()
            .map(|e| PitchEstimate {
                frequency: self.unit.convert(e.frequency, sample_rate, self.window_size),
                confidence: e.confidence,
            })
            .collect();
        self.groups.push(FileRows {
            file: result.file.file_name(),
            estimates,
        });
    }

    /// Order file groups by name. Frame order within a file is kept.
    pub fn sort_by_file(&mut self) {
        self.groups.sort_by(|a, b| a.file.cmp(&b.file));
    }

    pub fn file_count(&self) -> usize {
        self.groups.len()
    }

    pub fn row_count(&self) -> usize {
        self.groups.iter().map(|g| g.estimates.len()).sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row> + '_ {
        self.groups.iter().flat_map(|group| {
            group.estimates.iter().map(move |e| Row {
                file: group.file.clone(),
                pitch: e.frequency,
                confidence: e.confidence,
            })
        })
    }

    /// Write the table as CSV with a header row, even when empty.
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<(), ReportError> {
        let mut csv = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
        csv.write_record(HEADER)?;
        for row in self.rows() {
            csv.serialize(row)?;
        }
        csv.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    /// Persist to `path`, replacing it only once the whole table is written.
    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        let io_err = |source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let file = std::fs::File::create(&tmp).map_err(io_err)?;
        if let Err(e) = self.write_csv(std::io::BufWriter::new(file)) {
            std::fs::remove_file(&tmp).ok();
            return Err(e);
        }
        std::fs::rename(&tmp, path).map_err(io_err)?;

        log::info!("Wrote {} rows for {} files to {}", self.row_count(), self.file_count(), path.display());
        Ok(())
    }
}
