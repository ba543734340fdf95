//! Read access to a recordings directory.
//!
//! Only files named `recordings-YYYY-MM-DD.jsonl` are considered. Lines that
//! do not decode as a [`Recording`] are skipped, as is any file that cannot
//! be opened.

use crate::core::error::LookupError;
use crate::core::recording::{parse_day_file_name, Recording};
use chrono::NaiveDate;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// One day file inside the recordings directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayFile {
    pub date: NaiveDate,
    pub path: PathBuf,
}

/// A decoded recording together with the exact line it came from.
#[derive(Debug, Clone)]
pub struct StoredRecording {
    pub raw: Vec<u8>,
    pub recording: Recording,
}

pub struct RecordingStore {
    dir: PathBuf,
}

impl RecordingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Day files sorted by date, oldest first.
    ///
    /// An empty or missing directory is [`LookupError::NoRecordings`].
    pub fn day_files(&self) -> Result<Vec<DayFile>, LookupError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(self.no_recordings());
            }
            Err(e) => return Err(LookupError::Io(e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(date) = name.to_str().and_then(parse_day_file_name) else {
                continue;
            };
            files.push(DayFile {
                date,
                path: entry.path(),
            });
        }

        if files.is_empty() {
            return Err(self.no_recordings());
        }
        files.sort_by_key(|f| f.date);
        Ok(files)
    }

    /// Every readable recording, in file order.
    pub fn recordings(&self) -> Result<Vec<StoredRecording>, LookupError> {
        let mut all = Vec::new();
        for file in self.day_files()? {
            match read_day_file(&file.path) {
                Ok(records) => all.extend(records),
                Err(e) => {
                    tracing::debug!(path = %file.path.display(), error = %e, "skipping unreadable file");
                }
            }
        }
        Ok(all)
    }

    /// Find the single recording whose id equals or starts with `prefix`.
    pub fn find(&self, prefix: &str) -> Result<Recording, LookupError> {
        let mut matches: Vec<Recording> = self
            .recordings()?
            .into_iter()
            .map(|stored| stored.recording)
            .filter(|rec| rec.id.starts_with(prefix))
            .collect();

        match matches.len() {
            0 => Err(LookupError::NotFound(prefix.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(LookupError::Ambiguous {
                prefix: prefix.to_string(),
                candidates: matches.into_iter().map(|rec| rec.id).collect(),
            }),
        }
    }

    /// The recording with the latest timestamp.
    pub fn newest(&self) -> Result<Recording, LookupError> {
        self.recordings()?
            .into_iter()
            .map(|stored| stored.recording)
            .fold(None, |newest: Option<Recording>, rec| match newest {
                Some(current) if current.timestamp >= rec.timestamp => Some(current),
                _ => Some(rec),
            })
            .ok_or_else(|| self.no_recordings())
    }

    fn no_recordings(&self) -> LookupError {
        LookupError::NoRecordings(self.dir.display().to_string())
    }
}

/// Decode a day file, skipping malformed lines.
///
/// Reading stops at the first I/O error; what was decoded until then is kept.
pub fn read_day_file(path: &Path) -> io::Result<Vec<StoredRecording>> {
    let reader = BufReader::new(File::open(path)?);
    let records = reader
        .split(b'\n')
        .map_while(Result::ok)
        .filter_map(|raw| {
            let recording = serde_json::from_slice::<Recording>(&raw).ok()?;
            Some(StoredRecording { raw, recording })
        })
        .collect();
    Ok(records)
}
