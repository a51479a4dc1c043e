//! Append-only JSON-lines output

use crate::site::{Record, SOURCE_URL_KEY};
use crate::SinkError;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Appends one JSON object per line and flushes after every record
pub struct JsonlWriter {
    path: PathBuf,
    file: File,
}

impl JsonlWriter {
    /// Opens `path` for appending, creating it and its directory if needed
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one record as a single line
    ///
    /// The line is built in memory and written with one call so a crash
    /// leaves at most one truncated line at the end of the file.
    pub fn append(&mut self, record: &Record) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }

    /// Terminates a truncated last line so the next record starts cleanly
    pub fn terminate_partial_line(&mut self) -> io::Result<()> {
        self.file.write_all(b"\n")?;
        self.file.flush()
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }
}

/// What was found in an existing output file
#[derive(Debug, Default)]
pub struct OutputScan {
    /// `sourceUrl` of every well-formed line, in file order
    pub source_urls: Vec<String>,

    /// Number of non-empty lines
    pub lines: usize,

    /// Lines that are not a JSON object with a string `sourceUrl`
    pub malformed: usize,

    /// The file does not end with a newline
    pub truncated_tail: bool,
}

/// Reads the `sourceUrl` of every line of an output file
///
/// A missing file scans as empty.
pub fn scan_output(path: &Path) -> io::Result<OutputScan> {
    let mut scan = OutputScan::default();

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(scan),
        Err(e) => return Err(e),
    };

    scan.truncated_tail = ends_without_newline(&file)?;

    for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = line?;
        let Some(text) = line_text(&line) else {
            scan.lines += 1;
            scan.malformed += 1;
            tracing::warn!(
                path = %path.display(),
                line = index + 1,
                "Ignoring output line that is not valid UTF-8"
            );
            continue;
        };
        if text.trim().is_empty() {
            continue;
        }
        scan.lines += 1;

        let source_url = serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .and_then(|value| value.get(SOURCE_URL_KEY)?.as_str().map(str::to_string));

        match source_url {
            Some(url) => scan.source_urls.push(url),
            None => {
                scan.malformed += 1;
                tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    "Ignoring malformed output line"
                );
            }
        }
    }

    Ok(scan)
}

/// A raw line as text, or `None` when a crash cut it inside a character
fn line_text(line: &[u8]) -> Option<&str> {
    std::str::from_utf8(line).ok()
}

fn ends_without_newline(file: &File) -> io::Result<bool> {
    let mut file = file;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }

    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(last[0] != b'\n')
}

/// Reads every well-formed record of an output file
///
/// Returns the records and the number of skipped lines.
pub fn read_records(path: &Path) -> io::Result<(Vec<Record>, usize)> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    let mut skipped = 0;

    for (index, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        let Some(text) = line_text(&line) else {
            skipped += 1;
            tracing::warn!(
                path = %path.display(),
                line = index + 1,
                "Skipping record that is not valid UTF-8"
            );
            continue;
        };
        if text.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Record>(text) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable record"
                );
            }
        }
    }

    Ok((records, skipped))
}
