//! Request log file: one JSON line per executed case
//!
//! Ids are assigned on append, starting at 1, so they follow execution order
//! and stay stable for `replay --id`.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::schema::LogRecord;

/// Headers that are masked in the log.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-api-key",
    "x-auth-token",
    "cookie",
    "set-cookie",
    "proxy-authorization",
];

/// Mask value for redacted headers.
pub const MASK: &str = "***";

/// Returns true if the header name matches a known sensitive header (case-insensitive).
#[must_use]
pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|&h| name.eq_ignore_ascii_case(h))
}

/// Appends records to a request log.
#[derive(Debug)]
pub struct RequestLogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_id: u64,
}

impl RequestLogWriter {
    /// Create (or truncate) the log at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the file or its parent directory cannot be created.
    pub fn create(path: &Path) -> Result<Self, DumpError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| DumpError::Io(format!("create {}: {e}", parent.display())))?;
        }
        let file = File::create(path)
            .map_err(|e| DumpError::Io(format!("create {}: {e}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            next_id: 1,
        })
    }

    /// Write one record with sensitive request headers masked. Returns the id
    /// assigned to it.
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be serialized or written.
    pub fn append(&mut self, mut record: LogRecord) -> Result<u64, DumpError> {
        record.id = self.next_id;
        mask_record(&mut record);

        let line = serde_json::to_string(&record).map_err(|e| DumpError::Serialize(e.to_string()))?;
        self.writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .map_err(|e| DumpError::Io(format!("write {}: {e}", self.path.display())))?;

        self.next_id += 1;
        Ok(record.id)
    }

    /// Number of records written so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.next_id - 1
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered records.
    ///
    /// # Errors
    ///
    /// Returns error if flushing fails.
    pub fn finish(mut self) -> Result<PathBuf, DumpError> {
        self.writer
            .flush()
            .map_err(|e| DumpError::Io(format!("flush {}: {e}", self.path.display())))?;
        Ok(self.path)
    }
}

fn mask_record(record: &mut LogRecord) {
    for (key, value) in &mut record.request.headers {
        if is_sensitive_header(key) {
            *value = MASK.to_string();
        }
    }
}

/// Read every record of a request log. Blank lines are skipped.
///
/// # Errors
///
/// Returns error if the file cannot be read or a line is not a record.
pub fn read_request_log(path: &Path) -> Result<Vec<LogRecord>, DumpError> {
    let file =
        File::open(path).map_err(|e| DumpError::Io(format!("open {}: {e}", path.display())))?;

    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| DumpError::Io(format!("read {}: {e}", path.display())))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| DumpError::Parse {
            line: idx + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialize(String),
    #[error("malformed request log at line {line}: {message}")]
    Parse { line: usize, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Request, Response};

    fn record(path: &str) -> LogRecord {
        let response = Response {
            status_code: 200,
            request: Request {
                method: "POST".into(),
                url: format!("http://localhost{path}"),
                headers: [
                    ("Authorization", "Bearer secret-token"),
                    ("Content-Type", "application/json"),
                ]
                .into_iter()
                .collect(),
                body: Some(r#"{"key":"value"}"#.into()),
            },
            ..Response::default()
        };
        LogRecord::completed(format!("POST {path}"), &response, &[])
    }

    #[test]
    fn ids_follow_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.jsonl");
        let mut writer = RequestLogWriter::create(&path).unwrap();
        assert_eq!(writer.append(record("/a")).unwrap(), 1);
        assert_eq!(writer.append(record("/b")).unwrap(), 2);
        assert_eq!(writer.written(), 2);
        writer.finish().unwrap();

        let records = read_request_log(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 1);
        assert_eq!(records[1].request.uri, "http://localhost/b");
    }

    #[test]
    fn sensitive_headers_masked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let mut writer = RequestLogWriter::create(&path).unwrap();
        writer.append(record("/a")).unwrap();
        writer.finish().unwrap();

        let records = read_request_log(&path).unwrap();
        let headers = &records[0].request.headers;
        assert_eq!(headers["Authorization"], MASK);
        assert_eq!(headers["Content-Type"], "application/json");
    }

    #[test]
    fn mask_case_insensitive() {
        assert!(is_sensitive_header("x-API-key"));
        assert!(is_sensitive_header("COOKIE"));
        assert!(!is_sensitive_header("Accept"));
    }

    #[test]
    fn creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run/log.jsonl");
        let writer = RequestLogWriter::create(&path).unwrap();
        assert_eq!(writer.finish().unwrap(), path);
        assert!(path.exists());
    }

    #[test]
    fn malformed_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let good = serde_json::to_string(&record("/a")).unwrap();
        std::fs::write(&path, format!("{good}\n\nnot json\n")).unwrap();
        let err = read_request_log(&path).unwrap_err();
        assert!(matches!(err, DumpError::Parse { line: 3, .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_request_log(Path::new("/nonexistent/log.jsonl")).unwrap_err();
        assert!(matches!(err, DumpError::Io(_)));
    }
}
