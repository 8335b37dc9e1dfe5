//! Reader for WET archives (WARC files holding extracted plain text).
//!
//! Only what the scanner needs: record headers, and the body as text. Archives ending
//! in `.gz` are read as multi-member gzip, anything else as plain text.

use crate::config::{BUFFER_SIZE, MAX_RECORD_BYTES};
use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

pub const CONVERSION_RECORD: &str = "conversion";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WetRecord {
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl WetRecord {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn record_type(&self) -> Option<&str> {
        self.header("WARC-Type")
    }

    pub fn target_uri(&self) -> Option<&str> {
        self.header("WARC-Target-URI")
    }

    /// First identified language, e.g. `eng` from `eng,deu`.
    pub fn content_language(&self) -> Option<&str> {
        self.header("WARC-Identified-Content-Language")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn is_conversion(&self) -> bool {
        self.record_type() == Some(CONVERSION_RECORD)
    }
}

pub struct WetReader<R> {
    reader: R,
    line: Vec<u8>,
}

pub type ArchiveReader = WetReader<Box<dyn BufRead + Send>>;

/// Opens an archive on disk.
pub fn open(path: &Path) -> Result<ArchiveReader> {
    let file =
        File::open(path).with_context(|| format!("Failed to open archive: {}", path.display()))?;
    let inner: Box<dyn BufRead + Send> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(BufReader::with_capacity(
            BUFFER_SIZE,
            MultiGzDecoder::new(BufReader::with_capacity(BUFFER_SIZE, file)),
        ))
    } else {
        Box::new(BufReader::with_capacity(BUFFER_SIZE, file))
    };
    Ok(WetReader::new(inner))
}

impl<R: BufRead> WetReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(256),
        }
    }

    fn read_line(&mut self) -> Result<usize> {
        self.line.clear();
        self.reader
            .read_until(b'\n', &mut self.line)
            .context("Failed to read archive")
    }

    fn trimmed_line(&self) -> &[u8] {
        let mut end = self.line.len();
        while end > 0 && matches!(self.line[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        &self.line[..end]
    }

    pub fn next_record(&mut self) -> Result<Option<WetRecord>> {
        loop {
            if self.read_line()? == 0 {
                return Ok(None);
            }
            let line = self.trimmed_line();
            if line.is_empty() {
                continue;
            }
            if line.starts_with(b"WARC/") {
                break;
            }
            bail!(
                "Expected WARC version line, found {:?}",
                String::from_utf8_lossy(line)
            );
        }

        let mut headers = Vec::new();
        loop {
            if self.read_line()? == 0 {
                bail!("Archive ended inside record headers");
            }
            let line = self.trimmed_line();
            if line.is_empty() {
                break;
            }
            let text = String::from_utf8_lossy(line);
            if let Some((key, value)) = text.split_once(':') {
                headers.push((key.trim().to_string(), value.trim().to_string()));
            }
        }

        let length: usize = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
            .map(|(_, v)| v.as_str())
            .context("Record has no Content-Length")?
            .parse()
            .context("Invalid Content-Length")?;

        if length > MAX_RECORD_BYTES {
            bail!("Record Content-Length {length} exceeds the {MAX_RECORD_BYTES} byte limit");
        }

        let mut body = Vec::with_capacity(length.min(BUFFER_SIZE));
        let read = (&mut self.reader)
            .take(length as u64)
            .read_to_end(&mut body)
            .context("Failed to read record body")?;
        if read < length {
            bail!("Archive ended inside record body ({read} of {length} bytes)");
        }

        Ok(Some(WetRecord {
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        }))
    }
}

impl<R: BufRead> Iterator for WetReader<R> {
    type Item = Result<WetRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: &str, uri: Option<&str>, body: &str) -> String {
        let mut out = format!("WARC/1.0\r\nWARC-Type: {kind}\r\n");
        if let Some(uri) = uri {
            out.push_str(&format!("WARC-Target-URI: {uri}\r\n"));
        }
        out.push_str("WARC-Identified-Content-Language: eng,fra\r\n");
        out.push_str(&format!("Content-Length: {}\r\n\r\n{body}\r\n\r\n", body.len()));
        out
    }

    #[test]
    fn reads_consecutive_records() {
        let data = format!(
            "{}{}",
            record("warcinfo", None, "software: test"),
            record("conversion", Some("https://example.com/a"), "Line one\nLine two")
        );
        let records: Vec<_> = WetReader::new(data.as_bytes())
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(!records[0].is_conversion());
        assert!(records[1].is_conversion());
        assert_eq!(records[1].target_uri(), Some("https://example.com/a"));
        assert_eq!(records[1].body, "Line one\nLine two");
        assert_eq!(records[1].content_language(), Some("eng"));
    }

    #[test]
    fn body_length_is_in_bytes() {
        let data = record("conversion", Some("https://example.com/"), "naïve café");
        let records: Vec<_> = WetReader::new(data.as_bytes())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records[0].body, "naïve café");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let data = record("conversion", Some("https://x.org/"), "x");
        let rec = WetReader::new(data.as_bytes()).next().unwrap().unwrap();
        assert_eq!(rec.header("warc-target-uri"), Some("https://x.org/"));
    }

    #[test]
    fn truncated_body_is_an_error() {
        let data = "WARC/1.0\r\nWARC-Type: conversion\r\nContent-Length: 100\r\n\r\nshort";
        let result = WetReader::new(data.as_bytes()).next().unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn oversized_content_length_is_an_error() {
        let data =
            "WARC/1.0\r\nWARC-Type: conversion\r\nContent-Length: 100000000000000\r\n\r\nshort";
        let err = WetReader::new(data.as_bytes()).next().unwrap().unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn body_at_limit_is_read_lazily() {
        let data = format!(
            "WARC/1.0\r\nWARC-Type: conversion\r\nContent-Length: {MAX_RECORD_BYTES}\r\n\r\nshort"
        );
        let err = WetReader::new(data.as_bytes()).next().unwrap().unwrap_err();
        assert!(err.to_string().contains("5 of"));
    }

    #[test]
    fn garbage_is_an_error() {
        let result = WetReader::new("not an archive\n".as_bytes()).next().unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn empty_input_has_no_records() {
        assert!(WetReader::new("".as_bytes()).next().is_none());
    }
}
