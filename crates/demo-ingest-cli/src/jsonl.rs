use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use demo_ingest_core::{DemoDecoder, DemoEvent, DemoHeader, IngestError};

/// Reads a replay export: one [`DemoHeader`] line, then one [`DemoEvent`] per line.
///
/// Blank lines are skipped. A malformed line fails the run with its line number.
pub struct JsonLinesDecoder<R> {
    header: DemoHeader,
    lines: Lines<R>,
    line_number: usize,
}

impl JsonLinesDecoder<BufReader<File>> {
    /// Opens `path`, filling `file_name`/`file_size` from the filesystem when the
    /// header leaves them empty.
    ///
    /// # Errors
    /// Returns [`IngestError::Decode`] when the file cannot be opened or has no header.
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let file = File::open(path).map_err(|err| {
            IngestError::Decode(format!("failed to open {}: {err}", path.display()))
        })?;
        let file_size = file.metadata().map(|meta| meta.len()).unwrap_or_default();
        let mut decoder = Self::from_reader(BufReader::new(file))?;

        if decoder.header.file_name.is_empty() {
            decoder.header.file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        if decoder.header.file_size == 0 {
            decoder.header.file_size = file_size;
        }
        Ok(decoder)
    }
}

impl<R: BufRead> JsonLinesDecoder<R> {
    /// # Errors
    /// Returns [`IngestError::Decode`] when the stream is empty or the header is malformed.
    pub fn from_reader(reader: R) -> Result<Self, IngestError> {
        let mut decoder = Self {
            header: DemoHeader::default(),
            lines: reader.lines(),
            line_number: 0,
        };
        let Some(line) = decoder.next_line()? else {
            return Err(IngestError::Decode("missing replay header line".to_string()));
        };
        let line_number = decoder.line_number;
        decoder.header = serde_json::from_str(&line).map_err(|err| {
            IngestError::Decode(format!("invalid header on line {line_number}: {err}"))
        })?;
        Ok(decoder)
    }

    fn next_line(&mut self) -> Result<Option<String>, IngestError> {
        for line in self.lines.by_ref() {
            self.line_number += 1;
            let line = line.map_err(|err| {
                IngestError::Decode(format!("failed to read line {}: {err}", self.line_number))
            })?;
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }
}

impl<R: BufRead> DemoDecoder for JsonLinesDecoder<R> {
    fn header(&self) -> &DemoHeader {
        &self.header
    }

    fn next_event(&mut self) -> Result<Option<DemoEvent>, IngestError> {
        let Some(line) = self.next_line()? else {
            return Ok(None);
        };
        serde_json::from_str(&line).map(Some).map_err(|err| {
            IngestError::Decode(format!("invalid event on line {}: {err}", self.line_number))
        })
    }
}
