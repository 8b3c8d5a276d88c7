use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Stdout, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{RangingError, RangingResult};

/// A row of the structured output stream
pub trait Record: Serialize {
    const CSV_HEADER: &'static str;
    fn csv_row(&self) -> String;
}

/// One accepted sample of a sampling sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRecord {
    pub physical_distance_cm: u32,
    pub frame_count: u8,
    pub burst_period: u8,
    pub distance_cm: u32,
    pub rtt_ns: u32,
    pub elapsed_ms: u64,
}

impl Record for SweepRecord {
    const CSV_HEADER: &'static str =
        "physical_distance_cm,frame_count,burst_period,distance_cm,rtt_ns,elapsed_ms";

    fn csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.physical_distance_cm,
            self.frame_count,
            self.burst_period,
            self.distance_cm,
            self.rtt_ns,
            self.elapsed_ms
        )
    }
}

/// One accepted sample during continuous ranging
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangingRecord {
    pub timestamp_ms: u64,
    pub frame_count: u8,
    pub burst_period: u8,
    pub distance_cm: u32,
    pub rtt_ns: u32,
    pub elapsed_ms: u64,
    pub calibrated_cm: f32,
    pub smoothed_cm: f32,
}

impl Record for RangingRecord {
    const CSV_HEADER: &'static str =
        "timestamp_ms,frame_count,burst_period,distance_cm,rtt_ns,elapsed_ms,calibrated_cm,smoothed_cm";

    fn csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{:.2},{:.2}",
            self.timestamp_ms,
            self.frame_count,
            self.burst_period,
            self.distance_cm,
            self.rtt_ns,
            self.elapsed_ms,
            self.calibrated_cm,
            self.smoothed_cm
        )
    }
}

/// Destination for records
pub trait RecordSink<T> {
    fn emit(&mut self, record: &T) -> RangingResult<()>;

    fn flush(&mut self) -> RangingResult<()> {
        Ok(())
    }
}

impl<T: Clone> RecordSink<T> for Vec<T> {
    fn emit(&mut self, record: &T) -> RangingResult<()> {
        self.push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Csv,
    JsonLines,
}

impl FromStr for OutputFormat {
    type Err = RangingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "jsonl" | "json" | "ndjson" => Ok(OutputFormat::JsonLines),
            other => Err(RangingError::InvalidParameters(format!(
                "unknown output format '{other}' (expected csv or jsonl)"
            ))),
        }
    }
}

/// Line-oriented record writer. CSV output starts with a header line.
pub struct RecordWriter<W: Write> {
    out: W,
    format: OutputFormat,
    header_written: bool,
    rows: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            header_written: false,
            rows: 0,
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Concrete record destinations. Gzip output must be closed with
/// [`OutputStream::finish`] to write the trailer.
pub enum OutputStream {
    File(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    Stdout(Stdout),
}

impl OutputStream {
    /// Flush everything and terminate the gzip stream
    pub fn finish(self) -> io::Result<()> {
        match self {
            OutputStream::File(mut file) => file.flush(),
            OutputStream::Gzip(encoder) => encoder.finish()?.flush(),
            OutputStream::Stdout(mut out) => out.flush(),
        }
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputStream::File(file) => file.write(buf),
            OutputStream::Gzip(encoder) => encoder.write(buf),
            OutputStream::Stdout(out) => out.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputStream::File(file) => file.flush(),
            OutputStream::Gzip(encoder) => encoder.flush(),
            OutputStream::Stdout(out) => out.flush(),
        }
    }
}

impl RecordWriter<OutputStream> {
    /// Open `path` for writing, gzip-compressed when `gzip` is set
    pub fn create(path: &Path, format: OutputFormat, gzip: bool) -> RangingResult<Self> {
        let file = BufWriter::new(File::create(path)?);
        let out = if gzip {
            OutputStream::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            OutputStream::File(file)
        };
        Ok(Self::new(out, format))
    }

    /// Records to stdout
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(OutputStream::Stdout(io::stdout()), format)
    }

    /// Close the output. Returns the number of rows written.
    pub fn finish(self) -> RangingResult<u64> {
        let rows = self.rows;
        self.out.finish()?;
        Ok(rows)
    }
}

impl<T: Record, W: Write> RecordSink<T> for RecordWriter<W> {
    fn emit(&mut self, record: &T) -> RangingResult<()> {
        match self.format {
            OutputFormat::Csv => {
                if !self.header_written {
                    writeln!(self.out, "{}", T::CSV_HEADER)?;
                    self.header_written = true;
                }
                writeln!(self.out, "{}", record.csv_row())?;
            }
            OutputFormat::JsonLines => {
                serde_json::to_writer(&mut self.out, record)?;
                self.out.write_all(b"\n")?;
            }
        }
        self.rows += 1;
        Ok(())
    }

    fn flush(&mut self) -> RangingResult<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn record(distance_cm: u32) -> SweepRecord {
        SweepRecord {
            physical_distance_cm: 100,
            frame_count: 16,
            burst_period: 2,
            distance_cm,
            rtt_ns: 7,
            elapsed_ms: 42,
        }
    }

    #[test]
    fn test_csv_has_single_header() {
        let mut writer = RecordWriter::new(Vec::new(), OutputFormat::Csv);
        writer.emit(&record(101)).unwrap();
        writer.emit(&record(99)).unwrap();
        assert_eq!(writer.rows(), 2);

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], SweepRecord::CSV_HEADER);
        assert_eq!(lines[1], "100,16,2,101,7,42");
        assert_eq!(lines[2], "100,16,2,99,7,42");
    }

    #[test]
    fn test_json_lines_parse_back() {
        let mut writer = RecordWriter::new(Vec::new(), OutputFormat::JsonLines);
        writer.emit(&record(101)).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        let parsed: SweepRecord = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(parsed, record(101));
    }

    #[test]
    fn test_ranging_record_csv_precision() {
        let rec = RangingRecord {
            timestamp_ms: 1_000,
            frame_count: 64,
            burst_period: 10,
            distance_cm: 152,
            rtt_ns: 10,
            elapsed_ms: 102,
            calibrated_cm: 150.0,
            smoothed_cm: 149.333,
        };
        assert_eq!(rec.csv_row(), "1000,64,10,152,10,102,150.00,149.33");
    }

    #[test]
    fn test_gzip_output_is_complete_after_finish() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sweep.csv.gz");
        let mut writer = RecordWriter::create(&path, OutputFormat::Csv, true).unwrap();
        for d in 0..50 {
            writer.emit(&record(100 + d)).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 50);

        let mut text = String::new();
        GzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 51);
        assert_eq!(lines[0], SweepRecord::CSV_HEADER);
        assert_eq!(lines[50], "100,16,2,149,7,42");
    }

    #[test]
    fn test_plain_file_output() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sweep.jsonl");
        let mut writer = RecordWriter::create(&path, OutputFormat::JsonLines, false).unwrap();
        writer.emit(&record(77)).unwrap();
        writer.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: SweepRecord = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(parsed, record(77));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert_eq!("jsonl".parse::<OutputFormat>().unwrap(), OutputFormat::JsonLines);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_vec_sink_collects() {
        let mut sink: Vec<SweepRecord> = Vec::new();
        sink.emit(&record(1)).unwrap();
        assert_eq!(sink.len(), 1);
    }
}
