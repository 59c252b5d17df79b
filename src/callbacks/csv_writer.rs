use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use itertools::Itertools;

use super::writer::{Sink, TableWriter};

const SEPARATOR: &str = ", ";

/// Comma separated rendering of a table.
///
/// Values are written with the default `f64` formatting, so `1.0` becomes
/// `1`. There is no quoting and no trailing separator.
pub struct CsvWriter<W: Write> {
    sink: Sink<W>,
    header_written: bool,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(sink: Sink<W>) -> Self {
        CsvWriter {
            sink,
            header_written: false,
        }
    }

    pub fn has_header(&self) -> bool {
        self.header_written
    }
}

impl CsvWriter<BufWriter<File>> {
    /// Create (or truncate) a csv file that is owned by the writer.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(CsvWriter::new(Sink::Owned(BufWriter::new(file))))
    }
}

impl<W: Write> TableWriter for CsvWriter<W> {
    fn write_header(&mut self, names: &[String]) -> io::Result<()> {
        if self.header_written {
            return Ok(());
        }
        writeln!(self.sink, "{}", names.iter().join(SEPARATOR))?;
        self.header_written = true;
        Ok(())
    }

    fn write_row(&mut self, values: &[f64]) -> io::Result<()> {
        if !self.header_written {
            return Ok(());
        }
        writeln!(self.sink, "{}", values.iter().join(SEPARATOR))
    }
}

impl<W: Write> Drop for CsvWriter<W> {
    fn drop(&mut self) {
        let _ = self.sink.flush();
    }
}
