use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

/// Renders a table: one header line followed by numeric rows.
///
/// Only the first header is rendered, later headers are ignored. Rows that
/// arrive before a header are dropped.
pub trait TableWriter {
    fn write_header(&mut self, names: &[String]) -> io::Result<()>;
    fn write_row(&mut self, values: &[f64]) -> io::Result<()>;
}

/// Renders named records of key/value fields, one self-contained document
/// per call.
pub trait StructuredWriter {
    fn write_record(&mut self, name: &str, fields: &[(&str, Value)]) -> io::Result<()>;
}

/// A field value of a structured record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Array(Box<[f64]>),
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
}

impl From<Box<[f64]>> for Value {
    fn from(val: Box<[f64]>) -> Self {
        Value::Array(val)
    }
}

impl From<&[f64]> for Value {
    fn from(val: &[f64]) -> Self {
        Value::Array(val.into())
    }
}

impl From<Vec<f64>> for Value {
    fn from(val: Vec<f64>) -> Self {
        Value::Array(val.into())
    }
}

impl From<u64> for Value {
    fn from(val: u64) -> Self {
        Value::U64(val)
    }
}

impl From<i64> for Value {
    fn from(val: i64) -> Self {
        Value::I64(val)
    }
}

impl From<f64> for Value {
    fn from(val: f64) -> Self {
        Value::F64(val)
    }
}

impl From<bool> for Value {
    fn from(val: bool) -> Self {
        Value::Bool(val)
    }
}

impl From<&str> for Value {
    fn from(val: &str) -> Self {
        Value::Str(val.to_string())
    }
}

impl From<String> for Value {
    fn from(val: String) -> Self {
        Value::Str(val)
    }
}

/// The byte stream a writer renders into.
///
/// An owned stream is closed together with the writer. A shared stream
/// belongs to the caller and stays usable after the writer is gone.
#[derive(Debug)]
pub enum Sink<W: Write> {
    Owned(W),
    Shared(Rc<RefCell<W>>),
}

impl<W: Write> Sink<W> {
    pub fn shared(stream: &Rc<RefCell<W>>) -> Self {
        Sink::Shared(Rc::clone(stream))
    }
}

impl<W: Write> Write for Sink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Owned(stream) => stream.write(buf),
            Sink::Shared(stream) => stream
                .try_borrow_mut()
                .map_err(|_| io::Error::other("shared stream is already borrowed"))?
                .write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Owned(stream) => stream.flush(),
            Sink::Shared(stream) => stream
                .try_borrow_mut()
                .map_err(|_| io::Error::other("shared stream is already borrowed"))?
                .flush(),
        }
    }
}

/// Accepts everything and renders nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWriter;

impl TableWriter for NullWriter {
    fn write_header(&mut self, _names: &[String]) -> io::Result<()> {
        Ok(())
    }

    fn write_row(&mut self, _values: &[f64]) -> io::Result<()> {
        Ok(())
    }
}

impl StructuredWriter for NullWriter {
    fn write_record(&mut self, _name: &str, _fields: &[(&str, Value)]) -> io::Result<()> {
        Ok(())
    }
}
