use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde_json::{json, Map};

use super::writer::{Sink, StructuredWriter, Value};

/// Writes every record as its own pretty printed JSON object
/// `{"<name>": {<fields>}}` followed by a newline.
///
/// Non-finite floats are rendered as `null`.
pub struct JsonWriter<W: Write> {
    sink: Sink<W>,
}

impl<W: Write> JsonWriter<W> {
    pub fn new(sink: Sink<W>) -> Self {
        JsonWriter { sink }
    }
}

impl JsonWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(JsonWriter::new(Sink::Owned(BufWriter::new(file))))
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Array(values) => json!(values),
        Value::U64(val) => json!(val),
        Value::I64(val) => json!(val),
        Value::F64(val) => json!(val),
        Value::Bool(val) => json!(val),
        Value::Str(val) => json!(val),
    }
}

impl<W: Write> StructuredWriter for JsonWriter<W> {
    fn write_record(&mut self, name: &str, fields: &[(&str, Value)]) -> io::Result<()> {
        let body: Map<String, serde_json::Value> = fields
            .iter()
            .map(|(key, value)| (key.to_string(), to_json(value)))
            .collect();
        let mut record = Map::new();
        record.insert(name.to_string(), serde_json::Value::Object(body));

        serde_json::to_writer_pretty(&mut self.sink, &record)?;
        self.sink.write_all(b"\n")
    }
}

impl<W: Write> Drop for JsonWriter<W> {
    fn drop(&mut self) {
        let _ = self.sink.flush();
    }
}
