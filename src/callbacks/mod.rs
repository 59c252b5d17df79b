mod csv_writer;
mod dispatcher;
mod interrupt;
mod json_writer;
mod logger;
mod writer;

pub use csv_writer::CsvWriter;
pub use dispatcher::{
    Channel, Dispatcher, SharedStructuredWriter, SharedTableWriter, StructChannel, TableChannel,
};
pub use interrupt::{CancelAfter, Interrupt, InterruptFlag, InterruptStatus, NeverInterrupt};
pub use json_writer::JsonWriter;
pub use logger::{Logger, NullLogger, TracingLogger};
pub use writer::{NullWriter, Sink, StructuredWriter, TableWriter, Value};
