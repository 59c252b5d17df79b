//! Routing of the sampler's output streams to optional writers.
//!
//! Every stream has a fixed channel identifier. The driver publishes by
//! channel only and never sees a concrete writer; channels without a writer
//! swallow whatever is published to them.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use tracing::{debug, warn};

use super::writer::{StructuredWriter, TableWriter, Value};

pub type SharedTableWriter = Rc<RefCell<dyn TableWriter>>;
pub type SharedStructuredWriter = Rc<RefCell<dyn StructuredWriter>>;

/// Tabular output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableChannel {
    /// Constrained draws of the sampling phase, thinned.
    DrawSample,
    /// Constrained draws of the warmup phase.
    DrawWarmup,
    /// Unconstrained draws of the sampling phase, thinned.
    UparamsSample,
    /// Unconstrained draws of the warmup phase.
    UparamsWarmup,
    /// Sampler diagnostics of every iteration.
    AlgoState,
}

impl TableChannel {
    pub const ALL: [TableChannel; 5] = [
        TableChannel::DrawSample,
        TableChannel::DrawWarmup,
        TableChannel::UparamsSample,
        TableChannel::UparamsWarmup,
        TableChannel::AlgoState,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TableChannel::DrawSample => "draw_sample",
            TableChannel::DrawWarmup => "draw_warmup",
            TableChannel::UparamsSample => "uparams_sample",
            TableChannel::UparamsWarmup => "uparams_warmup",
            TableChannel::AlgoState => "algo_state",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Structured output streams, written at most once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructChannel {
    /// Step size and inverse metric at the end of warmup.
    InvMetric,
    /// Elapsed warmup and sampling time.
    RunTiming,
}

impl StructChannel {
    pub const ALL: [StructChannel; 2] = [StructChannel::InvMetric, StructChannel::RunTiming];

    pub fn name(self) -> &'static str {
        match self {
            StructChannel::InvMetric => "inv_metric",
            StructChannel::RunTiming => "run_timing",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

mod private {
    pub trait Sealed {}

    impl Sealed for super::TableChannel {}
    impl Sealed for super::StructChannel {}
}

/// A channel family together with the kind of writer it accepts.
pub trait Channel: private::Sealed + Copy + Debug {
    type Handle;

    #[doc(hidden)]
    fn bind(self, dispatcher: &mut Dispatcher, handle: Self::Handle) -> bool;

    #[doc(hidden)]
    fn bound(self, dispatcher: &Dispatcher) -> bool;
}

impl Channel for TableChannel {
    type Handle = SharedTableWriter;

    fn bind(self, dispatcher: &mut Dispatcher, handle: SharedTableWriter) -> bool {
        dispatcher.tables[self.slot()].replace(handle).is_some()
    }

    fn bound(self, dispatcher: &Dispatcher) -> bool {
        dispatcher.tables[self.slot()].is_some()
    }
}

impl Channel for StructChannel {
    type Handle = SharedStructuredWriter;

    fn bind(self, dispatcher: &mut Dispatcher, handle: SharedStructuredWriter) -> bool {
        dispatcher.structs[self.slot()].replace(handle).is_some()
    }

    fn bound(self, dispatcher: &Dispatcher) -> bool {
        dispatcher.structs[self.slot()].is_some()
    }
}

/// Registry of at most one writer per channel.
#[derive(Default)]
pub struct Dispatcher {
    tables: [Option<SharedTableWriter>; 5],
    structs: [Option<SharedStructuredWriter>; 2],
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a writer to a channel.
    ///
    /// A writer that was bound to the channel before is released.
    pub fn add_writer<C: Channel>(&mut self, channel: C, writer: C::Handle) {
        if channel.bind(self, writer) {
            debug!(?channel, "replaced writer");
        } else {
            debug!(?channel, "bound writer");
        }
    }

    pub fn is_bound<C: Channel>(&self, channel: C) -> bool {
        channel.bound(self)
    }

    pub fn table_header(&self, channel: TableChannel, names: &[String]) {
        self.with_table(channel, |writer| writer.write_header(names));
    }

    pub fn table_row(&self, channel: TableChannel, values: &[f64]) {
        self.with_table(channel, |writer| writer.write_row(values));
    }

    pub fn write_record(&self, channel: StructChannel, name: &str, fields: &[(&str, Value)]) {
        let Some(writer) = &self.structs[channel.slot()] else {
            return;
        };
        let result = match writer.try_borrow_mut() {
            Ok(mut writer) => writer.write_record(name, fields),
            Err(_) => {
                warn!(channel = channel.name(), "writer is busy, record dropped");
                return;
            }
        };
        if let Err(err) = result {
            warn!(channel = channel.name(), error = %err, "failed to write record");
        }
    }

    fn with_table(
        &self,
        channel: TableChannel,
        write: impl FnOnce(&mut dyn TableWriter) -> std::io::Result<()>,
    ) {
        let Some(writer) = &self.tables[channel.slot()] else {
            return;
        };
        let result = match writer.try_borrow_mut() {
            Ok(mut writer) => write(&mut *writer),
            Err(_) => {
                warn!(channel = channel.name(), "writer is busy, output dropped");
                return;
            }
        };
        if let Err(err) = result {
            warn!(channel = channel.name(), error = %err, "failed to write table");
        }
    }
}
