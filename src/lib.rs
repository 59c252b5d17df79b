//! Run an adaptive Hamiltonian Monte Carlo sampler and route its draws and
//! diagnostics to pluggable output channels.
//!
//! The driver [`run_adaptive_sampler`] moves any [`AdaptiveSampler`] through
//! warmup and sampling and publishes everything it produces through a
//! [`Dispatcher`]. Which channels end up somewhere, and in which format, is
//! decided by the writers bound to the dispatcher.
//!
//! ```no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use nuts_dispatch::{CsvWriter, Dispatcher, TableChannel};
//!
//! let mut dispatcher = Dispatcher::new();
//! let draws = CsvWriter::create("draws.csv").unwrap();
//! dispatcher.add_writer(TableChannel::DrawSample, Rc::new(RefCell::new(draws)));
//! ```

pub(crate) mod adapt_strategy;
pub mod callbacks;
pub(crate) mod mass_matrix;
pub(crate) mod math;
pub(crate) mod model;
pub(crate) mod nuts;
pub(crate) mod potential;
pub(crate) mod sampler;
pub mod services;
pub(crate) mod state;
pub(crate) mod stepsize;

pub use callbacks::{
    CancelAfter, Channel, CsvWriter, Dispatcher, Interrupt, InterruptFlag, InterruptStatus,
    JsonWriter, Logger, NeverInterrupt, NullLogger, NullWriter, SharedStructuredWriter,
    SharedTableWriter, Sink, StructChannel, StructuredWriter, TableChannel, TableWriter,
    TracingLogger, Value,
};
pub use model::{column_names, LogpError, Model};
pub use nuts::{NutsError, NutsOptions};
pub use sampler::{AdaptDiagNuts, AdaptSettings, Adaptation, AdaptiveSampler, Draw, STAT_NAMES};
pub use services::{
    config_adaptive_sampler, create_rng, run_adaptive_sampler, RunSettings, RunSummary,
};
pub use stepsize::DualAverageSettings;
