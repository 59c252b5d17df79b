//! Entry points that put a sampler, its collaborators and a dispatcher
//! together.

mod config;
mod rng;
mod run_adaptive_sampler;

pub use config::config_adaptive_sampler;
pub use rng::create_rng;
pub use run_adaptive_sampler::{run_adaptive_sampler, RunSettings, RunSummary};
