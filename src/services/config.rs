use anyhow::{Context, Result};
use rand::Rng;
use tracing::debug;

use crate::callbacks::Logger;
use crate::model::Model;
use crate::nuts::NutsError;
use crate::sampler::{AdaptDiagNuts, AdaptSettings};

fn validate(settings: &AdaptSettings) -> std::result::Result<(), NutsError> {
    let invalid = |msg: &str| Err(NutsError::InvalidSettings(msg.to_string()));

    if !(settings.step_size.is_finite() && settings.step_size > 0.) {
        return invalid("step_size must be positive and finite");
    }
    if !(0. ..=1.).contains(&settings.step_size_jitter) {
        return invalid("step_size_jitter must be between 0 and 1");
    }
    if settings.max_depth == 0 {
        return invalid("max_depth must be positive");
    }
    if !(settings.delta > 0. && settings.delta < 1.) {
        return invalid("delta must be between 0 and 1");
    }
    if !(settings.gamma > 0.) {
        return invalid("gamma must be positive");
    }
    if !(settings.kappa > 0.) {
        return invalid("kappa must be positive");
    }
    if !(settings.t0 > 0.) {
        return invalid("t0 must be positive");
    }
    Ok(())
}

/// Prepare `sampler` for a run with `num_warmup` adapting iterations.
///
/// Sets the initial inverse metric, step size, jitter and tree depth,
/// configures dual averaging and the metric adaptation windows and engages
/// adaptation.
pub fn config_adaptive_sampler<M: Model, R: Rng>(
    sampler: &mut AdaptDiagNuts<M, R>,
    inv_metric: &[f64],
    settings: &AdaptSettings,
    num_warmup: u64,
    logger: &mut dyn Logger,
) -> Result<()> {
    validate(settings).context("Invalid adaptation settings")?;
    sampler
        .set_inv_metric(inv_metric)
        .context("Invalid initial inverse metric")?;

    sampler.set_nominal_step_size(settings.step_size);
    sampler.set_step_size_jitter(settings.step_size_jitter);
    sampler.set_max_depth(settings.max_depth);
    sampler.set_step_size_adaptation(settings.dual_average());
    sampler.set_window_params(
        num_warmup,
        settings.init_buffer,
        settings.term_buffer,
        settings.window,
        logger,
    );
    sampler.engage_adaptation();

    debug!(?settings, num_warmup, "configured adaptive sampler");
    Ok(())
}
