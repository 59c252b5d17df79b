use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::callbacks::{
    Dispatcher, Interrupt, InterruptStatus, Logger, StructChannel, TableChannel,
};
use crate::sampler::{AdaptiveSampler, Draw};

/// Iteration counts of a run
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    /// The number of warmup iterations, during which the sampler adapts.
    pub num_warmup: u64,
    /// The number of iterations after warmup.
    pub num_samples: u64,
    /// Publish every `num_thin`-th draw of the sampling phase.
    pub num_thin: u64,
    /// Progress is reported every `refresh` iterations, `0` disables it.
    pub refresh: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            num_warmup: 1000,
            num_samples: 1000,
            num_thin: 1,
            refresh: 100,
        }
    }
}

/// What happened during a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Completed iterations of both phases.
    pub iterations: u64,
    /// The run was cancelled before all iterations were done.
    pub interrupted: bool,
    pub warmup: Duration,
    pub sampling: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Warmup,
    Sampling,
    Done,
    Cancelled,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Warmup => "Warmup",
            _ => "Sampling",
        }
    }
}

/// Run `num_warmup` adapting and `num_samples` fixed transitions of
/// `sampler` starting at the unconstrained position `init`, publishing
/// every output through `dispatcher`.
///
/// Each table gets its header only if its phase has at least one iteration,
/// so with `num_warmup == 0` the warmup tables stay empty and with
/// `num_samples == 0` the sample tables do.
///
/// The interrupt is polled before every iteration. A cancelled run keeps
/// whatever was published until then and is reported through
/// [`RunSummary::interrupted`]. A failing transition ends the run with an
/// error.
pub fn run_adaptive_sampler<S: AdaptiveSampler + ?Sized>(
    sampler: &mut S,
    init: &[f64],
    settings: &RunSettings,
    interrupt: &mut dyn Interrupt,
    logger: &mut dyn Logger,
    dispatcher: &Dispatcher,
) -> Result<RunSummary> {
    if settings.num_thin == 0 {
        bail!("num_thin must be at least 1");
    }
    let Some(total) = settings.num_warmup.checked_add(settings.num_samples) else {
        bail!(
            "num_warmup ({}) plus num_samples ({}) overflows",
            settings.num_warmup,
            settings.num_samples
        );
    };

    sampler
        .set_position(init)
        .context("Failed to initialize the sampler")?;

    let param_names = sampler.param_names();
    let uparam_names: Vec<String> = (1..=sampler.dim()).map(|i| i.to_string()).collect();

    dispatcher.table_header(TableChannel::AlgoState, &sampler.stat_names());
    if settings.num_warmup > 0 {
        dispatcher.table_header(TableChannel::DrawWarmup, &param_names);
        dispatcher.table_header(TableChannel::UparamsWarmup, &uparam_names);
    }

    let mut summary = RunSummary {
        iterations: 0,
        interrupted: false,
        warmup: Duration::ZERO,
        sampling: Duration::ZERO,
    };
    let mut phase = Phase::Warmup;
    let mut phase_start = Instant::now();
    debug!(total, "starting warmup");

    loop {
        phase = match phase {
            Phase::Warmup if summary.iterations == settings.num_warmup => {
                summary.warmup = phase_start.elapsed();
                finish_warmup(sampler, dispatcher);
                if settings.num_samples > 0 {
                    dispatcher.table_header(TableChannel::DrawSample, &param_names);
                    dispatcher.table_header(TableChannel::UparamsSample, &uparam_names);
                }
                phase_start = Instant::now();
                debug!(iteration = summary.iterations, "starting sampling");
                Phase::Sampling
            }
            Phase::Sampling if summary.iterations == total => {
                summary.sampling = phase_start.elapsed();
                Phase::Done
            }
            Phase::Done | Phase::Cancelled => break,
            Phase::Warmup | Phase::Sampling => {
                if interrupt.check() == InterruptStatus::Cancel {
                    match phase {
                        Phase::Warmup => summary.warmup = phase_start.elapsed(),
                        _ => summary.sampling = phase_start.elapsed(),
                    }
                    Phase::Cancelled
                } else {
                    let draw = sampler.transition().with_context(|| {
                        format!("Sampler transition failed in iteration {}", summary.iterations + 1)
                    })?;
                    summary.iterations += 1;
                    publish_draw(dispatcher, settings, phase, summary.iterations, &draw);
                    report_progress(logger, settings, phase, summary.iterations, total);
                    phase
                }
            }
        };
    }

    if phase == Phase::Cancelled {
        summary.interrupted = true;
        info!(iteration = summary.iterations, "run cancelled");
        logger.warn(&format!(
            "Sampling interrupted after {} of {} iterations",
            summary.iterations, total
        ));
        return Ok(summary);
    }

    dispatcher.write_record(
        StructChannel::RunTiming,
        "timing",
        &[
            ("warmup", summary.warmup.as_secs_f64().into()),
            ("sampling", summary.sampling.as_secs_f64().into()),
        ],
    );
    report_timing(logger, &summary);

    Ok(summary)
}

fn finish_warmup<S: AdaptiveSampler + ?Sized>(sampler: &mut S, dispatcher: &Dispatcher) {
    let adaptation = sampler.finalize_adaptation();
    debug!(step_size = adaptation.step_size, "adaptation finished");
    dispatcher.write_record(
        StructChannel::InvMetric,
        "adaptation",
        &[
            ("stepsize", adaptation.step_size.into()),
            ("inv_metric", adaptation.inv_metric.into()),
        ],
    );
}

/// Route a draw of `iteration` (1-based over the whole run) to the tables of
/// its phase.
fn publish_draw(
    dispatcher: &Dispatcher,
    settings: &RunSettings,
    phase: Phase,
    iteration: u64,
    draw: &Draw,
) {
    match phase {
        Phase::Warmup => {
            dispatcher.table_row(TableChannel::DrawWarmup, &draw.constrained);
            dispatcher.table_row(TableChannel::UparamsWarmup, &draw.unconstrained);
        }
        Phase::Sampling => {
            let k = iteration - settings.num_warmup;
            if k % settings.num_thin == 0 {
                dispatcher.table_row(TableChannel::DrawSample, &draw.constrained);
                dispatcher.table_row(TableChannel::UparamsSample, &draw.unconstrained);
            }
        }
        Phase::Done | Phase::Cancelled => return,
    }
    dispatcher.table_row(TableChannel::AlgoState, &draw.stats);
}

fn report_progress(
    logger: &mut dyn Logger,
    settings: &RunSettings,
    phase: Phase,
    iteration: u64,
    total: u64,
) {
    if settings.refresh == 0 {
        return;
    }
    let in_phase = match phase {
        Phase::Warmup => iteration,
        _ => iteration - settings.num_warmup,
    };
    if !(in_phase == 1 || iteration == total || in_phase % settings.refresh == 0) {
        return;
    }

    let width = total.to_string().len();
    let percent = (100. * iteration as f64 / total as f64) as u64;
    logger.info(&format!(
        "Iteration: {:>width$} / {} [{:>3}%]  ({})",
        iteration,
        total,
        percent,
        phase.label(),
        width = width
    ));
}

fn report_timing(logger: &mut dyn Logger, summary: &RunSummary) {
    let warmup = summary.warmup.as_secs_f64();
    let sampling = summary.sampling.as_secs_f64();
    logger.info("");
    logger.info(&format!(" Elapsed Time: {:.3} seconds (Warm-up)", warmup));
    logger.info(&format!("               {:.3} seconds (Sampling)", sampling));
    logger.info(&format!("               {:.3} seconds (Total)", warmup + sampling));
    logger.info("");
}
