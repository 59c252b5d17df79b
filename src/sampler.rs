use rand::Rng;
use tracing::debug;

use crate::adapt_strategy::VarianceAdaptation;
use crate::callbacks::Logger;
use crate::mass_matrix::DiagMassMatrix;
use crate::model::Model;
use crate::nuts::{draw, Collector, Direction, Hamiltonian, NutsError, NutsOptions, Result};
use crate::potential::EuclideanPotential;
use crate::state::State;
use crate::stepsize::{AcceptanceRateCollector, DualAverage, DualAverageSettings};

/// Names of the diagnostic values in [`Draw::stats`].
pub const STAT_NAMES: [&str; 7] = [
    "lp__",
    "accept_stat__",
    "stepsize__",
    "treedepth__",
    "n_leapfrog__",
    "divergent__",
    "energy__",
];

/// Output of a single transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
    /// The draw on the constrained space, aligned with `param_names`.
    pub constrained: Box<[f64]>,
    /// The position of the chain on the unconstrained space.
    pub unconstrained: Box<[f64]>,
    /// Diagnostics, aligned with `stat_names`.
    pub stats: Box<[f64]>,
}

/// Adapted tuning parameters at the end of warmup.
#[derive(Debug, Clone, PartialEq)]
pub struct Adaptation {
    pub step_size: f64,
    pub inv_metric: Box<[f64]>,
}

/// A stateful transition operator with an adaptation phase.
pub trait AdaptiveSampler {
    /// Dimension of the unconstrained space.
    fn dim(&self) -> usize;
    fn param_names(&self) -> Vec<String>;
    fn stat_names(&self) -> Vec<String>;

    /// Move the chain to `position` (unconstrained).
    fn set_position(&mut self, position: &[f64]) -> Result<()>;

    fn transition(&mut self) -> Result<Draw>;

    /// Stop adapting and return the tuning parameters used from now on.
    fn finalize_adaptation(&mut self) -> Adaptation;
}

/// Settings for the adaptation of [`AdaptDiagNuts`]
#[derive(Debug, Clone, Copy)]
pub struct AdaptSettings {
    /// Initial nominal step size.
    pub step_size: f64,
    /// Relative uniform jitter of the step size, in `[0, 1]`.
    pub step_size_jitter: f64,
    /// The maximum tree depth. The number of leapfrog steps
    /// is smaller than 2 ^ max_depth.
    pub max_depth: u64,
    /// Target acceptance statistic of the dual averaging.
    pub delta: f64,
    pub gamma: f64,
    pub kappa: f64,
    pub t0: f64,
    /// Width of the initial fast adaptation interval.
    pub init_buffer: u64,
    /// Width of the final fast adaptation interval.
    pub term_buffer: u64,
    /// Initial width of the slow adaptation windows.
    pub window: u64,
}

impl Default for AdaptSettings {
    fn default() -> Self {
        let dual_average = DualAverageSettings::default();
        Self {
            step_size: 1.,
            step_size_jitter: 0.,
            max_depth: 10,
            delta: dual_average.delta,
            gamma: dual_average.gamma,
            kappa: dual_average.kappa,
            t0: dual_average.t0,
            init_buffer: 75,
            term_buffer: 50,
            window: 25,
        }
    }
}

impl AdaptSettings {
    pub fn dual_average(&self) -> DualAverageSettings {
        DualAverageSettings {
            delta: self.delta,
            gamma: self.gamma,
            kappa: self.kappa,
            t0: self.t0,
        }
    }
}

struct NoCollector;

impl Collector for NoCollector {}

/// NUTS with a diagonal metric, dual averaging of the step size and windowed
/// estimation of the metric during warmup.
pub struct AdaptDiagNuts<M: Model, R: Rng> {
    potential: EuclideanPotential<M>,
    rng: R,
    options: NutsOptions,
    nominal_step_size: f64,
    step_size_jitter: f64,
    adapt: bool,
    step_size_adapt: DualAverage,
    metric_adapt: VarianceAdaptation,
    state: Option<State>,
    constrained: Vec<f64>,
}

impl<M: Model, R: Rng> AdaptDiagNuts<M, R> {
    /// A sampler with unit metric and step size that does not adapt until
    /// [`engage_adaptation`](Self::engage_adaptation) is called.
    pub fn new(model: M, rng: R) -> Self {
        let dim = model.dim();
        let options = NutsOptions::default();
        let potential =
            EuclideanPotential::new(model, DiagMassMatrix::new(dim), options.max_energy_error, 1.);
        Self {
            potential,
            rng,
            options,
            nominal_step_size: 1.,
            step_size_jitter: 0.,
            adapt: false,
            step_size_adapt: DualAverage::new(DualAverageSettings::default(), 1.),
            metric_adapt: VarianceAdaptation::new(dim),
            state: None,
            constrained: Vec::with_capacity(dim),
        }
    }

    pub fn nominal_step_size(&self) -> f64 {
        self.nominal_step_size
    }

    pub fn set_nominal_step_size(&mut self, step_size: f64) {
        self.nominal_step_size = step_size;
    }

    pub fn set_step_size_jitter(&mut self, jitter: f64) {
        self.step_size_jitter = jitter;
    }

    pub fn set_max_depth(&mut self, maxdepth: u64) {
        self.options.maxdepth = maxdepth;
    }

    pub fn options(&self) -> &NutsOptions {
        &self.options
    }

    pub fn inv_metric(&self) -> &[f64] {
        &self.potential.mass_matrix.variance
    }

    pub fn set_inv_metric(&mut self, inv_metric: &[f64]) -> Result<()> {
        if inv_metric.len() != self.dim() {
            return Err(NutsError::InvalidSettings(format!(
                "inverse metric has {} entries, the model has dimension {}",
                inv_metric.len(),
                self.dim()
            )));
        }
        if let Some(bad) = inv_metric.iter().find(|&&x| !(x.is_finite() && x > 0.)) {
            return Err(NutsError::InvalidSettings(format!(
                "inverse metric must be positive and finite, found {}",
                bad
            )));
        }
        self.potential.mass_matrix.update_diag(inv_metric);
        Ok(())
    }

    /// Restart dual averaging with the current nominal step size.
    pub fn set_step_size_adaptation(&mut self, settings: DualAverageSettings) {
        self.step_size_adapt = DualAverage::new(settings, self.nominal_step_size);
    }

    pub fn set_window_params(
        &mut self,
        num_warmup: u64,
        init_buffer: u64,
        term_buffer: u64,
        window: u64,
        logger: &mut dyn Logger,
    ) {
        self.metric_adapt
            .window
            .set_window_params(num_warmup, init_buffer, term_buffer, window, logger);
    }

    pub fn engage_adaptation(&mut self) {
        self.adapt = true;
    }

    pub fn disengage_adaptation(&mut self) {
        self.adapt = false;
    }

    pub fn is_adapting(&self) -> bool {
        self.adapt
    }

    /// Search for a step size with a one step acceptance of about 0.8 at
    /// the current position, by repeated doubling or halving.
    pub fn init_stepsize(&mut self) -> Result<()> {
        let init = self.state.clone().ok_or(NutsError::Uninitialized)?;

        if self.nominal_step_size == 0.
            || self.nominal_step_size > 1e7
            || self.nominal_step_size.is_nan()
        {
            return Ok(());
        }

        let target = 0.8f64.ln();
        let increase = self.one_step_energy_change(&init)? > target;

        loop {
            let delta_h = self.one_step_energy_change(&init)?;
            if increase && !(delta_h > target) {
                break;
            }
            if !increase && !(delta_h < target) {
                break;
            }

            if increase {
                self.nominal_step_size *= 2.;
            } else {
                self.nominal_step_size *= 0.5;
            }

            if self.nominal_step_size > 1e7 {
                return Err(NutsError::ImproperPosterior);
            }
            if self.nominal_step_size == 0. {
                return Err(NutsError::NoAcceptableStepSize);
            }
        }
        Ok(())
    }

    fn one_step_energy_change(&mut self, init: &State) -> Result<f64> {
        let mut start = init.clone();
        self.potential.randomize_momentum(&mut start, &mut self.rng);
        let initial_energy = start.energy();
        self.potential.step_size = self.nominal_step_size;

        let delta_h = match self.potential.leapfrog(
            &start,
            Direction::Forward,
            initial_energy,
            &mut NoCollector,
        )? {
            Ok(end) => initial_energy - end.energy(),
            Err(info) => info.energy_error.map(|err| -err).unwrap_or(f64::NEG_INFINITY),
        };
        if delta_h.is_nan() {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(delta_h)
    }

    fn sample_step_size(&mut self) -> f64 {
        if self.step_size_jitter > 0. {
            let u: f64 = self.rng.random();
            self.nominal_step_size * (1. + self.step_size_jitter * (2. * u - 1.))
        } else {
            self.nominal_step_size
        }
    }

    fn update_adaptation(&mut self, accept_stat: f64, position: &[f64]) -> Result<()> {
        self.step_size_adapt.advance(accept_stat);
        self.nominal_step_size = self.step_size_adapt.current_step_size();

        if let Some(variance) = self.metric_adapt.learn_variance(position)? {
            self.potential.mass_matrix.update_diag(&variance);
            self.init_stepsize()?;
            self.step_size_adapt.restart(self.nominal_step_size);
            debug!(
                step_size = self.nominal_step_size,
                "updated metric at the end of an adaptation window"
            );
        }
        Ok(())
    }
}

impl<M: Model, R: Rng> AdaptiveSampler for AdaptDiagNuts<M, R> {
    fn dim(&self) -> usize {
        self.potential.dim()
    }

    fn param_names(&self) -> Vec<String> {
        self.potential.model().param_names()
    }

    fn stat_names(&self) -> Vec<String> {
        STAT_NAMES.iter().map(|name| name.to_string()).collect()
    }

    fn set_position(&mut self, position: &[f64]) -> Result<()> {
        if position.len() != self.dim() {
            return Err(NutsError::InvalidSettings(format!(
                "initial position has {} entries, the model has dimension {}",
                position.len(),
                self.dim()
            )));
        }
        self.state = Some(self.potential.init_state(position)?);
        if self.adapt {
            self.init_stepsize()?;
        }
        Ok(())
    }

    fn transition(&mut self) -> Result<Draw> {
        let step_size = self.sample_step_size();
        self.potential.step_size = step_size;

        let init = self.state.as_mut().ok_or(NutsError::Uninitialized)?;
        let mut collector = AcceptanceRateCollector::new();
        let (next, info) = draw(
            init,
            &mut self.rng,
            &mut self.potential,
            &self.options,
            &mut collector,
        )?;

        if let Some(div) = &info.divergence_info {
            debug!(
                energy_error = ?div.energy_error,
                end_idx = ?div.end_idx_in_trajectory,
                start = ?div.start_location,
                end = ?div.end_location,
                logp_error = ?div.logp_function_error.as_ref().map(|err| err.to_string()),
                "divergent transition"
            );
        } else if info.reached_maxdepth {
            debug!(depth = info.depth, "transition reached the maximum tree depth");
        }

        let accept_stat = collector.mean.current();
        let divergent = if info.divergence_info.is_some() { 1. } else { 0. };
        let stats = [
            next.logp(),
            accept_stat,
            step_size,
            info.depth as f64,
            collector.mean.count() as f64,
            divergent,
            next.energy(),
        ];
        let unconstrained = next.q.clone();
        self.state = Some(next);

        if self.adapt {
            self.update_adaptation(accept_stat, &unconstrained)?;
        }

        self.potential
            .model_mut()
            .constrain(&unconstrained, &mut self.constrained)
            .map_err(|err| NutsError::LogpFailure(Box::new(err)))?;

        Ok(Draw {
            constrained: self.constrained.as_slice().into(),
            unconstrained,
            stats: stats.into(),
        })
    }

    fn finalize_adaptation(&mut self) -> Adaptation {
        if self.adapt {
            self.disengage_adaptation();
            self.nominal_step_size = self.step_size_adapt.final_step_size(self.nominal_step_size);
        }
        Adaptation {
            step_size: self.nominal_step_size,
            inv_metric: self.potential.mass_matrix.variance.clone(),
        }
    }
}
