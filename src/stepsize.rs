use crate::{
    nuts::{Collector, DivergenceInfo, NutsOptions},
    state::State,
};

/// Settings for step size adaptation
#[derive(Debug, Clone, Copy)]
pub struct DualAverageSettings {
    /// Target mean acceptance statistic.
    pub delta: f64,
    /// Adaptation regularization scale.
    pub gamma: f64,
    /// Relaxation exponent of the averaged iterate.
    pub kappa: f64,
    /// Adaptation iteration offset.
    pub t0: f64,
}

impl Default for DualAverageSettings {
    fn default() -> DualAverageSettings {
        DualAverageSettings {
            delta: 0.8,
            gamma: 0.05,
            kappa: 0.75,
            t0: 10.,
        }
    }
}

/// Nesterov dual averaging on the log step size.
#[derive(Debug, Clone)]
pub(crate) struct DualAverage {
    log_step: f64,
    log_step_adapted: f64,
    hbar: f64,
    mu: f64,
    count: u64,
    settings: DualAverageSettings,
}

impl DualAverage {
    pub(crate) fn new(settings: DualAverageSettings, initial_step: f64) -> DualAverage {
        DualAverage {
            log_step: initial_step.ln(),
            log_step_adapted: 0.,
            hbar: 0.,
            mu: (10. * initial_step).ln(),
            count: 0,
            settings,
        }
    }

    /// Shrink toward `mu = ln(10 * step)` and forget the history.
    pub(crate) fn restart(&mut self, step: f64) {
        self.mu = (10. * step).ln();
        self.log_step = step.ln();
        self.log_step_adapted = 0.;
        self.hbar = 0.;
        self.count = 0;
    }

    pub(crate) fn advance(&mut self, accept_stat: f64) {
        self.count += 1;
        let accept_stat = accept_stat.min(1.);
        let count = self.count as f64;

        let w = 1. / (count + self.settings.t0);
        self.hbar = (1. - w) * self.hbar + w * (self.settings.delta - accept_stat);
        self.log_step = self.mu - self.hbar * count.sqrt() / self.settings.gamma;
        let mk = count.powf(-self.settings.kappa);
        self.log_step_adapted = mk * self.log_step + (1. - mk) * self.log_step_adapted;
    }

    pub(crate) fn current_step_size(&self) -> f64 {
        self.log_step.exp()
    }

    pub(crate) fn current_step_size_adapted(&self) -> f64 {
        self.log_step_adapted.exp()
    }

    /// The averaged step size, or `current` if nothing was learned since the
    /// last restart.
    pub(crate) fn final_step_size(&self, current: f64) -> f64 {
        if self.count == 0 {
            current
        } else {
            self.current_step_size_adapted()
        }
    }
}

pub(crate) struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    fn new() -> RunningMean {
        RunningMean { sum: 0., count: 0 }
    }

    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub(crate) fn current(&self) -> f64 {
        if self.count == 0 {
            return 0.;
        }
        self.sum / self.count as f64
    }

    pub(crate) fn reset(&mut self) {
        self.sum = 0f64;
        self.count = 0;
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

/// Mean Metropolis acceptance probability over all leapfrog steps of a
/// trajectory, relative to the energy of its initial point.
pub(crate) struct AcceptanceRateCollector {
    initial_energy: f64,
    pub(crate) mean: RunningMean,
}

impl AcceptanceRateCollector {
    pub(crate) fn new() -> AcceptanceRateCollector {
        AcceptanceRateCollector {
            initial_energy: 0.,
            mean: RunningMean::new(),
        }
    }
}

impl Collector for AcceptanceRateCollector {
    fn register_leapfrog(
        &mut self,
        _start: &State,
        end: &State,
        divergence_info: Option<&DivergenceInfo>,
    ) {
        match divergence_info {
            Some(_) => self.mean.add(0.),
            None => self.mean.add(end.log_acceptance_probability(self.initial_energy).exp()),
        }
    }

    fn register_init(&mut self, state: &State, _options: &NutsOptions) {
        self.initial_energy = state.energy();
        self.mean.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn step_grows_when_accepting_too_much() {
        let mut adapt = DualAverage::new(DualAverageSettings::default(), 1.);
        for _ in 0..50 {
            adapt.advance(1.);
        }
        assert!(adapt.current_step_size() > 1.);
        assert!(adapt.current_step_size_adapted() > 1.);
        assert_eq!(adapt.count, 50);
    }

    #[test]
    fn step_shrinks_when_rejecting() {
        let mut adapt = DualAverage::new(DualAverageSettings::default(), 1.);
        for _ in 0..50 {
            adapt.advance(0.);
        }
        assert!(adapt.current_step_size() < 1.);
    }

    #[test]
    fn first_update_is_closed_form() {
        let settings = DualAverageSettings::default();
        let mut adapt = DualAverage::new(settings, 0.5);
        adapt.advance(0.6);

        let hbar = (settings.delta - 0.6) / (1. + settings.t0);
        let log_step = (10f64 * 0.5).ln() - hbar / settings.gamma;
        assert_relative_eq!(adapt.current_step_size(), log_step.exp(), epsilon = 1e-12);
        assert_relative_eq!(adapt.current_step_size_adapted(), log_step.exp(), epsilon = 1e-12);
    }

    #[test]
    fn restart_forgets_history() {
        let mut adapt = DualAverage::new(DualAverageSettings::default(), 1.);
        adapt.advance(0.1);
        adapt.restart(0.25);
        assert_eq!(adapt.count, 0);
        assert_relative_eq!(adapt.current_step_size(), 0.25);
        assert_relative_eq!(adapt.final_step_size(0.25), 0.25);
    }

    #[test]
    fn acceptance_rate_counts_divergences_as_zero() {
        let mut collector = AcceptanceRateCollector::new();
        let mut init = State::new(1);
        init.potential_energy = 1.;
        collector.register_init(&init, &NutsOptions::default());

        let mut end = State::new(1);
        end.potential_energy = 1.;
        collector.register_leapfrog(&init, &end, None);
        let info = DivergenceInfo::default();
        collector.register_leapfrog(&init, &end, Some(&info));

        assert_eq!(collector.mean.count(), 2);
        assert_relative_eq!(collector.mean.current(), 0.5);
    }
}
