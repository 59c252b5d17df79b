use crate::callbacks::Logger;
use crate::mass_matrix::WelfordVariance;
use crate::nuts::{NutsError, Result};

/// Warmup iterations below which the metric is not adapted.
const MIN_ADAPT_WARMUP: u64 = 20;

/// Schedule of the slow (metric) adaptation windows.
///
/// Warmup is split into an initial fast buffer, a series of slow windows
/// that double in size and a terminal fast buffer. The last slow window is
/// stretched to end right before the terminal buffer.
#[derive(Debug, Clone)]
pub(crate) struct WindowedAdaptation {
    enabled: bool,
    num_warmup: u64,
    init_buffer: u64,
    term_buffer: u64,
    base_window: u64,
    counter: u64,
    window_size: u64,
    next_window: u64,
}

impl WindowedAdaptation {
    pub(crate) fn new() -> Self {
        Self {
            enabled: false,
            num_warmup: 0,
            init_buffer: 0,
            term_buffer: 0,
            base_window: 0,
            counter: 0,
            window_size: 0,
            next_window: 0,
        }
    }

    pub(crate) fn set_window_params(
        &mut self,
        num_warmup: u64,
        init_buffer: u64,
        term_buffer: u64,
        base_window: u64,
        logger: &mut dyn Logger,
    ) {
        if num_warmup < MIN_ADAPT_WARMUP {
            logger.info(&format!(
                "WARNING: No variance estimation is performed for num_warmup < {}",
                MIN_ADAPT_WARMUP
            ));
            logger.info("");
            *self = Self::new();
            return;
        }

        self.enabled = true;
        self.num_warmup = num_warmup;

        if init_buffer + base_window + term_buffer > num_warmup {
            self.init_buffer = (0.15 * num_warmup as f64) as u64;
            self.term_buffer = (0.1 * num_warmup as f64) as u64;
            self.base_window = num_warmup - (self.init_buffer + self.term_buffer);

            logger.info(
                "WARNING: There aren't enough warmup iterations to fit the \
                 three stages of adaptation as currently configured.",
            );
            logger.info(
                "         Reducing each adaptation stage to 15%/75%/10% of \
                 the given number of warmup iterations:",
            );
            logger.info(&format!("           init_buffer = {}", self.init_buffer));
            logger.info(&format!("           adapt_window = {}", self.base_window));
            logger.info(&format!("           term_buffer = {}", self.term_buffer));
            logger.info("");
        } else {
            self.init_buffer = init_buffer;
            self.term_buffer = term_buffer;
            self.base_window = base_window;
        }
        self.restart();
    }

    pub(crate) fn restart(&mut self) {
        self.counter = 0;
        self.window_size = self.base_window;
        self.next_window = (self.init_buffer + self.window_size).saturating_sub(1);
    }

    fn last_window_end(&self) -> u64 {
        (self.num_warmup - self.term_buffer).saturating_sub(1)
    }

    /// Whether the current iteration lies inside a slow window.
    pub(crate) fn adaptation_window(&self) -> bool {
        self.enabled
            && self.counter >= self.init_buffer
            && self.counter < self.num_warmup - self.term_buffer
            && self.counter != self.num_warmup
    }

    /// Whether the current iteration closes a slow window.
    pub(crate) fn end_adaptation_window(&self) -> bool {
        self.enabled && self.counter == self.next_window && self.counter != self.num_warmup
    }

    pub(crate) fn compute_next_window(&mut self) {
        if self.next_window == self.last_window_end() {
            return;
        }

        self.window_size *= 2;
        self.next_window = self.counter + self.window_size;

        if self.next_window != self.last_window_end() {
            let next_window_boundary = self.next_window + 2 * self.window_size;
            if next_window_boundary >= self.num_warmup - self.term_buffer {
                self.next_window = self.last_window_end();
            }
        }
    }

    pub(crate) fn advance(&mut self) {
        self.counter += 1;
    }
}

/// Diagonal metric estimation over the slow windows of a [`WindowedAdaptation`].
#[derive(Debug)]
pub(crate) struct VarianceAdaptation {
    pub(crate) window: WindowedAdaptation,
    estimator: WelfordVariance,
}

impl VarianceAdaptation {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            window: WindowedAdaptation::new(),
            estimator: WelfordVariance::new(dim),
        }
    }

    /// Record a draw and return the regularized variance when a window closes.
    pub(crate) fn learn_variance(&mut self, position: &[f64]) -> Result<Option<Box<[f64]>>> {
        if self.window.adaptation_window() {
            self.estimator.add_sample(position);
        }

        if !self.window.end_adaptation_window() {
            self.window.advance();
            return Ok(None);
        }

        self.window.compute_next_window();

        let mut variance: Box<[f64]> = vec![1f64; position.len()].into();
        self.estimator.sample_variance(&mut variance);

        let n = self.estimator.count() as f64;
        variance
            .iter_mut()
            .for_each(|var| *var = (n / (n + 5.)) * *var + 1e-3 * (5. / (n + 5.)));

        if !variance.iter().all(|var| var.is_finite()) {
            return Err(NutsError::MetricOverflow);
        }

        self.estimator.restart();
        self.window.advance();
        Ok(Some(variance))
    }
}
