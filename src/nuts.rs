use std::sync::Arc;

use rand::distr::{Distribution, StandardUniform};
use rand::Rng;
use thiserror::Error;

use crate::math::logaddexp;
use crate::state::State;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum NutsError {
    #[error("Logp function returned error: {0}")]
    LogpFailure(Box<dyn std::error::Error + Send + Sync>),

    #[error("Could not compute a finite gradient at the initial position")]
    BadInitGrad,

    #[error("Sampler position has not been initialized")]
    Uninitialized,

    #[error("Posterior is improper. Please check your model.")]
    ImproperPosterior,

    #[error("No acceptably small step size could be found. Perhaps the posterior is not continuous?")]
    NoAcceptableStepSize,

    #[error("Numerical overflow in metric adaptation. This happens when the sampler reaches extreme values on the unconstrained space.")]
    MetricOverflow,

    #[error("Invalid sampler settings: {0}")]
    InvalidSettings(String),
}

pub type Result<T> = std::result::Result<T, NutsError>;

/// Details about a diverging leapfrog step.
#[derive(Debug, Default, Clone)]
pub(crate) struct DivergenceInfo {
    /// The position in parameter space where the diverging leapfrog started
    pub(crate) start_location: Option<Box<[f64]>>,
    /// The position in parameter space where the diverging leapfrog ended
    pub(crate) end_location: Option<Box<[f64]>>,
    /// The difference between the energy at the initial location of the
    /// trajectory and the energy at the end of the diverging leapfrog step.
    ///
    /// This is not available if the divergence was caused by a logp function error
    pub(crate) energy_error: Option<f64>,
    pub(crate) end_idx_in_trajectory: Option<i64>,
    /// The logp function error that caused the divergence, if there was any
    pub(crate) logp_function_error: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Copy, Clone)]
pub(crate) enum Direction {
    Forward,
    Backward,
}

impl Distribution<Direction> for StandardUniform {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Direction {
        if rng.random::<bool>() {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

/// Callbacks for various events during a Nuts sampling step.
///
/// Collectors can compute statistics like the mean acceptance rate
/// or collect data for mass matrix adaptation.
pub(crate) trait Collector {
    fn register_leapfrog(
        &mut self,
        _start: &State,
        _end: &State,
        _divergence_info: Option<&DivergenceInfo>,
    ) {
    }
    fn register_draw(&mut self, _state: &State, _info: &SampleInfo) {}
    fn register_init(&mut self, _state: &State, _options: &NutsOptions) {}
}

/// The hamiltonian defined by the potential energy and the kinetic energy
pub(crate) trait Hamiltonian {
    /// Perform one leapfrog step.
    ///
    /// Return either an unrecoverable error, a new state or a divergence.
    fn leapfrog<C: Collector>(
        &mut self,
        start: &State,
        dir: Direction,
        initial_energy: f64,
        collector: &mut C,
    ) -> Result<std::result::Result<State, DivergenceInfo>>;

    /// Randomize the momentum part of a state
    fn randomize_momentum<R: Rng + ?Sized>(&self, state: &mut State, rng: &mut R);
}

/// Information about a draw, exported as part of the sampler stats
#[derive(Debug)]
pub(crate) struct SampleInfo {
    /// The depth of the trajectory that this point was sampled from
    pub(crate) depth: u64,

    /// More detailed information about a divergence that might have
    /// occured in the trajectory.
    pub(crate) divergence_info: Option<DivergenceInfo>,

    /// Whether the trajectory was terminated because it reached
    /// the maximum tree depth.
    pub(crate) reached_maxdepth: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct NutsOptions {
    /// The maximum tree depth. The number of leapfrog steps is smaller
    /// than 2 ^ maxdepth.
    pub maxdepth: u64,
    /// If the energy error is larger than this threshold we treat the leapfrog
    /// step as a divergence.
    pub max_energy_error: f64,
}

impl Default for NutsOptions {
    fn default() -> Self {
        NutsOptions {
            maxdepth: 10,
            max_energy_error: 1000.,
        }
    }
}

/// A part of the trajectory tree during NUTS sampling.
struct NutsTree {
    /// The left position of the tree.
    ///
    /// The left side always has the smaller index_in_trajectory.
    /// Leapfrogs in backward direction will replace the left.
    left: State,
    right: State,

    /// A draw from the trajectory between left and right using
    /// multinomial sampling.
    draw: State,
    log_size: f64,
    depth: u64,
    initial_energy: f64,

    /// A tree is the main tree if it contains the initial point
    /// of the trajectory.
    is_main: bool,
}

enum ExtendResult {
    /// The tree extension succeeded properly, and the termination
    /// criterion was not reached.
    Ok(NutsTree),
    /// An unrecoverable error happend during a leapfrog step
    Err(NutsError),
    /// Tree extension succeeded and the termination criterion
    /// was reached.
    Turning(NutsTree),
    /// A divergence happend during tree extension.
    Diverging(NutsTree, DivergenceInfo),
}

impl NutsTree {
    fn new(state: State) -> NutsTree {
        let initial_energy = state.energy();
        NutsTree {
            right: state.clone(),
            left: state.clone(),
            draw: state,
            depth: 0,
            log_size: 0.,
            initial_energy,
            is_main: true,
        }
    }

    #[inline]
    fn extend<H, R, C>(
        mut self,
        rng: &mut R,
        hamiltonian: &mut H,
        direction: Direction,
        collector: &mut C,
    ) -> ExtendResult
    where
        H: Hamiltonian,
        R: Rng + ?Sized,
        C: Collector,
    {
        let mut other = match self.single_step(hamiltonian, direction, collector) {
            Ok(Ok(tree)) => tree,
            Ok(Err(info)) => return ExtendResult::Diverging(self, info),
            Err(err) => return ExtendResult::Err(err),
        };

        while other.depth < self.depth {
            use ExtendResult::*;
            other = match other.extend(rng, hamiltonian, direction, collector) {
                Ok(tree) => tree,
                Turning(_) => {
                    return Turning(self);
                }
                Diverging(_, info) => {
                    return Diverging(self, info);
                }
                Err(error) => {
                    return Err(error);
                }
            };
        }

        let (first, last) = match direction {
            Direction::Forward => (&self.left, &other.right),
            Direction::Backward => (&other.left, &self.right),
        };

        let mut turning = first.is_turning(last);
        if self.depth > 0 {
            if !turning {
                turning = self.right.is_turning(&other.right);
            }
            if !turning {
                turning = self.left.is_turning(&other.left);
            }
        }

        self.merge_into(other, rng, direction);

        if turning {
            ExtendResult::Turning(self)
        } else {
            ExtendResult::Ok(self)
        }
    }

    #[inline]
    fn merge_into<R: Rng + ?Sized>(&mut self, other: NutsTree, rng: &mut R, direction: Direction) {
        assert!(self.depth == other.depth);
        assert!(self.left.index_in_trajectory() <= self.right.index_in_trajectory());
        match direction {
            Direction::Forward => {
                self.right = other.right;
            }
            Direction::Backward => {
                self.left = other.left;
            }
        }
        let log_size = logaddexp(self.log_size, other.log_size);

        let self_log_size = if self.is_main {
            assert!(self.left.index_in_trajectory() <= 0);
            assert!(self.right.index_in_trajectory() >= 0);
            self.log_size
        } else {
            log_size
        };

        if (other.log_size >= self_log_size)
            || rng.random_bool((other.log_size - self_log_size).exp())
        {
            self.draw = other.draw;
        }

        self.depth += 1;
        self.log_size = log_size;
    }

    #[inline]
    fn single_step<H: Hamiltonian, C: Collector>(
        &self,
        hamiltonian: &mut H,
        direction: Direction,
        collector: &mut C,
    ) -> Result<std::result::Result<NutsTree, DivergenceInfo>> {
        let start = match direction {
            Direction::Forward => &self.right,
            Direction::Backward => &self.left,
        };
        let end = match hamiltonian.leapfrog(start, direction, self.initial_energy, collector) {
            Ok(Ok(end)) => end,
            Ok(Err(info)) => return Ok(Err(info)),
            Err(error) => return Err(error),
        };

        let log_size = self.initial_energy - end.energy();
        Ok(Ok(NutsTree {
            right: end.clone(),
            left: end.clone(),
            draw: end,
            depth: 0,
            log_size,
            initial_energy: self.initial_energy,
            is_main: false,
        }))
    }

    fn info(&self, maxdepth: bool, divergence_info: Option<DivergenceInfo>) -> SampleInfo {
        SampleInfo {
            depth: self.depth,
            divergence_info,
            reached_maxdepth: maxdepth,
        }
    }
}

/// Draw the next point of the chain starting at `init`.
pub(crate) fn draw<H, R, C>(
    init: &mut State,
    rng: &mut R,
    hamiltonian: &mut H,
    options: &NutsOptions,
    collector: &mut C,
) -> Result<(State, SampleInfo)>
where
    H: Hamiltonian,
    R: Rng + ?Sized,
    C: Collector,
{
    hamiltonian.randomize_momentum(init, rng);
    init.make_init_point();
    collector.register_init(init, options);

    let mut tree = NutsTree::new(init.clone());
    while tree.depth < options.maxdepth {
        let direction: Direction = rng.random();
        tree = match tree.extend(rng, hamiltonian, direction, collector) {
            ExtendResult::Ok(tree) => tree,
            ExtendResult::Turning(tree) => {
                let info = tree.info(false, None);
                collector.register_draw(&tree.draw, &info);
                return Ok((tree.draw, info));
            }
            ExtendResult::Diverging(tree, info) => {
                let info = tree.info(false, Some(info));
                collector.register_draw(&tree.draw, &info);
                return Ok((tree.draw, info));
            }
            ExtendResult::Err(error) => {
                return Err(error);
            }
        };
    }
    let info = tree.info(true, None);
    collector.register_draw(&tree.draw, &info);
    Ok((tree.draw, info))
}
