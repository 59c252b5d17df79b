use std::sync::Arc;

use rand::Rng;

use crate::mass_matrix::{DiagMassMatrix, MassMatrix};
use crate::model::{LogpError, Model};
use crate::nuts::{Collector, Direction, DivergenceInfo, Hamiltonian, NutsError, Result};
use crate::state::State;

/// Euclidean hamiltonian of a model with a diagonal mass matrix.
pub(crate) struct EuclideanPotential<M: Model> {
    model: M,
    pub(crate) mass_matrix: DiagMassMatrix,
    max_energy_error: f64,
    pub(crate) step_size: f64,
}

impl<M: Model> EuclideanPotential<M> {
    pub(crate) fn new(
        model: M,
        mass_matrix: DiagMassMatrix,
        max_energy_error: f64,
        step_size: f64,
    ) -> Self {
        EuclideanPotential {
            model,
            mass_matrix,
            max_energy_error,
            step_size,
        }
    }

    pub(crate) fn dim(&self) -> usize {
        self.model.dim()
    }

    pub(crate) fn model(&self) -> &M {
        &self.model
    }

    pub(crate) fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Evaluate the model at `init`.
    ///
    /// The momentum of the returned state is zero.
    pub(crate) fn init_state(&mut self, init: &[f64]) -> Result<State> {
        let mut state = State::new(self.dim());
        state.q.copy_from_slice(init);
        self.update_potential_gradient(&mut state)
            .map_err(|e| NutsError::LogpFailure(Box::new(e)))?;
        if !state.potential_energy.is_finite() || !state.grad.iter().all(|g| g.is_finite()) {
            return Err(NutsError::BadInitGrad);
        }
        Ok(state)
    }

    fn update_potential_gradient(&mut self, state: &mut State) -> std::result::Result<(), M::LogpError> {
        let logp = self.model.logp(&state.q, &mut state.grad)?;
        state.potential_energy = -logp;
        Ok(())
    }

    fn new_divergence_info(&self, start: &State, end: &State, energy_error: f64) -> DivergenceInfo {
        DivergenceInfo {
            start_location: Some(start.q.clone()),
            end_location: Some(end.q.clone()),
            energy_error: Some(energy_error),
            end_idx_in_trajectory: Some(end.idx_in_trajectory),
            logp_function_error: None,
        }
    }
}

impl<M: Model> Hamiltonian for EuclideanPotential<M> {
    fn leapfrog<C: Collector>(
        &mut self,
        start: &State,
        dir: Direction,
        initial_energy: f64,
        collector: &mut C,
    ) -> Result<std::result::Result<State, DivergenceInfo>> {
        let mut out = State::new(start.q.len());

        let sign = match dir {
            Direction::Forward => 1,
            Direction::Backward => -1,
        };

        let epsilon = (sign as f64) * self.step_size;

        start.first_momentum_halfstep(&mut out, epsilon);
        self.mass_matrix.update_velocity(&mut out);

        start.position_step(&mut out, epsilon);
        if let Err(logp_error) = self.update_potential_gradient(&mut out) {
            if !logp_error.is_recoverable() {
                return Err(NutsError::LogpFailure(Box::new(logp_error)));
            }
            let div_info = DivergenceInfo {
                start_location: Some(start.q.clone()),
                end_location: None,
                energy_error: None,
                end_idx_in_trajectory: None,
                logp_function_error: Some(Arc::new(logp_error)),
            };
            collector.register_leapfrog(start, &out, Some(&div_info));
            return Ok(Err(div_info));
        }

        out.second_momentum_halfstep(epsilon);

        self.mass_matrix.update_velocity(&mut out);
        self.mass_matrix.update_kinetic_energy(&mut out);

        out.idx_in_trajectory = start.index_in_trajectory() + sign;

        start.set_psum(&mut out, dir);

        let energy_error = out.energy() - initial_energy;
        if (energy_error.abs() > self.max_energy_error) | !energy_error.is_finite() {
            let divergence_info = self.new_divergence_info(start, &out, energy_error);
            collector.register_leapfrog(start, &out, Some(&divergence_info));
            return Ok(Err(divergence_info));
        }

        collector.register_leapfrog(start, &out, None);

        Ok(Ok(out))
    }

    fn randomize_momentum<R: Rng + ?Sized>(&self, state: &mut State, rng: &mut R) {
        self.mass_matrix.randomize_momentum(state, rng);
        self.mass_matrix.update_velocity(state);
        self.mass_matrix.update_kinetic_energy(state);
        state.idx_in_trajectory = 0;
        state.p_sum.copy_from_slice(&state.p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_logps::NormalLogp;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    struct NoCollect;
    impl Collector for NoCollect {}

    #[test]
    fn init_state_evaluates_model() {
        let mut potential =
            EuclideanPotential::new(NormalLogp::new(2, 1.), DiagMassMatrix::new(2), 1000., 0.1);
        let state = potential.init_state(&[2., 3.]).unwrap();
        assert_relative_eq!(state.logp(), -(1. + 4.) / 2.);
        assert_eq!(&*state.grad, &[-1., -2.]);
    }

    #[test]
    fn init_state_rejects_bad_position() {
        let mut potential =
            EuclideanPotential::new(NormalLogp::new(1, 0.), DiagMassMatrix::new(1), 1000., 0.1);
        let err = potential.init_state(&[f64::NAN]).unwrap_err();
        assert!(matches!(err, NutsError::LogpFailure(_)));
    }

    #[test]
    fn leapfrog_roughly_conserves_energy() {
        let mut potential =
            EuclideanPotential::new(NormalLogp::new(3, 0.), DiagMassMatrix::new(3), 1000., 0.01);
        let mut state = potential.init_state(&[1., -1., 0.5]).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        potential.randomize_momentum(&mut state, &mut rng);
        let initial_energy = state.energy();

        let mut collector = NoCollect;
        let next = potential
            .leapfrog(&state, Direction::Forward, initial_energy, &mut collector)
            .unwrap()
            .unwrap();
        assert_eq!(next.index_in_trajectory(), 1);
        assert_relative_eq!(next.energy(), initial_energy, epsilon = 1e-3);

        let back = potential
            .leapfrog(&state, Direction::Backward, initial_energy, &mut collector)
            .unwrap()
            .unwrap();
        assert_eq!(back.index_in_trajectory(), -1);
        assert_eq!(back.p_sum, back.p);
    }
}
