use itertools::izip;
use multiversion::multiversion;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::{
    math::{multiply, vector_dot},
    state::State,
};

pub(crate) trait MassMatrix {
    fn update_velocity(&self, state: &mut State);
    fn update_kinetic_energy(&self, state: &mut State);
    fn randomize_momentum<R: Rng + ?Sized>(&self, state: &mut State, rng: &mut R);
}

/// Diagonal metric. `variance` is the inverse mass matrix.
#[derive(Debug)]
pub(crate) struct DiagMassMatrix {
    inv_stds: Box<[f64]>,
    pub(crate) variance: Box<[f64]>,
}

impl DiagMassMatrix {
    pub(crate) fn new(ndim: usize) -> Self {
        Self {
            inv_stds: vec![1f64; ndim].into(),
            variance: vec![1f64; ndim].into(),
        }
    }

    pub(crate) fn update_diag(&mut self, new_variance: &[f64]) {
        update_diag(&mut self.variance, &mut self.inv_stds, new_variance);
    }
}

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
fn update_diag(variance_out: &mut [f64], inv_std_out: &mut [f64], new_variance: &[f64]) {
    assert!(new_variance.len() == variance_out.len());
    izip!(variance_out, inv_std_out, new_variance).for_each(|(var, inv_std, &x)| {
        assert!(x.is_finite(), "Illegal value on mass matrix: {}", x);
        assert!(x > 0f64, "Illegal value on mass matrix: {}", x);
        *var = x;
        *inv_std = (1. / x).sqrt();
    });
}

impl MassMatrix for DiagMassMatrix {
    fn update_velocity(&self, state: &mut State) {
        multiply(&self.variance, &state.p, &mut state.v);
    }

    fn update_kinetic_energy(&self, state: &mut State) {
        state.kinetic_energy = 0.5 * vector_dot(&state.p, &state.v);
    }

    fn randomize_momentum<R: Rng + ?Sized>(&self, state: &mut State, rng: &mut R) {
        state
            .p
            .iter_mut()
            .zip(self.inv_stds.iter())
            .for_each(|(p, &s)| {
                let norm: f64 = rng.sample(StandardNormal);
                *p = s * norm;
            });
    }
}

/// Streaming sample variance (Welford).
#[derive(Debug)]
pub(crate) struct WelfordVariance {
    mean: Box<[f64]>,
    m2: Box<[f64]>,
    count: u64,
}

impl WelfordVariance {
    pub(crate) fn new(dim: usize) -> Self {
        WelfordVariance {
            mean: vec![0f64; dim].into(),
            m2: vec![0f64; dim].into(),
            count: 0,
        }
    }

    pub(crate) fn restart(&mut self) {
        self.mean.fill(0.);
        self.m2.fill(0.);
        self.count = 0;
    }

    pub(crate) fn add_sample(&mut self, value: &[f64]) {
        self.count += 1;
        add_sample(&mut self.mean, &mut self.m2, self.count as f64, value);
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    /// Write the unbiased sample variance into `out`.
    ///
    /// Leaves `out` untouched with fewer than two samples.
    pub(crate) fn sample_variance(&self, out: &mut [f64]) {
        if self.count < 2 {
            return;
        }
        let denom = (self.count - 1) as f64;
        out.iter_mut()
            .zip(self.m2.iter())
            .for_each(|(out, m2)| *out = m2 / denom);
    }
}

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
fn add_sample(mean: &mut [f64], m2: &mut [f64], count: f64, value: &[f64]) {
    assert!(value.len() == mean.len());
    izip!(value, mean, m2).for_each(|(&x, mean, m2)| {
        let delta = x - *mean;
        *mean += delta / count;
        *m2 += (x - *mean) * delta;
    });
}
