//! Core abstractions for MCMC models.
//!
//! Provides the `Model` trait which defines what the sampler needs from a
//! statistical model: the log density and its gradient on the unconstrained
//! space, and the map back to the constrained variables that end up in the
//! draw tables.

use std::fmt::Debug;

/// Errors that happen when we evaluate the logp and gradient function
pub trait LogpError: std::error::Error {
    /// Unrecoverable errors during logp computation stop sampling,
    /// recoverable errors are seen as divergences.
    fn is_recoverable(&self) -> bool;
}

/// A model the adaptive sampler can draw from.
pub trait Model {
    type LogpError: Debug + Send + Sync + LogpError + 'static;

    /// The dimension of the unconstrained parameter space.
    fn dim(&self) -> usize;

    /// Compute the log density and its gradient at an unconstrained position.
    fn logp(&mut self, position: &[f64], grad: &mut [f64]) -> Result<f64, Self::LogpError>;

    /// Names and shapes of the constrained variables, in output order.
    ///
    /// A scalar has an empty shape.
    fn variables(&self) -> Vec<(String, Vec<usize>)>;

    /// Map an unconstrained position to the flattened constrained variables.
    ///
    /// `out` is cleared first and must afterwards hold one value per entry of
    /// `param_names`.
    fn constrain(&mut self, position: &[f64], out: &mut Vec<f64>) -> Result<(), Self::LogpError>;

    /// Flat column names of the constrained variables.
    fn param_names(&self) -> Vec<String> {
        self.variables()
            .iter()
            .flat_map(|(name, shape)| column_names(name, shape))
            .collect()
    }
}

/// Column names for a single variable.
///
/// Array entries are named with 1-based indices separated by dots, the first
/// index changing slowest: a 2x3 array `a` produces `a.1.1, a.1.2, a.1.3,
/// a.2.1, ...`.
pub fn column_names(name: &str, shape: &[usize]) -> Vec<String> {
    if shape.is_empty() {
        return vec![name.to_string()];
    }

    let coord_sets: Vec<Vec<String>> = shape
        .iter()
        .map(|&size| (1..=size).map(|i| i.to_string()).collect())
        .collect();

    let mut names = vec![];
    cartesian_product_recursive(&coord_sets, 0, &mut String::from(name), &mut names);
    names
}

fn cartesian_product_recursive(
    coord_sets: &[Vec<String>],
    dim_idx: usize,
    current_name: &mut String,
    result_names: &mut Vec<String>,
) {
    if dim_idx == coord_sets.len() {
        result_names.push(current_name.clone());
        return;
    }

    for coord in coord_sets[dim_idx].iter() {
        let mut new_name = current_name.clone();
        new_name.push('.');
        new_name.push_str(coord);
        cartesian_product_recursive(coord_sets, dim_idx + 1, &mut new_name, result_names);
    }
}
