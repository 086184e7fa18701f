//! Session-local linear ranking model.
//!
//! The parameters are seeded from the server-trained base model at session
//! start and refined by one gradient step per resolved duel. Scoring collapses
//! the candidate embedding through a dot product with the context vector and
//! applies a single scalar coefficient, `coef[0][0]`, plus the intercept.
//! `update` adjusts every shared coefficient dimension, but only `coef[0][0]`
//! feeds back into scores; this reproduces the upstream model exactly and must
//! not be generalized to a per-dimension linear model, which would change
//! ranking output.

use serde::{Deserialize, Serialize};

/// Linear model parameters in the backend wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParameters {
    pub coef: Vec<Vec<f64>>,
    pub intercept: Vec<f64>,
    #[serde(default)]
    pub classes: Vec<i64>,
    #[serde(default)]
    pub is_fitted: bool,
}

impl ModelParameters {
    pub fn new(dimension: usize) -> Self {
        Self {
            coef: vec![vec![0.0; dimension]],
            intercept: vec![0.0],
            classes: Vec::new(),
            is_fitted: false,
        }
    }

    fn is_usable(&self) -> bool {
        self.is_fitted && !self.coef.is_empty() && !self.coef[0].is_empty()
    }
}

fn dot_product(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Linear score of one candidate embedding against the context vector.
///
/// Unbounded; used strictly for ordering. The dot product runs over the shared
/// leading length of context and embedding. An unfitted or degenerate model
/// scores everything at the neutral 0.0, so ranking falls back to catalog
/// order.
pub fn score(params: &ModelParameters, context: &[f64], embedding: &[f64]) -> f64 {
    if !params.is_usable() {
        return 0.0;
    }
    let interaction = dot_product(context, embedding);
    interaction * params.coef[0][0] + params.intercept.first().copied().unwrap_or(0.0)
}

/// One stochastic-gradient step of squared-error regression, in place.
///
/// Applied once per resolved duel with reward 1.0 for the chosen activity; the
/// rejected one gets no symmetric negative update; its demotion is implicit
/// in re-ranking under the adjusted weights. No-op while the model is
/// unfitted.
pub fn update(
    params: &mut ModelParameters,
    context: &[f64],
    embedding: &[f64],
    reward: f64,
    learning_rate: f64,
) {
    if !params.is_usable() {
        return;
    }
    let prediction = score(params, context, embedding);
    let error = reward - prediction;

    let row = &mut params.coef[0];
    let shared = context.len().min(embedding.len()).min(row.len());
    for i in 0..shared {
        row[i] += learning_rate * error * context[i];
    }
    if let Some(bias) = params.intercept.first_mut() {
        *bias += learning_rate * error;
    }
}
