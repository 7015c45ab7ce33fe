//! DARTS - Differentiable Architecture Search
//!
//! A [`MixedOp`] holds every candidate operation of one super-network edge
//! together with the continuous architecture weights (alphas) learned during
//! search. Finalizing it picks the strongest candidate and ranks the edge by
//! that candidate's softmax probability.

use ndarray::Array1;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

use super::desc::OpDesc;
use super::ops::{Op, Parameter};
use crate::error::{NasError, Result};

/// Scale of the uniform noise used to initialize alphas
const ALPHA_INIT_SCALE: f64 = 1e-3;

/// Name of the zero op, which is never selected
const NONE_OP: &str = "none";

/// Weighted mixture of candidate operations on a single edge
#[derive(Debug)]
pub struct MixedOp {
    candidates: Vec<Box<dyn Op>>,
    alphas: Parameter,
}

impl MixedOp {
    /// Create a mixed op with small random alphas
    pub fn new(candidates: Vec<Box<dyn Op>>, rng: &mut impl Rng) -> Self {
        let alphas: Array1<f64> = (0..candidates.len())
            .map(|_| (rng.gen::<f64>() - 0.5) * ALPHA_INIT_SCALE)
            .collect();

        Self {
            candidates,
            alphas: Parameter::new(alphas.into_dyn()),
        }
    }

    /// Create a mixed op with alphas drawn from a seeded generator
    pub fn seeded(candidates: Vec<Box<dyn Op>>, seed: u64) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        Self::new(candidates, &mut rng)
    }

    /// Create a mixed op with explicit alphas, one per candidate
    pub fn with_alphas(candidates: Vec<Box<dyn Op>>, alphas: Array1<f64>) -> Result<Self> {
        if alphas.len() != candidates.len() {
            return Err(NasError::InvalidParameter {
                name: "alphas".to_string(),
                value: alphas.len().to_string(),
                reason: format!("expected one weight per candidate ({})", candidates.len()),
            });
        }

        Ok(Self {
            candidates,
            alphas: Parameter::new(alphas.into_dyn()),
        })
    }

    /// Candidate operations
    pub fn candidates(&self) -> &[Box<dyn Op>] {
        &self.candidates
    }

    /// Architecture weights
    pub fn alphas(&self) -> &Parameter {
        &self.alphas
    }

    /// Mutable architecture weights
    pub fn alphas_mut(&mut self) -> &mut Parameter {
        &mut self.alphas
    }

    /// Softmax probabilities over candidates
    pub fn probs(&self) -> Array1<f64> {
        let logits: Array1<f64> = self.alphas.value().iter().copied().collect();
        softmax(&logits)
    }

    /// Index and probability of the strongest candidate other than the zero op.
    ///
    /// The first candidate wins on equal probabilities.
    pub fn best_candidate(&self) -> Option<(usize, f64)> {
        let probs = self.probs();
        let mut best: Option<(usize, f64)> = None;
        for (i, (candidate, &p)) in self.candidates.iter().zip(probs.iter()).enumerate() {
            if candidate.name() == NONE_OP {
                continue;
            }
            if best.map_or(true, |(_, best_p)| p > best_p) {
                best = Some((i, p));
            }
        }
        best
    }
}

impl Op for MixedOp {
    fn name(&self) -> &str {
        "mixed_op"
    }

    fn finalize(&self) -> Result<(OpDesc, Option<f64>)> {
        if let Some(bad) = self.alphas.value().iter().find(|a| !a.is_finite()) {
            return Err(NasError::InvalidParameter {
                name: "alphas".to_string(),
                value: bad.to_string(),
                reason: "architecture weights must be finite".to_string(),
            });
        }

        let (idx, prob) = self.best_candidate().ok_or_else(|| {
            let names: Vec<&str> = self.candidates.iter().map(|c| c.name()).collect();
            NasError::NoCandidate(format!("[{}]", names.join(", ")))
        })?;

        // the candidate's own rank is irrelevant once it has been chosen
        let (desc, _) = self.candidates[idx].finalize()?;
        Ok((desc, Some(prob)))
    }

    fn parameters(&self) -> Vec<&Parameter> {
        let mut params = vec![&self.alphas];
        for candidate in &self.candidates {
            params.extend(candidate.parameters());
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = vec![&mut self.alphas];
        for candidate in &mut self.candidates {
            params.extend(candidate.parameters_mut());
        }
        params
    }
}

/// Softmax function
fn softmax(logits: &Array1<f64>) -> Array1<f64> {
    let max_val = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exp: Array1<f64> = logits.mapv(|x| (x - max_val).exp());
    let sum: f64 = exp.sum();
    if sum > 0.0 {
        exp / sum
    } else {
        Array1::from_elem(logits.len(), 1.0 / logits.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::nas::ops::FixedOp;
    use ndarray::array;

    fn candidates() -> Vec<Box<dyn Op>> {
        vec![
            Box::new(FixedOp::conv("sep_conv_3x3", 4, 4, 3)),
            Box::new(FixedOp::skip()),
            Box::new(FixedOp::none()),
        ]
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&array![1.0, 2.0, 3.0]);
        assert!((probs.sum() - 1.0).abs() < 1e-9);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_seeded_init_is_small_and_deterministic() {
        let a = MixedOp::seeded(candidates(), 42);
        let b = MixedOp::seeded(candidates(), 42);

        assert_eq!(a.alphas().value(), b.alphas().value());
        assert!(a.alphas().value().iter().all(|v| v.abs() <= ALPHA_INIT_SCALE / 2.0));
    }

    #[test]
    fn test_finalize_picks_strongest_non_none() {
        // "none" has the largest weight but is never chosen
        let op = MixedOp::with_alphas(candidates(), array![0.5, 1.0, 5.0]).unwrap();
        let (desc, rank) = op.finalize().unwrap();

        assert_eq!(desc.name, "skip_connect");
        let probs = op.probs();
        assert!((rank.unwrap() - probs[1]).abs() < 1e-12);
    }

    #[test]
    fn test_first_candidate_wins_ties() {
        let op = MixedOp::with_alphas(candidates(), array![2.0, 2.0, 0.0]).unwrap();
        assert_eq!(op.best_candidate().map(|(i, _)| i), Some(0));
    }

    #[test]
    fn test_nan_alpha_rejected() {
        let op = MixedOp::with_alphas(candidates(), array![f64::NAN, 1.0, 0.0]).unwrap();
        let err = op.finalize().unwrap_err();
        assert!(matches!(err, NasError::InvalidParameter { ref name, .. } if name == "alphas"));
    }

    #[test]
    fn test_infinite_alpha_rejected() {
        let op = MixedOp::with_alphas(candidates(), array![0.0, f64::INFINITY, 0.0]).unwrap();
        let err = op.finalize().unwrap_err();
        assert!(matches!(err, NasError::InvalidParameter { ref name, .. } if name == "alphas"));
    }

    #[test]
    fn test_only_none_candidates() {
        let only_none: Vec<Box<dyn Op>> = vec![Box::new(FixedOp::none())];
        let op = MixedOp::with_alphas(only_none, array![1.0]).unwrap();
        assert!(matches!(op.finalize(), Err(NasError::NoCandidate(_))));
    }

    #[test]
    fn test_alpha_length_mismatch() {
        let result = MixedOp::with_alphas(candidates(), array![1.0, 2.0]);
        assert!(matches!(result, Err(NasError::InvalidParameter { .. })));
    }

    #[test]
    fn test_parameters_include_candidates() {
        let mut op = MixedOp::seeded(candidates(), 7);
        // alphas + conv weight
        assert_eq!(op.parameters().len(), 2);

        for param in op.parameters_mut() {
            param.to(Device::Metal);
        }
        assert!(op.parameters().iter().all(|p| p.device() == Device::Metal));
    }
}
