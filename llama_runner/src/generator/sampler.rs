use ndarray::ArrayView1;
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::SamplingError;
use crate::backends::Token;

pub trait LogitsSampler {
    fn sample(
        &mut self,
        logits: ArrayView1<f32>,
    ) -> Result<Token, SamplingError>;
}

/// Index of the largest value; ties go to the lowest index.
pub fn simple_argmax(input: &[f32]) -> usize {
    let mut max_index = 0;
    let mut max_value = f32::NEG_INFINITY;
    for (index, &value) in input.iter().enumerate() {
        if value > max_value {
            max_value = value;
            max_index = index;
        }
    }
    max_index
}

pub struct ArgmaxSampler {}

impl LogitsSampler for ArgmaxSampler {
    fn sample(
        &mut self,
        logits: ArrayView1<f32>,
    ) -> Result<Token, SamplingError> {
        if logits.is_empty() {
            return Err(SamplingError::Empty);
        }
        let max_index = if let Some(slice) = logits.as_slice() {
            simple_argmax(slice)
        } else {
            let data: Vec<f32> = logits.iter().copied().collect();
            simple_argmax(&data)
        };
        Ok(max_index as Token)
    }
}

/// Draws from `softmax(logits / temperature)` by inverse CDF.
pub struct TemperatureSampler {
    temperature: f32,
    rng: StdRng,
}

impl TemperatureSampler {
    pub fn new(
        temperature: f32,
        seed: u64,
    ) -> Self {
        Self {
            temperature,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl LogitsSampler for TemperatureSampler {
    fn sample(
        &mut self,
        logits: ArrayView1<f32>,
    ) -> Result<Token, SamplingError> {
        if logits.is_empty() {
            return Err(SamplingError::Empty);
        }

        let max_logit = logits.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let temperature = self.temperature as f64;
        let weights: Vec<f64> = logits
            .iter()
            .map(|&logit| ((logit - max_logit) as f64 / temperature).exp())
            .collect();
        let total: f64 = weights.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(SamplingError::NonFinite);
        }

        let threshold = self.rng.random::<f64>() * total;
        let mut cumulative = 0.0;
        for (index, weight) in weights.iter().enumerate() {
            cumulative += weight;
            if threshold < cumulative {
                return Ok(index as Token);
            }
        }

        // Rounding can leave the threshold just above the final sum.
        let last_index = weights
            .iter()
            .rposition(|weight| *weight > 0.0)
            .unwrap_or(weights.len() - 1);
        Ok(last_index as Token)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use super::*;

    #[test]
    fn test_argmax_prefers_lowest_index_on_ties() {
        assert_eq!(simple_argmax(&[1.0, 3.0, 3.0, 2.0]), 1);
        let mut sampler = ArgmaxSampler {};
        let logits = arr1(&[0.5, -1.0, 0.5]);
        assert_eq!(sampler.sample(logits.view()).unwrap(), 0);
    }

    #[test]
    fn test_temperature_sampling_is_seeded() {
        let logits = arr1(&[0.1, 0.4, 0.2, 0.3]);
        let draw = |seed| {
            let mut sampler = TemperatureSampler::new(1.0, seed);
            (0..32)
                .map(|_| sampler.sample(logits.view()).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(5), draw(5));
    }

    #[test]
    fn test_low_temperature_concentrates_on_maximum() {
        let logits = arr1(&[1.0, 5.0, 2.0]);
        let mut sampler = TemperatureSampler::new(0.01, 9);
        for _ in 0..16 {
            assert_eq!(sampler.sample(logits.view()).unwrap(), 1);
        }
    }
}
