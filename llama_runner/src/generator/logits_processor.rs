use half::{bf16, f16};
use ndarray::Array1;
use num_traits::NumCast;
use thiserror::Error;

use super::{ArgmaxSampler, LogitsSampler, TemperatureSampler};
use crate::{ArrayElement, DataType, LogitsBuffer, backends::Token};

#[derive(Debug, Error, PartialEq)]
pub enum SamplingError {
    #[error("Logits are empty")]
    Empty,
    #[error("Logits contain a non-finite value")]
    NonFinite,
    #[error("Logits are all zero")]
    AllZero,
    #[error("Expected {expected} logits, got {actual}")]
    VocabularyMismatch {
        expected: usize,
        actual: usize,
    },
}

/// Affine mapping from quantized logits back to real values.
///
/// A zero `scale` leaves integer values as they are, cast to `f32`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dequantizer {
    pub scale: f32,
    pub offset: i32,
}

impl Dequantizer {
    pub fn new(
        scale: f32,
        offset: i32,
    ) -> Self {
        Self {
            scale,
            offset,
        }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.scale != 0.0
    }

    fn convert<T: ArrayElement>(
        &self,
        buffer: &LogitsBuffer,
    ) -> Array1<f32> {
        let dequantize =
            !T::data_type().is_floating_point() && self.is_enabled();
        let scale = self.scale as f64;
        let offset = self.offset as f64;
        buffer
            .to_vec::<T>()
            .unwrap_or_default()
            .into_iter()
            .map(|value| {
                let value: f64 = NumCast::from(value).unwrap_or(f64::NAN);
                if dequantize {
                    ((value - offset) * scale) as f32
                } else {
                    value as f32
                }
            })
            .collect()
    }

    /// Real-valued logits; floating point buffers are only widened.
    pub fn dequantize(
        &self,
        buffer: &LogitsBuffer,
    ) -> Array1<f32> {
        match buffer.data_type() {
            DataType::BF16 => self.convert::<bf16>(buffer),
            DataType::F16 => self.convert::<f16>(buffer),
            DataType::F32 => self.convert::<f32>(buffer),
            DataType::F64 => self.convert::<f64>(buffer),
            DataType::I8 => self.convert::<i8>(buffer),
            DataType::U8 => self.convert::<u8>(buffer),
            DataType::I16 => self.convert::<i16>(buffer),
            DataType::U16 => self.convert::<u16>(buffer),
            DataType::I32 => self.convert::<i32>(buffer),
            DataType::U32 => self.convert::<u32>(buffer),
            DataType::I64 => self.convert::<i64>(buffer),
            DataType::U64 => self.convert::<u64>(buffer),
        }
    }
}

/// Turns one step's raw backend output into the next token.
pub struct LogitsProcessor {
    dequantizer: Dequantizer,
    sampler: Box<dyn LogitsSampler>,
    vocab_size: Option<usize>,
}

impl LogitsProcessor {
    /// Zero temperature selects greedy decoding and ignores `seed`.
    pub fn new(
        dequantizer: Dequantizer,
        temperature: f32,
        seed: u64,
    ) -> Self {
        let sampler: Box<dyn LogitsSampler> = if temperature > 0.0 {
            Box::new(TemperatureSampler::new(temperature, seed))
        } else {
            Box::new(ArgmaxSampler {})
        };
        Self::with_sampler(dequantizer, sampler)
    }

    pub fn with_sampler(
        dequantizer: Dequantizer,
        sampler: Box<dyn LogitsSampler>,
    ) -> Self {
        Self {
            dequantizer,
            sampler,
            vocab_size: None,
        }
    }

    pub fn vocab_size(
        mut self,
        vocab_size: Option<usize>,
    ) -> Self {
        self.vocab_size = vocab_size;
        self
    }

    pub fn dequantizer(&self) -> Dequantizer {
        self.dequantizer
    }

    pub fn process(
        &mut self,
        buffer: &LogitsBuffer,
    ) -> Result<Token, SamplingError> {
        let logits = self.dequantizer.dequantize(buffer);
        if logits.is_empty() {
            return Err(SamplingError::Empty);
        }
        if let Some(expected) = self.vocab_size {
            if logits.len() != expected {
                return Err(SamplingError::VocabularyMismatch {
                    expected,
                    actual: logits.len(),
                });
            }
        }
        if logits.iter().any(|value| !value.is_finite()) {
            return Err(SamplingError::NonFinite);
        }
        if logits.iter().all(|value| *value == 0.0) {
            return Err(SamplingError::AllZero);
        }
        self.sampler.sample(logits.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_scale_is_exact() {
        let buffer = LogitsBuffer::from_slice(&[0u8, 17, 255]);
        let logits = Dequantizer::new(1.0, 0).dequantize(&buffer);
        assert_eq!(logits.to_vec(), vec![0.0, 17.0, 255.0]);
    }

    #[test]
    fn test_scale_and_offset_are_applied() {
        let buffer = LogitsBuffer::from_slice(&[32768u16, 32778, 32758]);
        let logits = Dequantizer::new(0.5, 32768).dequantize(&buffer);
        assert_eq!(logits.to_vec(), vec![0.0, 5.0, -5.0]);
    }

    #[test]
    fn test_zero_scale_casts_unchanged() {
        let buffer = LogitsBuffer::from_slice(&[3i16, -2]);
        let logits = Dequantizer::identity().dequantize(&buffer);
        assert_eq!(logits.to_vec(), vec![3.0, -2.0]);
    }

    #[test]
    fn test_float_logits_are_not_rescaled() {
        let buffer = LogitsBuffer::from_slice(&[f16::from_f32(1.5)]);
        let logits = Dequantizer::new(0.25, 4).dequantize(&buffer);
        assert_eq!(logits.to_vec(), vec![1.5]);
    }

    #[test]
    fn test_degenerate_logits_are_rejected() {
        let mut processor =
            LogitsProcessor::new(Dequantizer::identity(), 0.0, 0);
        assert_eq!(
            processor.process(&LogitsBuffer::from_slice::<f32>(&[])),
            Err(SamplingError::Empty)
        );
        assert_eq!(
            processor.process(&LogitsBuffer::from_slice(&[1.0f32, f32::NAN])),
            Err(SamplingError::NonFinite)
        );
        assert_eq!(
            processor.process(&LogitsBuffer::from_slice(&[0u8, 0, 0])),
            Err(SamplingError::AllZero)
        );
    }

    #[test]
    fn test_greedy_picks_dequantized_maximum() {
        let mut processor =
            LogitsProcessor::new(Dequantizer::new(0.1, 100), 0.0, 0);
        let buffer = LogitsBuffer::from_slice(&[90u8, 130, 110, 130]);
        assert_eq!(processor.process(&buffer), Ok(1));
    }

    #[test]
    fn test_vocabulary_size_is_checked() {
        let mut processor =
            LogitsProcessor::new(Dequantizer::identity(), 0.0, 0)
                .vocab_size(Some(4));
        assert_eq!(
            processor.process(&LogitsBuffer::from_slice(&[1.0f32, 2.0])),
            Err(SamplingError::VocabularyMismatch {
                expected: 4,
                actual: 2,
            })
        );
    }
}
