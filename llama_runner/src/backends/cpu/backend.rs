use std::path::Path;

use ndarray::{Array1, ArrayView1};
use num_traits::NumCast;

use super::{CpuWeights, WeightsError};
use crate::{
    ArrayElement, DataType, LogitsBuffer,
    backends::{BackendError, ForwardGraph, ModelBackend, Token},
    config::{LogitsQuantization, ModelConfig},
    kv_cache::{KVCacheUpdater, KVCacheView, KVEntry},
    parameters::ParameterLoader,
};

/// Single-head causal attention stack evaluated on the CPU.
///
/// Both graphs evaluate every position with the same row-wise arithmetic, so
/// feeding a prompt through `Prefill` or token by token through `Decode`
/// leaves identical cache contents and logits.
pub struct CpuBackend {
    weights: CpuWeights,
}

impl CpuBackend {
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self, WeightsError> {
        let loader = ParameterLoader::open(paths)?;
        let weights = CpuWeights::load(&loader)?;
        log::info!(
            "Loaded {} layers, vocabulary of {} tokens from {} shard(s)",
            weights.config.num_layers,
            weights.config.vocab_size,
            paths.len()
        );
        Ok(Self::from_weights(weights))
    }

    pub fn from_weights(weights: CpuWeights) -> Self {
        Self {
            weights,
        }
    }

    pub fn weights(&self) -> &CpuWeights {
        &self.weights
    }

    fn check_input(
        &self,
        graph: ForwardGraph,
        token_ids: &[Token],
        start_position: usize,
        kv_cache: &dyn KVCacheUpdater,
    ) -> Result<(), BackendError> {
        let config = &self.weights.config;
        match graph {
            ForwardGraph::Decode if token_ids.len() != 1 => {
                return Err(BackendError::InvalidInput(format!(
                    "decode graph takes exactly one token, got {}",
                    token_ids.len()
                )));
            },
            ForwardGraph::Prefill
                if token_ids.is_empty()
                    || token_ids.len() > config.prefill_step_size =>
            {
                return Err(BackendError::InvalidInput(format!(
                    "prefill graph takes 1..={} tokens, got {}",
                    config.prefill_step_size,
                    token_ids.len()
                )));
            },
            _ => {},
        }

        let shape = kv_cache.shape();
        if shape.num_layers != config.num_layers
            || shape.head_dim != config.head_dim
        {
            return Err(BackendError::ShapeMismatch {
                name: "kv_cache".to_string(),
                expected: vec![config.num_layers, config.head_dim],
                actual: vec![shape.num_layers, shape.head_dim],
            });
        }

        let end_position = start_position + token_ids.len();
        if end_position > config.context_length {
            return Err(BackendError::InvalidInput(format!(
                "positions up to {end_position} exceed context length {}",
                config.context_length
            )));
        }
        Ok(())
    }

    fn embed(
        &self,
        token: Token,
    ) -> Result<Array1<f32>, BackendError> {
        let vocab_size = self.weights.config.vocab_size;
        let index = usize::try_from(token)
            .ok()
            .filter(|index| *index < vocab_size)
            .ok_or_else(|| {
                BackendError::InvalidInput(format!(
                    "token {token} is outside the vocabulary of {vocab_size}"
                ))
            })?;
        Ok(self.weights.token_embeddings.row(index).to_owned())
    }

    fn readout(
        &self,
        hidden: ArrayView1<'_, f32>,
    ) -> Array1<f32> {
        let mean_square = hidden.mapv(|x| x * x).mean().unwrap_or(0.0);
        let inverse_rms =
            1.0 / (mean_square + self.weights.config.norm_eps).sqrt();
        let normalized = &hidden * &self.weights.output_norm * inverse_rms;
        normalized.dot(&self.weights.readout)
    }
}

fn attend(
    query: ArrayView1<'_, f32>,
    view: &KVCacheView<'_>,
) -> Array1<f32> {
    let scale = 1.0 / (query.len() as f32).sqrt();
    let scores: Vec<f32> =
        view.iter().map(|(_, key, _)| query.dot(&key) * scale).collect();
    let max_score = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let weights: Vec<f32> =
        scores.iter().map(|score| (score - max_score).exp()).collect();
    let total: f32 = weights.iter().sum();

    let mut output = Array1::zeros(query.len());
    for ((_, _, value), weight) in view.iter().zip(&weights) {
        output.scaled_add(weight / total, &value);
    }
    output
}

fn quantized_buffer<T: ArrayElement>(
    values: impl Iterator<Item = f64>
) -> Result<LogitsBuffer, BackendError> {
    let values = values
        .map(<T as NumCast>::from)
        .collect::<Option<Vec<T>>>()
        .ok_or_else(|| {
            BackendError::Unrecoverable(format!(
                "quantized logit does not fit {:?}",
                T::data_type()
            ))
        })?;
    Ok(LogitsBuffer::from_slice(&values))
}

fn quantize(
    logits: &Array1<f32>,
    quantization: &LogitsQuantization,
) -> Result<LogitsBuffer, BackendError> {
    let (lower, upper) =
        quantization.data_type.integer_bounds().ok_or_else(|| {
            BackendError::Unrecoverable(format!(
                "cannot quantize logits to {:?}",
                quantization.data_type
            ))
        })?;
    let scale = quantization.scale as f64;
    let offset = quantization.offset as f64;
    let values = logits.iter().map(move |&x| {
        ((x as f64 / scale).round() + offset).clamp(lower, upper)
    });
    match quantization.data_type {
        DataType::I8 => quantized_buffer::<i8>(values),
        DataType::U8 => quantized_buffer::<u8>(values),
        DataType::I16 => quantized_buffer::<i16>(values),
        DataType::U16 => quantized_buffer::<u16>(values),
        DataType::I32 => quantized_buffer::<i32>(values),
        DataType::U32 => quantized_buffer::<u32>(values),
        DataType::I64 => quantized_buffer::<i64>(values),
        DataType::U64 => quantized_buffer::<u64>(values),
        data_type => Err(BackendError::Unrecoverable(format!(
            "cannot quantize logits to {data_type:?}"
        ))),
    }
}

impl ModelBackend for CpuBackend {
    fn model_config(&self) -> &ModelConfig {
        &self.weights.config
    }

    fn forward(
        &mut self,
        graph: ForwardGraph,
        token_ids: &[Token],
        start_position: usize,
        kv_cache: &mut dyn KVCacheUpdater,
    ) -> Result<LogitsBuffer, BackendError> {
        self.check_input(graph, token_ids, start_position, kv_cache)?;

        let mut hidden = token_ids
            .iter()
            .map(|&token| self.embed(token))
            .collect::<Result<Vec<_>, _>>()?;

        for (layer_index, layer) in self.weights.layers.iter().enumerate() {
            for (row, state) in hidden.iter_mut().enumerate() {
                let position = start_position + row;
                let query = state.dot(&layer.q_projection);
                let key = state.dot(&layer.k_projection);
                let value = state.dot(&layer.v_projection);
                kv_cache.write(KVEntry {
                    layer: layer_index,
                    position,
                    key: key.view(),
                    value: value.view(),
                })?;

                let view = kv_cache.read(layer_index, 0..position + 1)?;
                let attended = attend(query.view(), &view);
                *state += &attended.dot(&layer.out_projection);
            }
        }

        let last = hidden.last().ok_or_else(|| {
            BackendError::InvalidInput("no tokens to evaluate".to_string())
        })?;
        let logits = self.readout(last.view());
        match &self.weights.config.logits_quantization {
            Some(quantization) => quantize(&logits, quantization),
            None => Ok(LogitsBuffer::from_slice(&logits.to_vec())),
        }
    }
}
