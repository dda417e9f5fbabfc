use std::path::Path;

use ndarray::{Array, Array1, Array2, ArrayD, Dimension, Ix1, Ix2};
use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;

use crate::{
    config::{ConfigError, ModelConfig},
    parameters::{
        ParameterLoader, ParameterLoaderError, ParameterTree, SafetensorsError,
        ShardWriter,
    },
};

#[derive(Debug, Error)]
pub enum WeightsError {
    #[error("Failed to load parameters: {0}")]
    Loader(#[from] ParameterLoaderError),
    #[error("Failed to read model config: {0}")]
    Config(#[from] ConfigError),
    #[error("Tensor \"{name}\" has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Failed to write parameters: {0}")]
    Write(#[from] SafetensorsError),
    #[error("Failed to encode model config: {0}")]
    Metadata(#[from] serde_json::Error),
}

pub struct LayerWeights {
    /// [hidden_dim, head_dim]
    pub q_projection: Array2<f32>,
    /// [hidden_dim, head_dim]
    pub k_projection: Array2<f32>,
    /// [hidden_dim, head_dim]
    pub v_projection: Array2<f32>,
    /// [head_dim, hidden_dim]
    pub out_projection: Array2<f32>,
}

/// Parameters of the reference attention stack.
pub struct CpuWeights {
    pub config: ModelConfig,
    /// [vocab_size, hidden_dim]
    pub token_embeddings: Array2<f32>,
    pub layers: Vec<LayerWeights>,
    /// [hidden_dim]
    pub output_norm: Array1<f32>,
    /// [hidden_dim, vocab_size]
    pub readout: Array2<f32>,
}

fn random_matrix(
    rng: &mut StdRng,
    shape: (usize, usize),
    scale: f32,
) -> Array2<f32> {
    Array2::from_shape_fn(shape, |_| rng.random_range(-scale..scale))
}

fn shaped<D: Dimension>(
    array: ArrayD<f32>,
    name: String,
    expected: &[usize],
) -> Result<Array<f32, D>, WeightsError> {
    let actual = array.shape().to_vec();
    if actual != expected {
        return Err(WeightsError::ShapeMismatch {
            name,
            expected: expected.to_vec(),
            actual,
        });
    }
    array.into_dimensionality::<D>().map_err(|_| {
        WeightsError::ShapeMismatch {
            name,
            expected: expected.to_vec(),
            actual,
        }
    })
}

fn load_leaf<D: Dimension>(
    tree: &ParameterTree<'_>,
    name: &str,
    expected: &[usize],
) -> Result<Array<f32, D>, WeightsError> {
    let key = match tree.path_prefix() {
        Some(prefix) => format!("{prefix}.{name}"),
        None => name.to_string(),
    };
    shaped(tree.leaf(name)?, key, expected)
}

impl CpuWeights {
    pub fn random(
        config: ModelConfig,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let hidden_scale = 1.0 / (config.hidden_dim as f32).sqrt();
        let head_scale = 1.0 / (config.head_dim as f32).sqrt();

        let token_embeddings = random_matrix(
            &mut rng,
            (config.vocab_size, config.hidden_dim),
            1.0,
        );
        let layers = (0..config.num_layers)
            .map(|_| LayerWeights {
                q_projection: random_matrix(
                    &mut rng,
                    (config.hidden_dim, config.head_dim),
                    hidden_scale,
                ),
                k_projection: random_matrix(
                    &mut rng,
                    (config.hidden_dim, config.head_dim),
                    hidden_scale,
                ),
                v_projection: random_matrix(
                    &mut rng,
                    (config.hidden_dim, config.head_dim),
                    hidden_scale,
                ),
                out_projection: random_matrix(
                    &mut rng,
                    (config.head_dim, config.hidden_dim),
                    head_scale,
                ),
            })
            .collect();
        let output_norm = Array1::ones(config.hidden_dim);
        let readout = random_matrix(
            &mut rng,
            (config.hidden_dim, config.vocab_size),
            hidden_scale,
        );

        Self {
            config,
            token_embeddings,
            layers,
            output_norm,
            readout,
        }
    }

    pub fn load(loader: &ParameterLoader) -> Result<Self, WeightsError> {
        let config = ModelConfig::from_metadata(loader.metadata())?;
        let root = loader.tree();
        let vocab_size = config.vocab_size;
        let hidden_dim = config.hidden_dim;
        let head_dim = config.head_dim;

        let token_embeddings = load_leaf::<Ix2>(
            &root.subtree("embedding")?,
            "token_embeddings",
            &[vocab_size, hidden_dim],
        )?;

        let layers_tree = root.subtree("layers")?;
        let mut layers = Vec::with_capacity(config.num_layers);
        for index in 0..config.num_layers {
            let attention =
                layers_tree.subtree(&index.to_string())?.subtree("attention")?;
            let projection = |name: &str,
                              expected: [usize; 2]|
             -> Result<Array2<f32>, WeightsError> {
                load_leaf::<Ix2>(&attention.subtree(name)?, "weights", &expected)
            };
            layers.push(LayerWeights {
                q_projection: projection("q_projection", [hidden_dim, head_dim])?,
                k_projection: projection("k_projection", [hidden_dim, head_dim])?,
                v_projection: projection("v_projection", [hidden_dim, head_dim])?,
                out_projection: projection(
                    "out_projection",
                    [head_dim, hidden_dim],
                )?,
            });
        }

        let output_norm = load_leaf::<Ix1>(
            &root.subtree("output_norm")?,
            "scales",
            &[hidden_dim],
        )?;
        let readout = load_leaf::<Ix2>(
            &root.subtree("readout")?,
            "weights",
            &[hidden_dim, vocab_size],
        )?;

        Ok(Self {
            config,
            token_embeddings,
            layers,
            output_norm,
            readout,
        })
    }

    /// Flattened tensors keyed by their artifact names.
    pub fn tensors(&self) -> Vec<(String, Vec<usize>, Vec<f32>)> {
        fn flatten<D: Dimension>(
            name: String,
            array: &Array<f32, D>,
        ) -> (String, Vec<usize>, Vec<f32>) {
            (name, array.shape().to_vec(), array.iter().copied().collect())
        }

        let mut tensors = vec![flatten(
            "embedding.token_embeddings".to_string(),
            &self.token_embeddings,
        )];
        for (index, layer) in self.layers.iter().enumerate() {
            let prefix = format!("layers.{index}.attention");
            tensors.extend([
                flatten(
                    format!("{prefix}.q_projection.weights"),
                    &layer.q_projection,
                ),
                flatten(
                    format!("{prefix}.k_projection.weights"),
                    &layer.k_projection,
                ),
                flatten(
                    format!("{prefix}.v_projection.weights"),
                    &layer.v_projection,
                ),
                flatten(
                    format!("{prefix}.out_projection.weights"),
                    &layer.out_projection,
                ),
            ]);
        }
        tensors.push(flatten("output_norm.scales".to_string(), &self.output_norm));
        tensors.push(flatten("readout.weights".to_string(), &self.readout));
        tensors
    }

    pub fn write(
        &self,
        path: &Path,
    ) -> Result<(), WeightsError> {
        self.write_shards(&[path])
    }

    /// Spreads the tensors round-robin over `paths`.
    ///
    /// The model config goes into the metadata of the first shard only.
    pub fn write_shards<P: AsRef<Path>>(
        &self,
        paths: &[P],
    ) -> Result<(), WeightsError> {
        if paths.is_empty() {
            return Err(ParameterLoaderError::NoShards.into());
        }

        let metadata = self.config.to_metadata()?;
        let mut writers: Vec<ShardWriter> =
            paths.iter().map(|_| ShardWriter::new()).collect();
        writers[0] = ShardWriter::new().metadata(Some(metadata));
        for (index, (name, shape, values)) in
            self.tensors().into_iter().enumerate()
        {
            writers[index % paths.len()].add(
                &name,
                &shape,
                values.as_slice(),
            )?;
        }
        for (writer, path) in writers.into_iter().zip(paths) {
            writer.write(path.as_ref())?;
        }
        Ok(())
    }
}
