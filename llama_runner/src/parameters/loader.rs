use std::{
    collections::HashMap,
    fs::File,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use half::{bf16, f16};
use ndarray::{ArrayD, IxDyn};
use thiserror::Error;

use super::safetensors::{SafetensorsError, ShardHeader};
use crate::DataType;

#[derive(Debug, Error)]
pub enum ParameterLoaderError {
    #[error("Tensor \"{0}\" not found")]
    KeyNotFound(String),
    #[error("No tensors under prefix \"{0}\"")]
    SubtreeNotFound(String),
    #[error("Tensor \"{0}\" is present in more than one shard")]
    DuplicateKey(String),
    #[error(
        "Tensor \"{key}\" of shape {shape:?} and type {data_type:?} spans {actual_size} bytes, expected {expected_size}"
    )]
    SizeMismatch {
        key: String,
        data_type: DataType,
        shape: Vec<usize>,
        expected_size: usize,
        actual_size: usize,
    },
    #[error("Tensor \"{key}\" has data type {data_type:?}, expected a float")]
    UnsupportedDataType {
        key: String,
        data_type: DataType,
    },
    #[error("No parameter shards were given")]
    NoShards,
    #[error("Failed to open \"{path}\": {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid shard {shard}: {source}")]
    Shard {
        shard: usize,
        source: SafetensorsError,
    },
    #[error("Failed to read tensor data: {0}")]
    Read(#[from] std::io::Error),
}

/// Where one tensor lives inside the shard set.
#[derive(Debug, Clone)]
struct TensorLocation {
    shard: usize,
    data_type: DataType,
    shape: Vec<usize>,
    /// Absolute offset in the shard file.
    offset: u64,
    size: usize,
}

/// Index over one or more safetensors shards.
///
/// Tensors may be spread across shards; the free-form `__metadata__` map is
/// taken from the first shard that carries one.
pub struct ParameterLoader {
    files: Vec<File>,
    index: HashMap<String, TensorLocation>,
    metadata: HashMap<String, String>,
}

impl ParameterLoader {
    pub fn open<P: AsRef<Path>>(
        paths: &[P]
    ) -> Result<Self, ParameterLoaderError> {
        let files = paths
            .iter()
            .map(|path| {
                File::open(path.as_ref()).map_err(|source| {
                    ParameterLoaderError::Open {
                        path: path.as_ref().to_path_buf(),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(files)
    }

    pub fn new(files: Vec<File>) -> Result<Self, ParameterLoaderError> {
        if files.is_empty() {
            return Err(ParameterLoaderError::NoShards);
        }

        let mut index = HashMap::new();
        let mut metadata = None;
        for (shard, file) in files.iter().enumerate() {
            let (header, data_start) = ShardHeader::read(file).map_err(
                |source| ParameterLoaderError::Shard {
                    shard,
                    source,
                },
            )?;
            if metadata.is_none() {
                metadata = header.metadata;
            }

            for (key, entry) in header.tensors {
                let data_type = entry.data_type().ok_or_else(|| {
                    ParameterLoaderError::Shard {
                        shard,
                        source: SafetensorsError::UnsupportedDtype {
                            name: key.clone(),
                            dtype: entry.dtype.clone(),
                        },
                    }
                })?;
                if index.contains_key(&key) {
                    return Err(ParameterLoaderError::DuplicateKey(key));
                }
                let location = TensorLocation {
                    shard,
                    data_type,
                    offset: (data_start + entry.data_offsets.0) as u64,
                    size: entry.byte_len(),
                    shape: entry.shape,
                };
                index.insert(key, location);
            }
        }

        Ok(Self {
            files,
            index,
            metadata: metadata.unwrap_or_default(),
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn shape(
        &self,
        key: &str,
    ) -> Result<&[usize], ParameterLoaderError> {
        Ok(&self.locate(key)?.shape)
    }

    fn locate(
        &self,
        key: &str,
    ) -> Result<&TensorLocation, ParameterLoaderError> {
        self.index
            .get(key)
            .ok_or_else(|| ParameterLoaderError::KeyNotFound(key.to_string()))
    }

    /// Reads a floating point tensor and widens it to `f32`.
    pub fn get(
        &self,
        key: &str,
    ) -> Result<ArrayD<f32>, ParameterLoaderError> {
        let location = self.locate(key)?;
        let data_type = location.data_type;
        let element_size = data_type.size_in_bytes();
        let expected_size =
            location.shape.iter().product::<usize>() * element_size;
        if expected_size != location.size {
            return Err(ParameterLoaderError::SizeMismatch {
                key: key.to_string(),
                data_type,
                shape: location.shape.clone(),
                expected_size,
                actual_size: location.size,
            });
        }

        let widen: fn(&[u8]) -> f32 = match data_type {
            DataType::F32 => bytemuck::pod_read_unaligned::<f32>,
            DataType::F16 => |chunk: &[u8]| {
                bytemuck::pod_read_unaligned::<f16>(chunk).to_f32()
            },
            DataType::BF16 => |chunk: &[u8]| {
                bytemuck::pod_read_unaligned::<bf16>(chunk).to_f32()
            },
            _ => {
                return Err(ParameterLoaderError::UnsupportedDataType {
                    key: key.to_string(),
                    data_type,
                });
            },
        };

        let mut buffer = vec![0u8; location.size];
        self.files[location.shard]
            .read_exact_at(&mut buffer, location.offset)?;
        let values: Vec<f32> =
            buffer.chunks_exact(element_size).map(widen).collect();

        ArrayD::from_shape_vec(IxDyn(&location.shape), values).map_err(|_| {
            ParameterLoaderError::SizeMismatch {
                key: key.to_string(),
                data_type,
                shape: location.shape.clone(),
                expected_size,
                actual_size: location.size,
            }
        })
    }

    pub fn tree(&self) -> ParameterTree<'_> {
        ParameterTree::new(self)
    }
}

/// Dotted-name view over the loader, e.g. `layers.0.attention`.
pub struct ParameterTree<'loader> {
    loader: &'loader ParameterLoader,
    prefix: Option<String>,
}

impl<'loader> ParameterTree<'loader> {
    pub fn new(loader: &'loader ParameterLoader) -> Self {
        Self {
            loader,
            prefix: None,
        }
    }

    pub fn path_prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn join(
        &self,
        name: &str,
    ) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name.to_string(),
        }
    }

    pub fn subtree(
        &self,
        name: &str,
    ) -> Result<Self, ParameterLoaderError> {
        let prefix = self.join(name);
        let dotted = format!("{prefix}.");
        if !self.loader.keys().any(|key| key.starts_with(&dotted)) {
            return Err(ParameterLoaderError::SubtreeNotFound(prefix));
        }
        Ok(Self {
            loader: self.loader,
            prefix: Some(prefix),
        })
    }

    pub fn leaf(
        &self,
        name: &str,
    ) -> Result<ArrayD<f32>, ParameterLoaderError> {
        self.loader.get(&self.join(name))
    }
}
