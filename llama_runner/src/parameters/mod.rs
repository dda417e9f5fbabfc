mod loader;
mod safetensors;

pub use loader::{ParameterLoader, ParameterLoaderError, ParameterTree};
pub use safetensors::{
    SafetensorsError, ShardHeader, ShardWriter, TensorEntry,
};
