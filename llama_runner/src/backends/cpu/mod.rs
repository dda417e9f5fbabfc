mod backend;
mod weights;

pub use backend::CpuBackend;
pub use weights::{CpuWeights, LayerWeights, WeightsError};
