pub mod error;
pub mod generator;
pub mod logits_processor;
pub mod result;
pub mod sampler;
pub mod session;

pub use error::GeneratorError;
pub use generator::Generator;
pub use logits_processor::{Dequantizer, LogitsProcessor, SamplingError};
pub use result::{GenerateResult, PrefillResult};
pub use sampler::{ArgmaxSampler, LogitsSampler, TemperatureSampler};
pub use session::{GenerationPhase, GenerationSession};
