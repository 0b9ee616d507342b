//! Model invocation: KV cache, output roles, and the three strategies

mod backend;
pub mod kv_cache;
#[cfg(feature = "llamacpp")]
pub mod llamacpp;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod outputs;
pub mod tensor;

pub use backend::{
    Backend, LoadedModels, LogitsSession, SessionContext, Strategy, TensorSequenceModel,
    determine_strategy,
};
pub use kv_cache::{KvCache, PastInputs};
pub use outputs::{OutputRoles, Row};
pub use tensor::{NamedTensor, SequenceModel, TensorData, TensorModel};
