//! Runtime-neutral tensors and model traits

use ndarray::{ArrayD, IxDyn};

use crate::error::{EngineError, Result};

/// Tensor payload; inputs are token ids / masks (`I64`), outputs are `F32`.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
}

/// A tensor bound to a model input or output name.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    pub name: String,
    pub data: TensorData,
}

impl NamedTensor {
    pub fn i64(name: impl Into<String>, shape: &[usize], values: Vec<i64>) -> Result<Self> {
        let array = ArrayD::from_shape_vec(IxDyn(shape), values)
            .map_err(|e| EngineError::Inference(e.into()))?;
        Ok(Self {
            name: name.into(),
            data: TensorData::I64(array),
        })
    }

    pub fn f32(name: impl Into<String>, array: ArrayD<f32>) -> Self {
        Self {
            name: name.into(),
            data: TensorData::F32(array),
        }
    }

    pub fn shape(&self) -> &[usize] {
        match &self.data {
            TensorData::I64(a) => a.shape(),
            TensorData::F32(a) => a.shape(),
        }
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match &self.data {
            TensorData::F32(a) => Some(a),
            TensorData::I64(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<&ArrayD<i64>> {
        match &self.data {
            TensorData::I64(a) => Some(a),
            TensorData::F32(_) => None,
        }
    }
}

/// A model taking named tensors and returning named tensors.
///
/// Implemented by the ONNX runtime wrapper and by test doubles.
pub trait TensorModel: Send {
    fn name(&self) -> &str;

    fn run(&mut self, inputs: Vec<NamedTensor>) -> Result<Vec<NamedTensor>>;
}

/// A model that maps a whole token sequence to next-token logits.
pub trait SequenceModel: Send {
    fn name(&self) -> &str;

    /// Logits for the token following `tokens`.
    fn logits(&mut self, tokens: &[u32]) -> Result<Vec<f32>>;
}
