//! ONNX Runtime models
//!
//! Enable with the `onnx` feature flag.

use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use ort::session::Session;
use ort::value::{DynValue, Tensor};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::inference::tensor::{NamedTensor, TensorData, TensorModel};

pub struct OnnxModel {
    name: String,
    session: Session,
}

impl std::fmt::Debug for OnnxModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxModel").field("name", &self.name).finish()
    }
}

impl OnnxModel {
    /// Load an ONNX graph. `n_threads == 0` keeps the runtime default.
    pub fn from_file<P: AsRef<Path>>(path: P, name: &str, n_threads: u32) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading {} ONNX model from {:?}", name, path);

        let mut builder = Session::builder().map_err(|e| EngineError::ModelLoad(e.into()))?;
        if n_threads > 0 {
            builder = builder
                .with_intra_threads(n_threads as usize)
                .map_err(|e| EngineError::ModelLoad(e.into()))?;
        }
        let session = builder
            .commit_from_file(path)
            .map_err(|e| EngineError::ModelLoad(e.into()))?;

        Ok(Self {
            name: name.to_string(),
            session,
        })
    }
}

fn to_value(tensor: NamedTensor) -> Result<(String, DynValue)> {
    let shape: Vec<i64> = tensor.shape().iter().map(|&d| d as i64).collect();
    let value = match tensor.data {
        TensorData::I64(array) => {
            let data: Vec<i64> = array.iter().copied().collect();
            Tensor::from_array((shape, data))
                .map_err(|e| EngineError::Inference(e.into()))?
                .into_dyn()
        }
        TensorData::F32(array) => {
            let data: Vec<f32> = array.iter().copied().collect();
            Tensor::from_array((shape, data))
                .map_err(|e| EngineError::Inference(e.into()))?
                .into_dyn()
        }
    };
    Ok((tensor.name, value))
}

impl TensorModel for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, inputs: Vec<NamedTensor>) -> Result<Vec<NamedTensor>> {
        let feed = inputs
            .into_iter()
            .map(to_value)
            .collect::<Result<Vec<_>>>()?;

        let outputs = self
            .session
            .run(feed)
            .map_err(|e| EngineError::Inference(e.into()))?;

        let mut result = Vec::new();
        for (name, value) in outputs.iter() {
            // non-f32 outputs play no role
            let Ok((shape, data)) = value.try_extract_tensor::<f32>() else {
                debug!("{}: skipping non-f32 output {}", self.name, name);
                continue;
            };
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            let array = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
                .map_err(|e| EngineError::Inference(e.into()))?;
            result.push(NamedTensor::f32(name.to_string(), array));
        }
        Ok(result)
    }
}
