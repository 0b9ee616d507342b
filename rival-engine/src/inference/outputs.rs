//! Output role resolution
//!
//! Locates the logits tensor and the per-layer present key/value tensors in a
//! model's outputs. Names declared in `[model.io]` are used when the model
//! actually emits them; otherwise roles are inferred from names and shapes:
//!
//! * logits: a non-4-D tensor whose last dimension, or whose total element
//!   count as a whole multiple, matches the vocabulary size. A name containing
//!   `logit` is preferred.
//! * key/value: 4-D tensors, split by the last `key`/`value` segment of the
//!   name or by alternating order, sorted by the first integer in the name.
//!
//! Exports that emit logits for the final position only (`[1, vocab]`) serve
//! any requested row.

use ndarray::{Array3, Array4, Ix4, s};
use tracing::debug;

use crate::config::{ModelIo, layer_name};
use crate::error::{EngineError, Result};
use crate::inference::tensor::NamedTensor;

/// Which logits row to read from a `[.., seq, vocab]` tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Row {
    Last,
    At(usize),
}

/// Per-layer present key/value tensors, each `[1, heads, seq, head_dim]`.
pub type LayerKv = Vec<(Array4<f32>, Array4<f32>)>;

#[derive(Debug, Clone)]
pub struct OutputRoles {
    model: String,
    vocab_size: usize,
    num_layers: usize,
    logits: Option<String>,
    present_key: Option<String>,
    present_value: Option<String>,
}

impl OutputRoles {
    pub fn new(model: &str, io: &ModelIo, vocab_size: usize, num_layers: usize) -> Self {
        Self {
            model: model.to_string(),
            vocab_size,
            num_layers,
            logits: io.logits.clone(),
            present_key: io.present_key.clone(),
            present_value: io.present_value.clone(),
        }
    }

    /// One logits row of length `vocab_size`.
    pub fn logits(&self, outputs: &[NamedTensor], row: Row) -> Result<Vec<f32>> {
        let tensor = self
            .declared(outputs, self.logits.as_deref())
            .filter(|t| self.logits_score(t).is_some())
            .or_else(|| self.find_logits(outputs))
            .ok_or_else(|| EngineError::bad_shape(&self.model, "logits"))?;
        let array = tensor
            .as_f32()
            .ok_or_else(|| EngineError::bad_shape(&self.model, "logits"))?;

        let rows = array.len() / self.vocab_size;
        let index = match row {
            Row::Last => rows.saturating_sub(1),
            Row::At(i) if i < rows => i,
            Row::At(_) if rows == 1 => 0,
            Row::At(_) => return Err(EngineError::bad_shape(&self.model, "logits")),
        };
        Ok(array
            .iter()
            .skip(index * self.vocab_size)
            .take(self.vocab_size)
            .copied()
            .collect())
    }

    /// Present key/value tensors for every layer.
    pub fn key_values(&self, outputs: &[NamedTensor]) -> Result<LayerKv> {
        if let Some(kv) = self.declared_kv(outputs) {
            return Ok(kv);
        }
        debug!("{}: inferring key/value outputs from names", self.model);
        self.find_kv(outputs)
    }

    fn declared<'a>(&self, outputs: &'a [NamedTensor], name: Option<&str>) -> Option<&'a NamedTensor> {
        let name = name?;
        outputs.iter().find(|t| t.name == name)
    }

    fn declared_kv(&self, outputs: &[NamedTensor]) -> Option<LayerKv> {
        let key = self.present_key.as_deref()?;
        let value = self.present_value.as_deref()?;
        (0..self.num_layers)
            .map(|layer| {
                let k = self.declared(outputs, Some(&layer_name(key, layer)))?;
                let v = self.declared(outputs, Some(&layer_name(value, layer)))?;
                Some((as_4d(k)?, as_4d(v)?))
            })
            .collect()
    }

    fn logits_score(&self, tensor: &NamedTensor) -> Option<u32> {
        let shape = tensor.shape();
        let len: usize = shape.iter().product();
        if shape.len() == 4 || len == 0 || self.vocab_size == 0 || tensor.as_f32().is_none() {
            return None;
        }
        let mut score = if shape.last() == Some(&self.vocab_size) {
            2
        } else if len % self.vocab_size == 0 {
            1
        } else {
            return None;
        };
        if tensor.name.to_ascii_lowercase().contains("logit") {
            score += 2;
        }
        Some(score)
    }

    fn find_logits<'a>(&self, outputs: &'a [NamedTensor]) -> Option<&'a NamedTensor> {
        let mut best: Option<(u32, &NamedTensor)> = None;
        for tensor in outputs {
            if let Some(score) = self.logits_score(tensor)
                && best.is_none_or(|(b, _)| score > b)
            {
                best = Some((score, tensor));
            }
        }
        best.map(|(_, t)| t)
    }

    fn find_kv(&self, outputs: &[NamedTensor]) -> Result<LayerKv> {
        let mut candidates: Vec<(usize, &NamedTensor)> = outputs
            .iter()
            .filter(|t| t.shape().len() == 4 && t.as_f32().is_some())
            .enumerate()
            .collect();
        candidates.sort_by_key(|&(order, t)| (first_integer(&t.name).unwrap_or(usize::MAX), order));

        let named = |role: KvRole| -> Vec<&NamedTensor> {
            candidates
                .iter()
                .filter(|(_, t)| kv_role(&t.name) == Some(role))
                .map(|&(_, t)| t)
                .collect()
        };
        let (keys, values) = {
            let keys = named(KvRole::Key);
            let values = named(KvRole::Value);
            if keys.len() >= self.num_layers && values.len() >= self.num_layers {
                (keys, values)
            } else {
                let keys = candidates.iter().step_by(2).map(|&(_, t)| t).collect();
                let values = candidates.iter().skip(1).step_by(2).map(|&(_, t)| t).collect();
                (keys, values)
            }
        };

        if keys.len() < self.num_layers || values.len() < self.num_layers || self.num_layers == 0 {
            return Err(EngineError::bad_shape(&self.model, "key/value"));
        }
        keys.into_iter()
            .zip(values)
            .take(self.num_layers)
            .map(|(k, v)| match (as_4d(k), as_4d(v)) {
                (Some(k), Some(v)) => Ok((k, v)),
                _ => Err(EngineError::bad_shape(&self.model, "key/value")),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KvRole {
    Key,
    Value,
}

/// Role named by the last `key`/`value` segment, so `present_key_values.0.value`
/// is a value.
fn kv_role(name: &str) -> Option<KvRole> {
    name.to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .rev()
        .find_map(|segment| match segment {
            "key" | "k" => Some(KvRole::Key),
            "value" | "v" => Some(KvRole::Value),
            _ => None,
        })
}

fn as_4d(tensor: &NamedTensor) -> Option<Array4<f32>> {
    tensor.as_f32()?.clone().into_dimensionality::<Ix4>().ok()
}

/// Timesteps `range` of batch 0 as `[heads, steps, head_dim]`.
pub fn batch_steps(tensor: &Array4<f32>, range: std::ops::Range<usize>) -> Array3<f32> {
    tensor.slice(s![0, .., range, ..]).to_owned()
}

fn first_integer(name: &str) -> Option<usize> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let digits: String = name[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn io(declared: bool) -> ModelIo {
        ModelIo {
            input_ids: "input_ids".into(),
            attention_mask: "attention_mask".into(),
            position_ids: None,
            past_key: "past.{layer}.key".into(),
            past_value: "past.{layer}.value".into(),
            present_key: declared.then(|| "present.{layer}.key".into()),
            present_value: declared.then(|| "present.{layer}.value".into()),
            logits: declared.then(|| "logits".into()),
        }
    }

    fn tensor(name: &str, shape: &[usize], fill: f32) -> NamedTensor {
        NamedTensor::f32(name, ArrayD::from_elem(shape.to_vec(), fill))
    }

    #[test]
    fn test_declared_roles() {
        let roles = OutputRoles::new("decode", &io(true), 4, 1);
        let mut logits = ArrayD::<f32>::zeros(vec![1, 2, 4]);
        logits[[0, 1, 3]] = 5.0;
        let outputs = vec![
            tensor("present.0.value", &[1, 2, 3, 8], 2.0),
            NamedTensor::f32("logits", logits),
            tensor("present.0.key", &[1, 2, 3, 8], 1.0),
        ];
        assert_eq!(roles.logits(&outputs, Row::Last).unwrap(), vec![0.0, 0.0, 0.0, 5.0]);
        assert_eq!(roles.logits(&outputs, Row::At(0)).unwrap(), vec![0.0; 4]);
        assert!(roles.logits(&outputs, Row::At(2)).is_err());

        let kv = roles.key_values(&outputs).unwrap();
        assert_eq!(kv[0].0[[0, 0, 0, 0]], 1.0);
        assert_eq!(kv[0].1[[0, 0, 0, 0]], 2.0);
    }

    #[test]
    fn test_heuristic_logits_prefers_named() {
        let roles = OutputRoles::new("stateless", &io(false), 5, 1);
        let outputs = vec![
            tensor("hidden", &[1, 5], 1.0),
            tensor("lm_logits", &[10], 2.0),
            tensor("kv", &[1, 1, 5, 5], 3.0),
        ];
        assert_eq!(roles.logits(&outputs, Row::Last).unwrap(), vec![2.0; 5]);
    }

    #[test]
    fn test_heuristic_kv_by_name_and_order() {
        let roles = OutputRoles::new("prefill", &io(false), 4, 2);
        let outputs = vec![
            tensor("out", &[1, 4], 0.0),
            tensor("present_value_1", &[1, 1, 2, 2], 4.0),
            tensor("present_key_1", &[1, 1, 2, 2], 3.0),
            tensor("present_key_0", &[1, 1, 2, 2], 1.0),
            tensor("present_value_0", &[1, 1, 2, 2], 2.0),
        ];
        let kv = roles.key_values(&outputs).unwrap();
        let firsts: Vec<(f32, f32)> = kv
            .iter()
            .map(|(k, v)| (k[[0, 0, 0, 0]], v[[0, 0, 0, 0]]))
            .collect();
        assert_eq!(firsts, vec![(1.0, 2.0), (3.0, 4.0)]);

        // unnamed tensors alternate key, value
        let outputs = vec![
            tensor("o2", &[1, 1, 2, 2], 3.0),
            tensor("o1", &[1, 1, 2, 2], 2.0),
            tensor("o0", &[1, 1, 2, 2], 1.0),
            tensor("o3", &[1, 1, 2, 2], 4.0),
        ];
        let kv = roles.key_values(&outputs).unwrap();
        assert_eq!(kv[1].0[[0, 0, 0, 0]], 3.0);
        assert_eq!(kv[1].1[[0, 0, 0, 0]], 4.0);
    }

    #[test]
    fn test_missing_roles_are_bad_shape() {
        let roles = OutputRoles::new("decode", &io(true), 7, 1);
        let outputs = vec![tensor("logits", &[1, 1, 6], 0.0)];
        assert!(matches!(
            roles.logits(&outputs, Row::Last),
            Err(EngineError::BadModelOutputShape { role: "logits", .. })
        ));
        assert!(matches!(
            roles.key_values(&outputs),
            Err(EngineError::BadModelOutputShape { role: "key/value", .. })
        ));
    }

    #[test]
    fn test_last_position_only_logits() {
        let roles = OutputRoles::new("prefill", &io(true), 4, 1);
        let outputs = vec![tensor("logits", &[1, 4], 0.5)];
        assert_eq!(roles.logits(&outputs, Row::At(9)).unwrap(), vec![0.5; 4]);
        assert_eq!(roles.logits(&outputs, Row::Last).unwrap(), vec![0.5; 4]);
    }

    #[test]
    fn test_kv_names_with_both_words() {
        let roles = OutputRoles::new("prefill", &io(false), 4, 2);
        let outputs = vec![
            tensor("present_key_values.1.value", &[1, 1, 2, 2], 4.0),
            tensor("present_key_values.0.key", &[1, 1, 2, 2], 1.0),
            tensor("present_key_values.1.key", &[1, 1, 2, 2], 3.0),
            tensor("present_key_values.0.value", &[1, 1, 2, 2], 2.0),
        ];
        let kv = roles.key_values(&outputs).unwrap();
        let firsts: Vec<(f32, f32)> = kv
            .iter()
            .map(|(k, v)| (k[[0, 0, 0, 0]], v[[0, 0, 0, 0]]))
            .collect();
        assert_eq!(firsts, vec![(1.0, 2.0), (3.0, 4.0)]);

        assert_eq!(kv_role("past.3.key"), Some(KvRole::Key));
        assert_eq!(kv_role("present_value_1"), Some(KvRole::Value));
        assert_eq!(kv_role("hidden_states"), None);
    }

    #[test]
    fn test_first_integer() {
        assert_eq!(first_integer("present.12.key"), Some(12));
        assert_eq!(first_integer("logits"), None);
    }
}
