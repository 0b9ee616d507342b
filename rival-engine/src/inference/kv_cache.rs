//! Sliding-window key/value cache
//!
//! Every layer owns a `[heads, window, head_dim]` buffer for keys and one for
//! values. Appends fill the window left to right; once full, the oldest
//! timesteps are shifted out so the buffer always holds the most recent
//! `valid_len` steps in their original order.

use ndarray::{Array3, Array4, ArrayView3, s};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct KvCache {
    keys: Vec<Array3<f32>>,
    values: Vec<Array3<f32>>,
    valid_len: usize,
    window: usize,
    heads: usize,
    head_dim: usize,
}

/// Past tensors prepared for one decode step.
#[derive(Debug, Clone)]
pub struct PastInputs {
    /// Per layer `[1, heads, target_len, head_dim]`
    pub keys: Vec<Array4<f32>>,
    pub values: Vec<Array4<f32>>,
    /// `target_len + 1` entries; the last one covers the incoming token
    pub mask: Vec<i64>,
}

impl KvCache {
    pub fn new(num_layers: usize, heads: usize, window: usize, head_dim: usize) -> Self {
        let zeros = || Array3::<f32>::zeros((heads, window, head_dim));
        Self {
            keys: (0..num_layers).map(|_| zeros()).collect(),
            values: (0..num_layers).map(|_| zeros()).collect(),
            valid_len: 0,
            window,
            heads,
            head_dim,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn valid_len(&self) -> usize {
        self.valid_len
    }

    pub fn num_layers(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid_len == 0
    }

    /// Append `T` timesteps per layer. Each pair is `([heads, T, head_dim],
    /// [heads, T, head_dim])`, one entry per layer.
    pub fn append<'a>(&mut self, layers: &[(ArrayView3<'a, f32>, ArrayView3<'a, f32>)]) -> Result<()> {
        if layers.len() != self.keys.len() {
            return Err(EngineError::bad_shape("kv cache", "key/value"));
        }
        let Some((first, _)) = layers.first() else {
            return Ok(());
        };
        let steps = first.shape()[1];
        for (k, v) in layers {
            let expected = [self.heads, steps, self.head_dim];
            if k.shape() != expected || v.shape() != expected {
                return Err(EngineError::bad_shape("kv cache", "key/value"));
            }
        }
        if steps == 0 || self.window == 0 {
            return Ok(());
        }

        let (start, skip, take) = if steps >= self.window {
            (0, steps - self.window, self.window)
        } else {
            let overflow = (self.valid_len + steps).saturating_sub(self.window);
            (self.valid_len - overflow, 0, steps)
        };
        let overflow = self.valid_len.saturating_sub(start);

        for (layer, (k, v)) in layers.iter().enumerate() {
            for (buffer, incoming) in [(&mut self.keys[layer], k), (&mut self.values[layer], v)] {
                if steps < self.window && overflow > 0 {
                    let kept = buffer
                        .slice(s![.., overflow..self.valid_len, ..])
                        .to_owned();
                    buffer.slice_mut(s![.., 0..start, ..]).assign(&kept);
                }
                buffer
                    .slice_mut(s![.., start..start + take, ..])
                    .assign(&incoming.slice(s![.., skip..skip + take, ..]));
            }
        }
        self.valid_len = start + take;
        Ok(())
    }

    /// Most recent `min(valid_len, target_len)` timesteps placed right-aligned
    /// in zero tensors of length `target_len`, with the matching mask.
    pub fn past_inputs(&self, target_len: usize) -> PastInputs {
        let n = self.valid_len.min(target_len);
        let src = self.valid_len - n..self.valid_len;
        let dst = target_len - n..target_len;

        let realign = |buffers: &[Array3<f32>]| -> Vec<Array4<f32>> {
            buffers
                .iter()
                .map(|buffer| {
                    let mut out = Array4::<f32>::zeros((1, self.heads, target_len, self.head_dim));
                    out.slice_mut(s![0, .., dst.clone(), ..])
                        .assign(&buffer.slice(s![.., src.clone(), ..]));
                    out
                })
                .collect()
        };

        let mut mask = vec![0i64; target_len + 1];
        for m in mask.iter_mut().skip(target_len - n) {
            *m = 1;
        }

        PastInputs {
            keys: realign(&self.keys),
            values: realign(&self.values),
            mask,
        }
    }

    /// Valid timesteps of one layer as `(keys, values)` views.
    pub fn layer(&self, layer: usize) -> Option<(ArrayView3<'_, f32>, ArrayView3<'_, f32>)> {
        let k = self.keys.get(layer)?;
        let v = self.values.get(layer)?;
        Some((
            k.slice(s![.., 0..self.valid_len, ..]),
            v.slice(s![.., 0..self.valid_len, ..]),
        ))
    }

    pub fn clear(&mut self) {
        for buffer in self.keys.iter_mut().chain(self.values.iter_mut()) {
            buffer.fill(0.0);
        }
        self.valid_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `[heads, steps, dim]` tensor whose values encode `(step offset + t)`.
    fn steps(heads: usize, from: usize, count: usize, dim: usize) -> Array3<f32> {
        Array3::from_shape_fn((heads, count, dim), |(h, t, d)| {
            ((from + t) * 100 + h * 10 + d) as f32
        })
    }

    #[test]
    fn test_fills_left_to_right() {
        let mut cache = KvCache::new(1, 2, 4, 3);
        let a = steps(2, 0, 2, 3);
        cache.append(&[(a.view(), a.view())]).unwrap();
        assert_eq!(cache.valid_len(), 2);
        let (k, _) = cache.layer(0).unwrap();
        assert_eq!(k, a.view());
    }

    #[test]
    fn test_sliding_window_matches_reference() {
        let (heads, window, dim) = (2, 3, 2);
        let mut cache = KvCache::new(2, heads, window, dim);
        let full = steps(heads, 0, 7, dim);
        for t in 0..7 {
            let one = full.slice(s![.., t..t + 1, ..]);
            cache.append(&[(one, one), (one, one)]).unwrap();
        }
        assert_eq!(cache.valid_len(), window);
        let (k, v) = cache.layer(1).unwrap();
        assert_eq!(k, full.slice(s![.., 4..7, ..]));
        assert_eq!(v, full.slice(s![.., 4..7, ..]));
    }

    #[test]
    fn test_keys_and_values_kept_apart() {
        let mut cache = KvCache::new(1, 1, 3, 2);
        let keys = steps(1, 0, 4, 2);
        let values = keys.mapv(|x| -x);
        cache
            .append(&[(keys.slice(s![.., 0..2, ..]), values.slice(s![.., 0..2, ..]))])
            .unwrap();
        cache
            .append(&[(keys.slice(s![.., 2..4, ..]), values.slice(s![.., 2..4, ..]))])
            .unwrap();
        let (k, v) = cache.layer(0).unwrap();
        assert_eq!(k, keys.slice(s![.., 1..4, ..]));
        assert_eq!(v, values.slice(s![.., 1..4, ..]));
    }

    #[test]
    fn test_oversized_append_keeps_tail() {
        let mut cache = KvCache::new(1, 1, 3, 1);
        let big = steps(1, 0, 5, 1);
        cache.append(&[(big.view(), big.view())]).unwrap();
        let (k, _) = cache.layer(0).unwrap();
        assert_eq!(k, big.slice(s![.., 2..5, ..]));
    }

    #[test]
    fn test_past_inputs_right_aligned() {
        let mut cache = KvCache::new(1, 1, 4, 1);
        let a = steps(1, 0, 2, 1);
        cache.append(&[(a.view(), a.view())]).unwrap();

        let past = cache.past_inputs(3);
        assert_eq!(past.mask, vec![0, 1, 1, 1]);
        let k = &past.keys[0];
        assert_eq!(k.shape(), &[1, 1, 3, 1]);
        assert_eq!(k[[0, 0, 0, 0]], 0.0);
        assert_eq!(k[[0, 0, 1, 0]], a[[0, 0, 0]]);
        assert_eq!(k[[0, 0, 2, 0]], a[[0, 1, 0]]);

        // shorter target keeps the newest steps
        let past = cache.past_inputs(1);
        assert_eq!(past.mask, vec![1, 1]);
        assert_eq!(past.keys[0][[0, 0, 0, 0]], a[[0, 1, 0]]);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut cache = KvCache::new(1, 2, 4, 3);
        let wrong = steps(1, 0, 1, 3);
        assert!(cache.append(&[(wrong.view(), wrong.view())]).is_err());
        let a = steps(2, 0, 1, 3);
        assert!(cache.append(&[]).is_err());
        cache.append(&[(a.view(), a.view())]).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }
}
