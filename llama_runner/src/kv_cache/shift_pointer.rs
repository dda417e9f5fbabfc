use std::ops::Range;

use ndarray::{Array2, s};

use super::{
    CacheError, KVCacheShape, KVCacheUpdater, KVCacheView, KVEntry, KVUpdater,
    check_entry, check_layer,
};

pub struct ShiftPointerLayer {
    /// [window_length, head_dim]
    pub keys: Array2<f32>,
    /// [window_length, head_dim]
    pub values: Array2<f32>,
    /// Total number of positions written, including shifted-out ones
    pub length: usize,
    /// Slot holding the oldest retained position once the window is full
    pub ring_offset: usize,
}

impl ShiftPointerLayer {
    fn retained_length(
        &self,
        window_length: usize,
    ) -> usize {
        self.length.min(window_length)
    }

    fn first_retained_position(
        &self,
        window_length: usize,
    ) -> usize {
        self.length - self.retained_length(window_length)
    }

    fn advance(
        &mut self,
        window_length: usize,
    ) {
        if self.length < window_length {
            // Still filling the window - no wrap yet
            self.length += 1;
        } else {
            // Window is full - oldest slot is overwritten
            self.ring_offset = (self.ring_offset + 1) % window_length;
            self.length += 1;
        }
    }
}

/// Sliding-window cache addressed through a rotating write pointer.
///
/// Position `p` lives in slot `p % window_length`. Once the window is full
/// each write overwrites the oldest retained position instead of masking it.
pub struct ShiftPointerCache {
    shape: KVCacheShape,
    window_length: usize,
    layers: Box<[ShiftPointerLayer]>,
}

impl ShiftPointerCache {
    pub fn new(
        shape: KVCacheShape,
        window_length: usize,
    ) -> Self {
        let window_length = window_length.clamp(1, shape.capacity.max(1));
        let layers = (0..shape.num_layers)
            .map(|_| ShiftPointerLayer {
                keys: Array2::zeros((window_length, shape.head_dim)),
                values: Array2::zeros((window_length, shape.head_dim)),
                length: 0,
                ring_offset: 0,
            })
            .collect();
        Self {
            shape,
            window_length,
            layers,
        }
    }

    pub fn window_length(&self) -> usize {
        self.window_length
    }

    pub fn ring_offset(
        &self,
        layer: usize,
    ) -> Result<usize, CacheError> {
        check_layer(&self.shape, layer)?;
        Ok(self.layers[layer].ring_offset)
    }
}

impl KVCacheUpdater for ShiftPointerCache {
    fn kind(&self) -> KVUpdater {
        KVUpdater::ShiftPointer
    }

    fn shape(&self) -> KVCacheShape {
        self.shape
    }

    fn len(
        &self,
        layer: usize,
    ) -> usize {
        self.layers.get(layer).map_or(0, |layer| layer.length)
    }

    fn write(
        &mut self,
        entry: KVEntry<'_>,
    ) -> Result<(), CacheError> {
        check_entry(&self.shape, &entry)?;
        let window_length = self.window_length;
        let layer = &mut self.layers[entry.layer];
        if entry.position != layer.length {
            return Err(CacheError::NonMonotonicWrite {
                layer: entry.layer,
                position: entry.position,
                expected: layer.length,
            });
        }

        let slot = entry.position % window_length;
        layer.keys.row_mut(slot).assign(&entry.key);
        layer.values.row_mut(slot).assign(&entry.value);
        layer.advance(window_length);
        Ok(())
    }

    fn read(
        &self,
        layer_index: usize,
        positions: Range<usize>,
    ) -> Result<KVCacheView<'_>, CacheError> {
        check_layer(&self.shape, layer_index)?;
        let layer = &self.layers[layer_index];
        if positions.end > layer.length {
            return Err(CacheError::UnwrittenPosition {
                layer: layer_index,
                position: layer.length.max(positions.start),
            });
        }

        let window_length = self.window_length;
        let start = positions
            .start
            .max(layer.first_retained_position(window_length))
            .min(positions.end);
        let visible = start..positions.end;
        if visible.is_empty() {
            return Ok(KVCacheView::new(visible, Vec::new()));
        }

        let first_slot = visible.start % window_length;
        let count = visible.len();
        let mut segments = Vec::with_capacity(2);
        if first_slot + count <= window_length {
            let slots = first_slot..first_slot + count;
            segments.push((
                layer.keys.slice(s![slots.clone(), ..]),
                layer.values.slice(s![slots, ..]),
            ));
        } else {
            let head = first_slot..window_length;
            let tail = 0..(first_slot + count - window_length);
            segments.push((
                layer.keys.slice(s![head.clone(), ..]),
                layer.values.slice(s![head, ..]),
            ));
            segments.push((
                layer.keys.slice(s![tail.clone(), ..]),
                layer.values.slice(s![tail, ..]),
            ));
        }
        Ok(KVCacheView::new(visible, segments))
    }

    fn reset(&mut self) {
        for layer in self.layers.iter_mut() {
            layer.length = 0;
            layer.ring_offset = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use super::*;

    fn cache(window_length: usize) -> ShiftPointerCache {
        ShiftPointerCache::new(
            KVCacheShape {
                num_layers: 1,
                head_dim: 1,
                capacity: 16,
            },
            window_length,
        )
    }

    fn write(
        cache: &mut ShiftPointerCache,
        position: usize,
    ) {
        let key = arr1(&[position as f32]);
        let value = arr1(&[-(position as f32)]);
        cache
            .write(KVEntry {
                layer: 0,
                position,
                key: key.view(),
                value: value.view(),
            })
            .unwrap();
    }

    fn read_keys(
        cache: &ShiftPointerCache,
        positions: Range<usize>,
    ) -> Vec<(usize, f32)> {
        cache
            .read(0, positions)
            .unwrap()
            .iter()
            .map(|(position, key, value)| {
                assert_eq!(value[0], -key[0]);
                (position, key[0])
            })
            .collect()
    }

    #[test]
    fn test_empty_read_past_written_positions_is_an_error() {
        let mut cache = cache(4);
        write(&mut cache, 0);
        assert!(matches!(
            cache.read(0, 10..10),
            Err(CacheError::UnwrittenPosition {
                layer: 0,
                position: 10,
            })
        ));
    }

    #[test]
    fn test_fills_window_before_shifting() {
        let mut cache = cache(4);
        for position in 0..3 {
            write(&mut cache, position);
        }
        assert_eq!(cache.ring_offset(0).unwrap(), 0);
        assert_eq!(
            read_keys(&cache, 0..3),
            vec![(0, 0.0), (1, 1.0), (2, 2.0)]
        );
    }

    #[test]
    fn test_oldest_positions_are_shifted_out() {
        let mut cache = cache(4);
        for position in 0..6 {
            write(&mut cache, position);
        }
        assert_eq!(cache.ring_offset(0).unwrap(), 2);
        assert_eq!(
            read_keys(&cache, 0..6),
            vec![(2, 2.0), (3, 3.0), (4, 4.0), (5, 5.0)]
        );
        assert_eq!(read_keys(&cache, 0..5), vec![(2, 2.0), (3, 3.0), (4, 4.0)]);
    }

    #[test]
    fn test_read_never_passes_write_head() {
        let mut cache = cache(4);
        write(&mut cache, 0);
        assert!(matches!(
            cache.read(0, 0..2),
            Err(CacheError::UnwrittenPosition {
                position: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_reset_starts_from_zero() {
        let mut cache = cache(2);
        for position in 0..5 {
            write(&mut cache, position);
        }
        cache.reset();
        assert_eq!(cache.len(0), 0);
        assert_eq!(cache.ring_offset(0).unwrap(), 0);
        write(&mut cache, 0);
        assert_eq!(read_keys(&cache, 0..1), vec![(0, 0.0)]);
    }
}
