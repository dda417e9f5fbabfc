use std::ops::Range;

use ndarray::{Array2, ArrayView1, s};

use super::{
    CacheError, KVCacheShape, KVCacheUpdater, KVCacheView, KVEntry, KVUpdater,
    check_entry, check_layer,
};

pub struct SmartMaskLayer {
    /// [capacity, head_dim]
    pub keys: Array2<f32>,
    /// [capacity, head_dim]
    pub values: Array2<f32>,
    /// [capacity] - slot `p` holds position `p` once set
    pub mask: Vec<bool>,
    pub length: usize,
}

/// Fixed-size cache addressed by absolute position.
///
/// Growing the sequence never moves data; a write only fills slot `p` and
/// flips its mask bit.
pub struct SmartMaskCache {
    shape: KVCacheShape,
    layers: Box<[SmartMaskLayer]>,
}

impl SmartMaskCache {
    pub fn new(shape: KVCacheShape) -> Self {
        let layers = (0..shape.num_layers)
            .map(|_| SmartMaskLayer {
                keys: Array2::zeros((shape.capacity, shape.head_dim)),
                values: Array2::zeros((shape.capacity, shape.head_dim)),
                mask: vec![false; shape.capacity],
                length: 0,
            })
            .collect();
        Self {
            shape,
            layers,
        }
    }

    /// Validity mask of `layer`, one entry per slot.
    pub fn attention_mask(
        &self,
        layer: usize,
    ) -> Result<ArrayView1<'_, bool>, CacheError> {
        check_layer(&self.shape, layer)?;
        Ok(ArrayView1::from(self.layers[layer].mask.as_slice()))
    }
}

impl KVCacheUpdater for SmartMaskCache {
    fn kind(&self) -> KVUpdater {
        KVUpdater::SmartMask
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
        let layer = &mut self.layers[entry.layer];
        if entry.position != layer.length {
            return Err(CacheError::NonMonotonicWrite {
                layer: entry.layer,
                position: entry.position,
                expected: layer.length,
            });
        }

        layer.keys.row_mut(entry.position).assign(&entry.key);
        layer.values.row_mut(entry.position).assign(&entry.value);
        layer.mask[entry.position] = true;
        layer.length += 1;
        Ok(())
    }

    fn read(
        &self,
        layer_index: usize,
        positions: Range<usize>,
    ) -> Result<KVCacheView<'_>, CacheError> {
        check_layer(&self.shape, layer_index)?;
        let furthest = positions.start.max(positions.end);
        if furthest > self.shape.capacity {
            return Err(CacheError::CapacityExceeded {
                position: furthest,
                capacity: self.shape.capacity,
            });
        }
        // Reversed ranges read as empty.
        let positions = positions.start..furthest;
        let layer = &self.layers[layer_index];
        let is_set =
            |position: usize| layer.mask.get(position).copied().unwrap_or(false);
        if let Some(position) =
            positions.clone().find(|&position| !is_set(position))
        {
            return Err(CacheError::UnwrittenPosition {
                layer: layer_index,
                position,
            });
        }

        let keys = layer.keys.slice(s![positions.clone(), ..]);
        let values = layer.values.slice(s![positions.clone(), ..]);
        Ok(KVCacheView::new(positions, vec![(keys, values)]))
    }

    fn reset(&mut self) {
        for layer in self.layers.iter_mut() {
            layer.mask.fill(false);
            layer.length = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use super::*;

    fn shape() -> KVCacheShape {
        KVCacheShape {
            num_layers: 2,
            head_dim: 2,
            capacity: 4,
        }
    }

    fn write(
        cache: &mut SmartMaskCache,
        layer: usize,
        position: usize,
    ) -> Result<(), CacheError> {
        let key = arr1(&[position as f32, 1.0]);
        let value = arr1(&[position as f32, 2.0]);
        cache.write(KVEntry {
            layer,
            position,
            key: key.view(),
            value: value.view(),
        })
    }

    #[test]
    fn test_read_beyond_capacity_is_an_error() {
        let mut cache = SmartMaskCache::new(shape());
        for position in 0..4 {
            write(&mut cache, 0, position).unwrap();
        }

        assert!(matches!(
            cache.read(0, 10..10),
            Err(CacheError::CapacityExceeded {
                position: 10,
                capacity: 4,
            })
        ));
        assert!(matches!(
            cache.read(0, 2..5),
            Err(CacheError::CapacityExceeded {
                position: 5,
                capacity: 4,
            })
        ));
        assert_eq!(cache.read(0, 4..4).unwrap().iter().count(), 0);
        assert_eq!(cache.read(0, 3..1).unwrap().iter().count(), 0);
    }

    #[test]
    fn test_write_enables_slot() {
        let mut cache = SmartMaskCache::new(shape());
        write(&mut cache, 0, 0).unwrap();
        write(&mut cache, 0, 1).unwrap();

        let mask = cache.attention_mask(0).unwrap();
        assert_eq!(mask.to_vec(), vec![true, true, false, false]);
        assert_eq!(cache.len(0), 2);
        assert_eq!(cache.len(1), 0);

        let view = cache.read(0, 0..2).unwrap();
        let mut positions = Vec::new();
        for (position, key, _) in view.iter() {
            assert_eq!(key[0], position as f32);
            positions.push(position);
        }
        assert_eq!(positions, vec![0, 1]);
    }

    #[test]
    fn test_read_past_write_head_fails() {
        let mut cache = SmartMaskCache::new(shape());
        write(&mut cache, 0, 0).unwrap();
        assert!(matches!(
            cache.read(0, 0..2),
            Err(CacheError::UnwrittenPosition {
                position: 1,
                ..
            })
        ));
        assert!(matches!(
            cache.read(1, 0..1),
            Err(CacheError::UnwrittenPosition {
                position: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_gapped_write_is_rejected() {
        let mut cache = SmartMaskCache::new(shape());
        assert!(matches!(
            write(&mut cache, 0, 2),
            Err(CacheError::NonMonotonicWrite {
                expected: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut cache = SmartMaskCache::new(shape());
        for position in 0..4 {
            write(&mut cache, 0, position).unwrap();
        }
        assert!(matches!(
            write(&mut cache, 0, 4),
            Err(CacheError::CapacityExceeded {
                capacity: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_reset_clears_mask() {
        let mut cache = SmartMaskCache::new(shape());
        write(&mut cache, 0, 0).unwrap();
        cache.reset();
        assert_eq!(cache.len(0), 0);
        assert!(cache.read(0, 0..1).is_err());
        write(&mut cache, 0, 0).unwrap();
    }
}
