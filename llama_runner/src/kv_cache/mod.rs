//! Key/value cache shared by consecutive forward passes of one session.
//!
//! Two update disciplines are available and selected once per cache:
//! [`SmartMaskCache`] addresses a fixed buffer by absolute position and
//! tracks populated slots with a validity mask, while [`ShiftPointerCache`]
//! keeps a sliding window addressed through a rotating offset. Both
//! implement [`KVCacheUpdater`], which is all the backend sees.

mod shift_pointer;
mod smart_mask;

use std::{fmt, ops::Range, str::FromStr};

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
pub use shift_pointer::ShiftPointerCache;
pub use smart_mask::SmartMaskCache;

use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KVCacheShape {
    pub num_layers: usize,
    pub head_dim: usize,
    /// Number of positions a session may write.
    pub capacity: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Layer {layer} is out of range for a cache with {num_layers} layers")]
    LayerOutOfRange {
        layer: usize,
        num_layers: usize,
    },
    #[error(
        "Write at position {position} on layer {layer} is not monotone, next position is {expected}"
    )]
    NonMonotonicWrite {
        layer: usize,
        position: usize,
        expected: usize,
    },
    #[error("Position {position} exceeds cache capacity {capacity}")]
    CapacityExceeded {
        position: usize,
        capacity: usize,
    },
    #[error("Read on layer {layer} observes unwritten position {position}")]
    UnwrittenPosition {
        layer: usize,
        position: usize,
    },
    #[error("Entry has head dim {actual}, cache expects {expected}")]
    HeadDimMismatch {
        expected: usize,
        actual: usize,
    },
}

/// Key and value rows produced for one position of one layer.
#[derive(Debug, Clone, Copy)]
pub struct KVEntry<'a> {
    pub layer: usize,
    pub position: usize,
    pub key: ArrayView1<'a, f32>,
    pub value: ArrayView1<'a, f32>,
}

/// Read-only window over cached rows in position order.
///
/// A ring buffer may hand out two segments when the requested positions wrap
/// around the end of its storage.
#[derive(Debug)]
pub struct KVCacheView<'a> {
    positions: Range<usize>,
    segments: Vec<(ArrayView2<'a, f32>, ArrayView2<'a, f32>)>,
}

impl<'a> KVCacheView<'a> {
    pub(crate) fn new(
        positions: Range<usize>,
        segments: Vec<(ArrayView2<'a, f32>, ArrayView2<'a, f32>)>,
    ) -> Self {
        debug_assert_eq!(
            segments.iter().map(|(keys, _)| keys.nrows()).sum::<usize>(),
            positions.len()
        );
        Self {
            positions,
            segments,
        }
    }

    pub fn positions(&self) -> Range<usize> {
        self.positions.clone()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Yields `(position, key, value)` from oldest to newest.
    pub fn iter(
        &self
    ) -> impl Iterator<Item = (usize, ArrayView1<'_, f32>, ArrayView1<'_, f32>)>
    {
        self.segments
            .iter()
            .flat_map(|(keys, values)| {
                keys.rows().into_iter().zip(values.rows())
            })
            .zip(self.positions.clone())
            .map(|((key, value), position)| (position, key, value))
    }
}

/// Cache-update discipline shared by both strategies.
///
/// Writes must arrive in position order per layer, and reads never expose a
/// position that has not been written in the current session.
pub trait KVCacheUpdater {
    fn kind(&self) -> KVUpdater;

    fn shape(&self) -> KVCacheShape;

    /// Number of positions written to `layer` since the last reset.
    fn len(
        &self,
        layer: usize,
    ) -> usize;

    fn write(
        &mut self,
        entry: KVEntry<'_>,
    ) -> Result<(), CacheError>;

    /// Returns the cached rows for `positions` on `layer`.
    ///
    /// Rows that a sliding window has already shifted out are omitted, so the
    /// returned view may start later than `positions.start`.
    fn read(
        &self,
        layer: usize,
        positions: Range<usize>,
    ) -> Result<KVCacheView<'_>, CacheError>;

    fn reset(&mut self);
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
pub enum KVUpdater {
    #[default]
    SmartMask,
    ShiftPointer,
}

impl KVUpdater {
    /// Allocates an empty cache using this discipline.
    ///
    /// `window` only applies to [`KVUpdater::ShiftPointer`]; it defaults to
    /// the full capacity.
    pub fn create(
        &self,
        shape: KVCacheShape,
        window: Option<usize>,
    ) -> Box<dyn KVCacheUpdater> {
        match self {
            KVUpdater::SmartMask => Box::new(SmartMaskCache::new(shape)),
            KVUpdater::ShiftPointer => {
                let window = window.unwrap_or(shape.capacity).max(1);
                Box::new(ShiftPointerCache::new(shape, window))
            },
        }
    }
}

impl FromStr for KVUpdater {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "smartmask" => Ok(KVUpdater::SmartMask),
            "shiftpointer" => Ok(KVUpdater::ShiftPointer),
            _ => Err(ConfigError::UnknownKVUpdater(value.to_string())),
        }
    }
}

impl fmt::Display for KVUpdater {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            KVUpdater::SmartMask => write!(f, "SmartMask"),
            KVUpdater::ShiftPointer => write!(f, "ShiftPointer"),
        }
    }
}

fn check_entry(
    shape: &KVCacheShape,
    entry: &KVEntry<'_>,
) -> Result<(), CacheError> {
    if entry.layer >= shape.num_layers {
        return Err(CacheError::LayerOutOfRange {
            layer: entry.layer,
            num_layers: shape.num_layers,
        });
    }
    for row in [&entry.key, &entry.value] {
        if row.len() != shape.head_dim {
            return Err(CacheError::HeadDimMismatch {
                expected: shape.head_dim,
                actual: row.len(),
            });
        }
    }
    if entry.position >= shape.capacity {
        return Err(CacheError::CapacityExceeded {
            position: entry.position,
            capacity: shape.capacity,
        });
    }
    Ok(())
}

fn check_layer(
    shape: &KVCacheShape,
    layer: usize,
) -> Result<(), CacheError> {
    if layer >= shape.num_layers {
        return Err(CacheError::LayerOutOfRange {
            layer,
            num_layers: shape.num_layers,
        });
    }
    Ok(())
}
