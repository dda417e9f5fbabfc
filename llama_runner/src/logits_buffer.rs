use thiserror::Error;

use crate::{ArrayElement, DataType};

#[derive(Debug, Error)]
pub enum LogitsBufferError {
    #[error(
        "Buffer of {length} bytes is not a whole number of {data_type:?} elements"
    )]
    MisalignedLength {
        data_type: DataType,
        length: usize,
    },
}

/// Raw scores produced by one forward pass, one per vocabulary entry.
///
/// The buffer keeps the element type the backend produced. Quantized outputs
/// stay quantized until the logits processor applies scale and offset.
#[derive(Debug, Clone, PartialEq)]
pub struct LogitsBuffer {
    data_type: DataType,
    bytes: Box<[u8]>,
}

impl LogitsBuffer {
    pub fn from_slice<T: ArrayElement>(values: &[T]) -> Self {
        Self {
            data_type: T::data_type(),
            bytes: bytemuck::cast_slice(values).into(),
        }
    }

    pub fn from_bytes(
        data_type: DataType,
        bytes: Vec<u8>,
    ) -> Result<Self, LogitsBufferError> {
        if bytes.len() % data_type.size_in_bytes() != 0 {
            return Err(LogitsBufferError::MisalignedLength {
                data_type,
                length: bytes.len(),
            });
        }
        Ok(Self {
            data_type,
            bytes: bytes.into_boxed_slice(),
        })
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.data_type.size_in_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copies the elements out as `T`, or `None` if `T` is not the stored type.
    pub fn to_vec<T: ArrayElement>(&self) -> Option<Vec<T>> {
        if T::data_type() != self.data_type {
            return None;
        }
        let values = self
            .bytes
            .chunks_exact(self.data_type.size_in_bytes())
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect();
        Some(values)
    }
}
