//! Safetensors shard layout: a little-endian `u64` header length, a JSON
//! header mapping tensor names to dtype, shape and byte range, then the raw
//! tensor bytes.

use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::{BufWriter, Write},
    os::unix::fs::FileExt,
    path::Path,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ArrayElement, DataType};

const HEADER_LENGTH_BYTES: usize = size_of::<u64>();
const MAX_HEADER_BYTES: u64 = 100_000_000;
const HEADER_ALIGNMENT: usize = 8;

#[derive(Debug, Error)]
pub enum SafetensorsError {
    #[error("Shard is too short to hold its header")]
    Truncated,
    #[error("Header of {0} bytes exceeds the {MAX_HEADER_BYTES} byte limit")]
    HeaderTooLarge(u64),
    #[error("Header is not valid UTF-8")]
    InvalidUtf8,
    #[error("Header is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Tensor \"{name}\" uses unsupported dtype {dtype}")]
    UnsupportedDtype {
        name: String,
        dtype: String,
    },
    #[error("Tensor \"{name}\" holds {actual} bytes, its shape needs {expected}")]
    TensorSize {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Tensor \"{0}\" was added twice")]
    DuplicateTensor(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn dtype_tag(data_type: DataType) -> &'static str {
    match data_type {
        DataType::BF16 => "BF16",
        DataType::F16 => "F16",
        DataType::F32 => "F32",
        DataType::F64 => "F64",
        DataType::I8 => "I8",
        DataType::U8 => "U8",
        DataType::I16 => "I16",
        DataType::U16 => "U16",
        DataType::I32 => "I32",
        DataType::U32 => "U32",
        DataType::I64 => "I64",
        DataType::U64 => "U64",
    }
}

fn parse_dtype_tag(tag: &str) -> Option<DataType> {
    let data_type = match tag {
        "BF16" => DataType::BF16,
        "F16" => DataType::F16,
        "F32" => DataType::F32,
        "F64" => DataType::F64,
        "I8" => DataType::I8,
        "U8" | "BOOL" => DataType::U8,
        "I16" => DataType::I16,
        "U16" => DataType::U16,
        "I32" => DataType::I32,
        "U32" => DataType::U32,
        "I64" => DataType::I64,
        "U64" => DataType::U64,
        _ => return None,
    };
    Some(data_type)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorEntry {
    pub dtype: String,
    pub shape: Vec<usize>,
    /// Byte range relative to the end of the header.
    pub data_offsets: (usize, usize),
}

impl TensorEntry {
    pub fn data_type(&self) -> Option<DataType> {
        parse_dtype_tag(&self.dtype)
    }

    pub fn byte_len(&self) -> usize {
        self.data_offsets.1.saturating_sub(self.data_offsets.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardHeader {
    #[serde(
        rename = "__metadata__",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(flatten)]
    pub tensors: BTreeMap<String, TensorEntry>,
}

impl ShardHeader {
    /// Parses the header of `file` and returns it together with the file
    /// offset at which tensor data begins.
    pub fn read(file: &File) -> Result<(Self, usize), SafetensorsError> {
        let mut length_bytes = [0u8; HEADER_LENGTH_BYTES];
        file.read_exact_at(&mut length_bytes, 0)
            .map_err(|_| SafetensorsError::Truncated)?;
        let header_length = u64::from_le_bytes(length_bytes);
        if header_length > MAX_HEADER_BYTES {
            return Err(SafetensorsError::HeaderTooLarge(header_length));
        }

        let mut json = vec![0u8; header_length as usize];
        file.read_exact_at(&mut json, HEADER_LENGTH_BYTES as u64)
            .map_err(|_| SafetensorsError::Truncated)?;
        let json = std::str::from_utf8(&json)
            .map_err(|_| SafetensorsError::InvalidUtf8)?;
        let header: ShardHeader = serde_json::from_str(json.trim_end())?;
        Ok((header, HEADER_LENGTH_BYTES + header_length as usize))
    }
}

/// Collects tensors for a single shard, then writes header and data at once.
#[derive(Debug, Default)]
pub struct ShardWriter {
    header: ShardHeader,
    data: Vec<u8>,
}

impl ShardWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(
        mut self,
        metadata: Option<HashMap<String, String>>,
    ) -> Self {
        self.header.metadata = metadata;
        self
    }

    pub fn len(&self) -> usize {
        self.header.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.header.tensors.is_empty()
    }

    pub fn add<T: ArrayElement>(
        &mut self,
        name: &str,
        shape: &[usize],
        values: &[T],
    ) -> Result<(), SafetensorsError> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        self.add_bytes(name, T::data_type(), shape, bytes)
    }

    pub fn add_bytes(
        &mut self,
        name: &str,
        data_type: DataType,
        shape: &[usize],
        bytes: &[u8],
    ) -> Result<(), SafetensorsError> {
        let expected = shape
            .iter()
            .product::<usize>()
            .saturating_mul(data_type.size_in_bytes());
        if expected != bytes.len() {
            return Err(SafetensorsError::TensorSize {
                name: name.to_string(),
                expected,
                actual: bytes.len(),
            });
        }
        if self.header.tensors.contains_key(name) {
            return Err(SafetensorsError::DuplicateTensor(name.to_string()));
        }

        let begin = self.data.len();
        self.data.extend_from_slice(bytes);
        self.header.tensors.insert(
            name.to_string(),
            TensorEntry {
                dtype: dtype_tag(data_type).to_string(),
                shape: shape.to_vec(),
                data_offsets: (begin, self.data.len()),
            },
        );
        Ok(())
    }

    pub fn write(
        self,
        path: &Path,
    ) -> Result<(), SafetensorsError> {
        let mut json = serde_json::to_vec(&self.header)?;
        let padded_len = json.len().next_multiple_of(HEADER_ALIGNMENT);
        json.resize(padded_len, b' ');

        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&(json.len() as u64).to_le_bytes())?;
        writer.write_all(&json)?;
        writer.write_all(&self.data)?;
        writer.flush()?;
        Ok(())
    }
}
