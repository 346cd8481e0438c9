// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the “License”);
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an “AS IS” BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Part of the MIND project (Machine Intelligence Native Design).

//! Basic tensor type definitions.
//!
//! # Example
//! ```
//! use mind_graph::types::{DType, TensorInfo};
//! let info = TensorInfo::new(DType::F32, vec![2, 3]);
//! assert_eq!(info.nelms(), 6);
//! assert_eq!(info.nbytes(), 24);
//! ```

use std::fmt;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    I32,
    I64,
    F32,
    BF16,
    F16,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_of(self) -> usize {
        match self {
            DType::I32 | DType::F32 => 4,
            DType::I64 => 8,
            DType::BF16 | DType::F16 => 2,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::BF16 | DType::F16)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::BF16 => "bf16",
            DType::F16 => "f16",
        };
        f.write_str(name)
    }
}

/// Data type plus static shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct TensorInfo {
    pub dtype: DType,
    pub shape: Vec<usize>,
}

impl TensorInfo {
    pub fn new(dtype: DType, shape: Vec<usize>) -> Self {
        Self { dtype, shape }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self {
            dtype,
            shape: Vec::new(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements; a rank-0 tensor holds one element.
    pub fn nelms(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn nbytes(&self) -> usize {
        self.nelms() * self.dtype.size_of()
    }
}

impl fmt::Display for TensorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.dtype)?;
        for (i, dim) in self.shape.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

/// Materialized value of a Constant or Variable tensor, stored as raw
/// little-endian bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorData {
    bytes: Vec<u8>,
}

impl TensorData {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_f32s(values: &[f32]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Self { bytes }
    }

    /// A single element of `dtype` holding the value one.
    pub fn one(dtype: DType) -> Self {
        let bytes = match dtype {
            DType::F32 => 1.0f32.to_le_bytes().to_vec(),
            DType::I32 => 1i32.to_le_bytes().to_vec(),
            DType::I64 => 1i64.to_le_bytes().to_vec(),
            // IEEE half and bfloat16 encodings of 1.0.
            DType::F16 => 0x3c00u16.to_le_bytes().to_vec(),
            DType::BF16 => 0x3f80u16.to_le_bytes().to_vec(),
        };
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the payload size matches what `info` describes.
    pub fn matches(&self, info: &TensorInfo) -> bool {
        self.bytes.len() == info.nbytes()
    }
}

#[cfg(test)]
mod tests {
    use super::{DType, TensorData, TensorInfo};

    #[test]
    fn tensor_info_counts_bytes() {
        let t = TensorInfo::new(DType::F16, vec![4, 8]);
        assert_eq!(t.nelms(), 32);
        assert_eq!(t.nbytes(), 64);
        assert_eq!(t.to_string(), "f16[4,8]");
    }

    #[test]
    fn scalar_has_one_element() {
        let t = TensorInfo::scalar(DType::F32);
        assert_eq!(t.rank(), 0);
        assert_eq!(t.nelms(), 1);
        assert!(TensorData::one(DType::F32).matches(&t));
    }

    #[test]
    fn data_from_f32s_is_little_endian() {
        let data = TensorData::from_f32s(&[1.0, 2.0]);
        assert_eq!(data.len(), 8);
        assert_eq!(&data.as_bytes()[..4], &1.0f32.to_le_bytes());
    }
}
