use bytemuck::Pod;
use half::{bf16, f16};
use num_traits::{Bounded, NumCast, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Element type of a tensor or logits buffer.
#[derive(
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Copy,
    Clone,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    BF16,
    F16,
    F32,
    F64,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
}

/// Rust scalar that can back a buffer of the matching [`DataType`].
pub trait ArrayElement: NumCast + Pod {
    const DATA_TYPE: DataType;

    fn data_type() -> DataType {
        Self::DATA_TYPE
    }
}

fn bounds_of<T: Bounded + ToPrimitive>() -> Option<(f64, f64)> {
    Some((T::min_value().to_f64()?, T::max_value().to_f64()?))
}

macro_rules! data_types {
    (
        floats: [$($float:ident => $float_type:ty),+ $(,)?],
        integers: [$($integer:ident => $integer_type:ty),+ $(,)?] $(,)?
    ) => {
        impl DataType {
            pub fn size_in_bytes(&self) -> usize {
                match self {
                    $(DataType::$float => size_of::<$float_type>(),)+
                    $(DataType::$integer => size_of::<$integer_type>(),)+
                }
            }

            pub fn is_floating_point(&self) -> bool {
                matches!(self, $(DataType::$float)|+)
            }

            /// Inclusive range of an integer type, as `f64`.
            pub fn integer_bounds(&self) -> Option<(f64, f64)> {
                match self {
                    $(DataType::$integer => bounds_of::<$integer_type>(),)+
                    _ => None,
                }
            }
        }

        $(
            impl ArrayElement for $float_type {
                const DATA_TYPE: DataType = DataType::$float;
            }
        )+
        $(
            impl ArrayElement for $integer_type {
                const DATA_TYPE: DataType = DataType::$integer;
            }
        )+
    };
}

data_types! {
    floats: [BF16 => bf16, F16 => f16, F32 => f32, F64 => f64],
    integers: [
        I8 => i8,
        U8 => u8,
        I16 => i16,
        U16 => u16,
        I32 => i32,
        U32 => u32,
        I64 => i64,
        U64 => u64,
    ],
}
