#![forbid(unsafe_code)]

use std::ops::Range;
use std::sync::Arc;

use fp_types::{
    DType, DatetimeDtype, Freq, MISSING_CODE, NAT, NullKind, Period, Scalar, TimeUnit, Timestamp,
    TypeError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Contiguous storage behind a [`TypedArray`], row-major.
///
/// Extension dtypes keep their physical form: categorical arrays store codes
/// into the category list, periods store ordinals, datetimes store epoch
/// ticks. Missing entries are `MISSING_CODE` / `NAT` sentinels, or NaN in
/// float buffers.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Object(Vec<Scalar>),
    Codes(Vec<i32>),
    Ordinals(Vec<i64>),
    Ticks(Vec<i64>),
}

macro_rules! each_storage {
    ($data:expr, |$v:ident| $body:expr) => {
        match $data {
            ArrayData::Bool($v) => $body,
            ArrayData::Int8($v) => $body,
            ArrayData::Int16($v) => $body,
            ArrayData::Int32($v) => $body,
            ArrayData::Int64($v) => $body,
            ArrayData::UInt8($v) => $body,
            ArrayData::UInt16($v) => $body,
            ArrayData::UInt32($v) => $body,
            ArrayData::UInt64($v) => $body,
            ArrayData::Float32($v) => $body,
            ArrayData::Float64($v) => $body,
            ArrayData::Object($v) => $body,
            ArrayData::Codes($v) => $body,
            ArrayData::Ordinals($v) => $body,
            ArrayData::Ticks($v) => $body,
        }
    };
}

/// Runs `$body` when both buffers share a variant; evaluates to `false`
/// otherwise.
macro_rules! zip_storage {
    ($dst:expr, $src:expr, |$d:ident, $s:ident| $body:expr) => {
        match ($dst, $src) {
            (ArrayData::Bool($d), ArrayData::Bool($s)) => {
                $body;
                true
            }
            (ArrayData::Int8($d), ArrayData::Int8($s)) => {
                $body;
                true
            }
            (ArrayData::Int16($d), ArrayData::Int16($s)) => {
                $body;
                true
            }
            (ArrayData::Int32($d), ArrayData::Int32($s)) => {
                $body;
                true
            }
            (ArrayData::Int64($d), ArrayData::Int64($s)) => {
                $body;
                true
            }
            (ArrayData::UInt8($d), ArrayData::UInt8($s)) => {
                $body;
                true
            }
            (ArrayData::UInt16($d), ArrayData::UInt16($s)) => {
                $body;
                true
            }
            (ArrayData::UInt32($d), ArrayData::UInt32($s)) => {
                $body;
                true
            }
            (ArrayData::UInt64($d), ArrayData::UInt64($s)) => {
                $body;
                true
            }
            (ArrayData::Float32($d), ArrayData::Float32($s)) => {
                $body;
                true
            }
            (ArrayData::Float64($d), ArrayData::Float64($s)) => {
                $body;
                true
            }
            (ArrayData::Object($d), ArrayData::Object($s)) => {
                $body;
                true
            }
            (ArrayData::Codes($d), ArrayData::Codes($s)) => {
                $body;
                true
            }
            (ArrayData::Ordinals($d), ArrayData::Ordinals($s)) => {
                $body;
                true
            }
            (ArrayData::Ticks($d), ArrayData::Ticks($s)) => {
                $body;
                true
            }
            _ => false,
        }
    };
}

/// Numeric element lifted out of its buffer for cross-width casts.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Num {
    fn from_scalar(value: &Scalar) -> Option<Self> {
        match value {
            Scalar::Bool(v) => Some(Self::Bool(*v)),
            Scalar::Int64(v) => Some(Self::Int(*v)),
            Scalar::UInt64(v) => Some(Self::UInt(*v)),
            Scalar::Float64(v) => Some(Self::Float(*v)),
            _ => None,
        }
    }

    /// Exact integer value, if there is one. Fractional, NaN and
    /// out-of-range floats have none.
    fn to_i128(self) -> Option<i128> {
        match self {
            Self::Bool(v) => Some(i128::from(v)),
            Self::Int(v) => Some(i128::from(v)),
            Self::UInt(v) => Some(i128::from(v)),
            Self::Float(v) => (v.fract() == 0.0 && v.abs() < 2f64.powi(64)).then(|| v as i128),
        }
    }

    fn to_int<T: TryFrom<i128>>(self) -> Option<T> {
        self.to_i128().and_then(|v| T::try_from(v).ok())
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Int(v) => v as f64,
            Self::UInt(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    fn to_bool(self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(v),
            other => match other.to_i128()? {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            },
        }
    }
}

impl ArrayData {
    /// Empty buffer of the physical storage used by `dtype`.
    #[must_use]
    pub fn with_capacity(dtype: &DType, capacity: usize) -> Self {
        match dtype {
            DType::Bool => Self::Bool(Vec::with_capacity(capacity)),
            DType::Int8 => Self::Int8(Vec::with_capacity(capacity)),
            DType::Int16 => Self::Int16(Vec::with_capacity(capacity)),
            DType::Int32 => Self::Int32(Vec::with_capacity(capacity)),
            DType::Int64 => Self::Int64(Vec::with_capacity(capacity)),
            DType::UInt8 => Self::UInt8(Vec::with_capacity(capacity)),
            DType::UInt16 => Self::UInt16(Vec::with_capacity(capacity)),
            DType::UInt32 => Self::UInt32(Vec::with_capacity(capacity)),
            DType::UInt64 => Self::UInt64(Vec::with_capacity(capacity)),
            DType::Float32 => Self::Float32(Vec::with_capacity(capacity)),
            DType::Float64 => Self::Float64(Vec::with_capacity(capacity)),
            DType::Object => Self::Object(Vec::with_capacity(capacity)),
            DType::Categorical(_) => Self::Codes(Vec::with_capacity(capacity)),
            DType::Period(_) => Self::Ordinals(Vec::with_capacity(capacity)),
            DType::Datetime(_) => Self::Ticks(Vec::with_capacity(capacity)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        each_storage!(self, |v| v.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this buffer is the physical storage of `dtype`.
    #[must_use]
    pub fn fits(&self, dtype: &DType) -> bool {
        matches!(
            (self, dtype),
            (Self::Bool(_), DType::Bool)
                | (Self::Int8(_), DType::Int8)
                | (Self::Int16(_), DType::Int16)
                | (Self::Int32(_), DType::Int32)
                | (Self::Int64(_), DType::Int64)
                | (Self::UInt8(_), DType::UInt8)
                | (Self::UInt16(_), DType::UInt16)
                | (Self::UInt32(_), DType::UInt32)
                | (Self::UInt64(_), DType::UInt64)
                | (Self::Float32(_), DType::Float32)
                | (Self::Float64(_), DType::Float64)
                | (Self::Object(_), DType::Object)
                | (Self::Codes(_), DType::Categorical(_))
                | (Self::Ordinals(_), DType::Period(_))
                | (Self::Ticks(_), DType::Datetime(_))
        )
    }

    /// Append `src[range]` when both buffers share storage. Returns `false`
    /// (leaving `self` untouched) otherwise.
    fn extend_from(&mut self, src: &Self, range: Range<usize>) -> bool {
        zip_storage!(self, src, |dst, values| dst.extend_from_slice(&values[range]))
    }

    /// Overwrite position `idx` with the single element held by `cell`.
    fn overwrite(&mut self, idx: usize, cell: &Self) -> bool {
        zip_storage!(self, cell, |dst, values| dst[idx] = values[0].clone())
    }

    fn num_at(&self, idx: usize) -> Option<Num> {
        let num = match self {
            Self::Bool(v) => Num::Bool(v[idx]),
            Self::Int8(v) => Num::Int(i64::from(v[idx])),
            Self::Int16(v) => Num::Int(i64::from(v[idx])),
            Self::Int32(v) => Num::Int(i64::from(v[idx])),
            Self::Int64(v) => Num::Int(v[idx]),
            Self::UInt8(v) => Num::UInt(u64::from(v[idx])),
            Self::UInt16(v) => Num::UInt(u64::from(v[idx])),
            Self::UInt32(v) => Num::UInt(u64::from(v[idx])),
            Self::UInt64(v) => Num::UInt(v[idx]),
            Self::Float32(v) => Num::Float(f64::from(v[idx])),
            Self::Float64(v) => Num::Float(v[idx]),
            Self::Object(_) | Self::Codes(_) | Self::Ordinals(_) | Self::Ticks(_) => return None,
        };
        Some(num)
    }

    /// Append `value` if this is a numeric buffer that can hold it exactly.
    /// Floats only need to be in range; integers must not wrap.
    fn push_num(&mut self, value: Num) -> Option<()> {
        match self {
            Self::Bool(v) => v.push(value.to_bool()?),
            Self::Int8(v) => v.push(value.to_int()?),
            Self::Int16(v) => v.push(value.to_int()?),
            Self::Int32(v) => v.push(value.to_int()?),
            Self::Int64(v) => v.push(value.to_int()?),
            Self::UInt8(v) => v.push(value.to_int()?),
            Self::UInt16(v) => v.push(value.to_int()?),
            Self::UInt32(v) => v.push(value.to_int()?),
            Self::UInt64(v) => v.push(value.to_int()?),
            Self::Float32(v) => v.push(value.as_f64() as f32),
            Self::Float64(v) => v.push(value.as_f64()),
            Self::Object(_) | Self::Codes(_) | Self::Ordinals(_) | Self::Ticks(_) => return None,
        }
        Some(())
    }

    /// Append the storage form of a boxed scalar.
    fn push_scalar(&mut self, dtype: &DType, value: &Scalar) -> Result<(), TypeError> {
        let invalid = || TypeError::InvalidScalar {
            value: value.to_string(),
            dtype: dtype.clone(),
        };

        match (self, value) {
            (Self::Object(values), _) => values.push(value.clone()),
            (Self::Codes(codes), Scalar::Utf8(label)) => {
                let DType::Categorical(cat) = dtype else {
                    return Err(invalid());
                };
                let code = cat
                    .code_of(label)
                    .ok_or_else(|| TypeError::UnknownCategory {
                        label: label.clone(),
                        dtype: dtype.clone(),
                    })?;
                codes.push(code);
            }
            (Self::Codes(codes), _) if value.is_missing() => codes.push(MISSING_CODE),
            (Self::Ordinals(ordinals), Scalar::Period(p)) if *dtype == DType::Period(p.freq) => {
                ordinals.push(p.ordinal);
            }
            (Self::Ordinals(ordinals), _) if value.is_missing() => ordinals.push(NAT),
            (Self::Ticks(ticks), Scalar::Timestamp(ts)) => {
                let DType::Datetime(dt) = dtype else {
                    return Err(invalid());
                };
                if dt.tz != ts.tz {
                    return Err(invalid());
                }
                ticks.push(rescale_ticks(ts.value, ts.unit, dt.unit)?);
            }
            (Self::Ticks(ticks), _) if value.is_missing() => ticks.push(NAT),
            (Self::Float32(values), _) if value.is_missing() => values.push(f32::NAN),
            (Self::Float64(values), _) if value.is_missing() => values.push(f64::NAN),
            (data, _) => {
                let num = Num::from_scalar(value).ok_or_else(invalid)?;
                data.push_num(num).ok_or_else(invalid)?;
            }
        }
        Ok(())
    }
}

/// Convert epoch ticks between units. Coarsening floors toward negative
/// infinity; refining fails on overflow.
pub fn rescale_ticks(value: i64, from: TimeUnit, to: TimeUnit) -> Result<i64, TypeError> {
    if value == NAT || from == to {
        return Ok(value);
    }
    let (from_tps, to_tps) = (from.ticks_per_second(), to.ticks_per_second());
    if to_tps > from_tps {
        value
            .checked_mul(to_tps / from_tps)
            .ok_or(TypeError::DatetimeOverflow { value, unit: to })
    } else {
        Ok(value.div_euclid(from_tps / to_tps))
    }
}

/// How elements of one dtype are carried into a buffer of another.
///
/// Planned once per input so the per-element loop never re-inspects dtypes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementCast {
    /// Same storage: raw buffer copy.
    Identity,
    /// Box every element into a `Scalar`.
    Box,
    /// Numeric widening between bool/int/uint/float buffers.
    Numeric,
    /// Categorical codes re-pointed into a wider category list, indexed by
    /// source code.
    RemapCodes(Vec<i32>),
    /// Datetime ticks multiplied into a finer unit.
    RescaleTicks(i64),
}

impl ElementCast {
    pub fn plan(from: &DType, to: &DType) -> Result<Self, TypeError> {
        if from == to {
            return Ok(Self::Identity);
        }
        let invalid = || TypeError::InvalidCast {
            from: from.clone(),
            to: to.clone(),
        };

        match (from, to) {
            (_, DType::Object) => Ok(Self::Box),
            (src, dst) if src.is_numeric() && dst.is_numeric() => Ok(Self::Numeric),
            (DType::Categorical(src), DType::Categorical(dst)) => {
                let mapping = src
                    .categories
                    .iter()
                    .map(|label| {
                        dst.code_of(label)
                            .ok_or_else(|| TypeError::UnknownCategory {
                                label: label.clone(),
                                dtype: to.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::RemapCodes(mapping))
            }
            (DType::Datetime(src), DType::Datetime(dst))
                if src.tz == dst.tz && dst.unit >= src.unit =>
            {
                Ok(Self::RescaleTicks(
                    dst.unit.ticks_per_second() / src.unit.ticks_per_second(),
                ))
            }
            _ => Err(invalid()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("cannot hold shape {shape:?} in a buffer of {len} elements")]
    ShapeLength { shape: Vec<usize>, len: usize },
    #[error("buffer storage does not match dtype {dtype}")]
    StorageMismatch { dtype: DType },
    #[error("categorical code {code} is out of range for {categories} categories")]
    CodeOutOfRange { code: i32, categories: usize },
    #[error("axis {axis} is out of bounds for array of dimension {rank}")]
    AxisOutOfBounds { axis: usize, rank: usize },
    #[error("slice {start}..{end} is out of bounds for an axis of length {len}")]
    SliceOutOfBounds { start: usize, end: usize, len: usize },
    #[error("index {index} is out of bounds for an array of {len} elements")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// An n-dimensional, homogeneous, row-major array with a dtype tag.
///
/// The buffer is reference counted: clones and reshapes alias it, and
/// [`TypedArray::set_flat`] copies on write, so holders of an alias never
/// observe each other's mutations.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Arc<ArrayData>,
}

impl TypedArray {
    pub fn new(dtype: DType, shape: Vec<usize>, data: ArrayData) -> Result<Self, ColumnError> {
        if !data.fits(&dtype) {
            return Err(ColumnError::StorageMismatch { dtype });
        }
        if shape.iter().product::<usize>() != data.len() {
            return Err(ColumnError::ShapeLength {
                shape,
                len: data.len(),
            });
        }
        if let (ArrayData::Codes(codes), DType::Categorical(cat)) = (&data, &dtype) {
            let categories = cat.categories.len();
            if let Some(&code) = codes
                .iter()
                .find(|&&c| c != MISSING_CODE && usize::try_from(c).map_or(true, |c| c >= categories))
            {
                return Err(ColumnError::CodeOutOfRange { code, categories });
            }
        }

        Ok(Self {
            dtype,
            shape,
            data: Arc::new(data),
        })
    }

    /// One-dimensional array over `data`.
    pub fn from_data(dtype: DType, data: ArrayData) -> Result<Self, ColumnError> {
        let len = data.len();
        Self::new(dtype, vec![len], data)
    }

    /// One-dimensional array storing each boxed value in `dtype`'s layout.
    pub fn from_scalars(dtype: DType, values: &[Scalar]) -> Result<Self, ColumnError> {
        let mut data = ArrayData::with_capacity(&dtype, values.len());
        for value in values {
            data.push_scalar(&dtype, value)?;
        }
        Self::from_data(dtype, data)
    }

    /// Categorical array whose categories are the sorted distinct labels.
    #[must_use]
    pub fn categorical_from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut categories: Vec<String> = labels.iter().map(|l| l.as_ref().to_owned()).collect();
        categories.sort();
        categories.dedup();
        let codes = labels
            .iter()
            .map(|label| {
                categories
                    .binary_search_by(|c| c.as_str().cmp(label.as_ref()))
                    .map_or(MISSING_CODE, |pos| pos as i32)
            })
            .collect::<Vec<_>>();
        let len = codes.len();
        Self {
            dtype: DType::categorical(categories),
            shape: vec![len],
            data: Arc::new(ArrayData::Codes(codes)),
        }
    }

    #[must_use]
    pub fn empty(dtype: DType) -> Self {
        let data = ArrayData::with_capacity(&dtype, 0);
        Self {
            dtype,
            shape: vec![0],
            data: Arc::new(data),
        }
    }

    #[must_use]
    pub fn object(values: Vec<Scalar>) -> Self {
        let len = values.len();
        Self {
            dtype: DType::Object,
            shape: vec![len],
            data: Arc::new(ArrayData::Object(values)),
        }
    }

    #[must_use]
    pub fn int64(values: Vec<i64>) -> Self {
        let len = values.len();
        Self {
            dtype: DType::Int64,
            shape: vec![len],
            data: Arc::new(ArrayData::Int64(values)),
        }
    }

    #[must_use]
    pub fn float64(values: Vec<f64>) -> Self {
        let len = values.len();
        Self {
            dtype: DType::Float64,
            shape: vec![len],
            data: Arc::new(ArrayData::Float64(values)),
        }
    }

    #[must_use]
    pub fn period(ordinals: Vec<i64>, freq: Freq) -> Self {
        let len = ordinals.len();
        Self {
            dtype: DType::Period(freq),
            shape: vec![len],
            data: Arc::new(ArrayData::Ordinals(ordinals)),
        }
    }

    #[must_use]
    pub fn datetime(ticks: Vec<i64>, dtype: DatetimeDtype) -> Self {
        let len = ticks.len();
        Self {
            dtype: DType::Datetime(dtype),
            shape: vec![len],
            data: Arc::new(ArrayData::Ticks(ticks)),
        }
    }

    #[must_use]
    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total element count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    #[must_use]
    pub fn axis_len(&self, axis: usize) -> Option<usize> {
        self.shape.get(axis).copied()
    }

    /// Whether both arrays read from the same allocation.
    #[must_use]
    pub fn shares_buffer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Same values in a freshly allocated buffer.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self {
            dtype: self.dtype.clone(),
            shape: self.shape.clone(),
            data: Arc::new(self.data.as_ref().clone()),
        }
    }

    /// Boxed value at a row-major offset.
    #[must_use]
    pub fn get_flat(&self, idx: usize) -> Option<Scalar> {
        (idx < self.len()).then(|| self.box_at(idx))
    }

    /// Boxed value at a multi-dimensional position.
    #[must_use]
    pub fn get(&self, position: &[usize]) -> Option<Scalar> {
        if position.len() != self.rank() {
            return None;
        }
        let mut offset = 0;
        for (&pos, &dim) in position.iter().zip(&self.shape) {
            if pos >= dim {
                return None;
            }
            offset = offset * dim + pos;
        }
        self.get_flat(offset)
    }

    /// Every element boxed, in row-major order.
    #[must_use]
    pub fn to_scalars(&self) -> Vec<Scalar> {
        (0..self.len()).map(|idx| self.box_at(idx)).collect()
    }

    fn box_at(&self, idx: usize) -> Scalar {
        match (self.data.as_ref(), &self.dtype) {
            (ArrayData::Bool(v), _) => Scalar::Bool(v[idx]),
            (ArrayData::Int8(v), _) => Scalar::Int64(i64::from(v[idx])),
            (ArrayData::Int16(v), _) => Scalar::Int64(i64::from(v[idx])),
            (ArrayData::Int32(v), _) => Scalar::Int64(i64::from(v[idx])),
            (ArrayData::Int64(v), _) => Scalar::Int64(v[idx]),
            (ArrayData::UInt8(v), _) => Scalar::UInt64(u64::from(v[idx])),
            (ArrayData::UInt16(v), _) => Scalar::UInt64(u64::from(v[idx])),
            (ArrayData::UInt32(v), _) => Scalar::UInt64(u64::from(v[idx])),
            (ArrayData::UInt64(v), _) => Scalar::UInt64(v[idx]),
            (ArrayData::Float32(v), _) => Scalar::Float64(f64::from(v[idx])),
            (ArrayData::Float64(v), _) => Scalar::Float64(v[idx]),
            (ArrayData::Object(v), _) => v[idx].clone(),
            (ArrayData::Codes(v), DType::Categorical(cat)) => cat
                .label(v[idx])
                .map_or(Scalar::Null(NullKind::NaN), Scalar::utf8),
            (ArrayData::Ordinals(v), DType::Period(freq)) => match v[idx] {
                NAT => Scalar::Null(NullKind::NaT),
                ordinal => Scalar::Period(Period::new(ordinal, *freq)),
            },
            (ArrayData::Ticks(v), DType::Datetime(dt)) => match v[idx] {
                NAT => Scalar::Null(NullKind::NaT),
                ticks => Scalar::Timestamp(Timestamp::new(ticks, dt.unit, dt.tz.clone())),
            },
            // `new` rejects storage that does not fit the dtype.
            (ArrayData::Codes(_) | ArrayData::Ordinals(_) | ArrayData::Ticks(_), _) => {
                Scalar::Null(NullKind::Null)
            }
        }
    }

    /// Same buffer viewed with a different shape.
    pub fn reshape(&self, shape: Vec<usize>) -> Result<Self, ColumnError> {
        if shape.iter().product::<usize>() != self.len() {
            return Err(ColumnError::ShapeLength {
                shape,
                len: self.len(),
            });
        }
        Ok(Self {
            dtype: self.dtype.clone(),
            shape,
            data: Arc::clone(&self.data),
        })
    }

    /// Copy of the sub-array `range` along `axis`, every other axis whole.
    pub fn slice_axis(&self, axis: usize, range: Range<usize>) -> Result<Self, ColumnError> {
        let len = self.axis_len(axis).ok_or(ColumnError::AxisOutOfBounds {
            axis,
            rank: self.rank(),
        })?;
        if range.start > range.end || range.end > len {
            return Err(ColumnError::SliceOutOfBounds {
                start: range.start,
                end: range.end,
                len,
            });
        }

        let outer: usize = self.shape[..axis].iter().product();
        let inner: usize = self.shape[axis + 1..].iter().product();
        let chunk = len * inner;
        let width = range.end - range.start;

        let mut data = ArrayData::with_capacity(&self.dtype, outer * width * inner);
        for block in 0..outer {
            let base = block * chunk;
            data.extend_from(
                &self.data,
                base + range.start * inner..base + range.end * inner,
            );
        }

        let mut shape = self.shape.clone();
        shape[axis] = width;
        Ok(Self {
            dtype: self.dtype.clone(),
            shape,
            data: Arc::new(data),
        })
    }

    /// Store `value` at a row-major offset, detaching from any alias first.
    pub fn set_flat(&mut self, idx: usize, value: &Scalar) -> Result<(), ColumnError> {
        if idx >= self.len() {
            return Err(ColumnError::IndexOutOfBounds {
                index: idx,
                len: self.len(),
            });
        }
        let mut cell = ArrayData::with_capacity(&self.dtype, 1);
        cell.push_scalar(&self.dtype, value)?;
        Arc::make_mut(&mut self.data).overwrite(idx, &cell);
        Ok(())
    }

    /// Append the elements at row-major offsets `range`, converted by `plan`,
    /// to `out` (a buffer of dtype `target`).
    pub fn append_cast(
        &self,
        range: Range<usize>,
        plan: &ElementCast,
        target: &DType,
        out: &mut ArrayData,
    ) -> Result<(), ColumnError> {
        let mismatch = || TypeError::InvalidCast {
            from: self.dtype.clone(),
            to: target.clone(),
        };

        match plan {
            ElementCast::Identity => {
                if !out.extend_from(&self.data, range) {
                    return Err(mismatch().into());
                }
            }
            ElementCast::Box => {
                let ArrayData::Object(values) = out else {
                    return Err(mismatch().into());
                };
                values.extend(range.map(|idx| self.box_at(idx)));
            }
            ElementCast::Numeric => {
                for idx in range {
                    let num = self.data.num_at(idx).ok_or_else(mismatch)?;
                    out.push_num(num).ok_or_else(mismatch)?;
                }
            }
            ElementCast::RemapCodes(mapping) => {
                let (ArrayData::Codes(dst), ArrayData::Codes(src)) = (out, self.data.as_ref())
                else {
                    return Err(mismatch().into());
                };
                dst.extend(src[range].iter().map(|&code| {
                    usize::try_from(code)
                        .ok()
                        .and_then(|c| mapping.get(c))
                        .copied()
                        .unwrap_or(MISSING_CODE)
                }));
            }
            ElementCast::RescaleTicks(factor) => {
                let (ArrayData::Ticks(dst), ArrayData::Ticks(src), DType::Datetime(dt)) =
                    (out, self.data.as_ref(), target)
                else {
                    return Err(mismatch().into());
                };
                for &ticks in &src[range] {
                    if ticks == NAT {
                        dst.push(NAT);
                        continue;
                    }
                    let scaled = ticks
                        .checked_mul(*factor)
                        .ok_or(TypeError::DatetimeOverflow {
                            value: ticks,
                            unit: dt.unit,
                        })?;
                    dst.push(scaled);
                }
            }
        }
        Ok(())
    }
}

impl Serialize for TypedArray {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("TypedArray", 3)?;
        state.serialize_field("dtype", &self.dtype)?;
        state.serialize_field("shape", &self.shape)?;
        state.serialize_field("values", &self.to_scalars())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for TypedArray {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            dtype: DType,
            #[serde(default)]
            shape: Option<Vec<usize>>,
            values: Vec<Scalar>,
        }
        let raw = Raw::deserialize(deserializer)?;
        let flat = Self::from_scalars(raw.dtype, &raw.values).map_err(serde::de::Error::custom)?;
        match raw.shape {
            Some(shape) => flat.reshape(shape).map_err(serde::de::Error::custom),
            None => Ok(flat),
        }
    }
}
