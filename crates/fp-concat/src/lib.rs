#![forbid(unsafe_code)]

//! Concatenation resolver for typed arrays.
//!
//! `concat` runs four stages in a fixed order: classify each input, unify
//! the dtypes, validate the non-concatenation dimensions, then assemble the
//! output in one pre-sized buffer. Advisory warnings come back in the
//! returned [`DiagnosticLedger`]; nothing is raised through global state.

use std::collections::BTreeSet;

use fp_columnar::{ArrayData, ColumnError, ElementCast, TypedArray};
use fp_runtime::{ConcatPolicy, ConcatWarning, DiagnosticLedger};
use fp_types::{DType, DTypeKind, DatetimeDtype, TypeError, promote_numeric};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConcatError {
    #[error("no arrays to concatenate")]
    EmptyInput,
    #[error("axis {axis} is out of bounds for array of dimension {rank}")]
    AxisOutOfBounds { axis: isize, rank: usize },
    #[error(
        "all the input arrays must have same number of dimensions, but the array at index 0 \
         has {expected} dimension(s) and the array at index {position} has {found} dimension(s)"
    )]
    RankMismatch {
        position: usize,
        expected: usize,
        found: usize,
    },
    #[error(
        "all the input array dimensions except for the concatenation axis must match exactly, \
         but along dimension {dimension}, the array at index 0 has size {expected} and the \
         array at index {position} has size {found} (concatenation axis {axis})"
    )]
    ShapeMismatch {
        axis: usize,
        dimension: usize,
        position: usize,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    Column(ColumnError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Element conversion failures surface as [`ConcatError::Type`] whichever
/// layer reported them.
impl From<ColumnError> for ConcatError {
    fn from(err: ColumnError) -> Self {
        match err {
            ColumnError::Type(inner) => Self::Type(inner),
            other => Self::Column(other),
        }
    }
}

/// Python-facing exception family of a [`ConcatError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Value,
    Index,
    Type,
}

impl ConcatError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::EmptyInput | Self::RankMismatch { .. } | Self::ShapeMismatch { .. } => {
                ErrorClass::Value
            }
            Self::AxisOutOfBounds { .. } => ErrorClass::Index,
            Self::Column(_) | Self::Type(_) => ErrorClass::Type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConcatOptions {
    /// Negative values count from the last dimension.
    #[serde(default)]
    pub axis: isize,
    /// Force a fresh buffer on the single-input shortcut.
    #[serde(default)]
    pub copy: bool,
    #[serde(default)]
    pub policy: ConcatPolicy,
}

impl ConcatOptions {
    #[must_use]
    pub fn along(axis: isize) -> Self {
        Self {
            axis,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_copy(mut self, copy: bool) -> Self {
        self.copy = copy;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ConcatPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Concatenated {
    pub array: TypedArray,
    pub diagnostics: DiagnosticLedger,
}

impl Concatenated {
    #[must_use]
    pub fn into_array(self) -> TypedArray {
        self.array
    }
}

// ── Type classifier ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputCategory {
    /// Bool, integer and float buffers.
    Numeric,
    /// Categorical, period and timezone-aware datetime.
    Extension,
    /// Object and naive datetime buffers.
    Plain,
}

impl InputCategory {
    #[must_use]
    pub fn of(dtype: &DType) -> Self {
        if dtype.is_numeric() {
            Self::Numeric
        } else if dtype.is_extension() {
            Self::Extension
        } else {
            Self::Plain
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub position: usize,
    pub dtype: DType,
    pub category: InputCategory,
    /// No elements overall, or zero length along the concatenation axis.
    pub is_empty: bool,
}

#[must_use]
pub fn classify(position: usize, array: &TypedArray, axis: usize) -> Classified {
    Classified {
        position,
        dtype: array.dtype().clone(),
        category: InputCategory::of(array.dtype()),
        is_empty: array.is_empty() || array.axis_len(axis) == Some(0),
    }
}

// ── Dtype unifier ──────────────────────────────────────────────────────

/// Single dtype able to hold every value of every input dtype.
///
/// Identical dtypes pass through; categoricals merge their category sets;
/// numerics promote; datetimes sharing a zone take the finest unit. Every
/// other mix degrades to `Object`.
pub fn find_common_dtype<'a, I>(dtypes: I) -> DType
where
    I: IntoIterator<Item = &'a DType>,
{
    let dtypes: Vec<&DType> = dtypes.into_iter().collect();
    let Some((&first, rest)) = dtypes.split_first() else {
        return DType::Object;
    };
    if rest.iter().all(|&d| d == first) {
        return first.clone();
    }

    let kinds: BTreeSet<DTypeKind> = dtypes.iter().map(|d| d.kind()).collect();
    let numeric_only = dtypes.iter().all(|d| d.is_numeric());

    if numeric_only {
        // Bools next to floats stay boxed rather than becoming 1.0/0.0.
        if kinds.contains(&DTypeKind::Bool) && kinds.contains(&DTypeKind::Float) {
            return DType::Object;
        }
        return rest
            .iter()
            .try_fold(first.clone(), |acc, d| promote_numeric(&acc, d))
            .unwrap_or(DType::Object);
    }

    if kinds.len() != 1 {
        return DType::Object;
    }

    match first {
        DType::Categorical(head) => {
            let merged = rest.iter().fold(head.clone(), |acc, d| match d {
                DType::Categorical(cat) => acc.union(cat),
                _ => acc,
            });
            DType::Categorical(merged)
        }
        DType::Datetime(head) => {
            let mut unit = head.unit;
            for d in rest {
                match d {
                    DType::Datetime(dt) if dt.tz == head.tz => unit = unit.finest(dt.unit),
                    _ => return DType::Object,
                }
            }
            DType::Datetime(DatetimeDtype {
                unit,
                tz: head.tz.clone(),
            })
        }
        // Periods of differing frequency, or anything already object.
        _ => DType::Object,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unified {
    pub dtype: DType,
    pub warning: Option<ConcatWarning>,
}

/// Resolve the output dtype of a request under `policy`.
///
/// With an excluding policy, empty inputs are left out of resolution as long
/// as something non-empty remains. A warning is produced when leaving them
/// out changed the answer, or when an empty categorical carried categories
/// other than the resolved ones (the union hides that difference).
#[must_use]
pub fn unify(classified: &[Classified], policy: &ConcatPolicy) -> Unified {
    let inclusive = find_common_dtype(classified.iter().map(|c| &c.dtype));
    let non_empty: Vec<&Classified> = classified.iter().filter(|c| !c.is_empty).collect();

    if !policy.excludes_empty_entries()
        || non_empty.is_empty()
        || non_empty.len() == classified.len()
    {
        return Unified {
            dtype: inclusive,
            warning: None,
        };
    }

    let resolved = find_common_dtype(non_empty.iter().map(|c| &c.dtype));
    let diverges = resolved != inclusive
        || classified.iter().any(|c| {
            c.is_empty && c.dtype.kind() == DTypeKind::Categorical && c.dtype != resolved
        });

    let warning = (policy.warns_on_empty_entries() && diverges).then(|| {
        let categorical = classified
            .iter()
            .any(|c| c.dtype.kind() == DTypeKind::Categorical);
        let ignored = classified
            .iter()
            .filter(|c| c.is_empty)
            .map(|c| c.position)
            .collect();
        ConcatWarning::empty_entries(
            categorical,
            ignored,
            resolved.to_string(),
            inclusive.to_string(),
        )
    });

    Unified {
        dtype: resolved,
        warning,
    }
}

// ── Shape validator ────────────────────────────────────────────────────

pub fn normalize_axis(axis: isize, rank: usize) -> Result<usize, ConcatError> {
    let out_of_bounds = ConcatError::AxisOutOfBounds { axis, rank };
    let signed_rank = isize::try_from(rank).map_err(|_| out_of_bounds.clone())?;
    let normalized = if axis < 0 { axis + signed_rank } else { axis };
    if !(0..signed_rank).contains(&normalized) {
        return Err(out_of_bounds);
    }
    usize::try_from(normalized).map_err(|_| out_of_bounds)
}

/// Check every dimension except `axis` against the first input and return
/// the output shape.
pub fn validate_shapes(arrays: &[TypedArray], axis: usize) -> Result<Vec<usize>, ConcatError> {
    let Some((first, rest)) = arrays.split_first() else {
        return Err(ConcatError::EmptyInput);
    };
    let mut shape = first.shape().to_vec();

    for (offset, array) in rest.iter().enumerate() {
        let position = offset + 1;
        if array.rank() != first.rank() {
            return Err(ConcatError::RankMismatch {
                position,
                expected: first.rank(),
                found: array.rank(),
            });
        }
        for (dimension, (&expected, &found)) in first.shape().iter().zip(array.shape()).enumerate()
        {
            if dimension != axis && expected != found {
                return Err(ConcatError::ShapeMismatch {
                    axis,
                    dimension,
                    position,
                    expected,
                    found,
                });
            }
        }
        shape[axis] += array.shape()[axis];
    }

    Ok(shape)
}

// ── Array assembler ────────────────────────────────────────────────────

/// Fill a `shape`-sized buffer of `dtype` in one row-major pass.
///
/// For each block of leading dimensions, every input contributes its
/// contiguous run along `axis`, converted by a per-input cast plan.
pub fn assemble(
    arrays: &[TypedArray],
    axis: usize,
    dtype: &DType,
    shape: Vec<usize>,
) -> Result<TypedArray, ConcatError> {
    let outer: usize = shape[..axis].iter().product();
    let inner: usize = shape[axis + 1..].iter().product();
    let total: usize = shape.iter().product();

    let parts = arrays
        .iter()
        .filter(|array| !array.is_empty())
        .map(|array| {
            let plan = ElementCast::plan(array.dtype(), dtype)?;
            Ok((array, plan, array.shape()[axis] * inner))
        })
        .collect::<Result<Vec<_>, TypeError>>()?;

    let mut data = ArrayData::with_capacity(dtype, total);
    for block in 0..outer {
        for (array, plan, run) in &parts {
            let start = block * run;
            array.append_cast(start..start + run, plan, dtype, &mut data)?;
        }
    }

    Ok(TypedArray::new(dtype.clone(), shape, data)?)
}

// ── Entry points ───────────────────────────────────────────────────────

/// Concatenate along `axis` with the default (legacy) policy and no copy.
pub fn concat(arrays: &[TypedArray], axis: isize) -> Result<Concatenated, ConcatError> {
    concat_with(arrays, &ConcatOptions::along(axis))
}

pub fn concat_with(
    arrays: &[TypedArray],
    options: &ConcatOptions,
) -> Result<Concatenated, ConcatError> {
    let Some(first) = arrays.first() else {
        return Err(ConcatError::EmptyInput);
    };
    let axis = normalize_axis(options.axis, first.rank())?;

    if let [only] = arrays {
        debug!(axis, copy = options.copy, dtype = %only.dtype(), "single-input concat");
        let array = if options.copy {
            only.deep_copy()
        } else {
            only.clone()
        };
        return Ok(Concatenated {
            array,
            diagnostics: DiagnosticLedger::new(),
        });
    }

    let classified: Vec<Classified> = arrays
        .iter()
        .enumerate()
        .map(|(position, array)| classify(position, array, axis))
        .collect();
    let unified = unify(&classified, &options.policy);
    let shape = validate_shapes(arrays, axis)?;
    let extension_inputs = classified
        .iter()
        .filter(|c| c.category == InputCategory::Extension)
        .count();
    debug!(
        inputs = arrays.len(),
        extension_inputs,
        axis,
        dtype = %unified.dtype,
        shape = ?shape,
        "concat dtype resolved"
    );

    let array = assemble(arrays, axis, &unified.dtype, shape)?;
    let mut diagnostics = DiagnosticLedger::new();
    if let Some(warning) = unified.warning {
        diagnostics.push(warning);
    }
    Ok(Concatenated { array, diagnostics })
}
