#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel stored in datetime and period buffers for a missing value.
pub const NAT: i64 = i64::MIN;

/// Sentinel stored in categorical code buffers for a missing value.
pub const MISSING_CODE: i32 = -1;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
}

impl TimeUnit {
    #[must_use]
    pub fn ticks_per_second(self) -> i64 {
        match self {
            Self::Second => 1,
            Self::Millisecond => 1_000,
            Self::Microsecond => 1_000_000,
            Self::Nanosecond => 1_000_000_000,
        }
    }

    /// The finer of two units; variants are declared coarse to fine.
    #[must_use]
    pub fn finest(self, other: Self) -> Self {
        self.max(other)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Second => "s",
            Self::Millisecond => "ms",
            Self::Microsecond => "us",
            Self::Nanosecond => "ns",
        }
    }
}

/// Period frequency. Ordinals count whole periods from the one containing
/// 1970-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freq {
    Year,
    Quarter,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl Freq {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Year => "Y-DEC",
            Self::Quarter => "Q-DEC",
            Self::Month => "M",
            Self::Day => "D",
            Self::Hour => "h",
            Self::Minute => "min",
            Self::Second => "s",
        }
    }

    /// Ordinal of the period of this frequency that contains `date`.
    #[must_use]
    pub fn ordinal_of(self, date: NaiveDate) -> i64 {
        use chrono::Datelike;

        let years = i64::from(date.year()) - 1970;
        let month0 = i64::from(date.month0());
        let days = date
            .and_hms_opt(0, 0, 0)
            .map_or(0, |dt| dt.and_utc().timestamp())
            .div_euclid(SECONDS_PER_DAY);
        match self {
            Self::Year => years,
            Self::Quarter => years * 4 + month0 / 3,
            Self::Month => years * 12 + month0,
            Self::Day => days,
            Self::Hour => days * 24,
            Self::Minute => days * 24 * 60,
            Self::Second => days * SECONDS_PER_DAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoricalDtype {
    pub categories: Vec<String>,
    #[serde(default)]
    pub ordered: bool,
}

impl CategoricalDtype {
    #[must_use]
    pub fn new(categories: Vec<String>, ordered: bool) -> Self {
        Self {
            categories,
            ordered,
        }
    }

    #[must_use]
    pub fn unordered<S: Into<String>>(categories: impl IntoIterator<Item = S>) -> Self {
        Self::new(categories.into_iter().map(Into::into).collect(), false)
    }

    #[must_use]
    pub fn code_of(&self, label: &str) -> Option<i32> {
        self.categories
            .iter()
            .position(|c| c == label)
            .and_then(|pos| i32::try_from(pos).ok())
    }

    #[must_use]
    pub fn label(&self, code: i32) -> Option<&str> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| self.categories.get(idx))
            .map(String::as_str)
    }

    /// Union of category sets in first-seen order. The result is unordered.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut categories = self.categories.clone();
        for label in &other.categories {
            if !categories.contains(label) {
                categories.push(label.clone());
            }
        }
        Self::new(categories, false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatetimeDtype {
    pub unit: TimeUnit,
    #[serde(default)]
    pub tz: Option<String>,
}

impl DatetimeDtype {
    #[must_use]
    pub fn naive(unit: TimeUnit) -> Self {
        Self { unit, tz: None }
    }

    #[must_use]
    pub fn with_tz(unit: TimeUnit, tz: impl Into<String>) -> Self {
        Self {
            unit,
            tz: Some(tz.into()),
        }
    }
}

/// Closed set of dtype tags understood by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    #[serde(rename = "uint8")]
    UInt8,
    #[serde(rename = "uint16")]
    UInt16,
    #[serde(rename = "uint32")]
    UInt32,
    #[serde(rename = "uint64")]
    UInt64,
    Float32,
    Float64,
    Object,
    Categorical(CategoricalDtype),
    Period(Freq),
    Datetime(DatetimeDtype),
}

/// Coarse storage family of a dtype, numpy `dtype.kind` style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DTypeKind {
    Bool,
    Int,
    UInt,
    Float,
    Object,
    Categorical,
    Period,
    Datetime,
}

impl DType {
    #[must_use]
    pub fn kind(&self) -> DTypeKind {
        match self {
            Self::Bool => DTypeKind::Bool,
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 => DTypeKind::Int,
            Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64 => DTypeKind::UInt,
            Self::Float32 | Self::Float64 => DTypeKind::Float,
            Self::Object => DTypeKind::Object,
            Self::Categorical(_) => DTypeKind::Categorical,
            Self::Period(_) => DTypeKind::Period,
            Self::Datetime(_) => DTypeKind::Datetime,
        }
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.kind(),
            DTypeKind::Bool | DTypeKind::Int | DTypeKind::UInt | DTypeKind::Float
        )
    }

    /// Categorical, period and timezone-aware datetime carry their own
    /// storage and unification rules; naive datetimes are plain buffers.
    #[must_use]
    pub fn is_extension(&self) -> bool {
        match self {
            Self::Categorical(_) | Self::Period(_) => true,
            Self::Datetime(dt) => dt.tz.is_some(),
            _ => false,
        }
    }

    #[must_use]
    pub fn datetime(unit: TimeUnit) -> Self {
        Self::Datetime(DatetimeDtype::naive(unit))
    }

    #[must_use]
    pub fn datetime_tz(unit: TimeUnit, tz: impl Into<String>) -> Self {
        Self::Datetime(DatetimeDtype::with_tz(unit, tz))
    }

    #[must_use]
    pub fn categorical<S: Into<String>>(categories: impl IntoIterator<Item = S>) -> Self {
        Self::Categorical(CategoricalDtype::unordered(categories))
    }

    fn numeric_width(&self) -> Option<(DTypeKind, u8)> {
        let bits = match self {
            Self::Bool => 1,
            Self::Int8 | Self::UInt8 => 8,
            Self::Int16 | Self::UInt16 => 16,
            Self::Int32 | Self::UInt32 | Self::Float32 => 32,
            Self::Int64 | Self::UInt64 | Self::Float64 => 64,
            _ => return None,
        };
        Some((self.kind(), bits))
    }

    fn from_numeric_width(kind: DTypeKind, bits: u8) -> Self {
        match (kind, bits) {
            (DTypeKind::Bool, _) => Self::Bool,
            (DTypeKind::Int, 8) => Self::Int8,
            (DTypeKind::Int, 16) => Self::Int16,
            (DTypeKind::Int, 32) => Self::Int32,
            (DTypeKind::Int, _) => Self::Int64,
            (DTypeKind::UInt, 8) => Self::UInt8,
            (DTypeKind::UInt, 16) => Self::UInt16,
            (DTypeKind::UInt, 32) => Self::UInt32,
            (DTypeKind::UInt, _) => Self::UInt64,
            (DTypeKind::Float, 32) => Self::Float32,
            _ => Self::Float64,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int8 => f.write_str("int8"),
            Self::Int16 => f.write_str("int16"),
            Self::Int32 => f.write_str("int32"),
            Self::Int64 => f.write_str("int64"),
            Self::UInt8 => f.write_str("uint8"),
            Self::UInt16 => f.write_str("uint16"),
            Self::UInt32 => f.write_str("uint32"),
            Self::UInt64 => f.write_str("uint64"),
            Self::Float32 => f.write_str("float32"),
            Self::Float64 => f.write_str("float64"),
            Self::Object => f.write_str("object"),
            Self::Categorical(cat) => write!(
                f,
                "category[{}{}]",
                cat.categories.join(", "),
                if cat.ordered { "; ordered" } else { "" }
            ),
            Self::Period(freq) => write!(f, "period[{}]", freq.code()),
            Self::Datetime(dt) => match &dt.tz {
                Some(tz) => write!(f, "datetime64[{}, {tz}]", dt.unit.as_str()),
                None => write!(f, "datetime64[{}]", dt.unit.as_str()),
            },
        }
    }
}

/// Numpy `result_type` over bool/int/uint/float dtypes.
///
/// Returns `None` when either side is not numeric. Signed/unsigned mixes
/// widen to the next signed width that holds both ranges, and fall back to
/// `float64` once that would exceed 64 bits.
#[must_use]
pub fn promote_numeric(left: &DType, right: &DType) -> Option<DType> {
    let (lk, lb) = left.numeric_width()?;
    let (rk, rb) = right.numeric_width()?;

    if lk == rk {
        return Some(DType::from_numeric_width(lk, lb.max(rb)));
    }

    let out = match (lk, rk) {
        (DTypeKind::Bool, _) => right.clone(),
        (_, DTypeKind::Bool) => left.clone(),
        (DTypeKind::Int, DTypeKind::UInt) => signed_unsigned(lb, rb),
        (DTypeKind::UInt, DTypeKind::Int) => signed_unsigned(rb, lb),
        (DTypeKind::Float, _) => int_float(rb, lb),
        (_, DTypeKind::Float) => int_float(lb, rb),
        _ => return None,
    };
    Some(out)
}

fn signed_unsigned(signed_bits: u8, unsigned_bits: u8) -> DType {
    if signed_bits > unsigned_bits {
        DType::from_numeric_width(DTypeKind::Int, signed_bits)
    } else if unsigned_bits < 64 {
        DType::from_numeric_width(DTypeKind::Int, unsigned_bits * 2)
    } else {
        DType::Float64
    }
}

fn int_float(int_bits: u8, float_bits: u8) -> DType {
    // float32 carries 24 mantissa bits: exact for 8/16-bit integers only.
    if float_bits == 32 && int_bits <= 16 {
        DType::Float32
    } else {
        DType::Float64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    NaN,
    NaT,
}

/// A point in time: ticks since the Unix epoch (UTC) in `unit`, tagged with
/// the zone it was observed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub value: i64,
    pub unit: TimeUnit,
    #[serde(default)]
    pub tz: Option<String>,
}

impl Timestamp {
    #[must_use]
    pub fn new(value: i64, unit: TimeUnit, tz: Option<String>) -> Self {
        Self { value, unit, tz }
    }

    /// Midnight UTC of the given calendar date.
    pub fn from_ymd(year: i32, month: u32, day: u32, unit: TimeUnit) -> Result<Self, TypeError> {
        Self::from_ymd_hms(year, month, day, 0, 0, 0, unit)
    }

    pub fn from_ymd_hms(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
        unit: TimeUnit,
    ) -> Result<Self, TypeError> {
        let seconds = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, second))
            .map(|dt| dt.and_utc().timestamp())
            .ok_or(TypeError::InvalidDate { year, month, day })?;
        let value = seconds
            .checked_mul(unit.ticks_per_second())
            .ok_or(TypeError::DatetimeOverflow {
                value: seconds,
                unit,
            })?;
        Ok(Self::new(value, unit, None))
    }

    fn to_utc(&self) -> Option<DateTime<Utc>> {
        let per_second = self.unit.ticks_per_second();
        let seconds = self.value.div_euclid(per_second);
        let sub = self.value.rem_euclid(per_second);
        let nanos = u32::try_from(sub * (1_000_000_000 / per_second)).ok()?;
        DateTime::from_timestamp(seconds, nanos)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_utc() {
            Some(dt) => {
                write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f"))?;
                match &self.tz {
                    Some(tz) => write!(f, " {tz}"),
                    None => Ok(()),
                }
            }
            None => write!(f, "Timestamp({}{})", self.value, self.unit.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub ordinal: i64,
    pub freq: Freq,
}

impl Period {
    #[must_use]
    pub fn new(ordinal: i64, freq: Freq) -> Self {
        Self { ordinal, freq }
    }

    pub fn from_ymd(year: i32, month: u32, day: u32, freq: Freq) -> Result<Self, TypeError> {
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or(TypeError::InvalidDate { year, month, day })?;
        Ok(Self::new(freq.ordinal_of(date), freq))
    }

    fn start_seconds(&self) -> Option<i64> {
        match self.freq {
            Freq::Day => self.ordinal.checked_mul(SECONDS_PER_DAY),
            Freq::Hour => self.ordinal.checked_mul(3_600),
            Freq::Minute => self.ordinal.checked_mul(60),
            Freq::Second => Some(self.ordinal),
            Freq::Year | Freq::Quarter | Freq::Month => None,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ord = self.ordinal;
        match self.freq {
            Freq::Year => write!(f, "{}", 1970 + ord),
            Freq::Quarter => write!(f, "{}Q{}", 1970 + ord.div_euclid(4), ord.rem_euclid(4) + 1),
            Freq::Month => write!(
                f,
                "{}-{:02}",
                1970 + ord.div_euclid(12),
                ord.rem_euclid(12) + 1
            ),
            Freq::Day | Freq::Hour | Freq::Minute | Freq::Second => {
                let pattern = match self.freq {
                    Freq::Day => "%Y-%m-%d",
                    Freq::Second => "%Y-%m-%d %H:%M:%S",
                    _ => "%Y-%m-%d %H:%M",
                };
                match self
                    .start_seconds()
                    .and_then(|s| DateTime::from_timestamp(s, 0))
                {
                    Some(dt) => write!(f, "{}", dt.format(pattern)),
                    None => write!(f, "Period({ord}, {})", self.freq.code()),
                }
            }
        }
    }
}

/// Boxed element form, used by the generic-object representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Bool(bool),
    Int64(i64),
    #[serde(rename = "uint64")]
    UInt64(u64),
    Float64(f64),
    Utf8(String),
    Timestamp(Timestamp),
    Period(Period),
}

impl Scalar {
    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null(_) => true,
            Self::Float64(v) => v.is_nan(),
            _ => false,
        }
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float64(a), Self::Float64(b)) => (a.is_nan() && b.is_nan()) || (a == b),
            (Self::Null(NullKind::NaN), Self::Float64(v))
            | (Self::Float64(v), Self::Null(NullKind::NaN)) => v.is_nan(),
            _ => self == other,
        }
    }

    #[must_use]
    pub fn utf8(value: impl Into<String>) -> Self {
        Self::Utf8(value.into())
    }
}

impl From<Timestamp> for Scalar {
    fn from(value: Timestamp) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Period> for Scalar {
    fn from(value: Period) -> Self {
        Self::Period(value)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null(NullKind::NaT) => f.write_str("NaT"),
            Self::Null(NullKind::NaN) => f.write_str("NaN"),
            Self::Null(NullKind::Null) => f.write_str("None"),
            Self::Bool(v) => write!(f, "{}", if *v { "True" } else { "False" }),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => f.write_str(v),
            Self::Timestamp(ts) => write!(f, "Timestamp('{ts}')"),
            Self::Period(p) => write!(f, "Period('{p}', '{}')", p.freq.code()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("cannot cast values of dtype {from} to {to}")]
    InvalidCast { from: DType, to: DType },
    #[error("cannot store scalar {value} in an array of dtype {dtype}")]
    InvalidScalar { value: String, dtype: DType },
    #[error("datetime value {value} overflows when expressed in unit '{}'", .unit.as_str())]
    DatetimeOverflow { value: i64, unit: TimeUnit },
    #[error("{year:04}-{month:02}-{day:02} is not a valid calendar date")]
    InvalidDate { year: i32, month: u32, day: u32 },
    #[error("label {label:?} is not among the categories of {dtype}")]
    UnknownCategory { label: String, dtype: DType },
}

#[cfg(test)]
mod tests {
    use super::{
        CategoricalDtype, DType, Freq, NullKind, Period, Scalar, TimeUnit, Timestamp,
        promote_numeric,
    };

    #[test]
    fn numeric_promotion_follows_result_type() {
        let cases = [
            (DType::Int8, DType::UInt8, DType::Int16),
            (DType::Int16, DType::UInt8, DType::Int16),
            (DType::Int8, DType::UInt32, DType::Int64),
            (DType::Int64, DType::UInt64, DType::Float64),
            (DType::Int16, DType::Float32, DType::Float32),
            (DType::Int32, DType::Float32, DType::Float64),
            (DType::Float32, DType::Float64, DType::Float64),
            (DType::Bool, DType::Int32, DType::Int32),
            (DType::UInt16, DType::UInt64, DType::UInt64),
        ];
        for (left, right, expected) in cases {
            assert_eq!(promote_numeric(&left, &right), Some(expected.clone()));
            assert_eq!(promote_numeric(&right, &left), Some(expected));
        }
    }

    #[test]
    fn promotion_rejects_non_numeric() {
        assert_eq!(promote_numeric(&DType::Object, &DType::Int64), None);
        assert_eq!(
            promote_numeric(&DType::datetime(TimeUnit::Second), &DType::Int64),
            None
        );
    }

    #[test]
    fn category_union_keeps_first_seen_order() {
        let left = CategoricalDtype::unordered(["b", "a"]);
        let right = CategoricalDtype::new(vec!["c".into(), "a".into()], true);
        let union = left.union(&right);
        assert_eq!(union.categories, vec!["b", "a", "c"]);
        assert!(!union.ordered);
        assert_eq!(union.code_of("c"), Some(2));
        assert_eq!(union.label(5), None);
    }

    #[test]
    fn extension_flags() {
        assert!(DType::categorical(["a"]).is_extension());
        assert!(DType::Period(Freq::Day).is_extension());
        assert!(DType::datetime_tz(TimeUnit::Nanosecond, "UTC").is_extension());
        assert!(!DType::datetime(TimeUnit::Nanosecond).is_extension());
        assert!(!DType::Float64.is_extension());
    }

    #[test]
    fn dtype_display_uses_pandas_names() {
        assert_eq!(DType::UInt16.to_string(), "uint16");
        assert_eq!(
            DType::datetime_tz(TimeUnit::Nanosecond, "UTC").to_string(),
            "datetime64[ns, UTC]"
        );
        assert_eq!(DType::Period(Freq::Day).to_string(), "period[D]");
        assert_eq!(DType::categorical(["a", "b"]).to_string(), "category[a, b]");
    }

    #[test]
    fn timestamp_renders_calendar_time() {
        let ts = Timestamp::from_ymd(2010, 1, 1, TimeUnit::Second).expect("valid date");
        assert_eq!(ts.value, 1_262_304_000);
        assert_eq!(ts.to_string(), "2010-01-01 00:00:00");

        let precise = Timestamp::new(
            1_586_336_400_709_949,
            TimeUnit::Microsecond,
            Some("UTC".to_owned()),
        );
        assert_eq!(precise.to_string(), "2020-04-08 09:00:00.709949 UTC");
    }

    #[test]
    fn invalid_dates_are_rejected() {
        let err = Timestamp::from_ymd(2021, 2, 30, TimeUnit::Second).expect_err("must fail");
        assert_eq!(err.to_string(), "2021-02-30 is not a valid calendar date");
    }

    #[test]
    fn period_ordinals_and_rendering() {
        let day = Period::from_ymd(2016, 1, 1, Freq::Day).expect("valid");
        assert_eq!(day.ordinal, 16_801);
        assert_eq!(day.to_string(), "2016-01-01");

        let month = Period::from_ymd(2016, 3, 9, Freq::Month).expect("valid");
        assert_eq!(month.ordinal, 46 * 12 + 2);
        assert_eq!(month.to_string(), "2016-03");

        let quarter = Period::from_ymd(1969, 11, 2, Freq::Quarter).expect("valid");
        assert_eq!(quarter.ordinal, -1);
        assert_eq!(quarter.to_string(), "1969Q4");
    }

    #[test]
    fn semantic_eq_treats_nan_as_equal() {
        let left = Scalar::Float64(f64::NAN);
        let right = Scalar::Null(NullKind::NaN);
        assert!(left.semantic_eq(&right));
        assert!(!Scalar::Null(NullKind::NaT).semantic_eq(&right));
    }

    #[test]
    fn dtype_serde_is_adjacently_tagged() {
        let dtype = DType::categorical(["a", "b"]);
        let json = serde_json::to_string(&dtype).expect("serialize");
        assert_eq!(
            json,
            r#"{"kind":"categorical","params":{"categories":["a","b"],"ordered":false}}"#
        );
        let plain: DType = serde_json::from_str(r#"{"kind":"uint8"}"#).expect("unit variant");
        assert_eq!(plain, DType::UInt8);
    }
}
