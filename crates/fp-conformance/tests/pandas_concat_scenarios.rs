#![forbid(unsafe_code)]

//! The `concat_compat` scenarios pandas pins in its dtype test suite,
//! driven through the public API rather than JSON packets.

use fp_columnar::TypedArray;
use fp_concat::{ConcatError, ConcatOptions, ErrorClass, concat, concat_with};
use fp_conformance::compare_arrays;
use fp_runtime::{EMPTY_ENTRY_DEPRECATION, WarningKind};
use fp_types::{DType, DatetimeDtype, Freq, Period, Scalar, TimeUnit, Timestamp};

fn period_grid() -> TypedArray {
    let start = Period::from_ymd(2016, 1, 1, Freq::Day).expect("valid date");
    TypedArray::period((start.ordinal..start.ordinal + 36).collect(), Freq::Day)
        .reshape(vec![6, 6])
        .expect("36 periods fill 6x6")
}

#[test]
fn mismatched_categoricals_with_empty() {
    let populated = TypedArray::categorical_from_labels(&["a", "b", "c"]);
    let empty = TypedArray::empty(DType::categorical(Vec::<String>::new()));

    let out = concat(&[populated.clone(), empty], 0).expect("concat");

    assert_eq!(out.array.dtype(), populated.dtype());
    compare_arrays(&out.array, &populated).expect("same values as the populated input");
    assert_eq!(out.diagnostics.len(), 1);
    let warning = &out.diagnostics.records()[0];
    assert_eq!(warning.kind, WarningKind::DeprecatedMixedCategoricalEmpty);
    assert_eq!(warning.ignored_positions, vec![1]);
    assert!(
        warning
            .message
            .starts_with("The behavior of array concatenation with empty entries is deprecated")
    );
    assert_eq!(warning.message, EMPTY_ENTRY_DEPRECATION);
}

#[test]
fn single_tz_aware_input_round_trips_with_and_without_copy() {
    let dtype = DatetimeDtype::with_tz(TimeUnit::Microsecond, "UTC");
    let ts = Timestamp::from_ymd_hms(2020, 4, 8, 9, 0, 0, TimeUnit::Microsecond)
        .expect("valid instant");
    let input = TypedArray::datetime(vec![ts.value + 709_949], dtype);
    let expected = input.deep_copy();

    for copy in [true, false] {
        let out = concat_with(
            std::slice::from_ref(&input),
            &ConcatOptions::default().with_copy(copy),
        )
        .expect("single input");
        compare_arrays(&out.array, &expected).expect("unchanged");
        assert_eq!(out.array.shares_buffer(&input), !copy, "copy={copy}");
        assert!(out.diagnostics.is_empty());
        assert_eq!(
            out.array.get_flat(0).map(|v| v.to_string()).as_deref(),
            Some("2020-04-08 09:00:00.709949 UTC")
        );
    }
}

#[test]
fn period_grid_split_and_rejoin() {
    let grid = period_grid();

    let top = grid.slice_axis(0, 0..2).expect("rows 0..2");
    let bottom = grid.slice_axis(0, 2..6).expect("rows 2..6");
    let rows = concat(&[top.clone(), bottom.clone()], 0).expect("row rejoin");
    assert_eq!(rows.array, grid);

    let left = grid.slice_axis(1, 0..2).expect("cols 0..2");
    let right = grid.slice_axis(1, 2..6).expect("cols 2..6");
    let cols = concat(&[left.clone(), right.clone()], 1).expect("column rejoin");
    assert_eq!(cols.array, grid);

    for (inputs, axis) in [([left, right], 0), ([top, bottom], 1)] {
        let err = concat(&inputs, axis).expect_err("split axis disagrees");
        assert_eq!(err.class(), ErrorClass::Value);
        assert!(matches!(err, ConcatError::ShapeMismatch { .. }));
        let message = err.to_string();
        assert!(message.starts_with("all the input array dimensions"));
        assert!(message.contains("for the concatenation axis must match exactly"));
    }
}

#[test]
fn datetime_and_category_box_to_object() {
    let day = Timestamp::from_ymd(2010, 1, 1, TimeUnit::Second).expect("valid date");
    let datetimes = TypedArray::datetime(vec![day.value], DatetimeDtype::naive(TimeUnit::Second));
    let labels = TypedArray::categorical_from_labels(&["a", "b"]);

    let out = concat(&[datetimes, labels], 0).expect("concat");

    let expected = TypedArray::object(vec![
        Scalar::Timestamp(day),
        Scalar::utf8("a"),
        Scalar::utf8("b"),
    ]);
    compare_arrays(&out.array, &expected).expect("boxed values");
    assert_eq!(out.array.get_flat(0).map(|v| v.to_string()).as_deref(), Some("2010-01-01 00:00:00"));
    assert!(out.diagnostics.is_empty());
}
