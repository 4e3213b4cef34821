#![forbid(unsafe_code)]

//! Property suites for the concat resolver.
//!
//! Strategies produce row-major grids with arbitrary split points, mixed
//! numeric dtypes and categorical label sets; properties check invariants
//! that must hold for every such input, not just the pinned fixtures.

use proptest::prelude::*;

use fp_columnar::{ArrayData, TypedArray};
use fp_concat::{ConcatOptions, concat, concat_with};
use fp_conformance::compare_arrays;
use fp_runtime::{ConcatPolicy, WarningKind};
use fp_types::{CategoricalDtype, DType, DatetimeDtype, NullKind, Scalar, TimeUnit};

// ---------------------------------------------------------------------------
// Strategy generators
// ---------------------------------------------------------------------------

/// An int64 grid of `rows x cols` with arbitrary values.
fn arb_grid() -> impl Strategy<Value = TypedArray> {
    (1usize..6, 1usize..6).prop_flat_map(|(rows, cols)| {
        proptest::collection::vec(-1_000i64..1_000, rows * cols).prop_map(move |values| {
            TypedArray::int64(values)
                .reshape(vec![rows, cols])
                .expect("values fill the grid")
        })
    })
}

/// A grid plus an axis and a split point on that axis (either half may be empty).
fn arb_split() -> impl Strategy<Value = (TypedArray, usize, usize)> {
    (arb_grid(), 0usize..2).prop_flat_map(|(grid, axis)| {
        let len = grid.shape()[axis];
        (Just(grid), Just(axis), 0..=len)
    })
}

/// A flat numeric array whose dtype is one of int32, int64 or float64.
fn arb_numeric_array() -> impl Strategy<Value = TypedArray> {
    let values = proptest::collection::vec(-10_000i32..10_000, 1..8);
    (0u8..3, values).prop_map(|(tag, values)| match tag {
        0 => TypedArray::new(DType::Int32, vec![values.len()], ArrayData::Int32(values))
            .expect("int32 storage"),
        1 => TypedArray::int64(values.into_iter().map(i64::from).collect()),
        _ => TypedArray::float64(values.into_iter().map(f64::from).collect()),
    })
}

fn arb_labels() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-e]", 1..10)
}

// ---------------------------------------------------------------------------
// Property: shape arithmetic and split/rejoin identity
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// The concat axis length is the sum of input lengths; others are kept.
    #[test]
    fn prop_axis_length_is_sum((grid, axis, at) in arb_split()) {
        let len = grid.shape()[axis];
        let head = grid.slice_axis(axis, 0..at).expect("head");
        let tail = grid.slice_axis(axis, at..len).expect("tail");
        let axis_arg = isize::try_from(axis).expect("small axis");

        let out = concat(&[head.clone(), tail.clone(), head.clone()], axis_arg).expect("concat");
        let shape = out.array.shape();
        prop_assert_eq!(shape[axis], len + at);
        for dim in 0..grid.rank() {
            if dim != axis {
                prop_assert_eq!(shape[dim], grid.shape()[dim]);
            }
        }
    }

    /// Splitting anywhere and rejoining on the same axis is the identity,
    /// and same-dtype empty halves never warn.
    #[test]
    fn prop_split_rejoin_is_identity((grid, axis, at) in arb_split()) {
        let len = grid.shape()[axis];
        let head = grid.slice_axis(axis, 0..at).expect("head");
        let tail = grid.slice_axis(axis, at..len).expect("tail");
        let axis_arg = isize::try_from(axis).expect("small axis");

        let out = concat(&[head, tail], axis_arg).expect("concat");
        prop_assert_eq!(&out.array, &grid);
        prop_assert!(out.diagnostics.is_empty());
    }

    /// Rejoining on the other axis fails unless the halves happen to agree.
    #[test]
    fn prop_wrong_axis_needs_matching_dims((grid, axis, at) in arb_split()) {
        let len = grid.shape()[axis];
        let head = grid.slice_axis(axis, 0..at).expect("head");
        let tail = grid.slice_axis(axis, at..len).expect("tail");
        let other = isize::try_from(1 - axis).expect("small axis");

        let result = concat(&[head, tail], other);
        prop_assert_eq!(result.is_ok(), at * 2 == len);
    }
}

// ---------------------------------------------------------------------------
// Property: legacy empty-entry handling for categoricals
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A populated categorical joined with an empty one holding disjoint
    /// categories keeps the populated dtype and warns exactly once.
    #[test]
    fn prop_categorical_with_empty_warns_once(
        labels in arb_labels(),
        empty_categories in proptest::collection::vec("[f-h]", 0..4),
    ) {
        let populated = TypedArray::categorical_from_labels(&labels);
        let empty_dtype = DType::Categorical(CategoricalDtype::unordered(empty_categories));
        let empty = TypedArray::empty(empty_dtype.clone());

        let out = concat(&[populated.clone(), empty], 0).expect("concat");

        let (DType::Categorical(left), DType::Categorical(right)) =
            (populated.dtype(), &empty_dtype)
        else {
            unreachable!("both inputs are categorical");
        };
        let union = DType::Categorical(left.union(right));
        let inclusive = concat_with(
            &[populated.clone(), TypedArray::empty(empty_dtype)],
            &ConcatOptions::default().with_policy(ConcatPolicy::future()),
        )
        .expect("future policy");
        prop_assert_eq!(inclusive.array.dtype(), &union);

        compare_arrays(&out.array, &populated).map_err(TestCaseError::fail)?;
        prop_assert_eq!(out.diagnostics.len(), 1);
        prop_assert_eq!(
            out.diagnostics.count(WarningKind::DeprecatedMixedCategoricalEmpty),
            1
        );
    }
}

// ---------------------------------------------------------------------------
// Property: single input copy semantics
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// copy=true detaches the result; copy=false aliases until first write.
    #[test]
    fn prop_single_input_copy_semantics(ticks in proptest::collection::vec(0i64..4_000_000_000, 1..6)) {
        let input = TypedArray::datetime(ticks, DatetimeDtype::with_tz(TimeUnit::Second, "UTC"));

        let copied = concat_with(
            std::slice::from_ref(&input),
            &ConcatOptions::default().with_copy(true),
        )
        .expect("copy")
        .into_array();
        let aliased = concat_with(std::slice::from_ref(&input), &ConcatOptions::default())
            .expect("alias")
            .into_array();

        prop_assert_eq!(&copied, &input);
        prop_assert_eq!(&aliased, &input);
        prop_assert!(!copied.shares_buffer(&input));
        prop_assert!(aliased.shares_buffer(&input));

        let mut written = aliased;
        written.set_flat(0, &Scalar::Null(NullKind::NaT)).expect("write");
        prop_assert!(!written.shares_buffer(&input));
        prop_assert_ne!(written.get_flat(0), input.get_flat(0));
    }
}

// ---------------------------------------------------------------------------
// Property: associativity
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// concat([concat([a, b]), c]) == concat([a, b, c]).
    #[test]
    fn prop_concat_is_associative(
        a in arb_numeric_array(),
        b in arb_numeric_array(),
        c in arb_numeric_array(),
    ) {
        let nested = concat(&[a.clone(), b.clone()], 0).expect("inner").into_array();
        let left = concat(&[nested, c.clone()], 0).expect("outer").into_array();
        let flat = concat(&[a, b, c], 0).expect("flat").into_array();

        compare_arrays(&left, &flat).map_err(TestCaseError::fail)?;
    }
}
