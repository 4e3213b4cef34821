#![forbid(unsafe_code)]

//! Fixture-driven parity harness for the concatenation resolver.
//!
//! Each JSON packet under `fixtures/packets/` pins one pandas
//! `concat_compat` scenario: the input arrays, the call options, and either
//! the expected array (with its warnings) or the expected error class.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use fp_columnar::TypedArray;
use fp_concat::{ConcatError, ConcatOptions, Concatenated, ErrorClass, concat_with};
use fp_runtime::WarningKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
        }
    }

    #[must_use]
    pub fn packet_fixture_root(&self) -> PathBuf {
        self.fixture_root.join("packets")
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcatFixture {
    pub packet_id: String,
    pub case_id: String,
    #[serde(default)]
    pub description: String,
    pub inputs: Vec<TypedArray>,
    #[serde(default)]
    pub options: ConcatOptions,
    pub expected: FixtureExpectation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FixtureExpectation {
    Array {
        array: TypedArray,
        #[serde(default)]
        warnings: Vec<WarningKind>,
        /// When set, whether the result must alias the first input's buffer.
        #[serde(default)]
        shares_input_buffer: Option<bool>,
    },
    Error {
        class: ErrorClass,
        message_contains: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    pub packet_id: String,
    pub case_id: String,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
    pub replay_cmd: String,
    pub elapsed_us: u64,
    pub diagnostics: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketParityReport {
    pub suite: String,
    pub packet_id: Option<String>,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl PacketParityReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }

    #[must_use]
    pub fn failures(&self) -> Vec<&CaseResult> {
        self.results
            .iter()
            .filter(|r| r.status == CaseStatus::Fail)
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("fixture {path} is malformed: {source}")]
    Fixture {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub fn run_packet_suite(config: &HarnessConfig) -> Result<PacketParityReport, HarnessError> {
    let fixtures = load_fixtures(config, None)?;
    Ok(build_report("concat_packets".to_owned(), None, &fixtures))
}

pub fn run_packet_by_id(
    config: &HarnessConfig,
    packet_id: &str,
) -> Result<PacketParityReport, HarnessError> {
    let fixtures = load_fixtures(config, Some(packet_id))?;
    Ok(build_report(
        format!("concat_packets:{packet_id}"),
        Some(packet_id.to_owned()),
        &fixtures,
    ))
}

#[must_use]
pub fn run_fixture(fixture: &ConcatFixture) -> CaseResult {
    let started = Instant::now();
    let outcome = concat_with(&fixture.inputs, &fixture.options);
    let diagnostics = outcome
        .as_ref()
        .map_or(0, |out| out.diagnostics.len());
    let mismatch = compare_outcome(fixture, outcome).err();
    let elapsed_us = u64::try_from(started.elapsed().as_micros())
        .unwrap_or(u64::MAX)
        .max(1);

    CaseResult {
        packet_id: fixture.packet_id.clone(),
        case_id: fixture.case_id.clone(),
        status: if mismatch.is_none() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        },
        mismatch,
        replay_cmd: format!("cargo test -p fp-conformance -- {} --nocapture", fixture.case_id),
        elapsed_us,
        diagnostics,
    }
}

fn compare_outcome(
    fixture: &ConcatFixture,
    outcome: Result<Concatenated, ConcatError>,
) -> Result<(), String> {
    match (&fixture.expected, outcome) {
        (
            FixtureExpectation::Array {
                array,
                warnings,
                shares_input_buffer,
            },
            Ok(actual),
        ) => {
            compare_arrays(&actual.array, array)?;
            let kinds: Vec<WarningKind> = actual
                .diagnostics
                .records()
                .iter()
                .map(|w| w.kind)
                .collect();
            if &kinds != warnings {
                return Err(format!("warnings mismatch: actual={kinds:?}, expected={warnings:?}"));
            }
            if let (Some(expected), Some(first)) = (shares_input_buffer, fixture.inputs.first()) {
                let shares = actual.array.shares_buffer(first);
                if shares != *expected {
                    return Err(format!(
                        "buffer aliasing mismatch: actual={shares}, expected={expected}"
                    ));
                }
            }
            Ok(())
        }
        (
            FixtureExpectation::Error {
                class,
                message_contains,
            },
            Err(err),
        ) => {
            if err.class() != *class {
                return Err(format!(
                    "error class mismatch: actual={:?}, expected={class:?} ({err})",
                    err.class()
                ));
            }
            let message = err.to_string();
            if !message.contains(message_contains.as_str()) {
                return Err(format!(
                    "error message {message:?} does not contain {message_contains:?}"
                ));
            }
            Ok(())
        }
        (FixtureExpectation::Array { .. }, Err(err)) => {
            Err(format!("expected an array but concat failed: {err}"))
        }
        (FixtureExpectation::Error { class, .. }, Ok(actual)) => Err(format!(
            "expected a {class:?} error but concat produced dtype {}",
            actual.array.dtype()
        )),
    }
}

/// Dtype and shape must match exactly; values compare NaN-aware.
pub fn compare_arrays(actual: &TypedArray, expected: &TypedArray) -> Result<(), String> {
    if actual.dtype() != expected.dtype() {
        return Err(format!(
            "dtype mismatch: actual={}, expected={}",
            actual.dtype(),
            expected.dtype()
        ));
    }
    if actual.shape() != expected.shape() {
        return Err(format!(
            "shape mismatch: actual={:?}, expected={:?}",
            actual.shape(),
            expected.shape()
        ));
    }
    let actual_values = actual.to_scalars();
    let expected_values = expected.to_scalars();
    for (idx, (a, e)) in actual_values.iter().zip(&expected_values).enumerate() {
        if !a.semantic_eq(e) {
            return Err(format!("value mismatch at offset {idx}: actual={a}, expected={e}"));
        }
    }
    Ok(())
}

fn build_report(
    suite: String,
    packet_id: Option<String>,
    fixtures: &[ConcatFixture],
) -> PacketParityReport {
    let results: Vec<CaseResult> = fixtures.iter().map(run_fixture).collect();
    let failed = results
        .iter()
        .filter(|result| result.status == CaseStatus::Fail)
        .count();
    let passed = results.len().saturating_sub(failed);

    PacketParityReport {
        suite,
        packet_id,
        fixture_count: results.len(),
        passed,
        failed,
        results,
    }
}

pub fn load_fixtures(
    config: &HarnessConfig,
    packet_filter: Option<&str>,
) -> Result<Vec<ConcatFixture>, HarnessError> {
    let fixture_files = list_fixture_files(&config.packet_fixture_root())?;
    let mut fixtures = Vec::with_capacity(fixture_files.len());

    for fixture_path in fixture_files {
        let fixture = load_fixture(&fixture_path)?;
        if packet_filter.is_none_or(|packet| fixture.packet_id == packet) {
            fixtures.push(fixture);
        }
    }
    fixtures.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(fixtures)
}

fn load_fixture(path: &Path) -> Result<ConcatFixture, HarnessError> {
    let body = fs::read_to_string(path)?;
    serde_json::from_str(&body).map_err(|source| HarnessError::Fixture {
        path: path.to_path_buf(),
        source,
    })
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
