//! Crash recovery testing.
//!
//! The harness runs a workload once to measure how many write units it
//! spends, then runs it again on a fresh copy of the same files once per
//! possible crash point. After each crash the files are reopened on plain
//! backends, which runs recovery, and the recovered database is checked.
//!
//! ## Usage
//!
//! ```rust
//! use arbor_testkit::crash::CrashRecoveryHarness;
//! use arbor_testkit::scenarios;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! harness
//!     .check_atomicity(
//!         "create social graph",
//!         |_| Ok(()),
//!         |db| scenarios::social_graph(db, 2).map(|_| ()),
//!     )
//!     .unwrap();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use crate::disk::{CrashMode, CrashSwitch, MemoryFiles};
use crate::fixtures::StateDigest;
use arbor_core::{Config, CoreResult, Database};
use std::cell::Cell;

/// Where a workload was cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashPoint {
    /// Write units the workload spent before the crash.
    pub units: u64,
    /// Whether the crash fired. `false` for the run that completed.
    pub crashed: bool,
}

/// Result of recovering from one crash point.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether recovery produced an acceptable state.
    pub passed: bool,
    /// Description of the workload.
    pub description: String,
    /// The crash point.
    pub point: CrashPoint,
    /// Why the check failed.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, point: CrashPoint) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            point,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, point: CrashPoint, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            point,
            error: Some(error.to_string()),
        }
    }
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Test harness for crash recovery scenarios.
#[derive(Debug)]
pub struct CrashRecoveryHarness {
    config: Config,
    stride: u64,
    mode: CrashMode,
    /// Results of crash recovery runs.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a harness using the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a harness that opens every database with `config`.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            stride: 1,
            mode: CrashMode::KeepWrites,
            results: Vec::new(),
        }
    }

    /// Visits only every `stride`-th crash point, plus the completed run.
    #[must_use]
    pub fn with_stride(mut self, stride: u64) -> Self {
        self.stride = stride.max(1);
        self
    }

    /// Sets what each crash does to unsynced writes.
    #[must_use]
    pub fn with_crash_mode(mut self, mode: CrashMode) -> Self {
        self.mode = mode;
        self
    }

    /// Crashes `workload` at every write unit it spends and runs `check`
    /// on each recovered database. Returns the number of crash points
    /// visited.
    ///
    /// `setup` runs first, on plain files; its writes are never cut.
    /// Errors the workload hits after the crash are ignored, since a dead
    /// disk is expected to fail.
    ///
    /// # Errors
    ///
    /// Returns an error if `setup` fails or if the workload fails on a
    /// disk that never crashes.
    pub fn run<S, W, C>(
        &mut self,
        description: &str,
        setup: S,
        workload: W,
        check: C,
    ) -> CoreResult<u64>
    where
        S: FnOnce(&Database) -> CoreResult<()>,
        W: Fn(&Database) -> CoreResult<()>,
        C: Fn(&Database, CrashPoint) -> Result<(), String>,
    {
        let base = MemoryFiles::new();
        {
            let db = base.open(self.config.clone())?;
            setup(&db)?;
        }
        self.run_from(&base, description, workload, check)
    }

    /// Checks that `workload` is atomic under crashes: every recovered
    /// database holds either the state before it or the state after it,
    /// and once a crash point recovers the state after, every later one
    /// does too.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub fn check_atomicity<S, W>(
        &mut self,
        description: &str,
        setup: S,
        workload: W,
    ) -> CoreResult<u64>
    where
        S: FnOnce(&Database) -> CoreResult<()>,
        W: Fn(&Database) -> CoreResult<()>,
    {
        self.check_outcomes(description, setup, workload, true)
    }

    /// Checks that `workload` never changes what the database holds, at
    /// any crash point. Suited to checkpoints.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub fn check_invisible<S, W>(
        &mut self,
        description: &str,
        setup: S,
        workload: W,
    ) -> CoreResult<u64>
    where
        S: FnOnce(&Database) -> CoreResult<()>,
        W: Fn(&Database) -> CoreResult<()>,
    {
        self.check_outcomes(description, setup, workload, false)
    }

    fn check_outcomes<S, W>(
        &mut self,
        description: &str,
        setup: S,
        workload: W,
        may_change: bool,
    ) -> CoreResult<u64>
    where
        S: FnOnce(&Database) -> CoreResult<()>,
        W: Fn(&Database) -> CoreResult<()>,
    {
        let base = MemoryFiles::new();
        let before = {
            let db = base.open(self.config.clone())?;
            setup(&db)?;
            StateDigest::of_database(&db)?
        };
        let after = if may_change {
            let db = base.deep_copy().open(self.config.clone())?;
            workload(&db)?;
            StateDigest::of_database(&db)?
        } else {
            before.clone()
        };

        let reached_after = Cell::new(false);
        let check = |db: &Database, point: CrashPoint| -> Result<(), String> {
            let digest = StateDigest::of_database(db).map_err(|e| e.to_string())?;
            if digest == after {
                reached_after.set(true);
                Ok(())
            } else if digest != before {
                Err(format!("recovered an unexpected state: {digest:?}"))
            } else if !point.crashed {
                Err("workload completed but its effects are missing".to_string())
            } else if reached_after.get() {
                Err("an earlier crash point already recovered the new state".to_string())
            } else {
                Ok(())
            }
        };
        self.run_from(&base, description, workload, check)
    }

    fn run_from<W, C>(
        &mut self,
        base: &MemoryFiles,
        description: &str,
        workload: W,
        check: C,
    ) -> CoreResult<u64>
    where
        W: Fn(&Database) -> CoreResult<()>,
        C: Fn(&Database, CrashPoint) -> Result<(), String>,
    {
        // Recovery's own writes happen before the count starts.
        let total = {
            let files = base.deep_copy();
            let switch = CrashSwitch::with_mode(self.mode);
            let db = files.open_crashable(self.config.clone(), &switch)?;
            let start = switch.spent();
            workload(&db)?;
            drop(db);
            switch.spent() - start
        };

        let mut points: Vec<u64> = (0..total).step_by(self.stride as usize).collect();
        points.push(total);
        for &units in &points {
            let files = base.deep_copy();
            let switch = CrashSwitch::with_mode(self.mode);
            let outcome = files
                .open_crashable(self.config.clone(), &switch)
                .and_then(|db| {
                    switch.arm(units);
                    let _ = workload(&db);
                    drop(db);
                    files.open(self.config.clone())
                });
            let point = CrashPoint {
                units,
                crashed: switch.has_crashed(),
            };
            let result = match outcome {
                Ok(db) => match check(&db, point) {
                    Ok(()) => CrashRecoveryResult::pass(description, point),
                    Err(error) => CrashRecoveryResult::fail(description, point, &error),
                },
                Err(e) => {
                    CrashRecoveryResult::fail(description, point, &format!("recovery failed: {e}"))
                }
            };
            self.results.push(result);
        }
        Ok(points.len() as u64)
    }

    /// Returns all results.
    pub fn results(&self) -> &[CrashRecoveryResult] {
        &self.results
    }

    /// Returns whether every crash point recovered acceptably.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// Returns a summary of the results, listing each failure.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let mut summary = format!(
            "Crash Recovery Tests: {}/{} passed\n",
            passed,
            self.results.len()
        );
        for result in self.results.iter().filter(|r| !r.passed) {
            summary.push_str(&format!(
                "  FAIL {} at {} units: {}\n",
                result.description,
                result.point.units,
                result.error.as_deref().unwrap_or("unknown error"),
            ));
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::scenarios;
    use arbor_core::Value;

    #[test]
    fn create_is_atomic_at_every_byte() {
        let mut harness = CrashRecoveryHarness::new();
        let points = harness
            .check_atomicity(
                "create social graph",
                |_| Ok(()),
                |db| scenarios::social_graph(db, 3).map(|_| ()),
            )
            .unwrap();
        assert!(points > 1);
        assert!(harness.all_passed(), "{}", harness.summary());
    }

    #[test]
    fn completed_run_is_not_a_crash() {
        let mut harness = CrashRecoveryHarness::new();
        harness
            .run(
                "insert",
                |db| scenarios::social_graph(db, 1).map(|_| ()),
                |db| {
                    db.transaction(|txn| {
                        let person = txn.table_id("person")?;
                        txn.insert_nodes(person, &[scenarios::person(5)]).map(|_| ())
                    })
                },
                |_, _| Ok(()),
            )
            .unwrap();
        let last = harness.results().last().unwrap();
        assert!(!last.point.crashed);
        assert!(harness.results()[0].point.crashed);
    }

    #[test]
    fn check_failures_are_reported() {
        let mut harness = CrashRecoveryHarness::new().with_stride(1000);
        harness
            .run(
                "always fails",
                |_| Ok(()),
                |db| scenarios::social_graph(db, 1).map(|_| ()),
                |_, _| Err("nope".to_string()),
            )
            .unwrap();
        assert!(!harness.all_passed());
        assert!(harness.summary().contains("FAIL always fails"));
    }

    #[test]
    fn update_is_atomic_at_every_byte() {
        let mut harness = CrashRecoveryHarness::new();
        harness
            .check_atomicity(
                "update age",
                |db| scenarios::social_graph(db, 2).map(|_| ()),
                |db| {
                    db.transaction(|txn| {
                        let person = txn.table_id("person")?;
                        txn.update(person, arbor_core::ColumnId::new(2), 1, Value::Int64(99))
                            .map(|_| ())
                    })
                },
            )
            .unwrap();
        assert!(harness.all_passed(), "{}", harness.summary());
    }
}
