//! Testing utilities for remote resource implementations.
//!
//! [`ResourceTester`] drives a [`RemoteResource`] through its lifecycle the
//! way a host would, checking each transition, so a provider can test its
//! API glue against a fake server without a host process.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_reconcile::testing::{assert_identifier_preserved, ResourceTester};
//!
//! #[tokio::test]
//! async fn test_vlan_lifecycle() {
//!     let tester = ResourceTester::new(Vlan::new(fake_api()));
//!
//!     let state = tester.lifecycle_create(&planned_vlan()).await.unwrap();
//!     assert_identifier_preserved(&planned_vlan(), &state, "network_id");
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::driver::{DriverOptions, Lifecycle, Operation, RemoteResource, ResourceDriver};
use crate::error::Result;
use crate::identity::is_empty_identifier;
use crate::schema::{Diagnostic, Schema};
use crate::types::MergeOutcome;
use crate::value::Record;

/// A test harness around a [`ResourceDriver`] that tracks the lifecycle
/// state and rejects illegal operation orders.
pub struct ResourceTester<R: RemoteResource> {
    driver: ResourceDriver<R>,
    lifecycle: Mutex<Lifecycle>,
}

impl<R: RemoteResource> ResourceTester<R> {
    /// Create a tester with default driver options.
    pub fn new(resource: R) -> Self {
        Self::with_options(resource, DriverOptions::default())
    }

    /// Create a tester with the given driver options.
    pub fn with_options(resource: R, options: DriverOptions) -> Self {
        Self {
            driver: ResourceDriver::with_options(resource, options),
            lifecycle: Mutex::new(Lifecycle::Unconfigured),
        }
    }

    /// The underlying driver.
    pub fn driver(&self) -> &ResourceDriver<R> {
        &self.driver
    }

    /// The resource under test.
    pub fn resource(&self) -> &R {
        self.driver.resource()
    }

    /// The resource's schema.
    pub fn schema(&self) -> Schema {
        self.driver.resource().schema()
    }

    /// The current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        *self.state()
    }

    // A panicking assertion poisons the lock; the state it guards stays valid.
    fn state(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, operation: Operation) -> Result<()> {
        let mut state = self.state();
        *state = state.apply(operation)?;
        Ok(())
    }

    fn check_allowed(&self, operation: Operation) -> Result<()> {
        self.lifecycle().apply(operation).map(|_| ())
    }

    // Single operations

    /// Create the entity.
    pub async fn create(&self, planned: &Record) -> Result<MergeOutcome> {
        self.check_allowed(Operation::Create)?;
        let outcome = self.driver.create(planned).await?;
        self.transition(Operation::Create)?;
        Ok(outcome)
    }

    /// Read the entity.
    pub async fn read(&self, state: &Record) -> Result<MergeOutcome> {
        self.check_allowed(Operation::Read)?;
        let outcome = self.driver.read(state).await?;
        self.transition(Operation::Read)?;
        Ok(outcome)
    }

    /// Update the entity.
    pub async fn update(&self, prior: &Record, planned: &Record) -> Result<MergeOutcome> {
        self.check_allowed(Operation::Update)?;
        let outcome = self.driver.update(prior, planned).await?;
        self.transition(Operation::Update)?;
        Ok(outcome)
    }

    /// Delete the entity.
    pub async fn delete(&self, state: &Record) -> Result<()> {
        self.check_allowed(Operation::Delete)?;
        self.driver.delete(state).await?;
        self.transition(Operation::Delete)
    }

    // Lifecycle helpers

    /// Create, then read back.
    ///
    /// Returns the state after the read.
    pub async fn lifecycle_create(&self, planned: &Record) -> Result<Record> {
        let created = self.create(planned).await?;
        assert_no_unknowns(&created.record);

        let refreshed = self.read(&created.record).await?;
        Ok(refreshed.record)
    }

    /// Update, then read back.
    ///
    /// Returns the state after the read.
    pub async fn lifecycle_update(&self, prior: &Record, planned: &Record) -> Result<Record> {
        let updated = self.update(prior, planned).await?;
        assert_no_unknowns(&updated.record);

        let refreshed = self.read(&updated.record).await?;
        Ok(refreshed.record)
    }

    /// Create, read, update, read, delete.
    ///
    /// `update` derives the updated plan from the state after the first read.
    /// Returns the state after the update (before delete).
    pub async fn lifecycle_crud<F>(&self, planned: &Record, update: F) -> Result<Record>
    where
        F: FnOnce(&Record) -> Record,
    {
        let created = self.lifecycle_create(planned).await?;
        let updated_plan = update(&created);
        let updated = self.lifecycle_update(&created, &updated_plan).await?;
        self.delete(&updated).await?;
        Ok(updated)
    }
}

// Assertion helpers

/// Assert that a record holds no unknown value.
///
/// # Panics
///
/// Panics with the path of the first unknown value.
pub fn assert_no_unknowns(record: &Record) {
    if let Some(path) = record.unknown_path("") {
        panic!("Expected no unknown values, but '{}' is unknown", path);
    }
}

/// Assert that a known, non-empty identifier in `desired` survived into
/// `merged` unchanged.
///
/// # Panics
///
/// Panics if `desired` holds no usable identifier, or `merged` lost it.
pub fn assert_identifier_preserved(desired: &Record, merged: &Record, name: &str) {
    let expected = desired.get(name);
    assert!(
        !expected.is_unknown() && !is_empty_identifier(expected),
        "Expected '{}' to be set in the desired record, got {:?}",
        name,
        expected
    );
    assert_eq!(
        merged.get(name),
        expected,
        "Identifier '{}' was not preserved",
        name
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| d.is_error() && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::tests::{planned_network, MockNetworks};
    use crate::error::ReconcileError;
    use crate::types::MergeMode;
    use crate::value::Value;

    #[tokio::test]
    async fn test_lifecycle_create() {
        let tester = ResourceTester::new(MockNetworks::new());
        let planned = planned_network("guest");

        let state = tester.lifecycle_create(&planned).await.unwrap();
        assert_identifier_preserved(&planned, &state, "organization_id");
        assert_eq!(state.get("id"), &Value::from("N_1"));
        assert_eq!(state.get("rules"), planned.get("rules"));
        assert_eq!(tester.lifecycle(), Lifecycle::Reconciled(MergeMode::Read));
    }

    #[tokio::test]
    async fn test_lifecycle_crud() {
        let tester = ResourceTester::new(MockNetworks::new().with_empty_create_body());

        let updated = tester
            .lifecycle_crud(&planned_network("guest"), |state| {
                state.clone().with("name", "guest-renamed").with("vlan", 30i64)
            })
            .await
            .unwrap();

        assert_eq!(updated.get("name"), &Value::from("guest-renamed"));
        assert_eq!(updated.get("vlan"), &Value::Int64(30));
        assert_eq!(updated.get("organization_id"), &Value::from("o-1"));
        assert_eq!(tester.lifecycle(), Lifecycle::Unconfigured);
        assert_eq!(tester.resource().stored(), 0);
    }

    #[tokio::test]
    async fn test_operations_out_of_order() {
        let tester = ResourceTester::new(MockNetworks::new());

        let err = tester.read(&planned_network("guest")).await.unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidTransition { .. }));

        tester.create(&planned_network("guest")).await.unwrap();
        let err = tester.create(&planned_network("guest")).await.unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidTransition { operation: "create", .. }));
        assert_eq!(tester.resource().stored(), 1);
    }

    #[tokio::test]
    async fn test_failed_operation_keeps_state() {
        let tester = ResourceTester::new(MockNetworks::new());
        let created = tester.create(&planned_network("guest")).await.unwrap().record;

        let missing = created.clone().with("id", "N_404");
        assert!(tester.delete(&missing).await.is_err());
        assert_eq!(tester.lifecycle(), Lifecycle::Reconciled(MergeMode::Write));
    }

    #[test]
    fn test_validation_errors_as_diagnostics() {
        let tester = ResourceTester::new(MockNetworks::new());
        let planned = planned_network("guest").with("name", Value::Null);

        let err = tokio_test::block_on(tester.create(&planned)).unwrap_err();
        let diagnostics = err.into_diagnostics();
        assert_error_contains(&diagnostics, "Missing required attribute 'name'");
        assert_eq!(tester.lifecycle(), Lifecycle::Unconfigured);
    }

    #[test]
    fn test_lifecycle_survives_poisoned_lock() {
        let tester = ResourceTester::new(MockNetworks::new());
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = tester.lifecycle.lock().unwrap();
            panic!("assertion failed while holding the lock");
        }));
        assert!(tester.lifecycle.is_poisoned());

        tokio_test::block_on(tester.create(&planned_network("guest"))).unwrap();
        assert_eq!(tester.lifecycle(), Lifecycle::Reconciled(MergeMode::Write));
    }

    #[test]
    fn test_assert_no_unknowns() {
        assert_no_unknowns(&Record::new().with("name", "a"));
    }

    #[test]
    #[should_panic(expected = "'rules.0.port' is unknown")]
    fn test_assert_no_unknowns_fails() {
        let record = Record::new().with(
            "rules",
            Value::List(vec![Record::new().with("port", Value::Unknown).into()]),
        );
        assert_no_unknowns(&record);
    }

    #[test]
    #[should_panic(expected = "was not preserved")]
    fn test_assert_identifier_preserved_fails() {
        let desired = Record::new().with("serial", "Q2-1");
        assert_identifier_preserved(&desired, &Record::new(), "serial");
    }

    #[test]
    fn test_assert_no_errors() {
        assert_no_errors(&[]);
        assert_no_errors(&[Diagnostic::warning("Just a warning")]);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        assert_no_errors(&[Diagnostic::error("An error")]);
    }

    #[test]
    fn test_assert_error_contains() {
        let diagnostics = vec![Diagnostic::error("Invalid type for attribute 'vlan'")];
        assert_error_contains(&diagnostics, "vlan");
    }
}
