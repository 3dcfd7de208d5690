//! Driving a remote resource through its lifecycle.
//!
//! [`RemoteResource`] is the seam to a provider's API client: it knows how to
//! call the remote endpoints and nothing about state. [`ResourceDriver`] wraps
//! one and turns each call's response into the record to persist:
//!
//! - **create**: validate the plan, call the remote, locate the new entity if
//!   the response is empty or incomplete, then run the write-path merge.
//! - **read**: pick the most specific read method from the parameters the
//!   prior state holds, call it, then run the read-path merge.
//! - **update**: validate the plan, call the remote, then run the write-path
//!   merge.
//! - **delete**: call the remote.
//!
//! Every operation runs in its own tracing span.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::error::{ReconcileError, Result};
use crate::identity::is_empty_identifier;
use crate::locator::locator_for;
use crate::reconcile::{ReconcileOptions, Reconciler};
use crate::schema::Schema;
use crate::selector::{pick_candidate, Candidate};
use crate::types::{changes_between, MergeMode, MergeOutcome};
use crate::validation::validate_result;
use crate::value::Record;

/// A remote resource type, as seen through its API client.
///
/// Implementations return raw responses converted to [`Record`]s; they should
/// not try to patch up missing fields themselves.
///
/// # Example
///
/// ```ignore
/// use hemmer_reconcile::driver::RemoteResource;
/// use hemmer_reconcile::{Record, Result, Schema};
///
/// struct Vlan { client: ApiClient }
///
/// #[async_trait::async_trait]
/// impl RemoteResource for Vlan {
///     fn type_name(&self) -> &str { "network_vlan" }
///     fn schema(&self) -> Schema { vlan_schema() }
///
///     async fn create(&self, planned: &Record) -> Result<Option<Record>> {
///         let body = self.client.post_vlan(planned.to_json()?).await?;
///         Ok(body.map(Record::from_json).transpose()?)
///     }
///
///     // ... read, update, delete
/// }
/// ```
#[async_trait::async_trait]
pub trait RemoteResource: Send + Sync + 'static {
    /// Resource type name, used in logs.
    fn type_name(&self) -> &str;

    /// The schema of this resource.
    fn schema(&self) -> Schema;

    /// Parameter names of each read method, in order of preference.
    ///
    /// `read` is called with the 1-based index of the chosen method. The
    /// default is a single method taking no parameters.
    fn read_methods(&self) -> Vec<Vec<String>> {
        vec![Vec::new()]
    }

    /// Field used to find a created entity in [`RemoteResource::list`] when
    /// the create response does not identify it.
    fn natural_key(&self) -> Option<&str> {
        None
    }

    /// Create the entity. `Ok(None)` means the response had no body.
    async fn create(&self, planned: &Record) -> Result<Option<Record>>;

    /// Read the entity with the given read method.
    async fn read(&self, method: usize, state: &Record) -> Result<Record>;

    /// Update the entity.
    async fn update(&self, prior: &Record, planned: &Record) -> Result<Record>;

    /// Delete the entity.
    async fn delete(&self, state: &Record) -> Result<()>;

    /// List the entities the planned one would be created among.
    async fn list(&self, _planned: &Record) -> Result<Vec<Record>> {
        Ok(Vec::new())
    }
}

/// Options for a [`ResourceDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    /// Limit on each remote call. Default: none.
    pub call_timeout: Option<Duration>,
    /// Validate planned records before create and update. Default: true.
    pub validate_plans: bool,
    /// Options passed to the reconciler.
    pub reconcile: ReconcileOptions,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            call_timeout: None,
            validate_plans: true,
            reconcile: ReconcileOptions::default(),
        }
    }
}

impl DriverOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit how long each remote call may take.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Set whether plans are validated before they are sent.
    pub fn with_validate_plans(mut self, validate: bool) -> Self {
        self.validate_plans = validate;
        self
    }

    /// Set the reconciler options.
    pub fn with_reconcile_options(mut self, options: ReconcileOptions) -> Self {
        self.reconcile = options;
        self
    }
}

/// Runs the CRUD operations of a [`RemoteResource`] and reconciles each
/// response into the record to persist.
pub struct ResourceDriver<R: RemoteResource> {
    resource: R,
    reconciler: Reconciler,
    options: DriverOptions,
}

impl<R: RemoteResource> ResourceDriver<R> {
    /// Create a driver with default options.
    pub fn new(resource: R) -> Self {
        Self::with_options(resource, DriverOptions::default())
    }

    /// Create a driver with the given options.
    pub fn with_options(resource: R, options: DriverOptions) -> Self {
        let reconciler = Reconciler::new(&resource.schema()).with_options(options.reconcile);
        Self {
            resource,
            reconciler,
            options,
        }
    }

    /// The wrapped resource.
    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// The reconciler built from the resource's schema.
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// The options in effect.
    pub fn options(&self) -> DriverOptions {
        self.options
    }

    /// Create the entity and return the state to persist.
    #[instrument(
        skip(self, planned),
        name = "driver.create",
        fields(resource = %self.resource.type_name())
    )]
    pub async fn create(&self, planned: &Record) -> Result<MergeOutcome> {
        info!("Create called");
        self.check_plan(planned)?;

        let response = self
            .call(self.resource.create(planned))
            .await
            .inspect_err(|e| error!(error = %e, "Create failed"))?;

        let observed = match response {
            Some(body) if !self.is_incomplete(&body) => body,
            response => self.locate(planned, response).await?,
        };

        let outcome = self.reconcile(MergeMode::Write, planned, &observed)?;
        info!(anomalies = outcome.anomalies.len(), "Create completed successfully");
        Ok(outcome)
    }

    /// Read the entity and return the refreshed state.
    #[instrument(
        skip(self, state),
        name = "driver.read",
        fields(resource = %self.resource.type_name())
    )]
    pub async fn read(&self, state: &Record) -> Result<MergeOutcome> {
        let method = self.select_read_method(state);
        debug!(method, "Read called");

        let observed = self
            .call(self.resource.read(method, state))
            .await
            .inspect_err(|e| error!(method, error = %e, "Read failed"))?;

        let outcome = self.reconcile(MergeMode::Read, state, &observed)?;
        let drift = changes_between(state, &outcome.record);
        if !drift.is_empty() {
            info!(
                changes = drift.len(),
                paths = ?drift.iter().map(|c| c.path.as_str()).collect::<Vec<_>>(),
                "Remote state drifted"
            );
        }
        debug!("Read completed successfully");
        Ok(outcome)
    }

    /// Update the entity and return the state to persist.
    #[instrument(
        skip(self, prior, planned),
        name = "driver.update",
        fields(resource = %self.resource.type_name())
    )]
    pub async fn update(&self, prior: &Record, planned: &Record) -> Result<MergeOutcome> {
        info!("Update called");
        self.check_plan(planned)?;

        let observed = self
            .call(self.resource.update(prior, planned))
            .await
            .inspect_err(|e| error!(error = %e, "Update failed"))?;

        let outcome = self.reconcile(MergeMode::Write, planned, &observed)?;
        info!(anomalies = outcome.anomalies.len(), "Update completed successfully");
        Ok(outcome)
    }

    /// Delete the entity.
    #[instrument(
        skip(self, state),
        name = "driver.delete",
        fields(resource = %self.resource.type_name())
    )]
    pub async fn delete(&self, state: &Record) -> Result<()> {
        info!("Delete called");
        self.call(self.resource.delete(state))
            .await
            .inspect_err(|e| error!(error = %e, "Delete failed"))?;
        info!("Delete completed successfully");
        Ok(())
    }

    /// The 1-based read method best served by the parameters in `state`.
    pub fn select_read_method(&self, state: &Record) -> usize {
        let candidates: Vec<Candidate<usize>> = self
            .resource
            .read_methods()
            .iter()
            .enumerate()
            .map(|(i, params)| {
                let names: Vec<&str> = params.iter().map(String::as_str).collect();
                Candidate::from_record(i + 1, state, &names)
            })
            .collect();
        pick_candidate(&candidates).map_or(1, |c| c.label)
    }

    fn check_plan(&self, planned: &Record) -> Result<()> {
        if !self.options.validate_plans {
            return Ok(());
        }
        validate_result(self.reconciler.schema(), planned).map_err(|diagnostics| {
            warn!(diagnostics = diagnostics.len(), "Planned record failed validation");
            ReconcileError::Validation(diagnostics)
        })
    }

    /// A create response is incomplete when it lacks the generic remote id,
    /// or when the schema names none and the response is empty.
    fn is_incomplete(&self, response: &Record) -> bool {
        match self.reconciler.schema().block.generic_id.as_deref() {
            Some(id) => is_empty_identifier(response.get(id)),
            None => response.is_empty(),
        }
    }

    async fn locate(&self, planned: &Record, response: Option<Record>) -> Result<Record> {
        let locator = match self
            .resource
            .natural_key()
            .and_then(|key| locator_for(planned, key))
        {
            Some(locator) => locator,
            None => return Ok(response.unwrap_or_default()),
        };

        debug!(key = %locator.key(), "Create response incomplete, locating entity");
        let candidates = self.call(self.resource.list(planned)).await?;
        let found = locator.require(&candidates).inspect_err(|e| {
            error!(error = %e, "Created entity could not be located");
        })?;

        let mut observed = found.clone();
        for (name, value) in response.into_iter().flatten() {
            if !value.is_known_present() {
                continue;
            }
            // A blank identifier must not mask the one just located.
            if self.is_identifier(&name) && is_empty_identifier(&value) {
                continue;
            }
            observed.insert(name, value);
        }
        Ok(observed)
    }

    fn is_identifier(&self, name: &str) -> bool {
        let block = &self.reconciler.schema().block;
        block.generic_id.as_deref() == Some(name)
            || block.attributes.get(name).is_some_and(|attr| attr.flags.identifier)
    }

    fn reconcile(
        &self,
        mode: MergeMode,
        desired: &Record,
        observed: &Record,
    ) -> Result<MergeOutcome> {
        self.reconciler
            .reconcile(mode, desired, observed)
            .inspect_err(|e| error!(mode = mode.as_str(), error = %e, "Reconciliation failed"))
    }

    async fn call<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.options.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ReconcileError::Timeout(limit))?,
            None => call.await,
        }
    }
}

/// Where a resource is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// Not created, or deleted.
    #[default]
    Unconfigured,
    /// Persisted after a merge of the given kind.
    Reconciled(MergeMode),
}

/// A lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Create the entity.
    Create,
    /// Refresh the entity.
    Read,
    /// Update the entity.
    Update,
    /// Delete the entity.
    Delete,
}

impl Operation {
    /// Name of the operation for logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl Lifecycle {
    /// Name of the state for logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Unconfigured => "unconfigured",
            Lifecycle::Reconciled(_) => "reconciled",
        }
    }

    /// The state after `operation`, or an error if it is not allowed here.
    pub fn apply(self, operation: Operation) -> Result<Lifecycle> {
        match (self, operation) {
            (Lifecycle::Unconfigured, Operation::Create) => {
                Ok(Lifecycle::Reconciled(MergeMode::Write))
            },
            (Lifecycle::Reconciled(_), Operation::Read) => {
                Ok(Lifecycle::Reconciled(MergeMode::Read))
            },
            (Lifecycle::Reconciled(_), Operation::Update) => {
                Ok(Lifecycle::Reconciled(MergeMode::Write))
            },
            (Lifecycle::Reconciled(_), Operation::Delete) => Ok(Lifecycle::Unconfigured),
            (from, operation) => Err(ReconcileError::InvalidTransition {
                from: from.as_str(),
                operation: operation.as_str(),
            }),
        }
    }
}
