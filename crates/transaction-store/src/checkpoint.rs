use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{TransactionId, WorkflowId};

/// Version number of a transaction checkpoint, used for optimistic concurrency control.
///
/// A transaction that has never been saved is at version 0; every successful
/// save increments the version by 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for a transaction that was never saved.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1), assigned by the first save.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// A persisted snapshot of one distributed transaction.
///
/// The store treats `state` as opaque JSON. The indexed columns
/// (`flow_state`, `next_deadline`, `expires_at`) let background sweeps find
/// transactions without deserializing every state blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCheckpoint {
    /// The workflow this transaction executes.
    pub workflow_id: WorkflowId,

    /// The transaction identifier.
    pub transaction_id: TransactionId,

    /// The version this checkpoint will have once saved.
    pub version: Version,

    /// Name of the transaction's flow state (e.g. "Invoking", "Done").
    pub flow_state: String,

    /// Earliest dormant-step deadline or scheduled retry.
    pub next_deadline: Option<DateTime<Utc>>,

    /// When a terminal transaction may be purged; `None` keeps it indefinitely.
    pub expires_at: Option<DateTime<Utc>>,

    /// When the transaction was first created.
    pub created_at: DateTime<Utc>,

    /// When this checkpoint was produced.
    pub updated_at: DateTime<Utc>,

    /// The serialized transaction state.
    pub state: serde_json::Value,
}

impl TransactionCheckpoint {
    /// Creates a new checkpoint builder.
    pub fn builder() -> TransactionCheckpointBuilder {
        TransactionCheckpointBuilder::default()
    }

    /// Deserializes the stored state into a concrete type.
    pub fn state_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state.clone())
    }

    /// Returns true if the checkpoint's retention has elapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Builder for constructing transaction checkpoints.
#[derive(Debug, Default)]
pub struct TransactionCheckpointBuilder {
    workflow_id: Option<WorkflowId>,
    transaction_id: Option<TransactionId>,
    version: Option<Version>,
    flow_state: Option<String>,
    next_deadline: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    state: Option<serde_json::Value>,
}

impl TransactionCheckpointBuilder {
    /// Sets the workflow ID.
    pub fn workflow_id(mut self, id: impl Into<WorkflowId>) -> Self {
        self.workflow_id = Some(id.into());
        self
    }

    /// Sets the transaction ID.
    pub fn transaction_id(mut self, id: impl Into<TransactionId>) -> Self {
        self.transaction_id = Some(id.into());
        self
    }

    /// Sets the version.
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the flow state name.
    pub fn flow_state(mut self, flow_state: impl Into<String>) -> Self {
        self.flow_state = Some(flow_state.into());
        self
    }

    /// Sets the earliest waiting-step deadline.
    pub fn next_deadline(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.next_deadline = deadline;
        self
    }

    /// Sets the retention expiry.
    pub fn expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Sets the creation time. If not set, the current time will be used.
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Sets the update time. If not set, the current time will be used.
    pub fn updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// Sets the state from a serializable value.
    pub fn state<T: Serialize>(mut self, state: &T) -> Result<Self, serde_json::Error> {
        self.state = Some(serde_json::to_value(state)?);
        Ok(self)
    }

    /// Sets the state from a raw JSON value.
    pub fn state_raw(mut self, state: serde_json::Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Builds the checkpoint.
    ///
    /// # Panics
    ///
    /// Panics if required fields (workflow_id, transaction_id, version,
    /// flow_state, state) are not set.
    pub fn build(self) -> TransactionCheckpoint {
        let now = Utc::now();
        TransactionCheckpoint {
            workflow_id: self.workflow_id.expect("workflow_id is required"),
            transaction_id: self.transaction_id.expect("transaction_id is required"),
            version: self.version.expect("version is required"),
            flow_state: self.flow_state.expect("flow_state is required"),
            next_deadline: self.next_deadline,
            expires_at: self.expires_at,
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
            state: self.state.expect("state is required"),
        }
    }

    /// Tries to build the checkpoint, returning None if required fields are missing.
    pub fn try_build(self) -> Option<TransactionCheckpoint> {
        let now = Utc::now();
        Some(TransactionCheckpoint {
            workflow_id: self.workflow_id?,
            transaction_id: self.transaction_id?,
            version: self.version?,
            flow_state: self.flow_state?,
            next_deadline: self.next_deadline,
            expires_at: self.expires_at,
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
            state: self.state?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        let v1 = Version::new(1);
        let v2 = Version::new(2);
        assert!(v1 < v2);
        assert_eq!(v1.next(), v2);
    }

    #[test]
    fn version_initial_and_first() {
        assert_eq!(Version::initial().as_i64(), 0);
        assert_eq!(Version::first().as_i64(), 1);
        assert_eq!(Version::initial().next(), Version::first());
    }

    #[test]
    fn checkpoint_builder() {
        let state = serde_json::json!({"steps": {}});

        let checkpoint = TransactionCheckpoint::builder()
            .workflow_id("create-order")
            .transaction_id("tx-1")
            .version(Version::first())
            .flow_state("Invoking")
            .state_raw(state.clone())
            .build();

        assert_eq!(checkpoint.workflow_id.as_str(), "create-order");
        assert_eq!(checkpoint.transaction_id.as_str(), "tx-1");
        assert_eq!(checkpoint.version, Version::first());
        assert_eq!(checkpoint.flow_state, "Invoking");
        assert_eq!(checkpoint.state, state);
        assert!(checkpoint.next_deadline.is_none());
    }

    #[test]
    fn checkpoint_try_build_returns_none_on_missing_fields() {
        let result = TransactionCheckpoint::builder().try_build();
        assert!(result.is_none());
    }

    #[test]
    fn checkpoint_state_as_typed_value() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct Partial {
            attempts: u32,
        }

        let checkpoint = TransactionCheckpoint::builder()
            .workflow_id("wf")
            .transaction_id("tx")
            .version(Version::first())
            .flow_state("Done")
            .state_raw(serde_json::json!({"attempts": 3}))
            .build();

        let partial: Partial = checkpoint.state_as().unwrap();
        assert_eq!(partial, Partial { attempts: 3 });
    }

    #[test]
    fn checkpoint_expiry() {
        let now = Utc::now();
        let mut checkpoint = TransactionCheckpoint::builder()
            .workflow_id("wf")
            .transaction_id("tx")
            .version(Version::first())
            .flow_state("Done")
            .state_raw(serde_json::json!({}))
            .build();

        assert!(!checkpoint.is_expired(now));

        checkpoint.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(checkpoint.is_expired(now));
    }
}
