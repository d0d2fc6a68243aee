//! Error types surfaced by registration, decision processing and activity
//! execution.

use crate::TypeRef;
use crate::providers::ProviderError;
use thiserror::Error;

/// Errors raised while declaring domains, workflow types and activity types.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid options for {kind} {type_ref}: {reason}")]
    InvalidOptions {
        kind: &'static str,
        type_ref: TypeRef,
        reason: String,
    },

    #[error("invalid version {version:?} for {name}: {source}")]
    InvalidVersion {
        name: String,
        version: String,
        #[source]
        source: semver::Error,
    },

    #[error("remote registration of {kind} {type_ref} failed: {source}")]
    Registration {
        kind: &'static str,
        type_ref: TypeRef,
        #[source]
        source: ProviderError,
    },

    #[error("domain {domain} could not be resolved: {source}")]
    Domain {
        domain: String,
        #[source]
        source: ProviderError,
    },

    #[error("metadata for activity {type_ref} could not be accessed: {source}")]
    Metadata {
        type_ref: TypeRef,
        #[source]
        source: ProviderError,
    },

    #[error("activity {0} has no perform handler")]
    MissingHandler(TypeRef),
}

/// Errors raised while turning a decision task into a decision.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("event {event_id} references scheduling event {scheduled_event_id}, which is not in the history")]
    ScheduledEventNotFound { event_id: u64, scheduled_event_id: u64 },

    #[error("event {event_id} ({event_type}) is missing attribute {attribute}")]
    MissingAttribute {
        event_id: u64,
        event_type: String,
        attribute: &'static str,
    },

    #[error("workflow {0} declares no initial activity")]
    NoInitialActivity(TypeRef),

    #[error("workflow type {0} is not registered in this process")]
    UnknownWorkflowType(TypeRef),

    #[error("decision task {0} was already responded to")]
    AlreadyResponded(String),

    #[error("{event_type} handler failed: {message}")]
    Handler { event_type: String, message: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors raised while executing an activity task.
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("activity {activity} failed: {message}")]
    Failed { activity: TypeRef, message: String },

    #[error("activity {activity} panicked: {message}")]
    Panicked { activity: TypeRef, message: String },

    #[error("activity type {0} is not registered in this process")]
    UnknownActivityType(TypeRef),

    #[error("activity task {0} was already responded to")]
    AlreadyResponded(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl DecisionError {
    /// Retryable provider failures (throttling during polls) do not stop a worker.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DecisionError::Provider(e) if e.is_retryable())
    }
}

impl ActivityError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActivityError::Provider(e) if e.is_retryable())
    }
}
