//! Persistence of activity failure policies and success chains.
//!
//! Records live under one namespace per domain (`{domain}_activities`) and are
//! keyed `"{name}-{version}"`. Stores written by other tooling may use
//! symbol-like keys and values (`:failure_policy` => `:retry`); [`overlay`]
//! treats both spellings the same.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::providers::{MetadataRecord, MetadataStore, ProviderError};
use crate::{FailurePolicy, TypeRef};

pub const DOMAIN: &str = "domain";
pub const NAME: &str = "name";
pub const VERSION: &str = "version";
pub const FAILURE_POLICY: &str = "failure_policy";
pub const NEXT_ACTIVITY_NAME: &str = "next_activity_name";
pub const NEXT_ACTIVITY_VERSION: &str = "next_activity_version";

pub fn namespace(domain: &str) -> String {
    format!("{domain}_activities")
}

pub fn record_key(activity: &TypeRef) -> String {
    format!("{}-{}", activity.name, activity.version)
}

/// Attributes a stored record contributes on top of the default descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityOverlay {
    pub failure_policy: Option<FailurePolicy>,
    pub next_activity: Option<TypeRef>,
}

impl ActivityOverlay {
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy.unwrap_or_default()
    }
}

pub fn encode(
    domain: &str,
    activity: &TypeRef,
    failure_policy: FailurePolicy,
    next_activity: Option<&TypeRef>,
) -> MetadataRecord {
    let mut record = MetadataRecord::new();
    record.insert(DOMAIN.to_string(), domain.to_string());
    record.insert(NAME.to_string(), activity.name.clone());
    record.insert(VERSION.to_string(), activity.version.clone());
    record.insert(FAILURE_POLICY.to_string(), failure_policy.as_str().to_string());
    if let Some(next) = next_activity {
        record.insert(NEXT_ACTIVITY_NAME.to_string(), next.name.clone());
        record.insert(NEXT_ACTIVITY_VERSION.to_string(), next.version.clone());
    }
    record
}

fn strip_symbol(s: &str) -> &str {
    s.strip_prefix(':').unwrap_or(s)
}

/// Reads the overlay out of a stored record.
///
/// A next activity is only taken when both its name and version are present.
/// An unrecognized failure policy is ignored.
pub fn overlay(record: &MetadataRecord) -> ActivityOverlay {
    let lookup = |wanted: &str| {
        record
            .iter()
            .find(|(k, _)| strip_symbol(k) == wanted)
            .map(|(_, v)| strip_symbol(v))
            .filter(|v| !v.is_empty())
    };

    let failure_policy = lookup(FAILURE_POLICY).and_then(|raw| match raw.parse::<FailurePolicy>() {
        Ok(policy) => Some(policy),
        Err(e) => {
            warn!(target: "taskchain::runtime::metadata", error = %e, "ignoring stored failure policy");
            None
        }
    });
    let next_activity = match (lookup(NEXT_ACTIVITY_NAME), lookup(NEXT_ACTIVITY_VERSION)) {
        (Some(name), Some(version)) => Some(TypeRef::new(name, version)),
        _ => None,
    };

    ActivityOverlay {
        failure_policy,
        next_activity,
    }
}

/// Reads and writes activity records through a [`MetadataStore`].
#[derive(Clone)]
pub struct ActivityMetadata {
    store: Arc<dyn MetadataStore>,
}

impl ActivityMetadata {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// `Ok(None)` when the namespace or the record does not exist.
    pub async fn load(&self, domain: &str, activity: &TypeRef) -> Result<Option<ActivityOverlay>, ProviderError> {
        let namespace = namespace(domain);
        if !self.store.exists(&namespace).await? {
            debug!(target: "taskchain::runtime::metadata", %namespace, "namespace missing; using defaults");
            return Ok(None);
        }
        let record = self.store.get(&namespace, &record_key(activity)).await?;
        Ok(record.as_ref().map(overlay))
    }

    pub async fn save(
        &self,
        domain: &str,
        activity: &TypeRef,
        failure_policy: FailurePolicy,
        next_activity: Option<&TypeRef>,
    ) -> Result<(), ProviderError> {
        let namespace = namespace(domain);
        if !self.store.exists(&namespace).await? {
            match self.store.create(&namespace).await {
                Ok(()) => debug!(target: "taskchain::runtime::metadata", %namespace, "namespace created"),
                // Another process created it first.
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(e),
            }
        }
        let key = record_key(activity);
        let record = encode(domain, activity, failure_policy, next_activity);
        self.store.put(&namespace, &key, record).await?;
        debug!(
            target: "taskchain::runtime::metadata",
            %namespace,
            key = %key,
            failure_policy = %failure_policy,
            "activity metadata saved"
        );
        Ok(())
    }
}
