// Capabilities: scraping strategies selected by a job's `type` tag, and the
// runner that claims jobs and dispatches them.

pub mod google_maps;
pub mod runner;
pub mod simple;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::AppError;
use crate::models::record::{NewRecord, UpsertOutcome};
use crate::store::RecordSink;

pub use google_maps::GoogleMapsCapability;
pub use simple::SimpleCapability;

/// Trait that all scraping strategies implement.
///
/// The runner checks `required_fields` before calling `run`, so a strategy
/// only sees payloads that carry them. Records are written to the sink the
/// strategy was constructed with.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Job type tag this capability handles.
    fn job_type(&self) -> &'static str;

    /// Payload fields that must be present and non-empty. Nested fields use
    /// dotted paths, e.g. `selectors.item`.
    fn required_fields(&self) -> &'static [&'static str];

    async fn run(&self, payload: &Value) -> Result<ScrapeSummary, AppError>;
}

/// Result of extracting a single item from a page or feed.
#[derive(Debug)]
pub enum ItemOutcome {
    Extracted(NewRecord),
    Skipped(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScrapeSummary {
    pub inserted: u32,
    pub updated: u32,
    pub skipped: u32,
}

impl ScrapeSummary {
    /// Records written, which becomes the job's `count`.
    pub fn count(&self) -> u32 {
        self.inserted + self.updated
    }

    /// Persist an extracted item or tally a skipped one.
    pub async fn absorb(
        &mut self,
        sink: &dyn RecordSink,
        outcome: ItemOutcome,
    ) -> Result<(), AppError> {
        match outcome {
            ItemOutcome::Extracted(record) => match sink.upsert(record).await? {
                UpsertOutcome::Inserted => self.inserted += 1,
                UpsertOutcome::Updated => self.updated += 1,
            },
            ItemOutcome::Skipped(reason) => {
                tracing::debug!("Skipped item: {reason}");
                self.skipped += 1;
            }
        }
        Ok(())
    }
}

/// Static mapping from job type tag to capability.
#[derive(Default)]
pub struct Registry {
    capabilities: HashMap<&'static str, Arc<dyn Capability>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, capability: Arc<dyn Capability>) -> Self {
        self.capabilities.insert(capability.job_type(), capability);
        self
    }

    pub fn job_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.capabilities.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Look up the capability for `job_type` and check the payload carries
    /// every field it requires.
    pub fn resolve(
        &self,
        job_type: &str,
        payload: &Value,
    ) -> Result<Arc<dyn Capability>, AppError> {
        let capability = self.capabilities.get(job_type).ok_or_else(|| {
            AppError::Validation(format!("no capability registered for job type '{job_type}'"))
        })?;
        validate_required(capability.as_ref(), payload)?;
        Ok(Arc::clone(capability))
    }
}

fn validate_required(capability: &dyn Capability, payload: &Value) -> Result<(), AppError> {
    if !payload.is_object() {
        return Err(AppError::Validation(format!(
            "{} job payload must be an object",
            capability.job_type()
        )));
    }

    for field in capability.required_fields() {
        let pointer = format!("/{}", field.replace('.', "/"));
        let present = match payload.pointer(&pointer) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Object(m)) => !m.is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(AppError::Validation(format!(
                "{} job missing required field '{field}'",
                capability.job_type()
            )));
        }
    }
    Ok(())
}

/// Deserialize a validated payload into a capability's parameter struct.
pub(crate) fn parse_params<T: DeserializeOwned>(
    job_type: &str,
    payload: &Value,
) -> Result<T, AppError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| AppError::Validation(format!("invalid {job_type} job payload: {e}")))
}
