//! Memory record model shared by stores, the orchestrator and the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::sync::core::errors::{SyncError, SyncResult};
use crate::sync::core::ids::{DeviceId, MemoryId};

/// A captured page as persisted by the record store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique memory identifier.
    pub id: MemoryId,
    /// Page URL; unique across records.
    pub url: String,
    /// Page title.
    pub title: String,
    /// Captured page text.
    pub content: String,
    /// Summary written by the processing routine.
    pub summary: Option<String>,
    /// Host part of the URL.
    pub domain: String,
    /// Device that captured (or last pushed) the page.
    pub device_id: DeviceId,
    /// Starts at 1, incremented whenever title or content change.
    pub version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Whether summarization and indexing completed.
    pub processed: bool,
    /// Last error once processing was given up on.
    pub processing_error: Option<String>,
}

impl MemoryRecord {
    /// Build a fresh, unprocessed record from client input.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be parsed or has no host.
    pub fn from_new(new: NewMemory) -> SyncResult<Self> {
        let domain = domain_of(&new.url)?;
        let now = Utc::now();
        Ok(Self {
            id: MemoryId::new(),
            url: new.url,
            title: new.title,
            content: new.content,
            summary: None,
            domain,
            device_id: new.device_id,
            version: 1,
            created_at: now,
            updated_at: now,
            processed: false,
            processing_error: None,
        })
    }

    /// Apply a partial update and refresh `updated_at`.
    ///
    /// Fields left as `None` in the update are kept. `version` only moves
    /// when title or content change; processing results do not bump it.
    pub fn apply(&mut self, update: MemoryUpdate) {
        if update.title.is_some() || update.content.is_some() {
            self.version += 1;
        }
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(content) = update.content {
            self.content = content;
        }
        if let Some(summary) = update.summary {
            self.summary = Some(summary);
        }
        if let Some(processed) = update.processed {
            self.processed = processed;
        }
        if let Some(error) = update.processing_error {
            self.processing_error = error;
        }
        self.updated_at = Utc::now();
    }
}

/// Client-submitted page capture.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMemory {
    /// Page URL.
    pub url: String,
    /// Page title.
    pub title: String,
    /// Captured page text.
    pub content: String,
    /// Capturing device.
    pub device_id: DeviceId,
}

/// Partial update of a record; `None` keeps the current value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryUpdate {
    /// New title.
    pub title: Option<String>,
    /// New content.
    pub content: Option<String>,
    /// New summary.
    pub summary: Option<String>,
    /// New processed flag.
    pub processed: Option<bool>,
    /// Set (`Some(Some(..))`) or clear (`Some(None)`) the processing error.
    pub processing_error: Option<Option<String>>,
}

impl MemoryUpdate {
    /// Update produced when a client re-captures an existing URL.
    #[must_use]
    pub fn recapture(title: String, content: String) -> Self {
        Self {
            title: Some(title),
            content: Some(content),
            processed: Some(false),
            ..Self::default()
        }
    }

    /// Update produced by a successful processing run.
    #[must_use]
    pub fn processed(summary: String) -> Self {
        Self {
            summary: Some(summary),
            processed: Some(true),
            processing_error: Some(None),
            ..Self::default()
        }
    }

    /// Update produced when processing is given up on.
    #[must_use]
    pub fn failed(reason: String) -> Self {
        Self {
            processing_error: Some(Some(reason)),
            ..Self::default()
        }
    }
}

/// Extract the host of a URL.
///
/// # Errors
/// Returns an error if the URL is invalid or has no host.
pub fn domain_of(raw: &str) -> SyncResult<String> {
    let url = Url::parse(raw)?;
    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| SyncError::InvalidRecord(format!("url has no host: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_memory(url: &str) -> NewMemory {
        NewMemory {
            url: url.to_string(),
            title: "Title".to_string(),
            content: "Body.".to_string(),
            device_id: DeviceId::new("laptop").unwrap(),
        }
    }

    #[test]
    fn test_from_new_sets_domain_and_version() {
        let record = MemoryRecord::from_new(new_memory("https://x.com/a")).unwrap();
        assert_eq!(record.domain, "x.com");
        assert_eq!(record.version, 1);
        assert!(!record.processed);
        assert!(record.summary.is_none());
    }

    #[test]
    fn test_from_new_rejects_hostless_url() {
        assert!(MemoryRecord::from_new(new_memory("mailto:someone")).is_err());
        assert!(MemoryRecord::from_new(new_memory("not a url")).is_err());
    }

    #[test]
    fn test_apply_bumps_version_and_keeps_unset_fields() {
        let mut record = MemoryRecord::from_new(new_memory("https://x.com/a")).unwrap();
        let before = record.updated_at;
        record.apply(MemoryUpdate {
            title: Some("New".to_string()),
            ..MemoryUpdate::default()
        });
        assert_eq!(record.version, 2);
        assert_eq!(record.title, "New");
        assert_eq!(record.content, "Body.");
        assert!(record.updated_at >= before);
    }

    #[test]
    fn test_processed_clears_error() {
        let mut record = MemoryRecord::from_new(new_memory("https://x.com/a")).unwrap();
        record.apply(MemoryUpdate::failed("index down".to_string()));
        assert_eq!(record.processing_error.as_deref(), Some("index down"));
        record.apply(MemoryUpdate::processed("Sum.".to_string()));
        assert!(record.processed);
        assert!(record.processing_error.is_none());
        assert_eq!(record.version, 1);
        assert_eq!(record.summary.as_deref(), Some("Sum."));
    }
}
