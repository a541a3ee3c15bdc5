//! The capability-object port to the upstream document database, and a
//! resilient wrapper that retries transient failures by reopening the
//! session rather than assuming a global, always-live connection.

use crate::error::{BridgeError, Result};
use crate::retry::{retry, retry_with_reopen, BackoffPolicy};
use async_trait::async_trait;
use ingest_model::Unid;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// One row surfaced while paging a view, carrying just enough to decide
/// whether to fetch the full document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewEntry {
    pub unid: Unid,
    pub category_path: String,
    pub position: i64,
}

/// Raw, untyped item reading as surfaced by the bridge, before
/// classification into a [`ingest_model::TypedValue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItemReading {
    pub item_name: String,
    pub is_rich_text: bool,
    pub string_value: Option<String>,
    pub number_value: Option<f64>,
    pub datetime_value: Option<chrono::NaiveDateTime>,
    pub bool_value: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub unid: Unid,
    pub note_id: Option<String>,
    pub form: Option<String>,
    pub created_at: Option<chrono::NaiveDateTime>,
    pub modified_at: Option<chrono::NaiveDateTime>,
    pub items: Vec<RawItemReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAttachment {
    pub filename: String,
    pub item_name: String,
    pub object_type: i32,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Capability object over a single open session to a source database.
///
/// An implementation's methods are expected to fail fast on a dropped
/// session rather than silently reconnect; reconnection is
/// [`ResilientBridge`]'s job.
#[async_trait]
pub trait ObjectBridge: Send + Sync {
    async fn get_view(&self, view_name: &str) -> Result<bool>;

    async fn page_view(
        &self,
        view_name: &str,
        start_index: i64,
        page_size: u32,
    ) -> Result<Vec<ViewEntry>>;

    async fn read_document(&self, unid: &Unid) -> Result<RawDocument>;

    async fn read_attachments(&self, unid: &Unid) -> Result<Vec<RawAttachment>>;

    /// Reopen the underlying database session, e.g. after the
    /// connection itself was dropped.
    async fn reopen_db(&self) -> Result<()>;

    /// Re-acquire the handle for `view_name` without tearing down the
    /// whole session — cheaper than [`Self::reopen_db`] when only the
    /// view's cursor went stale.
    async fn reopen_view(&self, view_name: &str) -> Result<()>;
}

/// Wraps an [`ObjectBridge`] with retry-with-reopen around every
/// operation. Holds the bridge behind an `RwLock` so `reopen` can swap
/// in a freshly-opened session without requiring callers to know the
/// bridge was ever unhealthy.
pub struct ResilientBridge<B: ObjectBridge> {
    inner: Arc<RwLock<B>>,
    policy: BackoffPolicy,
    cancel: CancellationToken,
}

impl<B: ObjectBridge> ResilientBridge<B> {
    pub fn new(bridge: B, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(RwLock::new(bridge)),
            policy: BackoffPolicy::default(),
            cancel,
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn reopen_db(&self) -> std::result::Result<(), BridgeError> {
        self.inner.read().await.reopen_db().await
    }

    async fn reopen_view(&self, view_name: &str) -> std::result::Result<(), BridgeError> {
        self.inner.read().await.reopen_view(view_name).await
    }

    pub async fn get_view(&self, view_name: &str) -> Result<bool> {
        retry_with_reopen(
            "get_view",
            self.policy,
            &self.cancel,
            || async { self.inner.read().await.get_view(view_name).await },
            || self.reopen_view(view_name),
            |e: &BridgeError| e.to_string(),
        )
        .await
    }

    pub async fn page_view(
        &self,
        view_name: &str,
        start_index: i64,
        page_size: u32,
    ) -> Result<Vec<ViewEntry>> {
        retry_with_reopen(
            "page_view",
            self.policy,
            &self.cancel,
            || async {
                self.inner
                    .read()
                    .await
                    .page_view(view_name, start_index, page_size)
                    .await
            },
            || self.reopen_view(view_name),
            |e: &BridgeError| e.to_string(),
        )
        .await
    }

    pub async fn read_document(&self, unid: &Unid) -> Result<RawDocument> {
        retry_with_reopen(
            "read_document",
            self.policy,
            &self.cancel,
            || async { self.inner.read().await.read_document(unid).await },
            || self.reopen_db(),
            |e: &BridgeError| e.to_string(),
        )
        .await
    }

    /// Attachments are read straight off the already-open session by
    /// `unid`, with no view cursor involved, so a transient failure here
    /// gets a plain retry rather than reopening anything.
    pub async fn read_attachments(&self, unid: &Unid) -> Result<Vec<RawAttachment>> {
        retry(
            "read_attachments",
            self.policy,
            &self.cancel,
            || async { self.inner.read().await.read_attachments(unid).await },
            |e: &BridgeError| e.to_string(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    struct FlakyBridge {
        fail_times: Mutex<u32>,
        reopens: AtomicU32,
        view_reopens: AtomicU32,
    }

    #[async_trait]
    impl ObjectBridge for FlakyBridge {
        async fn get_view(&self, _view_name: &str) -> Result<bool> {
            let mut remaining = self.fail_times.lock().await;
            if *remaining > 0 {
                *remaining -= 1;
                Err(BridgeError::protocol("Network error: connection reset"))
            } else {
                Ok(true)
            }
        }

        async fn page_view(
            &self,
            _view_name: &str,
            _start_index: i64,
            _page_size: u32,
        ) -> Result<Vec<ViewEntry>> {
            Ok(vec![])
        }

        async fn read_document(&self, unid: &Unid) -> Result<RawDocument> {
            Ok(RawDocument {
                unid: unid.clone(),
                note_id: None,
                form: None,
                created_at: None,
                modified_at: None,
                items: vec![],
            })
        }

        async fn read_attachments(&self, _unid: &Unid) -> Result<Vec<RawAttachment>> {
            Ok(vec![])
        }

        async fn reopen_db(&self) -> Result<()> {
            self.reopens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn reopen_view(&self, _view_name: &str) -> Result<()> {
            self.view_reopens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn resilient_bridge_recovers_from_transient_failures() {
        let bridge = FlakyBridge {
            fail_times: Mutex::new(2),
            reopens: AtomicU32::new(0),
            view_reopens: AtomicU32::new(0),
        };
        let resilient = ResilientBridge::new(bridge, CancellationToken::new()).with_policy(
            BackoffPolicy {
                base: std::time::Duration::from_millis(1),
                max_attempts: 6,
            },
        );

        let ok = resilient.get_view("($All)").await.unwrap();
        assert!(ok);
        assert_eq!(
            resilient.inner.read().await.view_reopens.load(Ordering::SeqCst),
            2
        );
        assert_eq!(resilient.inner.read().await.reopens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn read_document_passes_through_unid() {
        let bridge = FlakyBridge {
            fail_times: Mutex::new(0),
            reopens: AtomicU32::new(0),
            view_reopens: AtomicU32::new(0),
        };
        let resilient = ResilientBridge::new(bridge, CancellationToken::new());
        let unid = Unid::parse("0123456789ABCDEF0123456789ABCDEF").unwrap();
        let doc = resilient.read_document(&unid).await.unwrap();
        assert_eq!(doc.unid, unid);
    }

    #[tokio::test]
    async fn read_attachments_retries_without_reopening() {
        let bridge = FlakyBridge {
            fail_times: Mutex::new(0),
            reopens: AtomicU32::new(0),
            view_reopens: AtomicU32::new(0),
        };
        let resilient = ResilientBridge::new(bridge, CancellationToken::new());
        let unid = Unid::parse("0123456789ABCDEF0123456789ABCDEF").unwrap();
        let attachments = resilient.read_attachments(&unid).await.unwrap();
        assert!(attachments.is_empty());
        assert_eq!(resilient.inner.read().await.reopens.load(Ordering::SeqCst), 0);
        assert_eq!(
            resilient.inner.read().await.view_reopens.load(Ordering::SeqCst),
            0
        );
    }
}
