//! Narrow, object-safe view of a document source used by the upserter,
//! implemented once for any [`ingest_bridge::ResilientBridge`] so the
//! orchestrator can hold it as a trait object regardless of the
//! concrete bridge underneath.

use async_trait::async_trait;
use ingest_bridge::{ObjectBridge, RawAttachment, RawDocument, ResilientBridge, Result, ViewEntry};
use ingest_model::Unid;

#[async_trait]
pub trait DxSource: Send + Sync {
    async fn get_view(&self, view_name: &str) -> Result<bool>;
    async fn page_view(&self, view_name: &str, start_index: i64, page_size: u32) -> Result<Vec<ViewEntry>>;
    async fn read_document(&self, unid: &Unid) -> Result<RawDocument>;
    async fn read_attachments(&self, unid: &Unid) -> Result<Vec<RawAttachment>>;
}

#[async_trait]
impl<B: ObjectBridge + 'static> DxSource for ResilientBridge<B> {
    async fn get_view(&self, view_name: &str) -> Result<bool> {
        ResilientBridge::get_view(self, view_name).await
    }

    async fn page_view(&self, view_name: &str, start_index: i64, page_size: u32) -> Result<Vec<ViewEntry>> {
        ResilientBridge::page_view(self, view_name, start_index, page_size).await
    }

    async fn read_document(&self, unid: &Unid) -> Result<RawDocument> {
        ResilientBridge::read_document(self, unid).await
    }

    async fn read_attachments(&self, unid: &Unid) -> Result<Vec<RawAttachment>> {
        ResilientBridge::read_attachments(self, unid).await
    }
}
