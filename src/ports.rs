//! Capabilities the workflow consumes but does not implement.
//!
//! Extraction turns an uploaded proforma or receipt into structured data.
//! Generation renders a purchase order for an approved request and hands
//! back a reference to the stored artifact. Both are invoked with a bounded
//! timeout by [`crate::service::ProcurementService`].
use async_trait::async_trait;
use chrono::Utc;

use crate::error::{ExtractionFailure, GenerationFailure};
use crate::request::{DocumentRef, LineItem, Money, RequestSnapshot, TimeStamp};

/// An uploaded file as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Document {
    #[n(0)]
    pub file_name: String,
    #[n(1)]
    #[cbor(with = "minicbor::bytes")]
    pub content: Vec<u8>,
}

impl Document {
    pub fn new(file_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }

    /// Lowercased extension of the file name, if any
    pub fn extension(&self) -> Option<String> {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedItem {
    pub name: String,
    pub price: Money,
    pub quantity: u32,
}

impl ExtractedItem {
    pub fn new(name: impl Into<String>, price: Money, quantity: u32) -> Self {
        Self {
            name: name.into(),
            price,
            quantity,
        }
    }
}

/// Best-effort result of reading a vendor document. Empty when nothing
/// could be read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub vendor_name: String,
    pub vendor_address: Option<String>,
    pub items: Vec<ExtractedItem>,
    pub total_amount: Money,
}

impl ExtractedDocument {
    pub fn is_empty(&self) -> bool {
        self.vendor_name.is_empty() && self.items.is_empty() && self.total_amount.is_zero()
    }
}

/// Everything a purchase order is rendered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrderInput {
    pub request_id: String,
    pub created_at: TimeStamp<Utc>,
    pub requester_name: String,
    pub amount: Money,
    pub items: Vec<LineItem>,
}

impl From<&RequestSnapshot> for PurchaseOrderInput {
    fn from(snapshot: &RequestSnapshot) -> Self {
        Self {
            request_id: snapshot.request.id.clone(),
            created_at: snapshot.request.created_at.clone(),
            requester_name: snapshot.request.requester_name.clone(),
            amount: snapshot.request.amount,
            items: snapshot.items.clone(),
        }
    }
}

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, document: &Document) -> Result<ExtractedDocument, ExtractionFailure>;
}

#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    async fn generate_purchase_order(
        &self,
        order: &PurchaseOrderInput,
    ) -> Result<DocumentRef, GenerationFailure>;
}
