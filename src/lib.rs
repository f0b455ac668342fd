pub mod config;
pub mod documents;
pub mod error;
pub mod ledger;
pub mod ports;
pub mod reconcile;
pub mod request;
pub mod role;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod utils;

pub use error::{ExtractionFailure, GenerationFailure, ValidationError, WorkflowError};
pub use ledger::{ApprovalLedger, ApprovalLevel, ApprovalRecord, Decision};
pub use request::{DocumentRef, LineItem, Money, PurchaseRequest, RequestDraft, RequestSnapshot, RequestStatus};
pub use role::{Actor, Role};
pub use service::{ProcurementService, ProformaUpload};
pub use store::Store;
