use std::convert::Infallible;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::ledger::ApprovalLevel;
use crate::request::RequestStatus;
use crate::role::Role;

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("{actor_id} ({role}) is not eligible to {action} {target}")]
    NotEligible {
        actor_id: String,
        role: Role,
        action: &'static str,
        target: String,
    },
    #[error("Level {level} of request {request_id} has already been decided")]
    DuplicateLevelDecision {
        request_id: String,
        level: ApprovalLevel,
    },
    #[error("Cannot {action} request {request_id} while it is {status}")]
    InvalidTransition {
        request_id: String,
        status: RequestStatus,
        action: &'static str,
    },
    #[error("Purchase request {0} not found")]
    RequestNotFound(String),
    #[error("Request {request_id} has no {kind} document attached")]
    MissingDocument {
        request_id: String,
        kind: &'static str,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode record: {0}")]
    Encoding(#[from] minicbor::encode::Error<Infallible>),
    #[error("Failed to decode record: {0}")]
    Decoding(#[from] minicbor::decode::Error),
    #[error("Identifier generation failed: {0}")]
    Identifier(String),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Request title is empty")]
    MissingTitle,
    #[error("Request amount is not set")]
    MissingAmount,
    #[error("Amount {0} is negative")]
    NegativeAmount(Decimal),
    #[error("Amount {0} has more than two decimal places")]
    ExcessPrecision(Decimal),
    #[error("Amount {0} does not fit in ten digits")]
    AmountOutOfRange(Decimal),
    #[error("Line item name is empty")]
    EmptyItemName,
    #[error("Line item {0:?} must have a positive quantity")]
    InvalidQuantity(String),
}

/// Failures reported by a [`crate::ports::DocumentExtractor`].
#[derive(thiserror::Error, Debug)]
pub enum ExtractionFailure {
    #[error("Unsupported document type: {0}")]
    Unsupported(String),
    #[error("Document could not be read: {0}")]
    Unreadable(String),
    #[error("Extraction timed out after {0:?}")]
    TimedOut(Duration),
}

/// Failures reported by a [`crate::ports::DocumentGenerator`].
#[derive(thiserror::Error, Debug)]
pub enum GenerationFailure {
    #[error("Purchase order rendering failed: {0}")]
    Rendering(String),
    #[error("Purchase order could not be stored: {0}")]
    Storage(#[from] WorkflowError),
    #[error("Generation timed out after {0:?}")]
    TimedOut(Duration),
}
