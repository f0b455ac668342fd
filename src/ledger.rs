//! Append-only approval ledger and the status derived from it
use std::fmt;

use chrono::Utc;

use crate::error::WorkflowError;
use crate::request::{PurchaseRequest, RequestStatus, TimeStamp};
use crate::role::Actor;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, minicbor::Encode, minicbor::Decode,
)]
pub enum ApprovalLevel {
    #[n(0)]
    First,
    #[n(1)]
    Second,
}

impl ApprovalLevel {
    pub const ALL: [ApprovalLevel; 2] = [ApprovalLevel::First, ApprovalLevel::Second];

    pub fn number(self) -> u8 {
        match self {
            ApprovalLevel::First => 1,
            ApprovalLevel::Second => 2,
        }
    }
}

impl fmt::Display for ApprovalLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum Decision {
    #[n(0)]
    Approved,
    #[n(1)]
    Rejected,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct ApprovalRecord {
    #[n(0)]
    pub request_id: String, // a reference to [`PurchaseRequest`]
    #[n(1)]
    pub approver_id: String,
    #[n(2)]
    pub level: ApprovalLevel,
    #[n(3)]
    pub decision: Decision,
    #[n(4)]
    pub comment: Option<String>,
    #[n(5)]
    pub timestamp: TimeStamp<Utc>, // issued when the decision is recorded
}

impl ApprovalRecord {
    pub fn new(
        request_id: String,
        approver_id: String,
        level: ApprovalLevel,
        decision: Decision,
        comment: Option<String>,
        timestamp: TimeStamp<Utc>,
    ) -> Self {
        Self {
            request_id,
            approver_id,
            level,
            decision,
            comment,
            timestamp,
        }
    }
    pub fn key(&self) -> Vec<u8> {
        ledger_key(&self.request_id, self.level)
    }
    pub fn is_approval(&self) -> bool {
        self.decision == Decision::Approved
    }
}

/// Storage key of the single record a (request, level) pair may hold.
pub fn ledger_key(request_id: &str, level: ApprovalLevel) -> Vec<u8> {
    format!("{request_id}/{}", level.number()).into_bytes()
}

/// The decisions recorded against one request, ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalLedger {
    pub request_id: String,
    records: Vec<ApprovalRecord>,
}

impl ApprovalLedger {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            records: vec![],
        }
    }

    pub fn from_records(
        request_id: impl Into<String>,
        records: impl IntoIterator<Item = ApprovalRecord>,
    ) -> Result<Self, WorkflowError> {
        let mut ledger = Self::new(request_id);
        for record in records {
            ledger.insert(record)?;
        }
        Ok(ledger)
    }

    /// Appends a decision. A level, once decided, is final.
    pub fn insert(&mut self, record: ApprovalRecord) -> Result<(), WorkflowError> {
        if self.has_decision(record.level) {
            return Err(WorkflowError::DuplicateLevelDecision {
                request_id: self.request_id.clone(),
                level: record.level,
            });
        }
        let position = self
            .records
            .partition_point(|r| r.timestamp.to_datetime_utc() <= record.timestamp.to_datetime_utc());
        self.records.insert(position, record);
        Ok(())
    }

    pub fn records(&self) -> &[ApprovalRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record_at(&self, level: ApprovalLevel) -> Option<&ApprovalRecord> {
        self.records.iter().find(|r| r.level == level)
    }

    pub fn has_decision(&self, level: ApprovalLevel) -> bool {
        self.record_at(level).is_some()
    }

    pub fn is_approved_at(&self, level: ApprovalLevel) -> bool {
        self.record_at(level).is_some_and(ApprovalRecord::is_approval)
    }

    /// Status as a pure function of the recorded decisions.
    ///
    /// Any rejection is final regardless of the other level.
    pub fn derive_status(&self) -> RequestStatus {
        if self.records.iter().any(|r| r.decision == Decision::Rejected) {
            return RequestStatus::Rejected;
        }
        if self.is_approved_at(ApprovalLevel::First) && self.is_approved_at(ApprovalLevel::Second) {
            return RequestStatus::Approved;
        }
        RequestStatus::Pending
    }

    /// Approver ids of the approving records, in decision order.
    pub fn approvers(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.is_approval())
            .map(|r| r.approver_id.clone())
            .collect()
    }

    /// Whether a decision at `level` may be appended to a request in `status`.
    pub fn accepts(&self, status: RequestStatus, level: ApprovalLevel) -> bool {
        if status != RequestStatus::Pending || self.has_decision(level) {
            return false;
        }
        match level {
            ApprovalLevel::First => true,
            ApprovalLevel::Second => self.is_approved_at(ApprovalLevel::First),
        }
    }

    // view the decision trail
    pub fn view_history(&self) {
        for record in &self.records {
            tracing::info!(
                request_id = %record.request_id,
                level = %record.level,
                decision = %record.decision,
                approver = %record.approver_id,
                at = %record.timestamp.to_datetime_utc(),
                "approval record"
            );
        }
    }
}

/// Whether `actor` may decide on `request` right now.
pub fn can_decide(request: &PurchaseRequest, ledger: &ApprovalLedger, actor: &Actor) -> bool {
    match actor.role.approval_level() {
        Some(level) => ledger.accepts(request.status, level),
        None => false,
    }
}
