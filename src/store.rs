//! Sled persistence for requests, line items, the approval ledger and documents
use std::path::Path;
use std::sync::Arc;

use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionResult, abort,
};
use sled::{IVec, Transactional, Tree};

use crate::error::WorkflowError;
use crate::ledger::{ApprovalLedger, ApprovalLevel, ApprovalRecord, ledger_key};
use crate::ports::Document;
use crate::request::{DocumentRef, LineItem, PurchaseRequest, RequestStatus, TimeStamp};
use crate::role::Role;

const REQUESTS: &str = "requests";
const LINE_ITEMS: &str = "line_items";
const APPROVALS: &str = "approvals";
const DOCUMENTS: &str = "documents";
const PO_CLAIMS: &str = "po_claims";

/// Result of a committed decision.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub request: PurchaseRequest,
    pub previous_status: RequestStatus,
}

impl DecisionOutcome {
    /// True when this decision moved the request from pending to approved
    pub fn completed_approval(&self) -> bool {
        self.previous_status == RequestStatus::Pending
            && self.request.status == RequestStatus::Approved
    }
}

#[derive(Clone)]
pub struct Store {
    instance: Arc<sled::Db>,
    requests: Tree,
    line_items: Tree,
    approvals: Tree, // key: <request id>/<level>, one record per pair
    documents: Tree, // key: sha256 of the cbor encoded document
    po_claims: Tree, // key: request id, present while a purchase order is owned
}

impl Store {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self, WorkflowError> {
        Ok(Self {
            requests: instance.open_tree(REQUESTS)?,
            line_items: instance.open_tree(LINE_ITEMS)?,
            approvals: instance.open_tree(APPROVALS)?,
            documents: instance.open_tree(DOCUMENTS)?,
            po_claims: instance.open_tree(PO_CLAIMS)?,
            instance,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        Self::new(Arc::new(sled::open(path)?))
    }

    /// Persist a new request and the items it owns in one transaction
    pub fn insert_request(
        &self,
        request: &PurchaseRequest,
        items: &[LineItem],
    ) -> Result<(), WorkflowError> {
        let encoded_request = minicbor::to_vec(request)?;
        let encoded_items = items
            .iter()
            .enumerate()
            .map(|(index, item)| Ok((item_key(&request.id, index), minicbor::to_vec(item)?)))
            .collect::<Result<Vec<_>, WorkflowError>>()?;
        let request_key = request.id.as_bytes();

        let result: TransactionResult<(), WorkflowError> = (&self.requests, &self.line_items)
            .transaction(|(requests, line_items)| {
                requests.insert(request_key, encoded_request.clone())?;
                for (key, value) in &encoded_items {
                    line_items.insert(key.clone(), value.clone())?;
                }
                Ok(())
            });

        result.map_err(into_workflow_error)
    }

    pub fn load_request(&self, request_id: &str) -> Result<PurchaseRequest, WorkflowError> {
        let raw = self
            .requests
            .get(request_id.as_bytes())?
            .ok_or_else(|| WorkflowError::RequestNotFound(request_id.to_string()))?;
        Ok(minicbor::decode(&raw)?)
    }

    pub fn load_items(&self, request_id: &str) -> Result<Vec<LineItem>, WorkflowError> {
        self.line_items
            .scan_prefix(items_prefix(request_id))
            .values()
            .map(|raw| Ok(minicbor::decode(&raw?)?))
            .collect()
    }

    pub fn load_ledger(&self, request_id: &str) -> Result<ApprovalLedger, WorkflowError> {
        let mut records = vec![];
        for level in ApprovalLevel::ALL {
            if let Some(raw) = self.approvals.get(ledger_key(request_id, level))? {
                records.push(minicbor::decode::<ApprovalRecord>(&raw)?);
            }
        }
        ApprovalLedger::from_records(request_id, records)
    }

    /// Every stored request, in key order
    pub fn requests(&self) -> Result<Vec<PurchaseRequest>, WorkflowError> {
        self.requests
            .iter()
            .values()
            .map(|raw| Ok(minicbor::decode(&raw?)?))
            .collect()
    }

    /// Append `record` to the ledger and recompute the request status.
    ///
    /// Runs as one serializable transaction over the request and its ledger
    /// keys, so two racing decisions for the same level cannot both commit:
    /// the one retried after the other's commit sees the stored record and
    /// aborts with `DuplicateLevelDecision`.
    pub fn apply_decision(&self, record: &ApprovalRecord) -> Result<DecisionOutcome, WorkflowError> {
        let request_key = record.request_id.as_bytes();
        let record_key = record.key();
        let encoded_record = minicbor::to_vec(record)?;

        let result: TransactionResult<DecisionOutcome, WorkflowError> =
            (&self.requests, &self.approvals).transaction(|(requests, approvals)| {
                let Some(raw) = requests.get(request_key)? else {
                    return abort(WorkflowError::RequestNotFound(record.request_id.clone()));
                };
                let mut request: PurchaseRequest = decode_in_tx(&raw)?;

                if approvals.get(&record_key)?.is_some() {
                    return abort(WorkflowError::DuplicateLevelDecision {
                        request_id: record.request_id.clone(),
                        level: record.level,
                    });
                }
                if !request.is_pending() {
                    return abort(WorkflowError::InvalidTransition {
                        request_id: record.request_id.clone(),
                        status: request.status,
                        action: "decide on",
                    });
                }

                let mut ledger = ApprovalLedger::new(record.request_id.clone());
                for level in ApprovalLevel::ALL {
                    if let Some(raw) = approvals.get(ledger_key(&record.request_id, level))? {
                        ledger
                            .insert(decode_in_tx(&raw)?)
                            .map_err(ConflictableTransactionError::Abort)?;
                    }
                }
                if !ledger.accepts(request.status, record.level) {
                    return abort(WorkflowError::NotEligible {
                        actor_id: record.approver_id.clone(),
                        role: Role::for_level(record.level),
                        action: "decide on",
                        target: record.request_id.clone(),
                    });
                }

                ledger
                    .insert(record.clone())
                    .map_err(ConflictableTransactionError::Abort)?;
                approvals.insert(record_key.clone(), encoded_record.clone())?;

                let previous_status = request.status;
                request.status = ledger.derive_status();
                request.approved_by = ledger.approvers();
                request.updated_at = record.timestamp.clone();
                requests.insert(request_key, encode_in_tx(&request)?)?;

                Ok(DecisionOutcome {
                    request,
                    previous_status,
                })
            });

        result.map_err(into_workflow_error)
    }

    /// Read-modify-write of a single request. `update` may reject the change.
    pub fn update_request<F>(&self, request_id: &str, update: F) -> Result<PurchaseRequest, WorkflowError>
    where
        F: Fn(&mut PurchaseRequest) -> Result<(), WorkflowError>,
    {
        let key = request_id.as_bytes();

        let result: TransactionResult<PurchaseRequest, WorkflowError> =
            self.requests.transaction(|requests| {
                let Some(raw) = requests.get(key)? else {
                    return abort(WorkflowError::RequestNotFound(request_id.to_string()));
                };
                let mut request: PurchaseRequest = decode_in_tx(&raw)?;
                update(&mut request).map_err(ConflictableTransactionError::Abort)?;
                requests.insert(key, encode_in_tx(&request)?)?;
                Ok(request)
            });

        result.map_err(into_workflow_error)
    }

    /// Record the purchase order unless one is already present.
    ///
    /// Returns the reference the request ends up carrying.
    pub fn record_purchase_order(
        &self,
        request_id: &str,
        reference: &DocumentRef,
    ) -> Result<DocumentRef, WorkflowError> {
        let request = self.update_request(request_id, |request| {
            if request.purchase_order.is_none() {
                request.purchase_order = Some(reference.clone());
                request.updated_at = TimeStamp::new();
            }
            Ok(())
        })?;

        request
            .purchase_order
            .ok_or_else(|| WorkflowError::MissingDocument {
                request_id: request_id.to_string(),
                kind: "purchase order",
            })
    }

    /// Take ownership of purchase order generation for a request.
    ///
    /// Only one caller ever holds the claim; it is kept once the order is
    /// recorded and must be released if generation fails.
    pub fn claim_purchase_order(&self, request_id: &str) -> Result<bool, WorkflowError> {
        let claimed_at = TimeStamp::new().to_datetime_utc().timestamp_millis().to_be_bytes();
        let swapped = self.po_claims.compare_and_swap(
            request_id.as_bytes(),
            None::<&[u8]>,
            Some(&claimed_at[..]),
        )?;
        Ok(swapped.is_ok())
    }

    pub fn release_purchase_order_claim(&self, request_id: &str) -> Result<(), WorkflowError> {
        self.po_claims.remove(request_id.as_bytes())?;
        Ok(())
    }

    /// Remove a request with its items, ledger records and purchase order claim
    pub fn remove_request(&self, request_id: &str) -> Result<(), WorkflowError> {
        let item_keys = self
            .line_items
            .scan_prefix(items_prefix(request_id))
            .keys()
            .collect::<Result<Vec<IVec>, sled::Error>>()?;
        let request_key = request_id.as_bytes();

        let result: TransactionResult<(), WorkflowError> =
            (&self.requests, &self.line_items, &self.approvals, &self.po_claims).transaction(
                |(requests, line_items, approvals, po_claims)| {
                    if requests.remove(request_key)?.is_none() {
                        return abort(WorkflowError::RequestNotFound(request_id.to_string()));
                    }
                    for key in &item_keys {
                        line_items.remove(key.clone())?;
                    }
                    for level in ApprovalLevel::ALL {
                        approvals.remove(ledger_key(request_id, level))?;
                    }
                    po_claims.remove(request_key)?;
                    Ok(())
                },
            );

        result.map_err(into_workflow_error)
    }

    /// Store a document under the hash of its encoding
    pub fn put_document(&self, document: &Document) -> Result<DocumentRef, WorkflowError> {
        let cbor = minicbor::to_vec(document)?;
        let hash = sha256::digest(&cbor);

        self.documents.insert(hash.as_bytes(), cbor)?;

        Ok(DocumentRef(hash))
    }

    pub fn get_document(&self, reference: &DocumentRef) -> Result<Option<Document>, WorkflowError> {
        match self.documents.get(reference.as_str().as_bytes())? {
            Some(raw) => Ok(Some(minicbor::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Monotonic sequence shared by every generated purchase order
    pub fn next_sequence(&self) -> Result<u64, WorkflowError> {
        Ok(self.instance.generate_id()? + 1)
    }
}

fn item_key(request_id: &str, index: usize) -> Vec<u8> {
    format!("{request_id}/{index:08}").into_bytes()
}

fn items_prefix(request_id: &str) -> Vec<u8> {
    format!("{request_id}/").into_bytes()
}

fn decode_in_tx<T>(raw: &[u8]) -> ConflictableTransactionResult<T, WorkflowError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(raw).map_err(|err| ConflictableTransactionError::Abort(err.into()))
}

fn encode_in_tx<T: minicbor::Encode<()>>(
    value: &T,
) -> ConflictableTransactionResult<Vec<u8>, WorkflowError> {
    minicbor::to_vec(value).map_err(|err| ConflictableTransactionError::Abort(err.into()))
}

fn into_workflow_error(err: TransactionError<WorkflowError>) -> WorkflowError {
    match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => WorkflowError::Storage(err),
    }
}
