//! Service layer API for purchase request workflow operations
use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::WorkflowConfig;
use crate::documents::StoredPurchaseOrderGenerator;
use crate::error::{ExtractionFailure, GenerationFailure, WorkflowError};
use crate::ledger::{ApprovalRecord, Decision, can_decide};
use crate::ports::{Document, DocumentExtractor, DocumentGenerator, ExtractedDocument, PurchaseOrderInput};
use crate::reconcile::{ReconciliationReport, reconcile};
use crate::request::{
    DocumentRef, PurchaseRequest, RequestDraft, RequestSnapshot, RequestStatus, TimeStamp,
};
use crate::role::{Actor, Capability};
use crate::store::Store;
use crate::utils;

/// Outcome of attaching a proforma: the updated request and what was read from it.
#[derive(Debug, Clone)]
pub struct ProformaUpload {
    pub request: RequestSnapshot,
    pub extracted: ExtractedDocument,
}

pub struct ProcurementService {
    store: Store,
    extractor: Arc<dyn DocumentExtractor>,
    generator: Arc<dyn DocumentGenerator>,
    config: WorkflowConfig,
}

impl ProcurementService {
    pub fn new(
        store: Store,
        extractor: Arc<dyn DocumentExtractor>,
        generator: Arc<dyn DocumentGenerator>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            generator,
            config,
        }
    }

    /// Open the database named by `config` with the built-in purchase order generator.
    pub fn open(
        config: WorkflowConfig,
        extractor: Arc<dyn DocumentExtractor>,
    ) -> Result<Self, WorkflowError> {
        let store = Store::open(&config.database_path)?;
        let generator = Arc::new(StoredPurchaseOrderGenerator::new(store.clone()));
        Ok(Self::new(store, extractor, generator, config))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Load a request together with its items
    pub fn get_request(&self, request_id: &str) -> Result<RequestSnapshot, WorkflowError> {
        let request = self.store.load_request(request_id)?;
        let items = self.store.load_items(request_id)?;
        Ok(RequestSnapshot { request, items })
    }

    pub fn get_document(&self, reference: &DocumentRef) -> Result<Option<Document>, WorkflowError> {
        self.store.get_document(reference)
    }

    /// Submit a new purchase request, pending approval
    pub fn create_request(
        &self,
        actor: &Actor,
        draft: RequestDraft,
    ) -> Result<RequestSnapshot, WorkflowError> {
        actor.require(Capability::CreateRequest, "create", "a purchase request")?;

        let request_id =
            utils::new_request_id().map_err(|err| WorkflowError::Identifier(err.to_string()))?;
        let (request, items) = draft.validate_and_finalise(request_id, actor, TimeStamp::new())?;

        self.store.insert_request(&request, &items)?;

        info!(
            request_id = %request.id,
            created_by = %request.created_by,
            amount = %request.amount,
            items = items.len(),
            "purchase request submitted"
        );

        Ok(RequestSnapshot { request, items })
    }

    /// Record `actor`'s decision at the level their role signs off on.
    ///
    /// The ledger insert, status recomputation and request write commit
    /// together. When the decision completes the approval the purchase order
    /// is generated afterwards; a generation failure leaves the approval in
    /// place.
    pub async fn decide(
        &self,
        request_id: &str,
        actor: &Actor,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<RequestSnapshot, WorkflowError> {
        let request = self.store.load_request(request_id)?;
        let ledger = self.store.load_ledger(request_id)?;

        let Some(level) = actor.role.approval_level() else {
            return Err(actor.not_eligible("decide on", request_id));
        };
        if ledger.has_decision(level) {
            return Err(WorkflowError::DuplicateLevelDecision {
                request_id: request_id.to_string(),
                level,
            });
        }
        if !can_decide(&request, &ledger, actor) {
            return Err(actor.not_eligible("decide on", request_id));
        }

        let record = ApprovalRecord::new(
            request_id.to_string(),
            actor.id.clone(),
            level,
            decision,
            comment.filter(|c| !c.trim().is_empty()),
            TimeStamp::new(),
        );
        let outcome = self.store.apply_decision(&record)?;

        info!(
            request_id,
            approver = %actor.id,
            level = %level,
            decision = %decision,
            from = %outcome.previous_status,
            to = %outcome.request.status,
            "approval decision recorded"
        );

        if outcome.completed_approval() {
            if let Err(err) = self.complete_approval(request_id).await {
                warn!(request_id, error = %err, "approval completion step failed");
            }
        }

        self.get_request(request_id)
    }

    pub async fn approve(
        &self,
        request_id: &str,
        actor: &Actor,
        comment: Option<String>,
    ) -> Result<RequestSnapshot, WorkflowError> {
        self.decide(request_id, actor, Decision::Approved, comment).await
    }

    pub async fn reject(
        &self,
        request_id: &str,
        actor: &Actor,
        comment: Option<String>,
    ) -> Result<RequestSnapshot, WorkflowError> {
        self.decide(request_id, actor, Decision::Rejected, comment).await
    }

    /// Generate the purchase order of an approved request, once.
    ///
    /// Safe to call repeatedly and concurrently: generation is claimed in
    /// the store before the generator runs, so only one caller ever produces
    /// an order. Returns the recorded reference, or `None` when the request
    /// is not approved, generation did not succeed, or another caller is
    /// still generating.
    pub async fn complete_approval(
        &self,
        request_id: &str,
    ) -> Result<Option<DocumentRef>, WorkflowError> {
        let snapshot = self.get_request(request_id)?;

        if snapshot.status() != RequestStatus::Approved {
            debug!(request_id, status = %snapshot.status(), "not approved, skipping purchase order");
            return Ok(None);
        }
        if let Some(existing) = snapshot.request.purchase_order.clone() {
            debug!(request_id, reference = %existing, "purchase order already present");
            return Ok(Some(existing));
        }
        if !self.store.claim_purchase_order(request_id)? {
            debug!(request_id, "purchase order claimed by another caller");
            return Ok(self.store.load_request(request_id)?.purchase_order);
        }

        let order = PurchaseOrderInput::from(&snapshot);
        let generated = match timeout(
            self.config.generation_timeout,
            self.generator.generate_purchase_order(&order),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationFailure::TimedOut(self.config.generation_timeout)),
        };

        let reference = match generated {
            Ok(reference) => reference,
            Err(err) => {
                warn!(request_id, error = %err, "purchase order generation failed");
                self.store.release_purchase_order_claim(request_id)?;
                return Ok(None);
            }
        };

        match self.store.record_purchase_order(request_id, &reference) {
            Ok(recorded) => {
                info!(request_id, reference = %recorded, "purchase order recorded");
                Ok(Some(recorded))
            }
            Err(err) => {
                self.store.release_purchase_order_claim(request_id)?;
                Err(err)
            }
        }
    }

    /// Attach a proforma to the actor's own pending request and read it.
    pub async fn attach_proforma(
        &self,
        request_id: &str,
        actor: &Actor,
        document: Document,
    ) -> Result<ProformaUpload, WorkflowError> {
        actor.require(Capability::AttachProforma, "attach a proforma to", request_id)?;

        let admissible = |request: &PurchaseRequest| {
            if !request.is_owned_by(actor) {
                return Err(actor.not_eligible("attach a proforma to", request_id));
            }
            if !request.is_pending() {
                return Err(WorkflowError::InvalidTransition {
                    request_id: request_id.to_string(),
                    status: request.status,
                    action: "attach a proforma to",
                });
            }
            Ok(())
        };
        admissible(&self.store.load_request(request_id)?)?;

        let reference = self.store.put_document(&document)?;
        self.store.update_request(request_id, |request| {
            admissible(&*request)?;
            request.proforma = Some(reference.clone());
            request.updated_at = TimeStamp::new();
            Ok(())
        })?;

        info!(request_id, reference = %reference, "proforma attached");

        let extracted = self.extract_best_effort(&document).await;
        Ok(ProformaUpload {
            request: self.get_request(request_id)?,
            extracted,
        })
    }

    /// Attach the vendor receipt to an approved request.
    pub fn attach_receipt(
        &self,
        request_id: &str,
        actor: &Actor,
        document: Document,
    ) -> Result<RequestSnapshot, WorkflowError> {
        actor.require(Capability::AttachReceipt, "attach a receipt to", request_id)?;

        let admissible = |request: &PurchaseRequest| {
            if request.status != RequestStatus::Approved {
                return Err(WorkflowError::InvalidTransition {
                    request_id: request_id.to_string(),
                    status: request.status,
                    action: "attach a receipt to",
                });
            }
            Ok(())
        };
        admissible(&self.store.load_request(request_id)?)?;

        let reference = self.store.put_document(&document)?;
        self.store.update_request(request_id, |request| {
            admissible(&*request)?;
            request.receipt = Some(reference.clone());
            request.updated_at = TimeStamp::new();
            Ok(())
        })?;

        info!(request_id, reference = %reference, "receipt attached");

        self.get_request(request_id)
    }

    /// Reconcile the attached receipt against the request.
    pub async fn reconcile_receipt(
        &self,
        request_id: &str,
        actor: &Actor,
    ) -> Result<ReconciliationReport, WorkflowError> {
        let snapshot = self.approved_for_reconciliation(request_id, actor)?;

        let reference = snapshot
            .request
            .receipt
            .clone()
            .ok_or_else(|| WorkflowError::MissingDocument {
                request_id: request_id.to_string(),
                kind: "receipt",
            })?;
        let document = self
            .store
            .get_document(&reference)?
            .ok_or_else(|| WorkflowError::MissingDocument {
                request_id: request_id.to_string(),
                kind: "receipt",
            })?;

        Ok(self.reconcile_snapshot(&snapshot, &document).await)
    }

    /// Reconcile a receipt that has not been attached to the request.
    pub async fn reconcile_document(
        &self,
        request_id: &str,
        actor: &Actor,
        document: Document,
    ) -> Result<ReconciliationReport, WorkflowError> {
        let snapshot = self.approved_for_reconciliation(request_id, actor)?;
        Ok(self.reconcile_snapshot(&snapshot, &document).await)
    }

    /// Pending requests `actor` may decide on right now.
    pub fn pending_for(&self, actor: &Actor) -> Result<Vec<RequestSnapshot>, WorkflowError> {
        if actor.role.approval_level().is_none() {
            return Err(actor.not_eligible("list", "pending approvals"));
        }

        let mut queue = vec![];
        for request in self.store.requests()? {
            if !request.is_pending() {
                continue;
            }
            let ledger = self.store.load_ledger(&request.id)?;
            if can_decide(&request, &ledger, actor) {
                let items = self.store.load_items(&request.id)?;
                queue.push(RequestSnapshot { request, items });
            }
        }
        sort_newest_first(&mut queue);
        Ok(queue)
    }

    /// Requests visible to `actor`: staff see their own, approvers see
    /// pending requests, finance sees approved ones.
    pub fn visible_to(&self, actor: &Actor) -> Result<Vec<RequestSnapshot>, WorkflowError> {
        let mut visible = vec![];
        for request in self.store.requests()? {
            let shown = if actor.role.allows(Capability::CreateRequest) {
                request.is_owned_by(actor)
            } else if actor.role.approval_level().is_some() {
                request.is_pending()
            } else {
                actor.role.allows(Capability::ViewApproved)
                    && request.status == RequestStatus::Approved
            };
            if shown {
                let items = self.store.load_items(&request.id)?;
                visible.push(RequestSnapshot { request, items });
            }
        }
        sort_newest_first(&mut visible);
        Ok(visible)
    }

    /// Approved requests that carry a purchase order
    pub fn purchase_orders(&self, actor: &Actor) -> Result<Vec<RequestSnapshot>, WorkflowError> {
        actor.require(Capability::ReadPurchaseOrder, "read", "purchase orders")?;

        Ok(self
            .visible_to(actor)?
            .into_iter()
            .filter(|snapshot| snapshot.request.purchase_order.is_some())
            .collect())
    }

    /// The purchase order document of an approved request
    pub fn purchase_order_document(
        &self,
        request_id: &str,
        actor: &Actor,
    ) -> Result<Document, WorkflowError> {
        actor.require(Capability::ReadPurchaseOrder, "read the purchase order of", request_id)?;

        let missing = || WorkflowError::MissingDocument {
            request_id: request_id.to_string(),
            kind: "purchase order",
        };
        let request = self.store.load_request(request_id)?;
        let reference = request.purchase_order.ok_or_else(missing)?;
        self.store.get_document(&reference)?.ok_or_else(missing)
    }

    /// Ledger records of a request, oldest first
    pub fn approval_history(&self, request_id: &str) -> Result<Vec<ApprovalRecord>, WorkflowError> {
        self.store.load_request(request_id)?;
        let ledger = self.store.load_ledger(request_id)?;
        ledger.view_history();
        Ok(ledger.records().to_vec())
    }

    /// Delete the actor's own request with its items and ledger records.
    pub fn remove_request(&self, request_id: &str, actor: &Actor) -> Result<(), WorkflowError> {
        actor.require(Capability::RemoveRequest, "remove", request_id)?;

        let request = self.store.load_request(request_id)?;
        if !request.is_owned_by(actor) {
            return Err(actor.not_eligible("remove", request_id));
        }
        self.store.remove_request(request_id)?;

        info!(request_id, removed_by = %actor.id, "purchase request removed");
        Ok(())
    }

    fn approved_for_reconciliation(
        &self,
        request_id: &str,
        actor: &Actor,
    ) -> Result<RequestSnapshot, WorkflowError> {
        actor.require(Capability::ReconcileReceipt, "reconcile a receipt for", request_id)?;

        let snapshot = self.get_request(request_id)?;
        if snapshot.status() != RequestStatus::Approved {
            return Err(WorkflowError::InvalidTransition {
                request_id: request_id.to_string(),
                status: snapshot.status(),
                action: "reconcile a receipt for",
            });
        }
        Ok(snapshot)
    }

    async fn reconcile_snapshot(
        &self,
        snapshot: &RequestSnapshot,
        document: &Document,
    ) -> ReconciliationReport {
        let extracted = self.extract_best_effort(document).await;
        let report = reconcile(snapshot.request.amount, &snapshot.items, &extracted);

        info!(
            request_id = %snapshot.request.id,
            is_valid = report.is_valid,
            discrepancies = report.discrepancies.len(),
            "receipt reconciled"
        );
        report
    }

    // extraction never fails the caller, an unreadable document reads as empty
    async fn extract_best_effort(&self, document: &Document) -> ExtractedDocument {
        let extracted = match timeout(
            self.config.extraction_timeout,
            self.extractor.extract(document),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExtractionFailure::TimedOut(self.config.extraction_timeout)),
        };

        extracted.unwrap_or_else(|err| {
            warn!(file = %document.file_name, error = %err, "document extraction failed");
            ExtractedDocument::default()
        })
    }
}

fn sort_newest_first(snapshots: &mut [RequestSnapshot]) {
    snapshots.sort_by_key(|snapshot| std::cmp::Reverse(snapshot.request.created_at.to_datetime_utc()));
}
