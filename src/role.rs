//! Fixed roles and the capability table that governs them
use std::fmt;
use std::str::FromStr;

use crate::error::WorkflowError;
use crate::ledger::ApprovalLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Staff,
    ApproverLevel1,
    ApproverLevel2,
    Finance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    CreateRequest,
    AttachProforma,
    RemoveRequest,
    DecideLevel1,
    DecideLevel2,
    ViewApproved,
    AttachReceipt,
    ReconcileReceipt,
    ReadPurchaseOrder,
}

impl Capability {
    pub fn decide(level: ApprovalLevel) -> Capability {
        match level {
            ApprovalLevel::First => Capability::DecideLevel1,
            ApprovalLevel::Second => Capability::DecideLevel2,
        }
    }
}

const STAFF: &[Capability] = &[
    Capability::CreateRequest,
    Capability::AttachProforma,
    Capability::RemoveRequest,
];
const APPROVER_LEVEL_1: &[Capability] = &[Capability::DecideLevel1];
const APPROVER_LEVEL_2: &[Capability] = &[Capability::DecideLevel2];
const FINANCE: &[Capability] = &[
    Capability::ViewApproved,
    Capability::AttachReceipt,
    Capability::ReconcileReceipt,
    Capability::ReadPurchaseOrder,
];

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Staff,
        Role::ApproverLevel1,
        Role::ApproverLevel2,
        Role::Finance,
    ];

    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            Role::Staff => STAFF,
            Role::ApproverLevel1 => APPROVER_LEVEL_1,
            Role::ApproverLevel2 => APPROVER_LEVEL_2,
            Role::Finance => FINANCE,
        }
    }

    pub fn allows(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// The ledger level this role signs off on, if any
    pub fn approval_level(self) -> Option<ApprovalLevel> {
        ApprovalLevel::ALL
            .into_iter()
            .find(|level| self.allows(Capability::decide(*level)))
    }

    /// The approver role that signs off on `level`
    pub fn for_level(level: ApprovalLevel) -> Role {
        match level {
            ApprovalLevel::First => Role::ApproverLevel1,
            ApprovalLevel::Second => Role::ApproverLevel2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::ApproverLevel1 => "approver_level_1",
            Role::ApproverLevel2 => "approver_level_2",
            Role::Finance => "finance",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staff" => Ok(Role::Staff),
            "approver_level_1" | "approver_1" => Ok(Role::ApproverLevel1),
            "approver_level_2" | "approver_2" => Ok(Role::ApproverLevel2),
            "finance" => Ok(Role::Finance),
            other => Err(anyhow::anyhow!("unknown role `{other}`")),
        }
    }
}

/// A role-tagged identity acting on the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }

    /// Fails with `NotEligible` unless the role carries `capability`.
    pub fn require(
        &self,
        capability: Capability,
        action: &'static str,
        target: &str,
    ) -> Result<(), WorkflowError> {
        if self.role.allows(capability) {
            return Ok(());
        }
        Err(self.not_eligible(action, target))
    }

    pub fn not_eligible(&self, action: &'static str, target: &str) -> WorkflowError {
        WorkflowError::NotEligible {
            actor_id: self.id.clone(),
            role: self.role,
            action,
            target: target.to_string(),
        }
    }
}
