//! Guardian approval bookkeeping.
//!
//! Minting and reserve withdrawal both collect approvals from distinct
//! guardians per request key and fire once a threshold is met. They share the
//! [`ApprovalBook`] state machine below and differ only in key type and
//! [`QuorumPolicy`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TokenError};
use crate::ledger::Account;

/// `threshold` distinct approvals out of `members` guardians.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumPolicy {
    threshold: usize,
    members: usize,
}

impl QuorumPolicy {
    pub fn new(threshold: usize, members: usize) -> Result<Self> {
        if threshold == 0 || threshold > members {
            return Err(TokenError::InvalidQuorum { threshold, members });
        }
        Ok(Self { threshold, members })
    }

    pub fn unanimous(members: usize) -> Self {
        Self {
            threshold: members.max(1),
            members: members.max(1),
        }
    }

    pub fn majority(members: usize) -> Self {
        let members = members.max(1);
        Self {
            threshold: members / 2 + 1,
            members,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn members(&self) -> usize {
        self.members
    }
}

/// Where a single request stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ApprovalState {
    NoRequest,
    Pending { approvals: usize, threshold: usize },
    /// Threshold met; the guarded action ran and the request was cleared.
    Executed,
}

impl ApprovalState {
    /// Transition table for one additional distinct approval.
    pub fn advance(self, policy: QuorumPolicy) -> Self {
        let threshold = policy.threshold();
        let approvals = match self {
            ApprovalState::NoRequest => 1,
            ApprovalState::Pending { approvals, .. } => approvals + 1,
            ApprovalState::Executed => return ApprovalState::Executed,
        };
        if approvals >= threshold {
            ApprovalState::Executed
        } else {
            ApprovalState::Pending {
                approvals,
                threshold,
            }
        }
    }

    pub fn is_executed(&self) -> bool {
        matches!(self, ApprovalState::Executed)
    }
}

/// Pending approval sets keyed by request.
///
/// Mutation is split so callers can run the guarded action between deciding
/// and committing: [`propose`](Self::propose) is pure, [`record`](Self::record)
/// stores a non-final approval, [`settle`](Self::settle) drops a request once
/// its action succeeded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalBook<K> {
    policy: QuorumPolicy,
    pending: BTreeMap<K, BTreeSet<Account>>,
}

impl<K: Ord + Clone> ApprovalBook<K> {
    pub fn new(policy: QuorumPolicy) -> Self {
        Self {
            policy,
            pending: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> QuorumPolicy {
        self.policy
    }

    pub fn state(&self, key: &K) -> ApprovalState {
        match self.pending.get(key) {
            Some(approvers) if !approvers.is_empty() => ApprovalState::Pending {
                approvals: approvers.len(),
                threshold: self.policy.threshold(),
            },
            _ => ApprovalState::NoRequest,
        }
    }

    pub fn approvers(&self, key: &K) -> Option<&BTreeSet<Account>> {
        self.pending.get(key)
    }

    /// State the request would reach if `guardian` approved it now.
    pub fn propose(&self, key: &K, guardian: &Account) -> Result<ApprovalState> {
        if self
            .pending
            .get(key)
            .is_some_and(|approvers| approvers.contains(guardian))
        {
            return Err(TokenError::DuplicateApproval {
                guardian: guardian.clone(),
            });
        }
        Ok(self.state(key).advance(self.policy))
    }

    pub fn record(&mut self, key: K, guardian: Account) -> ApprovalState {
        let approvers = self.pending.entry(key.clone()).or_default();
        approvers.insert(guardian);
        self.state(&key)
    }

    pub fn settle(&mut self, key: &K) -> Option<BTreeSet<Account>> {
        self.pending.remove(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&K, &BTreeSet<Account>)> {
        self.pending.iter()
    }

    /// Rebuilds a book from exported entries. Empty or already-complete sets
    /// cannot exist in a live book and are rejected.
    pub fn from_entries<I>(policy: QuorumPolicy, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, BTreeSet<Account>)>,
    {
        let mut pending = BTreeMap::new();
        for (key, approvers) in entries {
            if approvers.is_empty() || approvers.len() >= policy.threshold() {
                return Err(TokenError::SnapshotMismatch(
                    "pending approval set outside quorum bounds",
                ));
            }
            if pending.insert(key, approvers).is_some() {
                return Err(TokenError::SnapshotMismatch("duplicate pending request"));
            }
        }
        Ok(Self { policy, pending })
    }
}
