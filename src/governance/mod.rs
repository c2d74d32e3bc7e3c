use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TokenError};
use crate::ledger::Account;
use crate::quorum::QuorumPolicy;

pub const GUARDIAN_COUNT: usize = 3;

/// Exactly three distinct, non-zero guardian identities in a fixed order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[Account; GUARDIAN_COUNT]", into = "[Account; GUARDIAN_COUNT]")]
pub struct GuardianSet {
    members: [Account; GUARDIAN_COUNT],
}

impl GuardianSet {
    pub fn new(members: [Account; GUARDIAN_COUNT]) -> Result<Self> {
        if members.iter().any(Account::is_zero) {
            return Err(TokenError::InvalidGuardianSet("zero guardian identity"));
        }
        let distinct: BTreeSet<&Account> = members.iter().collect();
        if distinct.len() != GUARDIAN_COUNT {
            return Err(TokenError::InvalidGuardianSet("duplicate guardian"));
        }
        Ok(Self { members })
    }

    pub fn is_guardian(&self, identity: &Account) -> bool {
        self.members.contains(identity)
    }

    pub fn members(&self) -> &[Account; GUARDIAN_COUNT] {
        &self.members
    }

    pub fn len(&self) -> usize {
        GUARDIAN_COUNT
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl TryFrom<[Account; GUARDIAN_COUNT]> for GuardianSet {
    type Error = TokenError;

    fn try_from(members: [Account; GUARDIAN_COUNT]) -> Result<Self> {
        Self::new(members)
    }
}

impl From<GuardianSet> for [Account; GUARDIAN_COUNT] {
    fn from(set: GuardianSet) -> Self {
        set.members
    }
}

/// Who may approve what, and who receives released reserve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    guardians: GuardianSet,
    mint_quorum: QuorumPolicy,
    withdrawal_quorum: QuorumPolicy,
    beneficiary: Account,
}

impl GovernanceConfig {
    /// Unanimous minting, majority withdrawal.
    pub fn new(guardians: GuardianSet, beneficiary: Account) -> Result<Self> {
        Self::with_quorums(
            guardians,
            beneficiary,
            QuorumPolicy::unanimous(GUARDIAN_COUNT),
            QuorumPolicy::majority(GUARDIAN_COUNT),
        )
    }

    pub fn with_quorums(
        guardians: GuardianSet,
        beneficiary: Account,
        mint_quorum: QuorumPolicy,
        withdrawal_quorum: QuorumPolicy,
    ) -> Result<Self> {
        if beneficiary.is_zero() {
            return Err(TokenError::InvalidAccount(beneficiary));
        }
        for policy in [mint_quorum, withdrawal_quorum] {
            if policy.members() != guardians.len() {
                return Err(TokenError::InvalidQuorum {
                    threshold: policy.threshold(),
                    members: policy.members(),
                });
            }
        }
        Ok(Self {
            guardians,
            mint_quorum,
            withdrawal_quorum,
            beneficiary,
        })
    }

    pub fn guardians(&self) -> &GuardianSet {
        &self.guardians
    }

    pub fn is_guardian(&self, identity: &Account) -> bool {
        self.guardians.is_guardian(identity)
    }

    pub fn mint_quorum(&self) -> QuorumPolicy {
        self.mint_quorum
    }

    pub fn withdrawal_quorum(&self) -> QuorumPolicy {
        self.withdrawal_quorum
    }

    pub fn beneficiary(&self) -> &Account {
        &self.beneficiary
    }

    /// Fails with `NotGuardian` for anyone outside the set.
    pub fn ensure_guardian(&self, identity: &Account) -> Result<()> {
        if self.is_guardian(identity) {
            Ok(())
        } else {
            Err(TokenError::NotGuardian(identity.clone()))
        }
    }
}
