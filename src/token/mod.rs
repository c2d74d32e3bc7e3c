use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::chain::Chain;
use crate::error::{Result, TokenError};
use crate::governance::{GovernanceConfig, GuardianSet, GUARDIAN_COUNT};
use crate::guard::ReentrancyGuard;
use crate::ledger::{build_merkle, Account, Amount, Ledger, DECIMALS, INITIAL_SUPPLY};
use crate::quorum::{ApprovalBook, ApprovalState, QuorumPolicy};
use crate::sale::SaleEngine;

pub const DEFAULT_NAME: &str = "Group 1 Token";
pub const DEFAULT_SYMBOL: &str = "G1TK";

/// The two calls a fee-charging consumer needs from the token.
pub trait FungibleToken {
    fn transfer(&mut self, caller: &Account, to: &Account, amount: Amount) -> Result<()>;
    fn balance_of(&self, account: &Account) -> Amount;
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
}

impl Default for TokenMetadata {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            symbol: DEFAULT_SYMBOL.to_string(),
            decimals: DECIMALS,
        }
    }
}

/// Sender and attached native value of one call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub sender: Account,
    pub value: Amount,
}

impl Call {
    pub fn new(sender: impl Into<Account>) -> Self {
        Self {
            sender: sender.into(),
            value: 0,
        }
    }

    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = value;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MintKey {
    pub recipient: Account,
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenEvent {
    Transfer {
        from: Account,
        to: Account,
        amount: Amount,
    },
    Approval {
        owner: Account,
        spender: Account,
        amount: Amount,
    },
    Minted {
        to: Account,
        amount: Amount,
    },
    MintApproved {
        guardian: Account,
        recipient: Account,
        amount: Amount,
        approvals: usize,
    },
    WithdrawalApproved {
        guardian: Account,
        amount: Amount,
        approvals: usize,
    },
    Withdrawn {
        to: Account,
        amount: Amount,
    },
    TokensPurchased {
        buyer: Account,
        amount: Amount,
        payment: Amount,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingMint {
    pub recipient: Account,
    pub amount: Amount,
    pub approvers: BTreeSet<Account>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingWithdrawal {
    pub amount: Amount,
    pub approvers: BTreeSet<Account>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSnapshot {
    pub metadata: TokenMetadata,
    pub address: Account,
    pub owner: Account,
    pub governance: GovernanceConfig,
    pub sale: SaleEngine,
    pub ledger: Ledger,
    pub pending_mints: Vec<PendingMint>,
    pub pending_withdrawals: Vec<PendingWithdrawal>,
    #[serde(default)]
    pub events: Vec<TokenEvent>,
    pub state_root: String,
}

/// The governed token contract.
///
/// Owns the ledger, both approval trackers and the sale engine. The native
/// reserve is whatever the [`Chain`] holds for [`address`](Self::address).
#[derive(Debug)]
pub struct GovernedToken {
    metadata: TokenMetadata,
    address: Account,
    owner: Account,
    governance: GovernanceConfig,
    sale: SaleEngine,
    ledger: Ledger,
    mint_approvals: ApprovalBook<MintKey>,
    withdrawal_approvals: ApprovalBook<Amount>,
    guard: ReentrancyGuard,
    events: Vec<TokenEvent>,
}

impl GovernedToken {
    /// Deploys with the default metadata and quorums, crediting the initial
    /// supply to `owner`.
    pub fn construct(
        address: Account,
        owner: Account,
        guardians: [Account; GUARDIAN_COUNT],
        sale_price: Amount,
    ) -> Result<Self> {
        let guardians = GuardianSet::new(guardians)?;
        let governance = GovernanceConfig::new(guardians, owner.clone())?;
        Self::deploy(
            TokenMetadata::default(),
            address,
            owner,
            governance,
            SaleEngine::new(sale_price)?,
            INITIAL_SUPPLY,
        )
    }

    pub fn deploy(
        metadata: TokenMetadata,
        address: Account,
        owner: Account,
        governance: GovernanceConfig,
        sale: SaleEngine,
        initial_supply: Amount,
    ) -> Result<Self> {
        if address.is_zero() {
            return Err(TokenError::InvalidAccount(address));
        }
        if owner.is_zero() {
            return Err(TokenError::InvalidAccount(owner));
        }
        let mut token = Self {
            metadata,
            mint_approvals: ApprovalBook::new(governance.mint_quorum()),
            withdrawal_approvals: ApprovalBook::new(governance.withdrawal_quorum()),
            address,
            owner,
            governance,
            sale,
            ledger: Ledger::new(),
            guard: ReentrancyGuard::new(),
            events: Vec::new(),
        };
        if initial_supply > 0 {
            let owner = token.owner.clone();
            token.ledger.credit(&owner, initial_supply)?;
            token.events.push(TokenEvent::Minted {
                to: owner,
                amount: initial_supply,
            });
        }
        info!(
            address = %token.address,
            owner = %token.owner,
            supply = %initial_supply,
            "token deployed"
        );
        Ok(token)
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn symbol(&self) -> &str {
        &self.metadata.symbol
    }

    pub fn decimals(&self) -> u32 {
        self.metadata.decimals
    }

    pub fn address(&self) -> &Account {
        &self.address
    }

    pub fn owner(&self) -> &Account {
        &self.owner
    }

    pub fn governance(&self) -> &GovernanceConfig {
        &self.governance
    }

    pub fn sale_price(&self) -> Amount {
        self.sale.price()
    }

    /// Native payment `buy_tokens` expects for `amount` units.
    pub fn quote(&self, amount: Amount) -> Result<Amount> {
        self.sale.quote(amount)
    }

    pub fn total_supply(&self) -> Amount {
        self.ledger.total_supply()
    }

    pub fn balance_of(&self, account: &Account) -> Amount {
        self.ledger.balance_of(account)
    }

    pub fn allowance(&self, owner: &Account, spender: &Account) -> Amount {
        self.ledger.allowance(owner, spender)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn events(&self) -> &[TokenEvent] {
        &self.events
    }

    /// Native currency held by the contract.
    pub fn reserve(&self, chain: &Chain) -> Amount {
        chain.balance(&self.address)
    }

    pub fn pending_mint(&self, recipient: &Account, amount: Amount) -> ApprovalState {
        self.mint_approvals.state(&MintKey {
            recipient: recipient.clone(),
            amount,
        })
    }

    pub fn pending_withdrawal(&self, amount: Amount) -> ApprovalState {
        self.withdrawal_approvals.state(&amount)
    }

    pub fn transfer(&mut self, caller: &Account, to: &Account, amount: Amount) -> Result<()> {
        if to.is_zero() {
            return Err(TokenError::InvalidAccount(to.clone()));
        }
        self.ledger.transfer(caller, to, amount)?;
        debug!(from = %caller, %to, amount = %amount, "transfer");
        self.events.push(TokenEvent::Transfer {
            from: caller.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    pub fn approve(&mut self, caller: &Account, spender: &Account, amount: Amount) -> Result<()> {
        if spender.is_zero() {
            return Err(TokenError::InvalidAccount(spender.clone()));
        }
        self.ledger.approve(caller, spender, amount);
        self.events.push(TokenEvent::Approval {
            owner: caller.clone(),
            spender: spender.clone(),
            amount,
        });
        Ok(())
    }

    pub fn transfer_from(
        &mut self,
        caller: &Account,
        from: &Account,
        to: &Account,
        amount: Amount,
    ) -> Result<()> {
        if to.is_zero() {
            return Err(TokenError::InvalidAccount(to.clone()));
        }
        let available = self.ledger.allowance(from, caller);
        if available < amount {
            return Err(TokenError::InsufficientAllowance {
                owner: from.clone(),
                spender: caller.clone(),
                available,
                required: amount,
            });
        }
        self.ledger.transfer(from, to, amount)?;
        self.ledger.spend_allowance(from, caller, amount)?;
        self.events.push(TokenEvent::Transfer {
            from: from.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    /// Buys exactly `amount` units; `call.value` must equal the quote.
    pub fn buy_tokens(&mut self, chain: &mut Chain, call: &Call, amount: Amount) -> Result<()> {
        let _entered = self.guard.enter()?;
        let units = self.sale.buy(amount, call.value).inspect_err(|err| {
            warn!(buyer = %call.sender, error = %err, "purchase rejected");
        })?;
        self.settle_purchase(chain, call, units)
    }

    /// Bare payment to the contract, converted at the sale price.
    pub fn receive(&mut self, chain: &mut Chain, call: &Call) -> Result<Amount> {
        let _entered = self.guard.enter()?;
        let units = self.sale.units_for_payment(call.value).inspect_err(|err| {
            warn!(payer = %call.sender, error = %err, "bare payment rejected");
        })?;
        self.settle_purchase(chain, call, units)?;
        Ok(units)
    }

    fn settle_purchase(&mut self, chain: &mut Chain, call: &Call, units: Amount) -> Result<()> {
        if call.sender.is_zero() {
            return Err(TokenError::InvalidAccount(call.sender.clone()));
        }
        self.ledger.check_credit(units)?;
        chain.move_value(&call.sender, &self.address, call.value)?;
        self.ledger.credit(&call.sender, units)?;
        info!(buyer = %call.sender, units = %units, payment = %call.value, "tokens purchased");
        self.events.push(TokenEvent::TokensPurchased {
            buyer: call.sender.clone(),
            amount: units,
            payment: call.value,
        });
        Ok(())
    }

    /// Records `caller`'s approval to mint `amount` to `recipient`; the
    /// approval completing the mint quorum credits the recipient and clears
    /// the request.
    pub fn approve_mint(
        &mut self,
        caller: &Account,
        recipient: &Account,
        amount: Amount,
    ) -> Result<ApprovalState> {
        let _entered = self.guard.enter()?;
        self.governance.ensure_guardian(caller).inspect_err(|_| {
            warn!(%caller, "mint approval from non-guardian");
        })?;
        if amount == 0 {
            return Err(TokenError::ZeroAmount);
        }
        if recipient.is_zero() {
            return Err(TokenError::InvalidAccount(recipient.clone()));
        }

        let key = MintKey {
            recipient: recipient.clone(),
            amount,
        };
        let next = self.mint_approvals.propose(&key, caller)?;
        if !next.is_executed() {
            let state = self.mint_approvals.record(key, caller.clone());
            debug!(
                guardian = %caller, %recipient, amount = %amount, ?state,
                "mint approval recorded"
            );
            self.events.push(TokenEvent::MintApproved {
                guardian: caller.clone(),
                recipient: recipient.clone(),
                amount,
                approvals: approvals_of(state),
            });
            return Ok(state);
        }

        self.ledger.credit(recipient, amount)?;
        self.mint_approvals.settle(&key);
        info!(%recipient, amount = %amount, "mint quorum reached");
        self.events.push(TokenEvent::MintApproved {
            guardian: caller.clone(),
            recipient: recipient.clone(),
            amount,
            approvals: self.mint_approvals.policy().threshold(),
        });
        self.events.push(TokenEvent::Minted {
            to: recipient.clone(),
            amount,
        });
        Ok(next)
    }

    /// Records `caller`'s approval to release `amount` of reserve to the
    /// beneficiary; the approval completing the withdrawal quorum performs the
    /// release while holding the reentrancy guard.
    pub fn approve_withdrawal(
        &mut self,
        chain: &mut Chain,
        caller: &Account,
        amount: Amount,
    ) -> Result<ApprovalState> {
        let _entered = self.guard.enter()?;
        self.governance.ensure_guardian(caller).inspect_err(|_| {
            warn!(%caller, "withdrawal approval from non-guardian");
        })?;
        if amount == 0 {
            return Err(TokenError::ZeroAmount);
        }

        let next = self.withdrawal_approvals.propose(&amount, caller)?;
        if !next.is_executed() {
            let state = self.withdrawal_approvals.record(amount, caller.clone());
            debug!(guardian = %caller, amount = %amount, ?state, "withdrawal approval recorded");
            self.events.push(TokenEvent::WithdrawalApproved {
                guardian: caller.clone(),
                amount,
                approvals: approvals_of(state),
            });
            return Ok(state);
        }

        let available = self.reserve(chain);
        if available < amount {
            warn!(available = %available, requested = %amount, "reserve too small for withdrawal");
            return Err(TokenError::InsufficientReserve {
                available,
                requested: amount,
            });
        }

        // the beneficiary may call back into unguarded entry points
        let ledger_checkpoint = self.ledger.clone();
        let events_checkpoint = self.events.len();
        let from = self.address.clone();
        let beneficiary = self.governance.beneficiary().clone();
        if let Err(err) = chain.send_value(self, &from, &beneficiary, amount) {
            self.ledger = ledger_checkpoint;
            self.events.truncate(events_checkpoint);
            return Err(err);
        }

        self.withdrawal_approvals.settle(&amount);
        info!(to = %beneficiary, amount = %amount, "reserve released");
        self.events.push(TokenEvent::WithdrawalApproved {
            guardian: caller.clone(),
            amount,
            approvals: self.withdrawal_approvals.policy().threshold(),
        });
        self.events.push(TokenEvent::Withdrawn {
            to: beneficiary,
            amount,
        });
        Ok(next)
    }

    pub fn state_root(&self) -> [u8; 32] {
        let mut leaves = self.ledger.merkle_leaves();
        for (key, approvers) in self.mint_approvals.entries() {
            let mut hasher = Sha256::new();
            hasher.update(b"mint");
            hasher.update(key.recipient.as_str().as_bytes());
            hasher.update(key.amount.to_le_bytes());
            for approver in approvers {
                hasher.update(approver.as_str().as_bytes());
            }
            leaves.push(hasher.finalize().into());
        }
        for (amount, approvers) in self.withdrawal_approvals.entries() {
            let mut hasher = Sha256::new();
            hasher.update(b"withdraw");
            hasher.update(amount.to_le_bytes());
            for approver in approvers {
                hasher.update(approver.as_str().as_bytes());
            }
            leaves.push(hasher.finalize().into());
        }
        build_merkle(leaves)
    }

    pub fn snapshot(&self) -> TokenSnapshot {
        TokenSnapshot {
            metadata: self.metadata.clone(),
            address: self.address.clone(),
            owner: self.owner.clone(),
            governance: self.governance.clone(),
            sale: self.sale,
            ledger: self.ledger.clone(),
            pending_mints: self
                .mint_approvals
                .entries()
                .map(|(key, approvers)| PendingMint {
                    recipient: key.recipient.clone(),
                    amount: key.amount,
                    approvers: approvers.clone(),
                })
                .collect(),
            pending_withdrawals: self
                .withdrawal_approvals
                .entries()
                .map(|(amount, approvers)| PendingWithdrawal {
                    amount: *amount,
                    approvers: approvers.clone(),
                })
                .collect(),
            events: self.events.clone(),
            state_root: hex::encode(self.state_root()),
        }
    }

    /// Rebuilds a token from a snapshot, re-checking every invariant a live
    /// token maintains.
    pub fn restore(snapshot: TokenSnapshot) -> Result<Self> {
        let governance = &snapshot.governance;
        let mint_quorum = revalidate(governance.mint_quorum())?;
        let withdrawal_quorum = revalidate(governance.withdrawal_quorum())?;
        let governance = GovernanceConfig::with_quorums(
            GuardianSet::new(governance.guardians().members().clone())?,
            governance.beneficiary().clone(),
            mint_quorum,
            withdrawal_quorum,
        )?;
        let sale = SaleEngine::new(snapshot.sale.price())?;
        if snapshot.address.is_zero() || snapshot.owner.is_zero() {
            return Err(TokenError::SnapshotMismatch("zero contract or owner address"));
        }
        if snapshot.ledger.sum_of_balances() != snapshot.ledger.total_supply() {
            return Err(TokenError::SnapshotMismatch("balances do not sum to supply"));
        }

        let all_guardians = |approvers: &BTreeSet<Account>| {
            approvers.iter().all(|a| governance.is_guardian(a))
        };
        if !snapshot.pending_mints.iter().all(|p| all_guardians(&p.approvers))
            || !snapshot
                .pending_withdrawals
                .iter()
                .all(|p| all_guardians(&p.approvers))
        {
            return Err(TokenError::SnapshotMismatch("approval from non-guardian"));
        }

        let mint_approvals = ApprovalBook::from_entries(
            mint_quorum,
            snapshot.pending_mints.into_iter().map(|p| {
                (
                    MintKey {
                        recipient: p.recipient,
                        amount: p.amount,
                    },
                    p.approvers,
                )
            }),
        )?;
        let withdrawal_approvals = ApprovalBook::from_entries(
            withdrawal_quorum,
            snapshot
                .pending_withdrawals
                .into_iter()
                .map(|p| (p.amount, p.approvers)),
        )?;

        let token = Self {
            metadata: snapshot.metadata,
            address: snapshot.address,
            owner: snapshot.owner,
            governance,
            sale,
            ledger: snapshot.ledger,
            mint_approvals,
            withdrawal_approvals,
            guard: ReentrancyGuard::new(),
            events: snapshot.events,
        };
        if hex::encode(token.state_root()) != snapshot.state_root {
            return Err(TokenError::SnapshotMismatch("state root differs"));
        }
        Ok(token)
    }
}

impl FungibleToken for GovernedToken {
    fn transfer(&mut self, caller: &Account, to: &Account, amount: Amount) -> Result<()> {
        GovernedToken::transfer(self, caller, to, amount)
    }

    fn balance_of(&self, account: &Account) -> Amount {
        GovernedToken::balance_of(self, account)
    }
}

fn approvals_of(state: ApprovalState) -> usize {
    match state {
        ApprovalState::Pending { approvals, .. } => approvals,
        ApprovalState::NoRequest => 0,
        ApprovalState::Executed => 0,
    }
}

fn revalidate(policy: QuorumPolicy) -> Result<QuorumPolicy> {
    QuorumPolicy::new(policy.threshold(), policy.members())
}
