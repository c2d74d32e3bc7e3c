use thiserror::Error;

use crate::ledger::{Account, Amount};

/// Every way a call into the token can be rejected.
///
/// A returned error always means the call left no trace: balances, approval
/// sets and the reserve are exactly as they were before it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Caller is not one of the three guardians.
    #[error("{0} is not a guardian")]
    NotGuardian(Account),

    /// Guardian already approved this exact pending request.
    #[error("guardian {guardian} already approved this request")]
    DuplicateApproval { guardian: Account },

    #[error("insufficient balance in account {account}: have {available}, need {required}")]
    InsufficientBalance {
        account: Account,
        available: Amount,
        required: Amount,
    },

    #[error("spender {spender} may move {available} from {owner}, need {required}")]
    InsufficientAllowance {
        owner: Account,
        spender: Account,
        available: Amount,
        required: Amount,
    },

    /// Native reserve held by the contract cannot cover a withdrawal.
    #[error("reserve holds {available}, withdrawal needs {requested}")]
    InsufficientReserve { available: Amount, requested: Amount },

    /// Native balance of an external payer is too low for the value sent.
    #[error("account {account} holds {available} native, tried to send {required}")]
    InsufficientFunds {
        account: Account,
        available: Amount,
        required: Amount,
    },

    #[error("incorrect payment: sent {sent}, required {required}")]
    IncorrectPayment { sent: Amount, required: Amount },

    #[error("invalid guardian set: {0}")]
    InvalidGuardianSet(&'static str),

    #[error("invalid quorum: {threshold} of {members}")]
    InvalidQuorum { threshold: usize, members: usize },

    #[error("sale price must be greater than zero")]
    InvalidPrice,

    /// A guarded entry point was entered while another one is in flight.
    #[error("reentrant call rejected")]
    Reentrant,

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("invalid account {0:?}")]
    InvalidAccount(Account),

    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    /// Decimal unit string could not be parsed.
    #[error("invalid amount {input:?}: {reason}")]
    InvalidAmount { input: String, reason: &'static str },

    #[error("snapshot rejected: {0}")]
    SnapshotMismatch(&'static str),
}

pub type Result<T> = std::result::Result<T, TokenError>;
