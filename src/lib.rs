//! Guardian-governed token ledger.
//!
//! * [`ledger`]: balances, allowances and total supply.
//! * [`governance`]: the fixed three-guardian set and quorum policies.
//! * [`quorum`]: the approval state machine shared by minting and
//!   withdrawal.
//! * [`guard`]: the non-reentrancy flag around value transfers.
//! * [`sale`]: fixed-rate purchase of units for native currency.
//! * [`token`]: the contract tying the above together.
//! * [`chain`]: native balances and value transfers with receiver
//!   callbacks.
//! * [`config`]: JSON genesis configuration.

pub mod chain;
pub mod config;
pub mod governance;
pub mod guard;
pub mod ledger;
pub mod quorum;
pub mod sale;
pub mod token;

mod error;

pub use error::{Result, TokenError};
