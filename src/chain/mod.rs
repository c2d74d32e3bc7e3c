//! In-process stand-in for the execution environment.
//!
//! Holds native-currency balances and lets accounts register a
//! [`NativeReceiver`] that runs whenever value is sent to them. A receiver is
//! handed the token mutably, which is exactly how a hostile beneficiary would
//! attempt to re-enter a withdrawal.

use std::{collections::BTreeMap, fmt};

use crate::error::{Result, TokenError};
use crate::ledger::{Account, Amount};
use crate::token::GovernedToken;

pub trait NativeReceiver {
    /// Runs after `amount` has been credited to the receiving account.
    /// Returning an error reverts the transfer.
    fn on_value_received(
        &mut self,
        chain: &mut Chain,
        token: &mut GovernedToken,
        from: &Account,
        amount: Amount,
    ) -> Result<()>;
}

#[derive(Default)]
pub struct Chain {
    balances: BTreeMap<Account, Amount>,
    receivers: BTreeMap<Account, Box<dyn NativeReceiver>>,
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("balances", &self.balances)
            .field("receivers", &self.receivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_balances(balances: BTreeMap<Account, Amount>) -> Self {
        Self {
            balances,
            receivers: BTreeMap::new(),
        }
    }

    pub fn balances(&self) -> &BTreeMap<Account, Amount> {
        &self.balances
    }

    pub fn balance(&self, account: &Account) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Creates native currency out of thin air (genesis allocations, faucets).
    pub fn fund(&mut self, account: &Account, amount: Amount) -> Result<()> {
        let balance = self
            .balance(account)
            .checked_add(amount)
            .ok_or(TokenError::ArithmeticOverflow)?;
        self.balances.insert(account.clone(), balance);
        Ok(())
    }

    pub fn register_receiver(&mut self, account: Account, receiver: Box<dyn NativeReceiver>) {
        self.receivers.insert(account, receiver);
    }

    pub fn remove_receiver(&mut self, account: &Account) -> Option<Box<dyn NativeReceiver>> {
        self.receivers.remove(account)
    }

    /// Moves value without running any receiver.
    pub fn move_value(&mut self, from: &Account, to: &Account, amount: Amount) -> Result<()> {
        let available = self.balance(from);
        if available < amount {
            return Err(TokenError::InsufficientFunds {
                account: from.clone(),
                available,
                required: amount,
            });
        }
        if amount == 0 || from == to {
            return Ok(());
        }
        let received = self
            .balance(to)
            .checked_add(amount)
            .ok_or(TokenError::ArithmeticOverflow)?;
        self.balances.insert(from.clone(), available - amount);
        self.balances.insert(to.clone(), received);
        Ok(())
    }

    /// Moves value, then hands control to the recipient's receiver if it has
    /// one. If the receiver fails every native balance is put back.
    pub fn send_value(
        &mut self,
        token: &mut GovernedToken,
        from: &Account,
        to: &Account,
        amount: Amount,
    ) -> Result<()> {
        let checkpoint = self.balances.clone();
        self.move_value(from, to, amount)?;

        let Some(mut receiver) = self.receivers.remove(to) else {
            return Ok(());
        };
        let outcome = receiver.on_value_received(self, token, from, amount);
        self.receivers.entry(to.clone()).or_insert(receiver);
        if let Err(err) = outcome {
            tracing::warn!(%to, error = %err, "receiver rejected value, reverting");
            self.balances = checkpoint;
            return Err(err);
        }
        Ok(())
    }
}
