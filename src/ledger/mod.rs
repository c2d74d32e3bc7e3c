use std::{collections::BTreeMap, fmt, str::FromStr};

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, TokenError};

pub type Amount = u128;

pub const DECIMALS: u32 = 18;
pub const UNIT: Amount = 1_000_000_000_000_000_000; // 1 token = 1e18 minimal units
pub const INITIAL_SUPPLY: Amount = 1_000_000 * UNIT;

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Address-like account handle.
///
/// Any non-empty string is accepted; derived accounts use the `0x` + 40 hex
/// digit form. Hex addresses are stored lowercase so `0x05DE..` and `0x05de..`
/// name the same account; other labels compare byte-exact. The empty string
/// and all-zero addresses are the zero identity, which can never hold a role
/// or receive units.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Account(String);

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let hex_digits = id
            .strip_prefix("0x")
            .or_else(|| id.strip_prefix("0X"))
            .filter(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()))
            .map(str::to_ascii_lowercase);
        match hex_digits {
            Some(digits) => Self(format!("0x{digits}")),
            None => Self(id),
        }
    }

    pub fn zero() -> Self {
        Self(ZERO_ADDRESS.to_string())
    }

    /// Account controlled by an Ed25519 key: last 20 bytes of `sha256(pk)`.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self::from_digest(Sha256::digest(key.as_bytes()).into())
    }

    /// Deterministic contract address for a deployment label.
    pub fn derive(label: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"g1tk-contract");
        hasher.update(label.as_bytes());
        Self::from_digest(hasher.finalize().into())
    }

    fn from_digest(digest: [u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(&digest[12..])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        let trimmed = self.0.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        digits.chars().all(|c| c == '0')
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Account {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Account {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Account> for String {
    fn from(value: Account) -> Self {
        value.0
    }
}

impl FromStr for Account {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::new(s.trim()))
    }
}

/// Parses a decimal string such as `"1.5"` into minimal units.
pub fn parse_units(input: &str, decimals: u32) -> Result<Amount> {
    let invalid = |reason| TokenError::InvalidAmount {
        input: input.to_string(),
        reason,
    };
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }
    let (whole, frac) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid("no digits"));
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid("not a decimal number"));
    }
    if frac.len() > decimals as usize {
        return Err(invalid("too many fractional digits"));
    }

    let scale = 10u128
        .checked_pow(decimals)
        .ok_or_else(|| invalid("unsupported decimals"))?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<Amount>()
            .map_err(|_| invalid("out of range"))?
    };
    let mut frac_units: Amount = 0;
    if !frac.is_empty() {
        let padded = format!("{frac:0<width$}", width = decimals as usize);
        frac_units = padded.parse().map_err(|_| invalid("out of range"))?;
    }
    whole_units
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or_else(|| invalid("out of range"))
}

/// Renders minimal units as a decimal string, trimming trailing zeros.
pub fn format_units(amount: Amount, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let whole = amount / scale;
    let frac = amount % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0>width$}", width = decimals as usize);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Balances, allowances and the total supply.
///
/// Zero balances are not stored, so two ledgers holding the same amounts
/// compare (and hash) equal regardless of history.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ledger {
    total_supply: Amount,
    balances: BTreeMap<Account, Amount>,
    #[serde(default)]
    allowances: BTreeMap<Account, BTreeMap<Account, Amount>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn balance_of(&self, account: &Account) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Account, Amount)> {
        self.balances.iter().map(|(account, amount)| (account, *amount))
    }

    /// Whether [`credit`](Self::credit) of `amount` would succeed.
    pub fn check_credit(&self, amount: Amount) -> Result<()> {
        self.total_supply
            .checked_add(amount)
            .map(|_| ())
            .ok_or(TokenError::ArithmeticOverflow)
    }

    /// Mints `amount` into `account`, growing the supply.
    pub fn credit(&mut self, account: &Account, amount: Amount) -> Result<()> {
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(TokenError::ArithmeticOverflow)?;
        self.total_supply = supply;
        // bounded by the supply checked above
        let balance = self.balance_of(account) + amount;
        self.set_balance(account, balance);
        Ok(())
    }

    pub fn transfer(&mut self, from: &Account, to: &Account, amount: Amount) -> Result<()> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(TokenError::InsufficientBalance {
                account: from.clone(),
                available,
                required: amount,
            });
        }
        if amount == 0 || from == to {
            return Ok(());
        }
        self.set_balance(from, available - amount);
        let received = self.balance_of(to) + amount;
        self.set_balance(to, received);
        Ok(())
    }

    pub fn allowance(&self, owner: &Account, spender: &Account) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|spenders| spenders.get(spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn approve(&mut self, owner: &Account, spender: &Account, amount: Amount) {
        if amount == 0 {
            if let Some(spenders) = self.allowances.get_mut(owner) {
                spenders.remove(spender);
                if spenders.is_empty() {
                    self.allowances.remove(owner);
                }
            }
            return;
        }
        self.allowances
            .entry(owner.clone())
            .or_default()
            .insert(spender.clone(), amount);
    }

    pub fn spend_allowance(
        &mut self,
        owner: &Account,
        spender: &Account,
        amount: Amount,
    ) -> Result<()> {
        let available = self.allowance(owner, spender);
        if available < amount {
            return Err(TokenError::InsufficientAllowance {
                owner: owner.clone(),
                spender: spender.clone(),
                available,
                required: amount,
            });
        }
        self.approve(owner, spender, available - amount);
        Ok(())
    }

    pub fn sum_of_balances(&self) -> Amount {
        self.balances.values().sum()
    }

    pub fn state_root(&self) -> [u8; 32] {
        build_merkle(self.merkle_leaves())
    }

    pub(crate) fn merkle_leaves(&self) -> Vec<[u8; 32]> {
        let mut leaves = Vec::with_capacity(self.balances.len() + 1);
        let mut hasher = Sha256::new();
        hasher.update(b"supply");
        hasher.update(self.total_supply.to_le_bytes());
        leaves.push(hasher.finalize().into());
        for (account, balance) in &self.balances {
            let mut hasher = Sha256::new();
            hasher.update(b"acct");
            hasher.update(account.as_str().as_bytes());
            hasher.update(balance.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        for (owner, spenders) in &self.allowances {
            for (spender, amount) in spenders {
                let mut hasher = Sha256::new();
                hasher.update(b"allow");
                hasher.update(owner.as_str().as_bytes());
                hasher.update(spender.as_str().as_bytes());
                hasher.update(amount.to_le_bytes());
                leaves.push(hasher.finalize().into());
            }
        }
        leaves
    }

    fn set_balance(&mut self, account: &Account, amount: Amount) {
        if amount == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(account.clone(), amount);
        }
    }
}

pub(crate) fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"g1tk-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(id: &str) -> Account {
        Account::new(id)
    }

    #[test]
    fn transfer_moves_units_and_keeps_supply() {
        let mut ledger = Ledger::new();
        ledger.credit(&acct("owner"), INITIAL_SUPPLY).unwrap();
        ledger
            .transfer(&acct("owner"), &acct("alice"), 100 * UNIT)
            .unwrap();
        assert_eq!(ledger.balance_of(&acct("alice")), 100 * UNIT);
        assert_eq!(ledger.balance_of(&acct("owner")), 999_900 * UNIT);
        assert_eq!(ledger.total_supply(), INITIAL_SUPPLY);
        assert_eq!(ledger.sum_of_balances(), ledger.total_supply());
    }

    #[test]
    fn transfer_rejects_overdraft_without_mutation() {
        let mut ledger = Ledger::new();
        ledger.credit(&acct("alice"), 10).unwrap();
        let before = ledger.clone();
        let err = ledger.transfer(&acct("alice"), &acct("bob"), 11).unwrap_err();
        assert_eq!(
            err,
            TokenError::InsufficientBalance {
                account: acct("alice"),
                available: 10,
                required: 11,
            }
        );
        assert_eq!(ledger, before);
    }

    #[test]
    fn unknown_accounts_read_zero() {
        let ledger = Ledger::new();
        assert_eq!(ledger.balance_of(&acct("nobody")), 0);
    }

    #[test]
    fn credit_overflow_is_rejected() {
        let mut ledger = Ledger::new();
        ledger.credit(&acct("a"), Amount::MAX).unwrap();
        assert_eq!(
            ledger.credit(&acct("b"), 1),
            Err(TokenError::ArithmeticOverflow)
        );
        assert_eq!(ledger.balance_of(&acct("b")), 0);
    }

    #[test]
    fn allowance_is_spent_down() {
        let mut ledger = Ledger::new();
        ledger.approve(&acct("alice"), &acct("store"), 50);
        ledger
            .spend_allowance(&acct("alice"), &acct("store"), 20)
            .unwrap();
        assert_eq!(ledger.allowance(&acct("alice"), &acct("store")), 30);
        let err = ledger
            .spend_allowance(&acct("alice"), &acct("store"), 31)
            .unwrap_err();
        assert!(matches!(err, TokenError::InsufficientAllowance { available: 30, .. }));
        ledger
            .spend_allowance(&acct("alice"), &acct("store"), 30)
            .unwrap();
        assert_eq!(ledger, Ledger::new());
    }

    #[test]
    fn state_root_ignores_history() {
        let mut a = Ledger::new();
        a.credit(&acct("alice"), 1_000).unwrap();
        a.transfer(&acct("alice"), &acct("bob"), 1_000).unwrap();

        let mut b = Ledger::new();
        b.credit(&acct("bob"), 1_000).unwrap();

        assert_eq!(a.state_root(), b.state_root());
        b.credit(&acct("bob"), 1).unwrap();
        assert_ne!(a.state_root(), b.state_root());
    }

    #[test]
    fn units_parse_and_format() {
        assert_eq!(parse_units("1", DECIMALS).unwrap(), UNIT);
        assert_eq!(parse_units("0.001", DECIMALS).unwrap(), UNIT / 1_000);
        assert_eq!(parse_units(".5", DECIMALS).unwrap(), UNIT / 2);
        assert_eq!(parse_units("1000000", DECIMALS).unwrap(), INITIAL_SUPPLY);
        assert!(parse_units("1.2.3", DECIMALS).is_err());
        assert!(parse_units("-1", DECIMALS).is_err());
        assert!(parse_units("0.0000000000000000001", DECIMALS).is_err());
        assert!(parse_units("", DECIMALS).is_err());

        assert_eq!(format_units(999_900 * UNIT, DECIMALS), "999900");
        assert_eq!(format_units(UNIT + UNIT / 2, DECIMALS), "1.5");
        assert_eq!(format_units(1, DECIMALS), "0.000000000000000001");
    }

    #[test]
    fn zero_identity_forms() {
        assert!(Account::zero().is_zero());
        assert!(acct("").is_zero());
        assert!(acct("0x").is_zero());
        assert!(!acct("0x01").is_zero());
        assert!(!acct("alice").is_zero());
        let derived = Account::derive("g1tk");
        assert_eq!(derived.as_str().len(), 42);
        assert!(derived.as_str().starts_with("0x"));
    }

    #[test]
    fn hex_addresses_match_regardless_of_case() {
        let mixed = acct("0x05DE0F07380365C76D0C5C2CB0D5D343145CD6B5");
        let lower = acct("0x05de0f07380365c76d0c5c2cb0d5d343145cd6b5");
        assert_eq!(mixed, lower);
        assert_eq!(acct("0X05de0f07380365c76d0c5c2cb0d5d343145cd6b5"), lower);
        assert_eq!(mixed.as_str(), lower.as_str());
        // non-hex labels stay byte-exact
        assert_ne!(acct("Alice"), acct("alice"));

        let json = serde_json::to_string(&mixed).unwrap();
        assert_eq!(json, "\"0x05de0f07380365c76d0c5c2cb0d5d343145cd6b5\"");
        let parsed: Account =
            serde_json::from_str("\"0x05DE0F07380365C76D0C5C2CB0D5D343145CD6B5\"").unwrap();
        assert_eq!(parsed, lower);
    }
}
