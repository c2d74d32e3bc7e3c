use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::governance::{GovernanceConfig, GuardianSet, GUARDIAN_COUNT};
use crate::ledger::{parse_units, Account, DECIMALS};
use crate::quorum::QuorumPolicy;
use crate::sale::SaleEngine;
use crate::token::{GovernedToken, TokenMetadata, DEFAULT_NAME, DEFAULT_SYMBOL};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] TokenError),
}

/// Genesis parameters, usually read from a JSON file.
///
/// Amounts are decimal strings in whole tokens (supply) or whole native
/// units (price), parsed with 18 decimals.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    /// Contract address; derived from `label` when absent.
    pub address: Option<Account>,
    pub label: String,
    pub owner: Account,
    pub guardians: Vec<Account>,
    pub sale_price: String,
    pub initial_supply: String,
    pub mint_quorum: usize,
    pub withdrawal_quorum: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            symbol: DEFAULT_SYMBOL.to_string(),
            address: None,
            label: "g1tk".to_string(),
            owner: Account::default(),
            guardians: Vec::new(),
            sale_price: "0.001".to_string(),
            initial_supply: "1000000".to_string(),
            mint_quorum: GUARDIAN_COUNT,
            withdrawal_quorum: GUARDIAN_COUNT / 2 + 1,
        }
    }
}

impl TokenConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn contract_address(&self) -> Account {
        self.address
            .clone()
            .unwrap_or_else(|| Account::derive(&self.label))
    }

    pub fn governance(&self) -> Result<GovernanceConfig, ConfigError> {
        let guardians: [Account; GUARDIAN_COUNT] = self
            .guardians
            .clone()
            .try_into()
            .map_err(|_| TokenError::InvalidGuardianSet("expected exactly three guardians"))?;
        Ok(GovernanceConfig::with_quorums(
            GuardianSet::new(guardians)?,
            self.owner.clone(),
            QuorumPolicy::new(self.mint_quorum, GUARDIAN_COUNT)?,
            QuorumPolicy::new(self.withdrawal_quorum, GUARDIAN_COUNT)?,
        )?)
    }

    pub fn deploy(&self) -> Result<GovernedToken, ConfigError> {
        let governance = self.governance()?;
        let sale = SaleEngine::new(parse_units(&self.sale_price, DECIMALS)?)?;
        let initial_supply = parse_units(&self.initial_supply, DECIMALS)?;
        let metadata = TokenMetadata {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            decimals: DECIMALS,
        };
        Ok(GovernedToken::deploy(
            metadata,
            self.contract_address(),
            self.owner.clone(),
            governance,
            sale,
            initial_supply,
        )?)
    }
}
