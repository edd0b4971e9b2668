//! Balance/hold accounting for point wallets.
//!
//! `available = balance - hold`, and `0 <= hold <= balance` holds before and after every operation. The functions here
//! only compute the next state; the storage backend applies it under the wallet lock and writes the ledger entry.
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{LedgerEntryType, Money},
    traits::PointLedgerError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointOperation {
    Earn,
    Hold,
    Release,
    Burn { via_hold: bool },
    Refund,
}

impl PointOperation {
    pub fn entry_type(&self) -> LedgerEntryType {
        match self {
            Self::Earn => LedgerEntryType::Earn,
            Self::Hold => LedgerEntryType::Lock,
            Self::Release => LedgerEntryType::Unlock,
            Self::Burn { via_hold: true } => LedgerEntryType::Redeem,
            Self::Burn { via_hold: false } => LedgerEntryType::Adjust,
            Self::Refund => LedgerEntryType::Refund,
        }
    }
}

/// One requested ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointEvent {
    pub user_id: i64,
    pub operation: PointOperation,
    pub amount: Money,
    pub idempotency_key: String,
}

impl PointEvent {
    pub fn new<S: Into<String>>(user_id: i64, operation: PointOperation, amount: Money, key: S) -> Self {
        Self { user_id, operation, amount, idempotency_key: key.into() }
    }

    pub fn validate(&self) -> Result<(), PointLedgerError> {
        if !self.amount.is_positive() {
            return Err(PointLedgerError::InvalidAmount(self.amount));
        }
        if self.idempotency_key.trim().is_empty() {
            return Err(PointLedgerError::MissingIdempotencyKey);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub balance: Money,
    pub hold: Money,
}

impl Balances {
    pub fn new(balance: Money, hold: Money) -> Self {
        Self { balance, hold }
    }

    pub fn available(&self) -> Money {
        self.balance - self.hold
    }
}

/// Computes the wallet state after applying `op` for `amount`.
pub fn apply(user_id: i64, current: Balances, op: PointOperation, amount: Money) -> Result<Balances, PointLedgerError> {
    let Balances { balance, hold } = current;
    let available = current.available();
    let next = match op {
        PointOperation::Earn | PointOperation::Refund => Balances::new(balance + amount, hold),
        PointOperation::Hold => {
            if available < amount {
                return Err(PointLedgerError::InsufficientAvailable { user_id, requested: amount, available });
            }
            Balances::new(balance, hold + amount)
        },
        PointOperation::Release => {
            if hold < amount {
                return Err(PointLedgerError::InsufficientHold { user_id, requested: amount, hold });
            }
            Balances::new(balance, hold - amount)
        },
        PointOperation::Burn { via_hold } => {
            if balance < amount {
                return Err(PointLedgerError::InsufficientBalance { user_id, requested: amount, balance });
            }
            if via_hold {
                if hold < amount {
                    return Err(PointLedgerError::InsufficientHold { user_id, requested: amount, hold });
                }
                Balances::new(balance - amount, hold - amount)
            } else {
                if available < amount {
                    return Err(PointLedgerError::InsufficientAvailable { user_id, requested: amount, available });
                }
                Balances::new(balance - amount, hold)
            }
        },
    };
    Ok(next)
}
