//! Token balances for buyers, sellers and the protocol treasury
//!
//! Escrowed value never sits here: between deposit and settlement it lives in
//! the escrow's vault. Multi-leg credits are checked before any leg applies.

use crate::{error::EscrowError, models::Address, EscrowResult};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct TokenBalances {
    balances: Mutex<HashMap<Address, u64>>,
}

impl TokenBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn balance_of(&self, addr: &Address) -> u64 {
        self.balances.lock().await.get(addr).copied().unwrap_or(0)
    }

    /// Add `amount` to `addr`
    pub async fn credit(&self, addr: Address, amount: u64) -> EscrowResult<u64> {
        self.credit_all(&[(addr, amount)]).await?;
        Ok(self.balance_of(&addr).await)
    }

    /// Remove `amount` from `addr`, failing if the balance is short
    pub async fn debit(&self, addr: &Address, amount: u64) -> EscrowResult<u64> {
        let mut balances = self.balances.lock().await;
        let available = balances.get(addr).copied().unwrap_or(0);
        if available < amount {
            return Err(EscrowError::InsufficientFunds {
                required: amount,
                available,
            });
        }
        let remaining = available - amount;
        balances.insert(*addr, remaining);
        Ok(remaining)
    }

    /// Apply every credit or none of them
    pub async fn credit_all(&self, credits: &[(Address, u64)]) -> EscrowResult<()> {
        let mut balances = self.balances.lock().await;

        let mut staged: HashMap<Address, u64> = HashMap::new();
        for (addr, amount) in credits {
            let current = match staged.get(addr) {
                Some(v) => *v,
                None => balances.get(addr).copied().unwrap_or(0),
            };
            let next = current.checked_add(*amount).ok_or_else(|| {
                EscrowError::overflow(format!("balance of {} would exceed u64", addr))
            })?;
            staged.insert(*addr, next);
        }

        balances.extend(staged);
        Ok(())
    }
}
