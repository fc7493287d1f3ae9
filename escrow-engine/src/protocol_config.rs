//! Protocol config - authority and dispute admin set
//!
//! Created once per deployment. Only the authority may change the admin set.
//! Operations that need authorization receive a `ProtocolConfig` snapshot
//! explicitly rather than reading ambient state.

use crate::{error::EscrowError, models::Address, EscrowResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Sole mutator of the admin set
    pub authority: Address,
    /// Addresses allowed to arbitrate disputes
    pub admins: BTreeSet<Address>,
}

impl ProtocolConfig {
    pub fn is_admin(&self, addr: &Address) -> bool {
        self.admins.contains(addr)
    }

    pub fn ensure_authority(&self, caller: &Address) -> EscrowResult<()> {
        if self.authority == *caller {
            Ok(())
        } else {
            Err(EscrowError::Unauthorized)
        }
    }

    pub fn ensure_admin(&self, caller: &Address) -> EscrowResult<()> {
        if self.is_admin(caller) {
            Ok(())
        } else {
            Err(EscrowError::UnauthorizedAdmin)
        }
    }
}

/// Singleton holder for the protocol config
#[derive(Debug, Default)]
pub struct ProtocolConfigStore {
    inner: RwLock<Option<ProtocolConfig>>,
}

impl ProtocolConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the config with `caller` as authority
    pub async fn initialize(
        &self,
        caller: Address,
        admins: BTreeSet<Address>,
    ) -> EscrowResult<ProtocolConfig> {
        let mut slot = self.inner.write().await;
        if slot.is_some() {
            return Err(EscrowError::AlreadyInitialized);
        }

        let config = ProtocolConfig {
            authority: caller,
            admins,
        };
        info!(
            authority = %config.authority,
            admins = config.admins.len(),
            "Initialized protocol config"
        );
        *slot = Some(config.clone());
        Ok(config)
    }

    /// Current config snapshot
    pub async fn snapshot(&self) -> EscrowResult<ProtocolConfig> {
        self.inner
            .read()
            .await
            .clone()
            .ok_or(EscrowError::NotInitialized)
    }

    pub async fn add_admin(&self, caller: Address, admin: Address) -> EscrowResult<ProtocolConfig> {
        self.mutate(caller, |config| {
            if config.admins.insert(admin) {
                info!(admin = %admin, "Added dispute admin");
            }
        })
        .await
    }

    pub async fn remove_admin(
        &self,
        caller: Address,
        admin: Address,
    ) -> EscrowResult<ProtocolConfig> {
        self.mutate(caller, |config| {
            if config.admins.remove(&admin) {
                info!(admin = %admin, "Removed dispute admin");
            }
        })
        .await
    }

    async fn mutate<F>(&self, caller: Address, update_fn: F) -> EscrowResult<ProtocolConfig>
    where
        F: FnOnce(&mut ProtocolConfig),
    {
        let mut slot = self.inner.write().await;
        let config = slot.as_mut().ok_or(EscrowError::NotInitialized)?;
        config.ensure_authority(&caller)?;
        update_fn(config);
        Ok(config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::new([b; 32])
    }

    #[tokio::test]
    async fn test_initialize_once() {
        let store = ProtocolConfigStore::new();
        let config = store
            .initialize(addr(1), [addr(2)].into_iter().collect())
            .await
            .unwrap();
        assert_eq!(config.authority, addr(1));
        assert!(config.is_admin(&addr(2)));

        let again = store.initialize(addr(3), BTreeSet::new()).await;
        assert!(matches!(again, Err(EscrowError::AlreadyInitialized)));
        assert_eq!(store.snapshot().await.unwrap().authority, addr(1));
    }

    #[tokio::test]
    async fn test_snapshot_before_init() {
        let store = ProtocolConfigStore::new();
        assert!(matches!(
            store.snapshot().await,
            Err(EscrowError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_admin_mutation_restricted_to_authority() {
        let store = ProtocolConfigStore::new();
        store.initialize(addr(1), BTreeSet::new()).await.unwrap();

        assert!(matches!(
            store.add_admin(addr(2), addr(2)).await,
            Err(EscrowError::Unauthorized)
        ));
        assert!(store.snapshot().await.unwrap().admins.is_empty());

        let config = store.add_admin(addr(1), addr(5)).await.unwrap();
        assert!(config.is_admin(&addr(5)));

        assert!(matches!(
            store.remove_admin(addr(5), addr(5)).await,
            Err(EscrowError::Unauthorized)
        ));
        let config = store.remove_admin(addr(1), addr(5)).await.unwrap();
        assert!(!config.is_admin(&addr(5)));
    }
}
