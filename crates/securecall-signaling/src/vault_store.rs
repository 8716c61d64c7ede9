//! Vault persistence boundary.
//!
//! The store owns the persisted vault fields per identity; the crypto
//! layer never touches storage itself. Writes replace the whole record at
//! once — a password change swaps public key, wrapped private key, salt,
//! and IV in a single put, so partial vault state cannot be observed.

use async_trait::async_trait;
use dashmap::DashMap;

use securecall_protocol::records::{Identity, VaultRecord, VaultState};
use securecall_protocol::types::IdentityId;

/// Authorized vault-record persistence.
///
/// `put` takes the writing identity's own id: the API shape restricts
/// writes to the caller's record, there is no way to address someone
/// else's vault.
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// The identity's vault state, `Absent` when none was ever created.
    async fn get(&self, identity: &IdentityId) -> VaultState;

    /// Atomic full replace of the identity's vault record.
    async fn put(&self, identity: &IdentityId, record: VaultRecord);

    /// The identity row as readers see it.
    async fn identity(&self, id: &IdentityId) -> Identity {
        Identity {
            id: id.clone(),
            vault: self.get(id).await,
        }
    }
}

/// In-memory vault store.
#[derive(Default)]
pub struct MemoryVaultStore {
    records: DashMap<IdentityId, VaultRecord>,
}

impl MemoryVaultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VaultStore for MemoryVaultStore {
    async fn get(&self, identity: &IdentityId) -> VaultState {
        match self.records.get(identity) {
            Some(record) => VaultState::Present(record.clone()),
            None => VaultState::Absent,
        }
    }

    async fn put(&self, identity: &IdentityId, record: VaultRecord) {
        self.records.insert(identity.clone(), record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use securecall_protocol::records::VAULT_VERSION;

    fn record(tag: &str) -> VaultRecord {
        VaultRecord {
            version: VAULT_VERSION,
            public_key: format!("pub-{tag}"),
            wrapped_private_key: format!("wrapped-{tag}"),
            salt: format!("salt-{tag}"),
            iv: format!("iv-{tag}"),
        }
    }

    #[tokio::test]
    async fn missing_vault_is_absent() {
        let store = MemoryVaultStore::new();
        assert!(!store.get(&IdentityId::from("alice")).await.is_present());
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryVaultStore::new();
        let alice = IdentityId::from("alice");
        store.put(&alice, record("a")).await;
        assert_eq!(store.get(&alice).await, VaultState::Present(record("a")));
    }

    #[tokio::test]
    async fn put_replaces_the_whole_record() {
        // A password change must swap all four fields at once; no field of
        // the old vault may survive.
        let store = MemoryVaultStore::new();
        let alice = IdentityId::from("alice");
        store.put(&alice, record("old")).await;
        store.put(&alice, record("new")).await;
        assert_eq!(store.get(&alice).await, VaultState::Present(record("new")));
    }

    #[tokio::test]
    async fn identity_row_reflects_vault_state() {
        let store = MemoryVaultStore::new();
        let alice = IdentityId::from("alice");

        let row = store.identity(&alice).await;
        assert_eq!(row.id, alice);
        assert_eq!(row.vault.record(), None);

        store.put(&alice, record("a")).await;
        let row = store.identity(&alice).await;
        assert_eq!(row.vault.record(), Some(&record("a")));
    }
}
