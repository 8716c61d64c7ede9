//! Challenge-response authentication.
//!
//! The challenger asks the system for a nonce; the target signs it with
//! their unwrapped private key; the system verifies the signature against
//! the target's stored public key and resolves the challenge. The nonce
//! never reaches the target through this channel — it travels out-of-band
//! (typically both sides already share it via the call record).
//!
//! Trust boundary: only this authenticator resolves challenges, and an
//! [`AuthContext`] can only be minted from a challenge it has marked
//! Verified. Peers cannot promote themselves.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use securecall_crypto::{generate_nonce, verify_challenge, CryptoError};
use securecall_protocol::error::SignalingError;
use securecall_protocol::records::{Challenge, ChallengeStatus, VaultState, VAULT_VERSION};
use securecall_protocol::types::{ChallengeId, IdentityId};

use crate::vault_store::VaultStore;

/// What the challenger gets back: the challenge id to poll and the nonce
/// to be signed by the target.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub id: ChallengeId,
    pub nonce: String,
}

/// A verified caller identity.
///
/// The private constructor path is deliberate: the only ways to obtain one
/// are [`ChallengeAuthenticator::auth_context_for`] and
/// [`AuthContext::from_verified_challenge`], both of which require a
/// challenge that already resolved to Verified.
#[derive(Debug, Clone)]
pub struct AuthContext {
    identity: IdentityId,
}

impl AuthContext {
    /// The authenticated identity (the challenge target who proved key
    /// possession).
    pub fn identity(&self) -> &IdentityId {
        &self.identity
    }

    /// Mint a context from a resolved challenge. Anything but Verified is
    /// refused.
    pub fn from_verified_challenge(challenge: &Challenge) -> Result<Self, SignalingError> {
        match challenge.status {
            ChallengeStatus::Verified => Ok(Self {
                identity: challenge.target_id.clone(),
            }),
            _ => Err(SignalingError::NotAuthenticated),
        }
    }
}

/// Issues and resolves proof-of-key-possession challenges.
///
/// Challenges are retained after resolution as an audit trail; there is no
/// deletion path.
pub struct ChallengeAuthenticator {
    vaults: Arc<dyn VaultStore>,
    challenges: DashMap<ChallengeId, Challenge>,
}

impl ChallengeAuthenticator {
    pub fn new(vaults: Arc<dyn VaultStore>) -> Self {
        Self {
            vaults,
            challenges: DashMap::new(),
        }
    }

    /// Issue a Pending challenge against `target`. The returned nonce goes
    /// to the challenger only.
    pub fn create_challenge(
        &self,
        challenger: &IdentityId,
        target: &IdentityId,
    ) -> Result<IssuedChallenge, SignalingError> {
        let nonce = generate_nonce().map_err(crypto_error)?;
        let challenge = Challenge {
            id: ChallengeId::from(Uuid::new_v4().to_string()),
            nonce: nonce.clone(),
            challenger_id: challenger.clone(),
            target_id: target.clone(),
            status: ChallengeStatus::Pending,
        };
        let id = challenge.id.clone();
        self.challenges.insert(id.clone(), challenge);
        Ok(IssuedChallenge { id, nonce })
    }

    /// Resolve a Pending challenge against the submitted signature.
    ///
    /// Returns the resulting status: Verified when the signature checks
    /// out against the target's stored public key, Failed when it is
    /// cryptographically invalid. A challenge that already resolved is
    /// never re-verified — its nonce is spent.
    pub async fn verify_signature(
        &self,
        challenge_id: &ChallengeId,
        signature_b64: &str,
    ) -> Result<ChallengeStatus, SignalingError> {
        let (target_id, nonce, status) = {
            let challenge = self
                .challenges
                .get(challenge_id)
                .ok_or_else(|| SignalingError::ChallengeNotFound(challenge_id.clone()))?;
            (
                challenge.target_id.clone(),
                challenge.nonce.clone(),
                challenge.status,
            )
        };
        if status.is_resolved() {
            return Err(SignalingError::invalid_transition(
                status,
                "re-verify a resolved challenge",
            ));
        }

        let vault = match self.vaults.get(&target_id).await {
            VaultState::Present(record) => record,
            VaultState::Absent => {
                return Err(SignalingError::MissingPublicKey(target_id.clone()))
            }
        };
        if vault.version != VAULT_VERSION {
            return Err(SignalingError::Crypto(
                CryptoError::UnsupportedVaultVersion(vault.version).to_string(),
            ));
        }

        let valid = verify_challenge(&vault.public_key, signature_b64, &nonce)
            .map_err(crypto_error)?;

        // Re-check under the lock: a concurrent resolution wins and this
        // attempt becomes the routine duplicate error.
        let mut challenge = self
            .challenges
            .get_mut(challenge_id)
            .ok_or_else(|| SignalingError::ChallengeNotFound(challenge_id.clone()))?;
        if challenge.status.is_resolved() {
            return Err(SignalingError::invalid_transition(
                challenge.status,
                "re-verify a resolved challenge",
            ));
        }

        challenge.status = if valid {
            ChallengeStatus::Verified
        } else {
            ChallengeStatus::Failed
        };

        if valid {
            info!(%challenge_id, target = %target_id, "challenge verified");
        } else {
            warn!(%challenge_id, target = %target_id, "challenge signature invalid");
        }

        Ok(challenge.status)
    }

    /// Mint the verified identity for a challenge, if and only if it
    /// resolved to Verified.
    pub fn auth_context_for(&self, challenge_id: &ChallengeId) -> Result<AuthContext, SignalingError> {
        let challenge = self
            .challenges
            .get(challenge_id)
            .ok_or_else(|| SignalingError::ChallengeNotFound(challenge_id.clone()))?;
        AuthContext::from_verified_challenge(&challenge)
    }

    /// Audit lookup.
    pub fn get(&self, challenge_id: &ChallengeId) -> Option<Challenge> {
        self.challenges.get(challenge_id).map(|c| c.clone())
    }
}

fn crypto_error(err: CryptoError) -> SignalingError {
    match err {
        CryptoError::MalformedInput(msg) => SignalingError::MalformedInput(msg),
        other => SignalingError::Crypto(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;
    use crate::vault_store::MemoryVaultStore;
    use securecall_crypto::{create_vault, sign_challenge, CreatedVault};

    fn vault() -> &'static CreatedVault {
        static VAULT: OnceLock<CreatedVault> = OnceLock::new();
        VAULT.get_or_init(|| create_vault("target password").unwrap())
    }

    async fn setup() -> (ChallengeAuthenticator, IdentityId, IdentityId) {
        let store = Arc::new(MemoryVaultStore::new());
        let challenger = IdentityId::from("bob");
        let target = IdentityId::from("alice");
        store.put(&target, vault().record.clone()).await;
        (ChallengeAuthenticator::new(store), challenger, target)
    }

    #[tokio::test]
    async fn valid_signature_verifies_the_challenge() {
        let (auth, challenger, target) = setup().await;
        let issued = auth.create_challenge(&challenger, &target).unwrap();

        let signature = sign_challenge(&vault().private_key, &issued.nonce).unwrap();
        let status = auth.verify_signature(&issued.id, &signature).await.unwrap();
        assert_eq!(status, ChallengeStatus::Verified);

        let ctx = auth.auth_context_for(&issued.id).unwrap();
        assert_eq!(ctx.identity(), &target);
    }

    #[tokio::test]
    async fn a_resolved_challenge_is_never_reverified() {
        let (auth, challenger, target) = setup().await;
        let issued = auth.create_challenge(&challenger, &target).unwrap();
        let signature = sign_challenge(&vault().private_key, &issued.nonce).unwrap();
        auth.verify_signature(&issued.id, &signature).await.unwrap();

        // Same nonce, same (valid) signature: the nonce is spent.
        let err = auth
            .verify_signature(&issued.id, &signature)
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn wrong_nonce_signature_fails_the_challenge() {
        let (auth, challenger, target) = setup().await;
        let issued = auth.create_challenge(&challenger, &target).unwrap();

        let signature = sign_challenge(&vault().private_key, "some other nonce").unwrap();
        let status = auth.verify_signature(&issued.id, &signature).await.unwrap();
        assert_eq!(status, ChallengeStatus::Failed);

        // A Failed challenge yields no identity.
        let err = auth.auth_context_for(&issued.id).unwrap_err();
        assert!(matches!(err, SignalingError::NotAuthenticated));
    }

    #[tokio::test]
    async fn unknown_challenge_id() {
        let (auth, ..) = setup().await;
        let err = auth
            .verify_signature(&ChallengeId::from("missing"), "sig")
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::ChallengeNotFound(_)));
    }

    #[tokio::test]
    async fn target_without_a_vault_has_no_public_key() {
        let (auth, challenger, _) = setup().await;
        let keyless = IdentityId::from("carol");
        let issued = auth.create_challenge(&challenger, &keyless).unwrap();
        let err = auth.verify_signature(&issued.id, "sig").await.unwrap_err();
        assert!(matches!(err, SignalingError::MissingPublicKey(id) if id == keyless));
    }

    #[tokio::test]
    async fn challenges_are_retained_after_resolution() {
        let (auth, challenger, target) = setup().await;
        let issued = auth.create_challenge(&challenger, &target).unwrap();
        let signature = sign_challenge(&vault().private_key, &issued.nonce).unwrap();
        auth.verify_signature(&issued.id, &signature).await.unwrap();

        let stored = auth.get(&issued.id).unwrap();
        assert_eq!(stored.status, ChallengeStatus::Verified);
        assert_eq!(stored.challenger_id, challenger);
    }

    #[test]
    fn auth_context_requires_verified() {
        let base = Challenge {
            id: ChallengeId::from("c"),
            nonce: "n".into(),
            challenger_id: IdentityId::from("bob"),
            target_id: IdentityId::from("alice"),
            status: ChallengeStatus::Pending,
        };
        assert!(AuthContext::from_verified_challenge(&base).is_err());

        let failed = Challenge {
            status: ChallengeStatus::Failed,
            ..base.clone()
        };
        assert!(AuthContext::from_verified_challenge(&failed).is_err());

        let verified = Challenge {
            status: ChallengeStatus::Verified,
            ..base
        };
        let ctx = AuthContext::from_verified_challenge(&verified).unwrap();
        assert_eq!(ctx.identity(), &IdentityId::from("alice"));
    }
}
