// End-to-end walkthrough: vault setup, challenge-response authentication,
// and a full call between two participants sharing one record store.
// Run with: cargo run -p securecall-signaling --example call_flow

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use securecall_crypto::{create_vault, sign_challenge};
use securecall_protocol::error::SignalingError;
use securecall_protocol::events::CallFilter;
use securecall_protocol::types::{CallSide, IdentityId};
use securecall_signaling::{
    CallRecordStore, CallSession, CallSignalingCoordinator, ChallengeAuthenticator,
    MemoryCallRecordStore, MemoryVaultStore, PeerConnectionAdapter, VaultStore,
};

/// Stand-in for the real media layer: prints what signaling hands it and
/// fabricates descriptions on request.
struct PrintAdapter {
    name: &'static str,
    local_description: &'static str,
}

#[async_trait]
impl PeerConnectionAdapter for PrintAdapter {
    async fn create_local_description(&mut self) -> Result<String, SignalingError> {
        Ok(self.local_description.to_owned())
    }

    async fn apply_remote_description(&mut self, description: &str) -> Result<(), SignalingError> {
        println!("[{} adapter] applying remote description: {description}", self.name);
        Ok(())
    }

    async fn add_remote_candidate(&mut self, candidate: &str) -> Result<(), SignalingError> {
        println!("[{} adapter] adding remote candidate: {candidate}", self.name);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let alice = IdentityId::from("alice");
    let bob = IdentityId::from("bob");

    // ── Vault setup (registration-time, once per identity) ────────────
    let vaults = Arc::new(MemoryVaultStore::new());
    let alice_vault = create_vault("alice's password")?;
    let bob_vault = create_vault("bob's password")?;
    vaults.put(&alice, alice_vault.record.clone()).await;
    vaults.put(&bob, bob_vault.record.clone()).await;
    println!("[OK] vaults created and stored");

    // ── Challenge-response: each side proves key possession ───────────
    let authenticator = ChallengeAuthenticator::new(vaults);

    let for_alice = authenticator.create_challenge(&bob, &alice)?;
    let signature = sign_challenge(&alice_vault.private_key, &for_alice.nonce)?;
    let status = authenticator.verify_signature(&for_alice.id, &signature).await?;
    println!("[OK] alice's challenge resolved: {status}");
    let alice_auth = authenticator.auth_context_for(&for_alice.id)?;

    let for_bob = authenticator.create_challenge(&alice, &bob)?;
    let signature = sign_challenge(&bob_vault.private_key, &for_bob.nonce)?;
    let status = authenticator.verify_signature(&for_bob.id, &signature).await?;
    println!("[OK] bob's challenge resolved: {status}");
    let bob_auth = authenticator.auth_context_for(&for_bob.id)?;

    // ── Call signaling over the shared record store ───────────────────
    let store = Arc::new(MemoryCallRecordStore::new());
    let alice_coord = CallSignalingCoordinator::authenticated(store.clone(), alice_auth);
    let bob_coord = CallSignalingCoordinator::authenticated(store.clone(), bob_auth);

    let record = alice_coord.initiate(&bob).await?;
    println!("[OK] call {} initiated ({})", record.id, record.status);

    // Subscribe both sides before any payload lands so nothing is missed.
    let alice_events = store.subscribe(CallFilter::for_call(record.id.clone()));
    let bob_events = store.subscribe(CallFilter::for_call(record.id.clone()));
    let (_alice_tx, alice_rx) = mpsc::channel(16);
    let (_bob_tx, bob_rx) = mpsc::channel(16);

    let mut alice_session = CallSession::new(
        record.id.clone(),
        CallSide::Caller,
        alice_coord.clone(),
        Box::new(PrintAdapter { name: "alice", local_description: "sdp:alice-offer" }),
        alice_events,
        alice_rx,
    );
    let mut bob_session = CallSession::new(
        record.id.clone(),
        CallSide::Callee,
        bob_coord.clone(),
        Box::new(PrintAdapter { name: "bob", local_description: "sdp:bob-answer" }),
        bob_events,
        bob_rx,
    );

    // Alice trickles candidates before her offer even lands; the callee
    // session must buffer them and flush after applying the description.
    alice_coord.add_ice_candidate(&record.id, "cand:alice-1").await?;
    alice_coord.add_ice_candidate(&record.id, "cand:alice-2").await?;

    alice_session.publish_local_description().await?;
    println!("[OK] offer attached");

    let accepted = bob_coord.accept(&record.id).await?;
    println!("[OK] bob accepted ({})", accepted.status);

    bob_session.publish_local_description().await?;
    let connected = store.get(&record.id).await?;
    println!("[OK] answer attached ({})", connected.status);

    bob_coord.add_ice_candidate(&record.id, "cand:bob-1").await?;

    let ended = alice_coord.end(&record.id).await?;
    println!("[OK] alice hung up ({})", ended.status);

    // Drain both sessions; each stops at the terminal status.
    drop(_alice_tx);
    drop(_bob_tx);
    bob_session.run().await?;
    alice_session.run().await?;

    println!("\n=== call lifecycle complete ===");
    Ok(())
}
