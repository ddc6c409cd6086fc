//! Full flow against live CA and chat listeners on loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use certchat_client::{CaClient, ChatClient, ClientError, ClientEvent, Credentials, Identity};
use certchat_core::pending::DirPendingStore;
use certchat_core::wire::DEFAULT_MAX_FRAME_BYTES;
use certchat_crypto::{generate_key_pair, CertificateAuthority, SerialNumberGenerator};
use certchat_server::{CaService, ChatService, Registry, ServerMetrics};

const MAX: usize = DEFAULT_MAX_FRAME_BYTES;

struct Deployment {
    ca_addr: SocketAddr,
    chat_addr: SocketAddr,
    store: DirPendingStore,
    shutdown: CancellationToken,
    _spool: tempfile::TempDir,
}

impl Drop for Deployment {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn deploy(chat_verifies: bool) -> Deployment {
    let spool = tempfile::TempDir::new().unwrap();
    let store = DirPendingStore::open(spool.path().join("pending")).unwrap();
    let authority = Arc::new(
        CertificateAuthority::new(
            "CA",
            generate_key_pair(1024).unwrap(),
            SerialNumberGenerator::new(),
        )
        .unwrap(),
    );
    let metrics = ServerMetrics::default();
    let shutdown = CancellationToken::new();

    let ca = Arc::new(CaService::new(
        authority.clone(),
        Arc::new(store.clone()),
        metrics.clone(),
        MAX,
    ));
    let ca_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ca_addr = ca_listener.local_addr().unwrap();
    tokio::spawn(ca.run(ca_listener, shutdown.clone()));

    let mut chat = ChatService::new(Arc::new(Registry::new()), metrics, 16, MAX);
    if chat_verifies {
        chat = chat.with_ca_public_key(authority.public_key().clone());
    }
    let chat_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let chat_addr = chat_listener.local_addr().unwrap();
    tokio::spawn(Arc::new(chat).run(chat_listener, shutdown.clone()));

    Deployment {
        ca_addr,
        chat_addr,
        store,
        shutdown,
        _spool: spool,
    }
}

async fn credentials(env: &Deployment, name: &str) -> Credentials {
    let identity = Identity::generate(name, 1024).unwrap();
    let mut ca = CaClient::connect(env.ca_addr, MAX).await.unwrap();
    ca.sign(&identity, &env.store).await.unwrap()
}

async fn next(client: &mut ChatClient) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), client.next_event())
        .await
        .expect("timed out waiting for an event")
        .unwrap()
        .expect("connection closed")
}

#[tokio::test]
async fn alice_and_bob() {
    let env = deploy(true).await;

    let alice_creds = credentials(&env, "alice").await;
    let mut alice = ChatClient::connect(env.chat_addr, MAX).await.unwrap();
    alice.register("alice").await.unwrap();
    let joined = alice.login(&alice_creds).await.unwrap();
    assert!(joined.is_empty(), "alice is first: empty LOGGED_USERS");

    let bob_creds = credentials(&env, "bob").await;
    let mut bob = ChatClient::connect(env.chat_addr, MAX).await.unwrap();
    bob.register("bob").await.unwrap();
    let joined = bob.login(&bob_creds).await.unwrap();
    assert_eq!(joined, vec![ClientEvent::PeerJoined("alice".into())]);

    assert_eq!(next(&mut alice).await, ClientEvent::PeerJoined("bob".into()));
    assert_eq!(alice.peers().unwrap().names(), vec!["bob"]);

    let sent = bob.send_line("@alice hello").await.unwrap();
    assert_eq!(sent.recipients, vec!["alice"]);
    assert_eq!(
        next(&mut alice).await,
        ClientEvent::Message {
            from: "bob".into(),
            body: "hello".into(),
            trusted: true,
        }
    );

    bob.logout().await.unwrap();
    assert_eq!(next(&mut alice).await, ClientEvent::PeerLeft("bob".into()));
    assert!(alice.peers().unwrap().is_empty());
}

#[tokio::test]
async fn line_without_recipient_sends_nothing() {
    let env = deploy(true).await;
    let creds = credentials(&env, "alice").await;
    let mut alice = ChatClient::connect(env.chat_addr, MAX).await.unwrap();
    alice.register("alice").await.unwrap();
    alice.login(&creds).await.unwrap();

    assert!(matches!(
        alice.send_line("hello nobody").await,
        Err(ClientError::NoRecipients)
    ));
}

#[tokio::test]
async fn duplicate_registration_is_refused() {
    let env = deploy(true).await;
    let mut first = ChatClient::connect(env.chat_addr, MAX).await.unwrap();
    let mut second = ChatClient::connect(env.chat_addr, MAX).await.unwrap();

    first.register("carol").await.unwrap();
    match second.register("carol").await {
        Err(ClientError::Rejected(reason)) => assert_eq!(reason, "Failed"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn signing_without_deposit_is_refused() {
    let env = deploy(true).await;
    let identity = Identity::generate("dave", 1024).unwrap();
    let other_spool = tempfile::TempDir::new().unwrap();
    let elsewhere = DirPendingStore::open(other_spool.path()).unwrap();

    let mut ca = CaClient::connect(env.ca_addr, MAX).await.unwrap();
    match ca.sign(&identity, &elsewhere).await {
        Err(ClientError::Rejected(reason)) => assert_eq!(reason, "Not found: dave.pem"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn ca_validates_its_own_certificates() {
    let env = deploy(true).await;
    let creds = credentials(&env, "erin").await;

    let mut ca = CaClient::connect(env.ca_addr, MAX).await.unwrap();
    assert!(ca.validate(creds.encoded(), "erin").await.unwrap());

    let key = ca.public_key("erin").await.unwrap();
    assert!(key.public_eq(creds.ca_public_key()));

    let rogue = deploy(true).await;
    let foreign = credentials(&rogue, "erin").await;
    assert!(!ca.validate(foreign.encoded(), "erin").await.unwrap());
}

#[tokio::test]
async fn peer_signed_by_another_ca_is_discarded() {
    // The relay does not check signatures here, so only the client stands
    // between alice and a forged announcement.
    let env = deploy(false).await;
    let rogue = deploy(true).await;

    let alice_creds = credentials(&env, "alice").await;
    let mut alice = ChatClient::connect(env.chat_addr, MAX).await.unwrap();
    alice.register("alice").await.unwrap();
    alice.login(&alice_creds).await.unwrap();

    let forged = credentials(&rogue, "mallory").await;
    let mut mallory = ChatClient::connect(env.chat_addr, MAX).await.unwrap();
    mallory.register("mallory").await.unwrap();
    mallory.login(&forged).await.unwrap();

    assert!(matches!(
        next(&mut alice).await,
        ClientEvent::PeerRejected { .. }
    ));
    assert!(alice.peers().unwrap().is_empty());

    mallory.send_line("@alice trust me").await.unwrap();
    match next(&mut alice).await {
        ClientEvent::Message { from, trusted, .. } => {
            assert_eq!(from, "mallory");
            assert!(!trusted);
        }
        other => panic!("expected message, got {other:?}"),
    }
}
