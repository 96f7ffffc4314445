//! Encrypted backup round-trip through a fresh engine.

mod common;

use common::{bare_node, dm_pair, settle};
use murmure_engine::EngineError;
use murmure_net::MemoryBus;
use murmure_shared::CryptoError;
use murmure_store::StoreError;

#[tokio::test]
async fn backup_restore_roundtrip() {
    let bus = MemoryBus::new();
    let (a, b, cid) = dm_pair(&bus).await;

    for i in 0..5 {
        a.engine
            .send_text(&cid, &format!("de A numéro {i}"), None)
            .await
            .unwrap();
        settle(&bus, &[&a, &b]).await;
        b.engine
            .send_text(&cid, &format!("de B numéro {i}"), None)
            .await
            .unwrap();
        settle(&bus, &[&a, &b]).await;
    }
    let first = a
        .engine
        .messages(&cid)
        .unwrap()
        .into_iter()
        .find(|m| m.body == "de A numéro 0")
        .unwrap()
        .id;
    b.engine.send_reaction(&cid, &first, "🎉").await.unwrap();
    settle(&bus, &[&a, &b]).await;

    let payload = a.engine.backup("pw").unwrap();

    // "Wipe" is a brand-new engine over an empty store.
    let restored = bare_node(&bus);
    restored.engine.restore(&payload, "pw").await.unwrap();
    bus.pump(); // let the re-subscriptions land

    assert_eq!(restored.engine.chats().unwrap(), a.engine.chats().unwrap());
    assert_eq!(
        restored.engine.messages(&cid).unwrap(),
        a.engine.messages(&cid).unwrap()
    );
    assert_eq!(
        restored.engine.requests().unwrap(),
        a.engine.requests().unwrap()
    );
    assert_eq!(
        restored.engine.reactions(&first).unwrap(),
        a.engine.reactions(&first).unwrap()
    );
    assert_eq!(
        restored.engine.session(&cid).unwrap(),
        a.engine.session(&cid).unwrap()
    );

    // The restored identity is sealed; the original passphrase opens it.
    assert!(!restored.engine.is_unlocked());
    assert!(restored.engine.unlock("pa").await.unwrap());
    assert_eq!(restored.engine.chat_key().unwrap(), a.chat_key);

    // And the restored session picks up the conversation where it left
    // off: B's next message decrypts on the restored engine.
    b.engine
        .send_text(&cid, "après restauration", None)
        .await
        .unwrap();
    settle(&bus, &[&a, &b, &restored]).await;
    assert!(restored
        .engine
        .messages(&cid)
        .unwrap()
        .iter()
        .any(|m| m.body == "après restauration"));
}

#[tokio::test]
async fn wrong_passphrase_leaves_state_untouched() {
    let bus = MemoryBus::new();
    let (a, b, cid) = dm_pair(&bus).await;
    a.engine.send_text(&cid, "secret", None).await.unwrap();
    settle(&bus, &[&a, &b]).await;

    let payload = a.engine.backup("pw").unwrap();

    let fresh = bare_node(&bus);
    let err = fresh.engine.restore(&payload, "wrong").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Store(StoreError::Crypto(CryptoError::BadPassphrase))
    ));
    assert!(fresh.engine.chats().unwrap().is_empty());
    assert!(fresh.engine.requests().unwrap().is_empty());

    // The original engine is also untouched by its own backup call.
    assert_eq!(a.engine.chats().unwrap().len(), 1);
}

#[tokio::test]
async fn backup_envelope_is_opaque_json() {
    let bus = MemoryBus::new();
    let (a, _b, cid) = dm_pair(&bus).await;

    let payload = a.engine.backup("pw").unwrap();
    let value: serde_json::Value = serde_json::from_str(&payload).unwrap();

    // Only the sealed fields are visible; no plaintext leaks.
    assert!(value.get("ciphertext").is_some());
    assert!(value.get("iv").is_some());
    assert!(value.get("salt").is_some());
    assert!(!payload.contains(&cid));
    assert!(!payload.contains("participants"));
}
