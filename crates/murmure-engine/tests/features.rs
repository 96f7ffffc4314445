//! Reactions, edits, deletes, typing indicators and chunked attachments.

mod common;

use common::{dm_pair, drain_events, settle};
use murmure_engine::EngineEvent;
use murmure_net::MemoryBus;
use murmure_shared::constants::ATTACHMENT_CHUNK_SIZE;
use murmure_store::MessageKind;

#[tokio::test]
async fn reactions_are_idempotent_by_id() {
    let bus = MemoryBus::new();
    let (a, b, cid) = dm_pair(&bus).await;

    let message_id = a.engine.send_text(&cid, "réagis!", None).await.unwrap();
    settle(&bus, &[&a, &b]).await;

    b.engine
        .send_reaction(&cid, &message_id, "👍")
        .await
        .unwrap();
    bus.pump();
    b.endpoint.drain(); // own echo

    let deliveries = a.endpoint.drain();
    for (topic, data) in &deliveries {
        a.engine.handle_inbound(topic, data).await;
        // Replay the same envelope; the reaction id dedups it.
        a.engine.handle_inbound(topic, data).await;
    }

    let reactions = a.engine.reactions(&message_id).unwrap();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].emoji, "👍");
    assert_eq!(reactions[0].from, b.chat_key);

    // The sender kept its own copy too.
    assert_eq!(b.engine.reactions(&message_id).unwrap().len(), 1);
}

#[tokio::test]
async fn edit_propagates_and_keeps_id() {
    let bus = MemoryBus::new();
    let (a, b, cid) = dm_pair(&bus).await;

    let message_id = a.engine.send_text(&cid, "brouillon", None).await.unwrap();
    settle(&bus, &[&a, &b]).await;

    a.engine
        .edit_message(&cid, &message_id, "version finale")
        .await
        .unwrap();
    settle(&bus, &[&a, &b]).await;

    for node in [&a, &b] {
        let message = node
            .engine
            .messages(&cid)
            .unwrap()
            .into_iter()
            .find(|m| m.id == message_id)
            .unwrap();
        assert_eq!(message.body, "version finale");
        assert!(message.edited);
    }
}

#[tokio::test]
async fn edit_of_unseen_target_is_dropped() {
    let bus = MemoryBus::new();
    let (a, b, cid) = dm_pair(&bus).await;

    let message_id = a.engine.send_text(&cid, "original", None).await.unwrap();
    bus.pump();
    a.endpoint.drain();
    b.endpoint.drain(); // B never sees the original

    a.engine
        .edit_message(&cid, &message_id, "modifié")
        .await
        .unwrap();
    settle(&bus, &[&a, &b]).await;

    // B has neither the original nor a ghost of the edit.
    assert!(!b
        .engine
        .messages(&cid)
        .unwrap()
        .iter()
        .any(|m| m.id == message_id));
}

#[tokio::test]
async fn delete_leaves_empty_tombstone() {
    let bus = MemoryBus::new();
    let (a, b, cid) = dm_pair(&bus).await;

    let message_id = a.engine.send_text(&cid, "à effacer", None).await.unwrap();
    settle(&bus, &[&a, &b]).await;

    a.engine.delete_message(&cid, &message_id).await.unwrap();
    settle(&bus, &[&a, &b]).await;

    for node in [&a, &b] {
        let message = node
            .engine
            .messages(&cid)
            .unwrap()
            .into_iter()
            .find(|m| m.id == message_id)
            .unwrap();
        assert!(message.deleted);
        assert!(message.body.is_empty());
    }
}

#[tokio::test]
async fn typing_indicator_is_transient() {
    let bus = MemoryBus::new();
    let (a, mut b, cid) = dm_pair(&bus).await;

    a.engine.set_typing(&cid, true).await.unwrap();
    settle(&bus, &[&a, &b]).await;

    assert_eq!(b.engine.typing_peers(&cid).unwrap(), vec![a.chat_key.clone()]);
    assert!(drain_events(&mut b)
        .iter()
        .any(|e| matches!(e, EngineEvent::Typing { is_typing: true, .. })));

    a.engine.set_typing(&cid, false).await.unwrap();
    settle(&bus, &[&a, &b]).await;
    assert!(b.engine.typing_peers(&cid).unwrap().is_empty());

    // Nothing about typing was ever persisted as a message.
    assert!(!b
        .engine
        .messages(&cid)
        .unwrap()
        .iter()
        .any(|m| m.kind == MessageKind::Typing));
}

#[tokio::test]
async fn attachment_chunks_reassemble() {
    let bus = MemoryBus::new();
    let (a, mut b, cid) = dm_pair(&bus).await;

    // Two full chunks plus a remainder.
    let blob: Vec<u8> = (0..(2 * ATTACHMENT_CHUNK_SIZE + 5000))
        .map(|i| (i % 251) as u8)
        .collect();

    let attachment_id = a
        .engine
        .send_attachment(&cid, "photo.png", "image/png", &blob)
        .await
        .unwrap();
    settle(&bus, &[&a, &b]).await;

    let attachment = b.engine.attachment(&attachment_id).unwrap().unwrap();
    assert!(attachment.complete);
    assert_eq!(attachment.name, "photo.png");
    assert_eq!(attachment.mime, "image/png");
    assert_eq!(attachment.total_chunks, 3);
    assert_eq!(attachment.received_chunks, 3);
    assert_eq!(attachment.size, blob.len() as u64);

    assert_eq!(b.engine.attachment_bytes(&attachment_id).unwrap().unwrap(), blob);
    assert!(drain_events(&mut b)
        .iter()
        .any(|e| matches!(e, EngineEvent::AttachmentComplete { .. })));

    // The metadata message is displayable on both sides.
    for node in [&a, &b] {
        assert!(node
            .engine
            .messages(&cid)
            .unwrap()
            .iter()
            .any(|m| m.kind == MessageKind::AttachmentMeta
                && m.attachment_id.as_deref() == Some(attachment_id.as_str())));
    }
}

#[tokio::test]
async fn partial_attachment_reports_progress() {
    let bus = MemoryBus::new();
    let (a, mut b, cid) = dm_pair(&bus).await;

    let blob: Vec<u8> = vec![7u8; 3 * ATTACHMENT_CHUNK_SIZE];
    let attachment_id = a
        .engine
        .send_attachment(&cid, "gros.bin", "application/octet-stream", &blob)
        .await
        .unwrap();
    bus.pump();
    a.endpoint.drain();

    // Deliver the meta and the first two chunks only.
    let deliveries = b.endpoint.drain();
    assert_eq!(deliveries.len(), 4);
    for (topic, data) in deliveries.iter().take(3) {
        b.engine.handle_inbound(topic, data).await;
    }

    let attachment = b.engine.attachment(&attachment_id).unwrap().unwrap();
    assert!(!attachment.complete);
    assert_eq!(attachment.received_chunks, 2);
    assert!(attachment.data.is_none());
    assert!(drain_events(&mut b).iter().any(|e| matches!(
        e,
        EngineEvent::AttachmentProgress { received: 2, total: 3, .. }
    )));

    // The tail arrives later; the blob completes.
    let (topic, data) = &deliveries[3];
    b.engine.handle_inbound(topic, data).await;
    assert_eq!(b.engine.attachment_bytes(&attachment_id).unwrap().unwrap(), blob);
}
