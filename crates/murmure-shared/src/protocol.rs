//! Versioned JSON wire envelope.
//!
//! Every payload on the gossip network is one UTF-8 JSON envelope carrying
//! `v`, a `type` tag and a millisecond `timestamp`. Binary fields travel as
//! base64, chat-keys as base58. Anything that fails to parse, carries an
//! unknown type or the wrong version is [`CodecError::BadInput`] territory
//! and gets dropped by the inbound pipeline.
//!
//! The ratchet-sealed *inner* payload is a second JSON object tagged by
//! `kind`; it never appears on the wire in the clear.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::constants::ENVELOPE_VERSION;
use crate::error::CodecError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub v: u8,
    #[serde(flatten)]
    pub body: EnvelopeBody,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// One independently sealed copy of a group payload, addressed to a single
/// member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SealedRecipient {
    pub to_pub_key: String,
    pub n: u64,
    pub nonce: String,
    pub ciphertext: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvelopeBody {
    #[serde(rename_all = "camelCase")]
    ChatRequest {
        request_id: String,
        from_pub_key: String,
        to_pub_key: String,
        nonce: String,
        ciphertext: String,
    },
    #[serde(rename_all = "camelCase")]
    ChatAccept {
        request_id: String,
        from_pub_key: String,
        to_pub_key: String,
        conversation_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ChatDeclined {
        request_id: String,
        from_pub_key: String,
        to_pub_key: String,
        conversation_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ChatBlocked {
        request_id: String,
        from_pub_key: String,
        to_pub_key: String,
        conversation_id: String,
    },
    #[serde(rename_all = "camelCase")]
    GroupInvite {
        from_pub_key: String,
        to_pub_key: String,
        nonce: String,
        ciphertext: String,
    },
    #[serde(rename_all = "camelCase")]
    GroupAccepted {
        request_id: String,
        group_id: String,
        from_pub_key: String,
        to_pub_key: String,
    },
    #[serde(rename_all = "camelCase")]
    GroupDeclined {
        request_id: String,
        group_id: String,
        from_pub_key: String,
        to_pub_key: String,
    },
    #[serde(rename_all = "camelCase")]
    GroupBlocked {
        request_id: String,
        group_id: String,
        from_pub_key: String,
        to_pub_key: String,
    },
    #[serde(rename_all = "camelCase")]
    DmMessage {
        conversation_id: String,
        message_id: String,
        from_pub_key: String,
        n: u64,
        nonce: String,
        ciphertext: String,
    },
    #[serde(rename_all = "camelCase")]
    DmAck {
        conversation_id: String,
        message_id: String,
        from_pub_key: String,
        to_pub_key: String,
    },
    #[serde(rename_all = "camelCase")]
    GroupMessage {
        group_id: String,
        message_id: String,
        from_pub_key: String,
        sealed: Vec<SealedRecipient>,
    },
}

impl Envelope {
    pub fn new(body: EnvelopeBody) -> Self {
        Self {
            v: ENVELOPE_VERSION,
            body,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.v != ENVELOPE_VERSION {
            return Err(CodecError::BadVersion(envelope.v));
        }
        Ok(envelope)
    }
}

/// Ratchet-sealed conversation payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InnerPayload {
    #[serde(rename_all = "camelCase")]
    Text {
        body: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Reaction { message_id: String, emoji: String },
    #[serde(rename_all = "camelCase")]
    Edit { message_id: String, body: String },
    #[serde(rename_all = "camelCase")]
    Delete { message_id: String },
    #[serde(rename_all = "camelCase")]
    Typing { is_typing: bool },
    #[serde(rename_all = "camelCase")]
    AttachmentMeta {
        attachment_id: String,
        name: String,
        mime: String,
        size: u64,
        total_chunks: u32,
    },
    #[serde(rename_all = "camelCase")]
    AttachmentChunk {
        attachment_id: String,
        index: u32,
        total_chunks: u32,
        /// Base64 slice of the original blob.
        data: String,
    },
    Rekey,
}

impl InnerPayload {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Plaintext of a sealed `group_invite` box.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupInviteInfo {
    pub group_id: String,
    pub name: String,
    pub members: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(body: EnvelopeBody) {
        let envelope = Envelope::new(body);
        let bytes = envelope.encode().unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_all_envelope_types_roundtrip() {
        roundtrip(EnvelopeBody::ChatRequest {
            request_id: "r1".into(),
            from_pub_key: "kA".into(),
            to_pub_key: "kB".into(),
            nonce: "bm9uY2U=".into(),
            ciphertext: "Y3Q=".into(),
        });
        roundtrip(EnvelopeBody::ChatAccept {
            request_id: "r1".into(),
            from_pub_key: "kB".into(),
            to_pub_key: "kA".into(),
            conversation_id: "cid".into(),
        });
        roundtrip(EnvelopeBody::ChatDeclined {
            request_id: "r1".into(),
            from_pub_key: "kB".into(),
            to_pub_key: "kA".into(),
            conversation_id: "cid".into(),
        });
        roundtrip(EnvelopeBody::ChatBlocked {
            request_id: "r1".into(),
            from_pub_key: "kB".into(),
            to_pub_key: "kA".into(),
            conversation_id: "cid".into(),
        });
        roundtrip(EnvelopeBody::GroupInvite {
            from_pub_key: "kA".into(),
            to_pub_key: "kB".into(),
            nonce: "bm9uY2U=".into(),
            ciphertext: "Y3Q=".into(),
        });
        roundtrip(EnvelopeBody::GroupAccepted {
            request_id: "g1:kA".into(),
            group_id: "g1".into(),
            from_pub_key: "kB".into(),
            to_pub_key: "kA".into(),
        });
        roundtrip(EnvelopeBody::GroupDeclined {
            request_id: "g1:kA".into(),
            group_id: "g1".into(),
            from_pub_key: "kB".into(),
            to_pub_key: "kA".into(),
        });
        roundtrip(EnvelopeBody::GroupBlocked {
            request_id: "g1:kA".into(),
            group_id: "g1".into(),
            from_pub_key: "kB".into(),
            to_pub_key: "kA".into(),
        });
        roundtrip(EnvelopeBody::DmMessage {
            conversation_id: "cid".into(),
            message_id: "m1".into(),
            from_pub_key: "kA".into(),
            n: 3,
            nonce: "bm9uY2U=".into(),
            ciphertext: "Y3Q=".into(),
        });
        roundtrip(EnvelopeBody::DmAck {
            conversation_id: "cid".into(),
            message_id: "m1".into(),
            from_pub_key: "kB".into(),
            to_pub_key: "kA".into(),
        });
        roundtrip(EnvelopeBody::GroupMessage {
            group_id: "g1".into(),
            message_id: "m2".into(),
            from_pub_key: "kA".into(),
            sealed: vec![SealedRecipient {
                to_pub_key: "kB".into(),
                n: 0,
                nonce: "bm9uY2U=".into(),
                ciphertext: "Y3Q=".into(),
            }],
        });
    }

    #[test]
    fn test_wire_shape() {
        let envelope = Envelope::new(EnvelopeBody::DmMessage {
            conversation_id: "cid".into(),
            message_id: "m1".into(),
            from_pub_key: "kA".into(),
            n: 0,
            nonce: "x".into(),
            ciphertext: "y".into(),
        });
        let text = String::from_utf8(envelope.encode().unwrap()).unwrap();
        assert!(text.contains(r#""type":"dm_message""#));
        assert!(text.contains(r#""fromPubKey":"kA""#));
        assert!(text.contains(r#""conversationId":"cid""#));
        assert!(text.contains(r#""v":1"#));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let bytes = br#"{"v":1,"type":"teleport","timestamp":0}"#;
        assert!(Envelope::decode(bytes).is_err());
    }

    #[test]
    fn test_missing_type_rejected() {
        let bytes = br#"{"v":1,"timestamp":0}"#;
        assert!(Envelope::decode(bytes).is_err());
    }

    #[test]
    fn test_wrong_version_rejected() {
        let bytes = br#"{"v":2,"type":"dm_ack","conversationId":"c","messageId":"m","fromPubKey":"a","toPubKey":"b","timestamp":0}"#;
        assert!(matches!(
            Envelope::decode(bytes),
            Err(CodecError::BadVersion(2))
        ));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(Envelope::decode(b"{{{{").is_err());
    }

    #[test]
    fn test_inner_payload_roundtrip() {
        let payloads = vec![
            InnerPayload::Text {
                body: "salut".into(),
                reply_to: None,
            },
            InnerPayload::Text {
                body: "re".into(),
                reply_to: Some("m1".into()),
            },
            InnerPayload::Reaction {
                message_id: "m1".into(),
                emoji: "👍".into(),
            },
            InnerPayload::Edit {
                message_id: "m1".into(),
                body: "edited".into(),
            },
            InnerPayload::Delete {
                message_id: "m1".into(),
            },
            InnerPayload::Typing { is_typing: true },
            InnerPayload::AttachmentMeta {
                attachment_id: "a1".into(),
                name: "photo.png".into(),
                mime: "image/png".into(),
                size: 12345,
                total_chunks: 2,
            },
            InnerPayload::AttachmentChunk {
                attachment_id: "a1".into(),
                index: 0,
                total_chunks: 2,
                data: "AAAA".into(),
            },
            InnerPayload::Rekey,
        ];
        for payload in payloads {
            let bytes = payload.encode().unwrap();
            assert_eq!(InnerPayload::decode(&bytes).unwrap(), payload);
        }
    }

    #[test]
    fn test_inner_kind_tags() {
        let text = String::from_utf8(InnerPayload::Rekey.encode().unwrap()).unwrap();
        assert_eq!(text, r#"{"kind":"rekey"}"#);

        let text = String::from_utf8(
            InnerPayload::Typing { is_typing: false }.encode().unwrap(),
        )
        .unwrap();
        assert!(text.contains(r#""kind":"typing""#));
        assert!(text.contains(r#""isTyping":false"#));
    }
}
