use std::collections::HashMap;

use proptest::prelude::*;

use asinka_wire::{
    Event, EventMessage, EventPriority, HandshakeRequest, HandshakeResponse, ObjectDelete,
    ObjectSchema, ObjectUpdate, SealedPayload, SyncMessage, TaggedValue,
};

/// Strategy for a tagged value of any kind.
///
/// Floats are kept finite: NaN never appears on the wire from the
/// engine and would break the equality assertion.
fn arb_value() -> impl Strategy<Value = TaggedValue> {
    prop_oneof![
        Just(TaggedValue::Null),
        ".{0,32}".prop_map(TaggedValue::String),
        any::<i64>().prop_map(TaggedValue::Int),
        (-1.0e12f64..1.0e12).prop_map(TaggedValue::Float),
        any::<bool>().prop_map(TaggedValue::Bool),
        prop::collection::vec(any::<u8>(), 0..256).prop_map(TaggedValue::Bytes),
    ]
}

fn arb_fields() -> impl Strategy<Value = HashMap<String, TaggedValue>> {
    prop::collection::hash_map("[a-z_]{1,12}", arb_value(), 0..8)
}

fn arb_priority() -> impl Strategy<Value = EventPriority> {
    prop_oneof![
        Just(EventPriority::Low),
        Just(EventPriority::Normal),
        Just(EventPriority::High),
        Just(EventPriority::Urgent),
    ]
}

proptest! {
    /// Any tagged value survives a MessagePack roundtrip.
    #[test]
    fn roundtrip_tagged_value(value in arb_value()) {
        let bytes = rmp_serde::to_vec(&value).expect("serialize");
        let decoded: TaggedValue = rmp_serde::from_slice(&bytes).expect("deserialize");
        prop_assert_eq!(&value, &decoded);
    }

    /// Any object update survives a roundtrip, fields included.
    #[test]
    fn roundtrip_object_update(
        object_id in "[a-z0-9-]{1,24}",
        version in 1u32..u32::MAX,
        fields in arb_fields(),
    ) {
        let msg = SyncMessage::Update(ObjectUpdate {
            object_id,
            type_name: "Task".to_string(),
            version,
            timestamp_ms: 1_708_000_000_000,
            fields,
            session_id: "proptest-session".to_string(),
        });

        let bytes = msg.to_bytes().expect("serialize");
        let decoded = SyncMessage::from_bytes(&bytes).expect("deserialize");
        prop_assert_eq!(&msg, &decoded);
    }

    /// Deletes roundtrip and stay deletes.
    #[test]
    fn roundtrip_object_delete(object_id in "[a-z0-9-]{1,24}") {
        let msg = SyncMessage::Delete(ObjectDelete::new(object_id, "Task", "proptest-session"));
        let bytes = msg.to_bytes().expect("serialize");
        let decoded = SyncMessage::from_bytes(&bytes).expect("deserialize");
        prop_assert_eq!(&msg, &decoded);
    }

    /// Any event message survives a roundtrip with priority intact.
    #[test]
    fn roundtrip_event_message(
        event_type in "[a-z.]{1,16}",
        data in arb_fields(),
        priority in arb_priority(),
    ) {
        let mut event = Event::new(event_type).with_priority(priority);
        event.data = data;
        let msg = EventMessage::from_event(&event, "proptest-session");

        let bytes = msg.to_bytes().expect("serialize");
        let decoded = EventMessage::from_bytes(&bytes).expect("deserialize");
        prop_assert_eq!(&msg, &decoded);
    }

    /// Handshake request/response roundtrip with arbitrary key material.
    #[test]
    fn roundtrip_handshake(
        key in prop::collection::vec(any::<u8>(), 0..512),
        sealed_key in prop::collection::vec(any::<u8>(), 0..256),
        caps in prop::collection::hash_map("[a-z]{1,8}", "[a-z0-9]{0,16}", 0..4),
    ) {
        let req = HandshakeRequest {
            app_id: "com.example.app".to_string(),
            app_name: "app".to_string(),
            app_version: "0.1.0".to_string(),
            device_id: "device".to_string(),
            identity_public_key: key.clone(),
            supported_protocols: vec!["asinka-v1".to_string()],
            exposed_schemas: vec![ObjectSchema::new("Task", "1")],
            capabilities: caps.clone(),
        };
        let bytes = req.to_bytes().expect("serialize");
        prop_assert_eq!(&req, &HandshakeRequest::from_bytes(&bytes).expect("deserialize"));

        let resp = HandshakeResponse {
            success: true,
            session_id: "proptest-session".to_string(),
            identity_public_key: key,
            exposed_schemas: Vec::new(),
            capabilities: caps,
            sealed_session_key: sealed_key,
            error: String::new(),
        };
        let bytes = resp.to_bytes().expect("serialize");
        prop_assert_eq!(&resp, &HandshakeResponse::from_bytes(&bytes).expect("deserialize"));
    }

    /// Sealed payloads roundtrip byte-exact.
    #[test]
    fn roundtrip_sealed_payload(
        nonce in any::<[u8; 12]>(),
        ciphertext in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        let sealed = SealedPayload { nonce, ciphertext };
        let bytes = sealed.to_bytes().expect("serialize");
        prop_assert_eq!(&sealed, &SealedPayload::from_bytes(&bytes).expect("deserialize"));
    }
}
