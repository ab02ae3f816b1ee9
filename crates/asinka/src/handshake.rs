/// Handshake engine: one request/response establishes a session.
///
/// The dialer sends its identity, protocols, schemas and capabilities;
/// the accepting side checks the protocol intersection, mints the
/// session id, and returns the session key wrapped to the dialer's
/// identity key. Authentication is trust-on-first-use in v1: no
/// signature exchange happens here.
use std::collections::HashMap;

use asinka_wire::{HandshakeRequest, HandshakeResponse, ObjectSchema, SUPPORTED_PROTOCOLS};

use crate::config::AsinkaConfig;
use crate::error::AsinkaError;
use crate::security::{SecurityEnvelope, SessionKey};

/// What both sides hold once a handshake succeeds.
#[derive(Debug)]
pub struct HandshakeSuccess {
    pub session_id: String,
    pub remote_public_key: Vec<u8>,
    pub remote_schemas: Vec<ObjectSchema>,
    pub remote_capabilities: HashMap<String, String>,
    pub session_key: SessionKey,
}

/// Outcome of processing an inbound request: the response to send,
/// plus the session material when it was accepted.
pub struct ServerHandshake {
    pub response: HandshakeResponse,
    pub accepted: Option<HandshakeSuccess>,
}

/// Populate an outbound handshake request from our configuration.
pub fn build_request(config: &AsinkaConfig, security: &SecurityEnvelope) -> HandshakeRequest {
    HandshakeRequest {
        app_id: config.app_id.clone(),
        app_name: config.app_name.clone(),
        app_version: config.app_version.clone(),
        device_id: config.device_id.clone(),
        identity_public_key: security.identity_public_key().to_vec(),
        supported_protocols: SUPPORTED_PROTOCOLS.iter().map(|p| p.to_string()).collect(),
        exposed_schemas: config.exposed_schemas.clone(),
        capabilities: config.capabilities.clone(),
    }
}

/// Server side: answer an inbound request.
pub fn process_request(
    request: &HandshakeRequest,
    config: &AsinkaConfig,
    security: &SecurityEnvelope,
) -> ServerHandshake {
    let common = request
        .supported_protocols
        .iter()
        .any(|p| SUPPORTED_PROTOCOLS.contains(&p.as_str()));
    if !common {
        return refuse(format!(
            "no common protocol: peer speaks {:?}, we speak {:?}",
            request.supported_protocols, SUPPORTED_PROTOCOLS
        ));
    }

    if request.identity_public_key.is_empty() {
        return refuse("request carries no identity public key");
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let session_key = SecurityEnvelope::generate_session_key();
    let sealed_session_key =
        match security.wrap_session_key(&session_key, &request.identity_public_key) {
            Ok(wrapped) => wrapped,
            Err(e) => return refuse(format!("session key wrap failed: {e}")),
        };

    ServerHandshake {
        response: HandshakeResponse {
            success: true,
            session_id: session_id.clone(),
            identity_public_key: security.identity_public_key().to_vec(),
            exposed_schemas: config.exposed_schemas.clone(),
            capabilities: config.capabilities.clone(),
            sealed_session_key,
            error: String::new(),
        },
        accepted: Some(HandshakeSuccess {
            session_id,
            remote_public_key: request.identity_public_key.clone(),
            remote_schemas: request.exposed_schemas.clone(),
            remote_capabilities: request.capabilities.clone(),
            session_key,
        }),
    }
}

/// Client side: check a response and recover the session key.
pub fn validate_response(
    response: HandshakeResponse,
    security: &SecurityEnvelope,
) -> Result<HandshakeSuccess, AsinkaError> {
    if !response.success {
        let reason = if response.error.is_empty() {
            "peer refused handshake".to_string()
        } else {
            response.error
        };
        return Err(AsinkaError::HandshakeRefused(reason));
    }
    if response.session_id.is_empty() {
        return Err(AsinkaError::HandshakeRefused(
            "response carries no session id".into(),
        ));
    }
    if response.identity_public_key.is_empty() {
        return Err(AsinkaError::HandshakeRefused(
            "response carries no identity public key".into(),
        ));
    }

    let session_key = security
        .unwrap_session_key(&response.sealed_session_key)
        .map_err(|e| AsinkaError::HandshakeRefused(format!("session key unwrap failed: {e}")))?;

    Ok(HandshakeSuccess {
        session_id: response.session_id,
        remote_public_key: response.identity_public_key,
        remote_schemas: response.exposed_schemas,
        remote_capabilities: response.capabilities,
        session_key,
    })
}

fn refuse(reason: impl Into<String>) -> ServerHandshake {
    ServerHandshake {
        response: HandshakeResponse::refused(reason),
        accepted: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asinka_wire::FieldKind;
    use std::sync::OnceLock;

    fn dialer_security() -> &'static SecurityEnvelope {
        static ENVELOPE: OnceLock<SecurityEnvelope> = OnceLock::new();
        ENVELOPE.get_or_init(|| SecurityEnvelope::generate().expect("keygen"))
    }

    fn accepter_security() -> &'static SecurityEnvelope {
        static ENVELOPE: OnceLock<SecurityEnvelope> = OnceLock::new();
        ENVELOPE.get_or_init(|| SecurityEnvelope::generate().expect("keygen"))
    }

    fn dialer_config() -> AsinkaConfig {
        AsinkaConfig::new("com.example.dialer")
            .app_name("dialer")
            .schema(ObjectSchema::new("Task", "1").field("title", FieldKind::String))
            .capability("compression", "none")
    }

    fn accepter_config() -> AsinkaConfig {
        AsinkaConfig::new("com.example.accepter")
            .app_name("accepter")
            .schema(ObjectSchema::new("Task", "1").field("title", FieldKind::String))
    }

    #[test]
    fn build_request_carries_identity_and_protocols() {
        let request = build_request(&dialer_config(), dialer_security());
        assert_eq!(request.app_id, "com.example.dialer");
        assert_eq!(
            request.identity_public_key,
            dialer_security().identity_public_key()
        );
        assert_eq!(request.supported_protocols, vec!["asinka-v1"]);
        assert_eq!(request.exposed_schemas.len(), 1);
        assert_eq!(request.capabilities["compression"], "none");
    }

    #[test]
    fn full_handshake_agrees_on_session() {
        let request = build_request(&dialer_config(), dialer_security());
        let server = process_request(&request, &accepter_config(), accepter_security());

        let accepted = server.accepted.expect("accepted");
        assert!(server.response.success);
        assert!(!server.response.session_id.is_empty());

        let success =
            validate_response(server.response, dialer_security()).expect("validated");
        assert_eq!(success.session_id, accepted.session_id);
        assert_eq!(
            success.session_key.as_bytes(),
            accepted.session_key.as_bytes()
        );
        assert_eq!(
            success.remote_public_key,
            accepter_security().identity_public_key()
        );
        assert_eq!(accepted.remote_schemas.len(), 1);
    }

    #[test]
    fn session_ids_are_fresh_per_handshake() {
        let request = build_request(&dialer_config(), dialer_security());
        let first = process_request(&request, &accepter_config(), accepter_security());
        let second = process_request(&request, &accepter_config(), accepter_security());
        assert_ne!(first.response.session_id, second.response.session_id);
    }

    #[test]
    fn refuses_protocol_mismatch() {
        let mut request = build_request(&dialer_config(), dialer_security());
        request.supported_protocols = vec!["asinka-v99".to_string()];

        let server = process_request(&request, &accepter_config(), accepter_security());
        assert!(!server.response.success);
        assert!(server.accepted.is_none());
        assert!(server.response.error.contains("no common protocol"));
    }

    #[test]
    fn refuses_missing_identity() {
        let mut request = build_request(&dialer_config(), dialer_security());
        request.identity_public_key.clear();

        let server = process_request(&request, &accepter_config(), accepter_security());
        assert!(!server.response.success);
        assert!(server.accepted.is_none());
    }

    #[test]
    fn validate_rejects_failure_response() {
        let response = HandshakeResponse::refused("go away");
        let result = validate_response(response, dialer_security());
        match result {
            Err(AsinkaError::HandshakeRefused(reason)) => assert_eq!(reason, "go away"),
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_empty_session_id() {
        let request = build_request(&dialer_config(), dialer_security());
        let mut server = process_request(&request, &accepter_config(), accepter_security());
        server.response.session_id.clear();

        assert!(matches!(
            validate_response(server.response, dialer_security()),
            Err(AsinkaError::HandshakeRefused(_))
        ));
    }

    #[test]
    fn validate_rejects_empty_public_key() {
        let request = build_request(&dialer_config(), dialer_security());
        let mut server = process_request(&request, &accepter_config(), accepter_security());
        server.response.identity_public_key.clear();

        assert!(matches!(
            validate_response(server.response, dialer_security()),
            Err(AsinkaError::HandshakeRefused(_))
        ));
    }

    #[test]
    fn validate_rejects_key_wrapped_to_someone_else() {
        let request = build_request(&dialer_config(), dialer_security());
        let server = process_request(&request, &accepter_config(), accepter_security());

        // The accepter tries to validate its own response: the session
        // key is wrapped to the dialer, not to it.
        assert!(matches!(
            validate_response(server.response, accepter_security()),
            Err(AsinkaError::HandshakeRefused(_))
        ));
    }
}
