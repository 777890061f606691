// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use bytes::Bytes;

use crate::auth::{MemoryAccounts, SessionState};
use crate::config::{AuthConfig, PROTOCOL_MAGIC, PROTOCOL_VERSION};
use crate::core::frame::Frame;
use crate::core::wire::{WireReader, WireWriter};
use crate::error::{constants, ServerError};
use crate::protocol::handlers::{read_optional_player, register_defaults};
use crate::protocol::{opcode, Dispatcher, RequestContext, Response, ServerContext};
use crate::state::{DigestAlgorithm, ServerKeyPair, SnapshotStore};

fn context(auth: AuthConfig) -> ServerContext {
    let keys = Arc::new(ServerKeyPair::from_seed(&[9; 32]));
    let store = Arc::new(SnapshotStore::new(
        "/nonexistent/updates",
        "/nonexistent/profiles",
        DigestAlgorithm::Sha256,
        keys,
    ));
    ServerContext::new(auth, store).unwrap()
}

fn dispatcher() -> Dispatcher {
    let dispatcher = Dispatcher::new();
    register_defaults(&dispatcher).unwrap();
    dispatcher
}

fn send(
    dispatcher: &Dispatcher,
    server: &ServerContext,
    session_id: u64,
    opcode: u16,
    body: Bytes,
) -> crate::error::Result<Response> {
    let session = server.sessions.get(session_id).unwrap();
    let frame = dispatcher.dispatch(&RequestContext::new(server, session), Frame::new(opcode, body))?;
    assert_eq!(frame.opcode, opcode);
    Response::decode(frame.body)
}

fn hello_body(key: &[u8]) -> Bytes {
    let mut w = WireWriter::new();
    w.write_u32(PROTOCOL_MAGIC);
    w.write_u8(PROTOCOL_VERSION);
    w.write_bytes(key).unwrap();
    w.into_bytes()
}

fn auth_body(login: &str, password: &str) -> Bytes {
    let mut w = WireWriter::new();
    w.write_string(login, 255).unwrap();
    w.write_string(password, 255).unwrap();
    w.into_bytes()
}

fn greeted(dispatcher: &Dispatcher, server: &ServerContext) -> u64 {
    let id = server.sessions.open("10.0.0.1:5000".parse().unwrap()).id;
    let key = server.store.keys().public_key_bytes();
    let response = send(dispatcher, server, id, opcode::HELLO, hello_body(&key)).unwrap();
    assert!(matches!(response, Response::Ok(_)));
    id
}

#[test]
fn test_request_before_hello_is_fatal() {
    let server = context(AuthConfig::default());
    let dispatcher = dispatcher();
    let id = server.sessions.open("10.0.0.1:5000".parse().unwrap()).id;

    let err = send(&dispatcher, &server, id, opcode::PING, Bytes::new()).unwrap_err();
    assert!(matches!(
        err,
        ServerError::InvalidFrame(constants::ERR_HANDSHAKE_REQUIRED)
    ));
}

#[test]
fn test_hello_advances_session_and_reports_generation() {
    let server = context(AuthConfig::default());
    let dispatcher = dispatcher();
    let id = server.sessions.open("10.0.0.1:5000".parse().unwrap()).id;
    let key = server.store.keys().public_key_bytes();

    let payload = send(&dispatcher, &server, id, opcode::HELLO, hello_body(&key))
        .unwrap()
        .into_payload()
        .unwrap();
    let mut reader = WireReader::new(payload);
    assert_eq!(reader.read_u8().unwrap(), PROTOCOL_VERSION);
    assert_eq!(reader.read_u64().unwrap(), 0);
    assert_eq!(
        server.sessions.get(id).unwrap().state,
        SessionState::Authenticating
    );

    let again = send(&dispatcher, &server, id, opcode::HELLO, hello_body(&key)).unwrap();
    assert_eq!(again, Response::rejected(constants::REJECT_ALREADY_GREETED));
}

#[test]
fn test_hello_with_foreign_key_is_rejected() {
    let server = context(AuthConfig::default());
    let dispatcher = dispatcher();
    let id = server.sessions.open("10.0.0.1:5000".parse().unwrap()).id;
    let other = ServerKeyPair::from_seed(&[1; 32]).public_key_bytes();

    let response = send(&dispatcher, &server, id, opcode::HELLO, hello_body(&other)).unwrap();
    assert_eq!(response, Response::rejected(constants::REJECT_KEY_MISMATCH));
    assert_eq!(server.sessions.get(id).unwrap().state, SessionState::Connecting);
}

#[test]
fn test_bad_magic_is_fatal() {
    let server = context(AuthConfig::default());
    let dispatcher = dispatcher();
    let id = server.sessions.open("10.0.0.1:5000".parse().unwrap()).id;

    let mut w = WireWriter::new();
    w.write_u32(0xDEAD_BEEF);
    w.write_u8(PROTOCOL_VERSION);
    w.write_bytes(&[0; 32]).unwrap();

    let err = send(&dispatcher, &server, id, opcode::HELLO, w.into_bytes()).unwrap_err();
    assert!(matches!(err, ServerError::InvalidFrame(constants::ERR_BAD_MAGIC)));
}

#[test]
fn test_unknown_opcode_is_rejected_not_fatal() {
    let server = context(AuthConfig::default());
    let dispatcher = dispatcher();
    let id = greeted(&dispatcher, &server);

    let response = send(&dispatcher, &server, id, 0x7FFF, Bytes::new()).unwrap();
    assert_eq!(response, Response::rejected(constants::REJECT_UNKNOWN_OPCODE));

    let ping = send(&dispatcher, &server, id, opcode::PING, Bytes::new()).unwrap();
    assert_eq!(ping, Response::Ok(Bytes::new()));
    assert_eq!(server.metrics.snapshot().rejections, 1);
}

#[test]
fn test_protected_opcode_requires_login() {
    let server = context(AuthConfig::default());
    let dispatcher = dispatcher();
    let id = greeted(&dispatcher, &server);

    let response = send(&dispatcher, &server, id, opcode::UPDATE_LIST, Bytes::new()).unwrap();
    assert_eq!(response, Response::rejected(constants::REJECT_NOT_AUTHENTICATED));
}

#[test]
fn test_login_unlocks_protected_opcodes() {
    let server = context(AuthConfig::default());
    let dispatcher = dispatcher();
    let id = greeted(&dispatcher, &server);

    let payload = send(&dispatcher, &server, id, opcode::AUTH, auth_body("Steve", "x"))
        .unwrap()
        .into_payload()
        .unwrap();
    let mut reader = WireReader::new(payload);
    let uuid = reader.read_uuid().unwrap();
    assert_eq!(reader.read_string(16).unwrap(), "Steve");
    assert_eq!(reader.read_string(255).unwrap().len(), 32);

    let session = server.sessions.get(id).unwrap();
    assert!(session.is_active());
    assert_eq!(session.principal.unwrap().uuid, uuid);

    let mut w = WireWriter::new();
    w.write_string("Steve", 16).unwrap();
    let payload = send(&dispatcher, &server, id, opcode::PROFILE_BY_USERNAME, w.into_bytes())
        .unwrap()
        .into_payload()
        .unwrap();
    let profile = read_optional_player(&mut WireReader::new(payload))
        .unwrap()
        .unwrap();
    assert_eq!(profile.uuid, uuid);
    assert!(profile.skin.is_none());

    // Offline UUIDs cannot be reversed.
    let mut w = WireWriter::new();
    w.write_uuid(&uuid);
    let payload = send(&dispatcher, &server, id, opcode::PROFILE_BY_UUID, w.into_bytes())
        .unwrap()
        .into_payload()
        .unwrap();
    assert!(read_optional_player(&mut WireReader::new(payload)).unwrap().is_none());
}

#[test]
fn test_rate_limit_rejects_and_keeps_session() {
    let server = context(AuthConfig::default());
    let accounts = MemoryAccounts::new();
    accounts.insert("alex", "secret").unwrap();
    let accounts = Arc::new(accounts);
    let server = server
        .with_authenticator(accounts.clone())
        .with_players(accounts);
    let dispatcher = dispatcher();
    let id = greeted(&dispatcher, &server);

    for _ in 0..2 {
        let response = send(&dispatcher, &server, id, opcode::AUTH, auth_body("alex", "wrong")).unwrap();
        assert_eq!(response, Response::rejected(constants::REJECT_BAD_CREDENTIALS));
    }
    let limited = send(&dispatcher, &server, id, opcode::AUTH, auth_body("alex", "secret")).unwrap();
    assert_eq!(limited, Response::rejected(server.auth.reject_message.clone()));
    assert!(server.sessions.get(id).is_some());
}

#[test]
fn test_allowlist_is_case_insensitive() {
    let auth = AuthConfig {
        allowlist: Some(vec!["Notch".to_string()]),
        ..AuthConfig::default()
    };
    let server = context(auth);
    let dispatcher = dispatcher();
    let id = greeted(&dispatcher, &server);

    let denied = send(&dispatcher, &server, id, opcode::AUTH, auth_body("jeb_", "x")).unwrap();
    assert_eq!(denied, Response::rejected(server.auth.allowlist_reject_message.clone()));

    let allowed = send(&dispatcher, &server, id, opcode::AUTH, auth_body("notch", "x")).unwrap();
    assert!(matches!(allowed, Response::Ok(_)));
}

#[test]
fn test_trailing_bytes_close_connection() {
    let server = context(AuthConfig::default());
    let dispatcher = dispatcher();
    let id = greeted(&dispatcher, &server);

    let err = send(&dispatcher, &server, id, opcode::PING, Bytes::from_static(b"junk")).unwrap_err();
    assert!(matches!(err, ServerError::InvalidFrame(constants::ERR_TRAILING_BYTES)));
}

#[test]
fn test_batch_over_limit_is_rejected() {
    let server = context(AuthConfig::default());
    let dispatcher = dispatcher();
    let id = greeted(&dispatcher, &server);
    send(&dispatcher, &server, id, opcode::AUTH, auth_body("Steve", "x")).unwrap();

    let mut w = WireWriter::new();
    w.write_u16(129);
    let response = send(
        &dispatcher,
        &server,
        id,
        opcode::BATCH_PROFILE_BY_USERNAME,
        w.into_bytes(),
    )
    .unwrap();
    assert_eq!(response, Response::rejected(constants::REJECT_BATCH_TOO_LARGE));
}

#[test]
fn test_custom_fn_handler() {
    let server = context(AuthConfig::default());
    let dispatcher = dispatcher();
    dispatcher
        .register_fn(0x0100, "echo", false, |_ctx, body, out| {
            let value = body.read_u32()?;
            out.write_u32(value.wrapping_add(1));
            Ok(())
        })
        .unwrap();
    let id = greeted(&dispatcher, &server);

    let mut w = WireWriter::new();
    w.write_u32(41);
    let payload = send(&dispatcher, &server, id, 0x0100, w.into_bytes())
        .unwrap()
        .into_payload()
        .unwrap();
    assert_eq!(WireReader::new(payload).read_u32().unwrap(), 42);
    assert_eq!(dispatcher.handler(0x0100).unwrap().unwrap().name(), "echo");
}
