//! End-to-end session over a real WebSocket, with a local server playing
//! both relay and PC.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tablet_link::crypto::{BoxCipher, ClientKeyPair, PublicKey};
use tablet_link::session::pipeline::{EncryptedEnvelope, HANDSHAKE_MESSAGE};
use tablet_link::session::RecordingNotifier;
use tablet_link::{
    AddressBook, ClientIdentity, CloseInfo, ConnectionState, FileStorage, KeyStore,
    SessionConnection, SessionEvent, Storage, WebSocketConnector,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

type ServerSocket = WebSocketStream<TcpStream>;

async fn local_relay() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    (listener, url)
}

/// Accept one client and return its socket and query parameters
async fn accept(listener: &TcpListener) -> (ServerSocket, HashMap<String, String>) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut query = String::new();
    let ws = accept_hdr_async(stream, |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        query = req.uri().query().unwrap_or_default().to_string();
        Ok(resp)
    })
    .await
    .unwrap();

    let params = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    (ws, params)
}

async fn next_text(ws: &mut ServerSocket) -> String {
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return text.to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

fn session_for(
    storage: Arc<dyn Storage>,
) -> (SessionConnection<WebSocketConnector>, ClientIdentity, RecordingNotifier) {
    let identity = ClientIdentity::bootstrap(&KeyStore::new(storage.clone())).unwrap();
    let events = RecordingNotifier::new();
    let session = SessionConnection::new(
        WebSocketConnector,
        identity.clone(),
        AddressBook::restore(storage),
        Arc::new(events.clone()),
    );
    (session, identity, events)
}

#[tokio::test]
async fn test_encrypted_session_with_token_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()));
    let (listener, relay_url) = local_relay().await;

    let server = tokio::spawn(async move {
        let (mut ws, params) = accept(&listener).await;
        assert_eq!(params["token"], "t1");
        let tablet = PublicKey::from_hex(&params["publicKey"]).unwrap();

        let pc = ClientKeyPair::generate();
        let shared = pc.shared_key(&tablet);

        let handshake = json!({
            "from": {"type": "pc", "id": 0},
            "payload": {"message": HANDSHAKE_MESSAGE, "public_key": pc.public_key().to_hex()}
        });
        ws.send(Message::text(handshake.to_string())).await.unwrap();

        let envelope: EncryptedEnvelope = serde_json::from_str(&next_text(&mut ws).await).unwrap();
        assert_eq!(envelope.to.kind, "pc");
        let stroke: Value = BoxCipher::decrypt_json(&shared, &envelope.payload).unwrap();

        let rotation = json!({
            "from": {"type": "pc", "id": 0},
            "payload": BoxCipher::encrypt_json(&shared, &json!({"newTabletToken": "t2"}), None).unwrap()
        });
        ws.send(Message::text(rotation.to_string())).await.unwrap();

        let envelope: EncryptedEnvelope = serde_json::from_str(&next_text(&mut ws).await).unwrap();
        let goodbye: Value = BoxCipher::decrypt_json(&shared, &envelope.payload).unwrap();

        (stroke, goodbye, params["publicKey"].clone())
    });

    let (mut session, identity, events) = session_for(storage.clone());
    let address = session
        .addresses()
        .set_relay(&format!("{relay_url}?token=t1"))
        .unwrap();
    session.connect(address).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Open);

    // The announcement itself arrives in plaintext
    let announcement = session.next_message().await.unwrap();
    assert_eq!(announcement["payload"]["message"], HANDSHAKE_MESSAGE);
    assert!(session.has_shared_key());

    session.send_json(&json!({"stroke": "KAT"})).await.unwrap();

    let rotated = session.next_message().await.unwrap();
    assert_eq!(rotated, json!({"newTabletToken": "t2"}));
    assert_eq!(session.addresses().current().unwrap().token(), Some("t2"));

    session.shutdown().await;
    assert_eq!(session.state(), ConnectionState::Closed);

    let (stroke, goodbye, announced_key) = server.await.unwrap();
    assert_eq!(stroke, json!({"stroke": "KAT"}));
    assert_eq!(goodbye, json!("close"));
    assert_eq!(announced_key, identity.public_key_hex());

    let recorded = events.events();
    assert!(recorded.contains(&SessionEvent::TokenRotated));
    assert!(recorded
        .iter()
        .any(|event| matches!(event, SessionEvent::KeyEstablished { .. })));

    // Both the keypair and the rotated token survive a restart
    let (restarted, restarted_identity, _) = session_for(storage);
    assert_eq!(restarted_identity.public_key(), identity.public_key());
    assert_eq!(restarted.addresses().current().unwrap().token(), Some("t2"));
}

#[tokio::test]
async fn test_relay_close_is_final() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()));
    let (listener, relay_url) = local_relay().await;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        ws.close(Some(CloseFrame {
            code: CloseCode::Library(4001),
            reason: "token expired".into(),
        }))
        .await
        .unwrap();

        // A reconnect attempt would show up here
        tokio::time::timeout(std::time::Duration::from_millis(200), listener.accept())
            .await
            .is_err()
    });

    let (mut session, _, _) = session_for(storage);
    let address = session.addresses().set_relay(&relay_url).unwrap();
    session.connect(address).await.unwrap();

    assert_eq!(session.next_message().await, None);
    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(session.close_info(), Some(&CloseInfo::new(4001, "token expired")));

    assert!(server.await.unwrap(), "session reconnected on its own");
}
