//! Integration tests for the Dormkeep server: handshake, access guard,
//! request routing, and change notices over a real WebSocket.

use std::time::Duration;

use dormkeep::prelude::*;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

const ADMIN: &str = "warden-key";
const STUDENT: &str = "ada-key";

fn auth() -> TokenAuthenticator {
    TokenAuthenticator::new()
        .with_token(ADMIN, Caller::admin("warden"))
        .with_token(STUDENT, Caller::student("ada"))
}

/// Starts a server on a random port and returns its address.
async fn start_server(access: AccessPolicy) -> String {
    let server = DormkeepServerBuilder::new()
        .bind("127.0.0.1:0")
        .access(access)
        .build(auth())
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("local addr").to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

fn encode(seq: u64, request: Request) -> Message {
    let envelope = Envelope { seq, payload: Payload::Request(request) };
    Message::Binary(serde_json::to_vec(&envelope).expect("encode").into())
}

async fn next_envelope(ws: &mut ClientWs) -> Envelope {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("frame within 2s")
        .expect("stream open")
        .expect("frame ok");
    serde_json::from_slice(&msg.into_data()).expect("decode")
}

fn response(envelope: Envelope) -> Response {
    match envelope.payload {
        Payload::Response(response) => response,
        other => panic!("expected a response, got {other:?}"),
    }
}

/// Sends a request and returns the response carrying the same `seq`,
/// skipping any change notices pushed in between.
async fn call(ws: &mut ClientWs, seq: u64, request: Request) -> Response {
    ws.send(encode(seq, request)).await.expect("send");
    loop {
        let envelope = next_envelope(ws).await;
        if envelope.seq == seq {
            return response(envelope);
        }
    }
}

async fn hello(ws: &mut ClientWs, token: Option<&str>) -> Response {
    call(
        ws,
        1,
        Request::Hello { version: PROTOCOL_VERSION, token: token.map(str::to_string) },
    )
    .await
}

async fn session(addr: &str, token: &str) -> ClientWs {
    let mut ws = connect(addr).await;
    match hello(&mut ws, Some(token)).await {
        Response::Welcome { .. } => ws,
        other => panic!("expected Welcome, got {other:?}"),
    }
}

fn assert_error(response: Response, expected_code: u16, expected_kind: ErrorKind) {
    match response {
        Response::Error { code, kind, .. } => {
            assert_eq!(code, expected_code);
            assert_eq!(kind, expected_kind);
        }
        other => panic!("expected Error {expected_code}, got {other:?}"),
    }
}

fn new_room(number: &str, capacity: u32) -> Request {
    Request::CreateRoom {
        room: NewRoom {
            room_number: number.into(),
            kind: RoomKind::Single,
            capacity,
            price: 120.0,
        },
    }
}

fn new_student(email: &str) -> Request {
    Request::CreateStudent {
        profile: StudentProfile {
            name: "Ada".into(),
            email: email.into(),
            course: "Engineering".into(),
            year: 2,
        },
        room_id: None,
    }
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_hello_welcomes_with_role() {
    let addr = start_server(AccessPolicy::AdminWrites).await;

    let mut ws = connect(&addr).await;
    match hello(&mut ws, Some(ADMIN)).await {
        Response::Welcome { role } => assert_eq!(role, Role::Admin),
        other => panic!("expected Welcome, got {other:?}"),
    }

    let mut ws = connect(&addr).await;
    match hello(&mut ws, Some(STUDENT)).await {
        Response::Welcome { role } => assert_eq!(role, Role::Student),
        other => panic!("expected Welcome, got {other:?}"),
    }
}

#[tokio::test]
async fn test_hello_version_mismatch() {
    let addr = start_server(AccessPolicy::AdminWrites).await;
    let mut ws = connect(&addr).await;

    let reply = call(&mut ws, 1, Request::Hello { version: 999, token: Some(ADMIN.into()) }).await;
    assert_error(reply, 400, ErrorKind::BadRequest);
}

#[tokio::test]
async fn test_hello_with_bad_or_missing_token_is_unauthorized() {
    let addr = start_server(AccessPolicy::AdminWrites).await;

    let mut ws = connect(&addr).await;
    assert_error(hello(&mut ws, Some("guess")).await, 401, ErrorKind::Unauthorized);

    let mut ws = connect(&addr).await;
    assert_error(hello(&mut ws, None).await, 401, ErrorKind::Unauthorized);
}

#[tokio::test]
async fn test_first_frame_must_be_hello() {
    let addr = start_server(AccessPolicy::AdminWrites).await;
    let mut ws = connect(&addr).await;

    let reply = call(&mut ws, 1, Request::ListRooms).await;
    assert_error(reply, 400, ErrorKind::BadRequest);
}

#[tokio::test]
async fn test_silent_peer_does_not_hold_up_other_clients() {
    let addr = start_server(AccessPolicy::AdminWrites).await;

    // Opens a socket and never sends the WebSocket upgrade request.
    let _silent = tokio::net::TcpStream::connect(addr.as_str()).await.expect("tcp connect");

    let ws = tokio::time::timeout(Duration::from_secs(3), session(&addr, ADMIN)).await;
    assert!(ws.is_ok(), "second client was stuck behind the silent one");
}

#[tokio::test]
async fn test_silent_peer_is_dropped_after_handshake_timeout() {
    use tokio::io::AsyncReadExt;

    let server = DormkeepServerBuilder::new()
        .bind("127.0.0.1:0")
        .handshake_timeout(Duration::from_millis(100))
        .build(auth())
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    let mut silent = tokio::net::TcpStream::connect(addr).await.expect("tcp connect");
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(2), silent.read(&mut buf))
        .await
        .expect("server should hang up on the silent peer");
    assert!(matches!(read, Ok(0) | Err(_)), "expected EOF, got {read:?}");
}

// =========================================================================
// Access guard
// =========================================================================

#[tokio::test]
async fn test_student_may_read_but_not_write() {
    let addr = start_server(AccessPolicy::AdminWrites).await;
    let mut ws = session(&addr, STUDENT).await;

    let reply = call(&mut ws, 2, new_room("101", 2)).await;
    match reply {
        Response::Error { code, kind, message } => {
            assert_eq!(code, 403);
            assert_eq!(kind, ErrorKind::Forbidden);
            assert!(message.contains("create_room"), "{message}");
        }
        other => panic!("expected Error 403, got {other:?}"),
    }

    // The refused request never reached the engine.
    match call(&mut ws, 3, Request::RoomStats).await {
        Response::RoomStats { stats } => assert_eq!(stats.total_rooms, 0),
        other => panic!("expected RoomStats, got {other:?}"),
    }
}

#[tokio::test]
async fn test_open_policy_lets_students_write() {
    let addr = start_server(AccessPolicy::Open).await;
    let mut ws = session(&addr, STUDENT).await;

    match call(&mut ws, 2, new_room("101", 2)).await {
        Response::Room { room } => assert_eq!(room.room_number, "101"),
        other => panic!("expected Room, got {other:?}"),
    }
}

// =========================================================================
// Requests
// =========================================================================

#[tokio::test]
async fn test_allocation_flow_over_the_wire() {
    let addr = start_server(AccessPolicy::AdminWrites).await;
    let mut ws = session(&addr, ADMIN).await;

    let room = match call(&mut ws, 2, new_room("101", 1)).await {
        Response::Room { room } => room,
        other => panic!("expected Room, got {other:?}"),
    };
    let first = match call(&mut ws, 3, new_student("a@uni.test")).await {
        Response::Student { student } => student,
        other => panic!("expected Student, got {other:?}"),
    };
    let second = match call(&mut ws, 4, new_student("b@uni.test")).await {
        Response::Student { student } => student,
        other => panic!("expected Student, got {other:?}"),
    };

    match call(&mut ws, 5, Request::Allocate { student_id: first.id, room_id: room.id }).await {
        Response::Allocation { allocation } => {
            assert_eq!(allocation.student.student.room, Some(room.id));
            assert_eq!(allocation.room.room.occupants, vec![first.id]);
        }
        other => panic!("expected Allocation, got {other:?}"),
    }

    let full = call(&mut ws, 6, Request::Allocate { student_id: second.id, room_id: room.id }).await;
    assert_error(full, 409, ErrorKind::CapacityExceeded);

    match call(&mut ws, 7, Request::Deallocate { student_id: first.id }).await {
        Response::Released { student } => assert!(student.room.is_none()),
        other => panic!("expected Released, got {other:?}"),
    }
    let again = call(&mut ws, 8, Request::Deallocate { student_id: first.id }).await;
    assert_error(again, 422, ErrorKind::InvalidState);

    match call(&mut ws, 9, Request::StudentStats).await {
        Response::StudentStats { stats } => {
            assert_eq!(stats.total_students, 2);
            assert_eq!(stats.allocated_students, 0);
        }
        other => panic!("expected StudentStats, got {other:?}"),
    }
}

#[tokio::test]
async fn test_engine_errors_map_to_codes() {
    let addr = start_server(AccessPolicy::AdminWrites).await;
    let mut ws = session(&addr, ADMIN).await;

    let missing = call(&mut ws, 2, Request::GetRoom { room_id: RoomId(99) }).await;
    assert_error(missing, 404, ErrorKind::NotFound);

    call(&mut ws, 3, new_room("101", 1)).await;
    let duplicate = call(&mut ws, 4, new_room("101", 1)).await;
    assert_error(duplicate, 409, ErrorKind::Conflict);

    let invalid = call(&mut ws, 5, new_room("102", 0)).await;
    assert_error(invalid, 400, ErrorKind::Validation);
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let addr = start_server(AccessPolicy::AdminWrites).await;
    let mut ws = session(&addr, ADMIN).await;

    ws.send(Message::Text("{not json".into())).await.unwrap();
    let reply = response(next_envelope(&mut ws).await);
    assert_error(reply, 400, ErrorKind::BadRequest);

    match call(&mut ws, 2, Request::ListRooms).await {
        Response::Rooms { rooms } => assert!(rooms.is_empty()),
        other => panic!("expected Rooms, got {other:?}"),
    }
}

// =========================================================================
// Change notices and close
// =========================================================================

#[tokio::test]
async fn test_subscribers_are_told_about_changes() {
    let addr = start_server(AccessPolicy::AdminWrites).await;
    let mut watcher = session(&addr, STUDENT).await;
    let mut admin = session(&addr, ADMIN).await;

    match call(&mut watcher, 2, Request::Subscribe { topics: vec![Topic::Rooms] }).await {
        Response::Subscribed { topics } => assert_eq!(topics, vec![Topic::Rooms]),
        other => panic!("expected Subscribed, got {other:?}"),
    }

    // Student changes are not subscribed to and must not show up.
    call(&mut admin, 2, new_student("a@uni.test")).await;
    call(&mut admin, 3, new_room("101", 2)).await;

    let pushed = next_envelope(&mut watcher).await;
    assert_eq!(pushed.seq, 0);
    assert_eq!(response(pushed), Response::Changed { topic: Topic::Rooms });
}

#[tokio::test]
async fn test_bye_closes_connection() {
    let addr = start_server(AccessPolicy::AdminWrites).await;
    let mut ws = session(&addr, ADMIN).await;

    ws.send(encode(2, Request::Bye)).await.expect("send");

    let result = tokio::time::timeout(Duration::from_secs(2), ws.next()).await;
    match result {
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => {}
        other => panic!("expected close, got {other:?}"),
    }
}
