//! Per-connection handler: handshake, access guard, and request routing.
//!
//! Each accepted socket gets its own Tokio task running this handler.
//! The flow is:
//!   1. Complete the WebSocket upgrade within `handshake_timeout`
//!   2. Receive `Hello` → check version → authenticate → send `Welcome`
//!   3. Loop, waiting on both the client and the change feed:
//!      - a request is guarded, dispatched to the engine, and answered
//!        with the same `seq`;
//!      - a change on a subscribed topic is pushed as `Changed` (`seq` 0).

use std::collections::BTreeSet;
use std::sync::Arc;

use dormkeep_allocation::{AllocationEngine, AllocationError, Store};
use dormkeep_protocol::{
    Caller, Codec, Envelope, ErrorKind, Payload, ProtocolError, Request, Response, Topic,
};
use dormkeep_transport::{Connection, Incoming, IncomingWebSocket, WebSocketConnection};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::server::{PROTOCOL_VERSION, ServerState};
use crate::{Authenticator, DormkeepError};

/// What the loop does after a frame.
enum Flow {
    Continue,
    Close,
}

/// Per-connection subscription state.
#[derive(Default)]
struct Subscriptions {
    topics: BTreeSet<Topic>,
    feed: Option<broadcast::Receiver<Topic>>,
}

impl Subscriptions {
    /// Next change signal; pends forever until the first `Subscribe`.
    async fn next(&mut self) -> Result<Topic, broadcast::error::RecvError> {
        match &mut self.feed {
            Some(feed) => feed.recv().await,
            None => std::future::pending().await,
        }
    }
}

/// Handles a single connection from accept to close.
///
/// The upgrade runs here rather than in the accept loop, so a peer that
/// stalls mid-handshake only ever holds up its own task.
pub(crate) async fn handle_connection<S, A, C>(
    incoming: IncomingWebSocket,
    state: Arc<ServerState<S, A, C>>,
) -> Result<(), DormkeepError>
where
    S: Store,
    A: Authenticator,
    C: Codec,
{
    let conn_id = incoming.id();
    let peer = incoming.peer_addr();
    let conn = match incoming.upgrade(state.config.handshake_timeout).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::debug!(%conn_id, %peer, error = %e, "upgrade abandoned");
            return Err(e.into());
        }
    };
    tracing::debug!(%conn_id, %peer, "handling new connection");

    let caller = match perform_handshake(&conn, &state).await {
        Ok(caller) => caller,
        Err(e) => {
            let _ = conn.close().await;
            return Err(e);
        }
    };
    tracing::info!(%conn_id, caller = %caller.name, role = %caller.role, "caller authenticated");

    let mut subscriptions = Subscriptions::default();
    let mut idle_deadline = Instant::now() + state.config.idle_timeout;

    loop {
        tokio::select! {
            received = tokio::time::timeout_at(idle_deadline, conn.recv()) => {
                let data = match received {
                    Ok(Ok(Some(data))) => data,
                    Ok(Ok(None)) => {
                        tracing::info!(%conn_id, "connection closed cleanly");
                        break;
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(%conn_id, error = %e, "recv error");
                        break;
                    }
                    Err(_) => {
                        tracing::info!(%conn_id, "connection idle, closing");
                        break;
                    }
                };
                idle_deadline = Instant::now() + state.config.idle_timeout;

                match handle_frame(&conn, &state, &caller, &mut subscriptions, &data).await? {
                    Flow::Continue => {}
                    Flow::Close => break,
                }
            }
            change = subscriptions.next() => {
                match change {
                    Ok(topic) if subscriptions.topics.contains(&topic) => {
                        send(&conn, &state.codec, 0, Response::Changed { topic }).await?;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Some signals were lost; everything subscribed may
                        // have changed.
                        tracing::warn!(%conn_id, skipped, "change feed lagged");
                        for topic in subscriptions.topics.clone() {
                            send(&conn, &state.codec, 0, Response::Changed { topic }).await?;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        subscriptions.feed = None;
                    }
                }
            }
        }
    }

    let _ = conn.close().await;
    Ok(())
}

/// Receives `Hello`, checks the version, authenticates, and answers
/// `Welcome`. Every refusal is reported to the client before returning.
async fn perform_handshake<S, A, C>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<S, A, C>>,
) -> Result<Caller, DormkeepError>
where
    S: Store,
    A: Authenticator,
    C: Codec,
{
    let data = match tokio::time::timeout(state.config.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage("connection closed before Hello".into()).into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("Hello timed out".into()).into());
        }
    };

    let envelope: Envelope = match state.codec.decode(&data) {
        Ok(envelope) => envelope,
        Err(e) => {
            send_error(conn, &state.codec, 0, 400, ErrorKind::BadRequest, "expected Hello").await?;
            return Err(e.into());
        }
    };
    let seq = envelope.seq;

    let (version, token) = match envelope.payload {
        Payload::Request(Request::Hello { version, token }) => (version, token),
        _ => {
            send_error(conn, &state.codec, seq, 400, ErrorKind::BadRequest, "expected Hello").await?;
            return Err(ProtocolError::InvalidMessage("first frame must be Hello".into()).into());
        }
    };

    if version != PROTOCOL_VERSION {
        send_error(
            conn,
            &state.codec,
            seq,
            400,
            ErrorKind::BadRequest,
            format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}"),
        )
        .await?;
        return Err(ProtocolError::InvalidMessage("protocol version mismatch".into()).into());
    }

    let caller = match state.auth.authenticate(token.as_deref().unwrap_or("")).await {
        Ok(caller) => caller,
        Err(e) => {
            tracing::debug!(conn_id = %conn.id(), error = %e, "handshake refused");
            let err = DormkeepError::from(e);
            send(conn, &state.codec, seq, failure(&err)).await?;
            return Err(err);
        }
    };

    send(conn, &state.codec, seq, Response::Welcome { role: caller.role }).await?;
    Ok(caller)
}

/// Decodes one frame and answers it.
async fn handle_frame<S, A, C>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<S, A, C>>,
    caller: &Caller,
    subscriptions: &mut Subscriptions,
    data: &[u8],
) -> Result<Flow, DormkeepError>
where
    S: Store,
    A: Authenticator,
    C: Codec,
{
    let envelope: Envelope = match state.codec.decode(data) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(conn_id = %conn.id(), error = %e, "failed to decode envelope");
            send_error(conn, &state.codec, 0, 400, ErrorKind::BadRequest, format!("malformed frame: {e}"))
                .await?;
            return Ok(Flow::Continue);
        }
    };
    let seq = envelope.seq;

    let request = match envelope.payload {
        Payload::Request(request) => request,
        Payload::Response(_) => {
            send_error(conn, &state.codec, seq, 400, ErrorKind::BadRequest, "expected a request").await?;
            return Ok(Flow::Continue);
        }
    };

    match request {
        Request::Hello { .. } => {
            send_error(conn, &state.codec, seq, 400, ErrorKind::BadRequest, "already greeted").await?;
        }
        Request::Bye => {
            tracing::info!(conn_id = %conn.id(), caller = %caller.name, "client said bye");
            return Ok(Flow::Close);
        }
        Request::Subscribe { topics } => {
            if subscriptions.feed.is_none() {
                subscriptions.feed = Some(state.notifier.subscribe());
            }
            subscriptions.topics.extend(topics.iter().copied());
            send(conn, &state.codec, seq, Response::Subscribed { topics }).await?;
        }
        request => {
            let response = match state.config.access.authorize(caller, &request) {
                Ok(()) => dispatch(&state.engine, request).await,
                Err(denied) => {
                    tracing::debug!(caller = %caller.name, error = %denied, "request denied");
                    failure(&DormkeepError::from(denied))
                }
            };
            send(conn, &state.codec, seq, response).await?;
        }
    }

    Ok(Flow::Continue)
}

/// Runs one engine operation and shapes its result for the wire.
async fn dispatch<S: Store>(engine: &AllocationEngine<S>, request: Request) -> Response {
    let name = request.name();
    tracing::debug!(operation = name, "dispatching");
    match run(engine, request).await {
        Ok(response) => response,
        Err(e) => {
            if matches!(e, AllocationError::Store(_)) {
                tracing::error!(operation = name, error = %e, "store failure");
            }
            failure(&DormkeepError::from(e))
        }
    }
}

async fn run<S: Store>(
    engine: &AllocationEngine<S>,
    request: Request,
) -> Result<Response, AllocationError> {
    let name = request.name();
    let response = match request {
        Request::CreateRoom { room } => Response::Room { room: engine.create_room(room).await? },
        Request::UpdateRoom { room_id, patch } => Response::Room {
            room: engine.update_room(room_id, patch).await?,
        },
        Request::DeleteRoom { room_id } => {
            engine.delete_room(room_id).await?;
            Response::Ack
        }
        Request::CreateStudent { profile, room_id } => Response::Student {
            student: engine.create_student(profile, room_id).await?,
        },
        Request::UpdateStudent { student_id, patch } => Response::Student {
            student: engine.update_student(student_id, patch).await?,
        },
        Request::DeleteStudent { student_id } => {
            engine.delete_student(student_id).await?;
            Response::Ack
        }
        Request::Allocate { student_id, room_id } => Response::Allocation {
            allocation: engine.allocate(student_id, room_id).await?,
        },
        Request::Transfer { student_id, room_id } => Response::Allocation {
            allocation: engine.transfer(student_id, room_id).await?,
        },
        Request::Deallocate { student_id } => Response::Released {
            student: engine.deallocate(student_id).await?,
        },
        Request::ListRooms => Response::Rooms { rooms: engine.list_rooms()? },
        Request::ListStudents => Response::Students { students: engine.list_students()? },
        Request::GetRoom { room_id } => Response::RoomDetail { room: engine.room(room_id)? },
        Request::GetStudent { student_id } => Response::StudentDetail {
            student: engine.student(student_id)?,
        },
        Request::RoomStats => Response::RoomStats { stats: engine.room_stats()? },
        Request::StudentStats => Response::StudentStats { stats: engine.student_stats()? },
        Request::Hello { .. } | Request::Subscribe { .. } | Request::Bye => error_response(
            400,
            ErrorKind::BadRequest,
            format!("{name} is not an engine operation"),
        ),
    };
    Ok(response)
}

/// The `Error` response for a failed request.
fn failure(err: &DormkeepError) -> Response {
    error_response(err.code(), err.kind(), err.to_string())
}

fn error_response(code: u16, kind: ErrorKind, message: impl Into<String>) -> Response {
    Response::Error { code, kind, message: message.into() }
}

async fn send(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    seq: u64,
    response: Response,
) -> Result<(), DormkeepError> {
    let envelope = Envelope { seq, payload: Payload::Response(response) };
    let bytes = codec.encode(&envelope)?;
    conn.send(&bytes).await?;
    Ok(())
}

async fn send_error(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    seq: u64,
    code: u16,
    kind: ErrorKind,
    message: impl Into<String>,
) -> Result<(), DormkeepError> {
    send(conn, codec, seq, error_response(code, kind, message)).await
}
