use std::fmt::Display;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::conversation::ConversationController;
use crate::models::{WsEvent, WsRequest};
use crate::service::chat_service::ChatService;

/// GET `/ws/chat`: upgrades to a WebSocket carrying one chat session.
pub async fn ws_chat_handler(
    ws: WebSocketUpgrade,
    State(svc): State<ChatService>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, svc))
}

/// Handles a single WebSocket connection, i.e. one widget session.
///
/// Protocol:
/// - Client sends `{ "type": "submit", "text": "..." }`, `{ "type": "regenerate" }`
///   or `{ "type": "cancel" }`.
/// - Server pushes `{ "type": "conversation", "messages": [...], "pending": bool }`
///   once on connect and after every change,
///   or `{ "type": "error", "message": "..." }` for frames it cannot parse.
///
/// The controller lives exactly as long as the socket; closing the socket
/// cancels whatever request is still in flight.
async fn handle_socket(socket: WebSocket, svc: ChatService) {
    info!("WebSocket client connected");

    let controller = svc.open_session();
    let (sink, stream) = socket.split();
    run_session(&svc, &controller, stream, sink).await;

    info!("WebSocket client disconnected");
}

/// Pumps frames into the controller and snapshots back out until the peer
/// goes away, then shuts the controller down.
async fn run_session<St, Si>(
    svc: &ChatService,
    controller: &ConversationController,
    mut stream: St,
    mut sink: Si,
) where
    St: Stream<Item = Result<Message, axum::Error>> + Unpin,
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let mut updates = controller.subscribe();

    let initial = updates.borrow_and_update().clone();
    if send_event(&mut sink, &svc.conversation_event(&initial)).await.is_ok() {
        loop {
            tokio::select! {
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(t))) => t.to_string(),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!("WebSocket receive error: {e}");
                            break;
                        }
                    };

                    if let Some(event) = handle_frame(controller, &text) {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                }
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = updates.borrow_and_update().clone();
                    if send_event(&mut sink, &svc.conversation_event(&snapshot)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    controller.shutdown();
}

/// Applies one text frame. Returns the reply owed to the client, if any.
fn handle_frame(controller: &ConversationController, text: &str) -> Option<WsEvent> {
    match serde_json::from_str::<WsRequest>(text) {
        Ok(request) => {
            dispatch(controller, request);
            None
        }
        Err(e) => {
            debug!("rejecting frame: {e}");
            Some(WsEvent::Error { message: format!("Invalid request: {e}") })
        }
    }
}

/// Admission runs inline, in frame order, so a `cancel` or a duplicate
/// `submit` read right after a `submit` sees it as pending. Only the round
/// trip runs on its own task, which keeps the socket reading meanwhile.
fn dispatch(controller: &ConversationController, request: WsRequest) {
    let (kind, request) = match request {
        WsRequest::Submit { text } => ("submit", controller.submit(&text)),
        WsRequest::Regenerate => ("regenerate", controller.regenerate()),
        WsRequest::Cancel => {
            if !controller.cancel() {
                debug!("cancel ignored: nothing in flight");
            }
            return;
        }
    };

    if !request.is_admitted() {
        return;
    }
    tokio::spawn(async move {
        let outcome = request.await;
        debug!(kind, ?outcome, "request finished");
    });
}

/// Serialize a `WsEvent` and send it over the socket.
async fn send_event<Si>(sink: &mut Si, event: &WsEvent) -> Result<(), Si::Error>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    match serde_json::to_string(event) {
        Ok(json) => sink.send(Message::Text(json.into())).await.inspect_err(|e| {
            debug!("WebSocket send failed: {e}");
        }),
        Err(e) => {
            warn!("Failed to serialize event: {e}");
            Ok(())
        }
    }
}
