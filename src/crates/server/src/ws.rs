use crate::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use futures::StreamExt;
use log::{info, warn};
use model::radio::RadioEvent;
use tokio::sync::mpsc;

/// Upgrade the request to a websocket and register it as a radio listener.
/// Engine events arrive on an unbounded channel and are forwarded as JSON
/// text frames; when either side closes, the listener is deregistered.
pub async fn radio_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<RadioEvent>();
    let listener_id = state.engine.register_listener(tx);
    info!("radio listener {} connected", listener_id);

    let engine = state.engine.clone();
    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to serialize radio event: {}", e);
                            continue;
                        }
                    };
                    if session.text(text).await.is_err() {
                        break;
                    }
                }
                msg = msg_stream.next() => {
                    match msg {
                        Some(Ok(actix_ws::Message::Ping(bytes))) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(actix_ws::Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        // Listeners are receive-only; inbound frames are ignored.
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
        engine.deregister_listener(listener_id);
        info!("radio listener {} disconnected", listener_id);
        let _ = session.close(None).await;
    });

    Ok(response)
}
