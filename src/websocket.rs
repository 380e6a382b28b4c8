use crate::app_state::AppState;
use crate::error::AppError;
use crate::models::SessionView;
use crate::poller::Session;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

// GET `/ws/sessions/{id}` : pousse l'enregistrement de session à chaque changement.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let calculator = state
        .sessions
        .get(&id)
        .await
        .ok_or(AppError::SessionNotFound)?;
    let updates = calculator.subscribe();

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, id, updates)))
}

fn encode(id: Uuid, session: Session) -> Option<String> {
    match serde_json::to_string(&SessionView { id, session }) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("Session {} could not be encoded: {}", id, e);
            None
        }
    }
}

// Encode l'état courant, puis chaque nouvel enregistrement, vers `out`.
// Les états intermédiaires peuvent être sautés : seul le dernier compte.
async fn forward_updates(
    id: Uuid,
    mut updates: watch::Receiver<Session>,
    out: mpsc::UnboundedSender<String>,
) {
    let mut current = updates.borrow_and_update().clone();
    loop {
        if let Some(msg) = encode(id, current) {
            if out.send(msg).is_err() {
                break;
            }
        }
        if updates.changed().await.is_err() {
            break;
        }
        current = updates.borrow_and_update().clone();
    }
}

async fn handle_socket(socket: WebSocket, id: Uuid, updates: watch::Receiver<Session>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    info!("WebSocket opened for session {}", id);

    let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<String>();
    let forward_task = tokio::spawn(forward_updates(id, updates, internal_tx));

    let send_task = tokio::spawn(async move {
        while let Some(msg) = internal_rx.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Les messages du client ne portent aucune commande ; on attend seulement la fermeture.
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    info!("WebSocket closed for session {}", id);
    forward_task.abort();
    send_task.abort();
}
