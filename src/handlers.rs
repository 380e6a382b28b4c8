// Importations de l'état de l'application, des modèles de données, et des composants Axum.
use crate::app_state::AppState;
use crate::database::current_timestamp;
use crate::drugs::{self, DrugCard, DrugMatch};
use crate::error::AppError;
use crate::models::{
    CacheRecord, CacheWriteRequest, DrugSelection, HealthStatus, SearchQuery, SelectDrugRequest,
    SessionView, Slot, TokenQuery, TokenResponse,
};
use crate::poller::Calculator;
use crate::token::{derive_token, pair_key, CacheToken};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

// Retrouve le calculateur d'une session, ou 404.
async fn calculator(state: &AppState, id: Uuid) -> Result<Arc<Calculator>, AppError> {
    state
        .sessions
        .get(&id)
        .await
        .ok_or(AppError::SessionNotFound)
}

fn slot(index: u8) -> Result<Slot, AppError> {
    Slot::from_index(index)
        .ok_or_else(|| AppError::MalformedPayload(format!("unknown slot {index}, expected 1 or 2")))
}

// Handler pour GET `/health` : vérifie l'état de santé du service.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, StatusCode> {
    // Tente d'obtenir une connexion à la base de données.
    match state.db.acquire().await {
        Ok(_) => Ok(Json(HealthStatus {
            status: "healthy".to_string(),
            timestamp: current_timestamp(),
            sessions: state.sessions.count().await,
        })),
        Err(e) => {
            tracing::error!("Health check failed: DB acquire error: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

// GET `/api/drugs/search?q=`
pub async fn search_handler(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<DrugMatch>>, AppError> {
    let matches = drugs::search(&state.db, &query.q, state.config.search_limit).await?;
    Ok(Json(matches))
}

// GET `/api/drugs/{id}` : fiche et contre-indications regroupées.
pub async fn drug_card_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DrugCard>, AppError> {
    let drug = drugs::find(&state.db, id)
        .await?
        .ok_or(AppError::DrugNotFound)?;
    let contraindications = drugs::contraindications(&drug);
    Ok(Json(DrugCard {
        drug,
        contraindications,
    }))
}

pub async fn create_session_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<SessionView>) {
    let (id, calculator) = state.sessions.create().await;
    (
        StatusCode::CREATED,
        Json(SessionView {
            id,
            session: calculator.snapshot(),
        }),
    )
}

pub async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let calculator = calculator(&state, id).await?;
    Ok(Json(SessionView {
        id,
        session: calculator.snapshot(),
    }))
}

pub async fn delete_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.sessions.remove(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::SessionNotFound)
    }
}

// PUT `/api/sessions/{id}/drugs/{slot}` : choisir un médicament arrête tout calcul en cours.
pub async fn select_drug_handler(
    State(state): State<AppState>,
    Path((id, index)): Path<(Uuid, u8)>,
    Json(payload): Json<SelectDrugRequest>,
) -> Result<Json<SessionView>, AppError> {
    let slot = slot(index)?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::MalformedPayload("drug name is blank".to_string()));
    }

    let calculator = calculator(&state, id).await?;
    let drug = drugs::find(&state.db, payload.drug_id)
        .await?
        .ok_or(AppError::DrugNotFound)?;

    // Le nom sert au jeton de cache : il doit être celui de la fiche choisie.
    let name = drugs::resolve_name(&drug, name)
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::MalformedPayload(format!(
                "'{}' is neither the trade name nor the МНН of drug {}",
                name, drug.id
            ))
        })?;

    info!("Session {}: {:?} <- {} (id {})", id, slot, name, drug.id);
    let session = calculator.select(slot, Some(DrugSelection { name, drug }));
    Ok(Json(SessionView { id, session }))
}

pub async fn deselect_drug_handler(
    State(state): State<AppState>,
    Path((id, index)): Path<(Uuid, u8)>,
) -> Result<Json<SessionView>, AppError> {
    let slot = slot(index)?;
    let session = calculator(&state, id).await?.select(slot, None);
    Ok(Json(SessionView { id, session }))
}

pub async fn clear_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = calculator(&state, id).await?.clear();
    Ok(Json(SessionView { id, session }))
}

// POST `/api/sessions/{id}/calculate` : répond dès que la session a quitté
// `awaiting_submission`. La suite arrive par GET ou par la WebSocket.
pub async fn calculate_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = calculator(&state, id).await?.calculate_and_settle().await?;
    info!("Session {}: calculation {}", id, session.state);
    Ok(Json(SessionView { id, session }))
}

// GET `/api/tokens?first=&second=` : permet au workflow de savoir où écrire.
pub async fn token_handler(Query(query): Query<TokenQuery>) -> Json<TokenResponse> {
    Json(TokenResponse {
        pair: pair_key(&query.first, &query.second),
        cache_token: derive_token(&query.first, &query.second).to_string(),
    })
}

// PUT `/api/cache/{token}` : écriture du résultat par le workflow.
pub async fn cache_write_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<CacheWriteRequest>,
) -> Result<Json<CacheRecord>, AppError> {
    let token: CacheToken = token
        .parse()
        .map_err(|e| AppError::MalformedPayload(format!("invalid cache token: {e}")))?;

    let record = state
        .cache
        .store(&token, &payload.interact, payload.explanation.as_deref())
        .await?;
    info!("Cache record {} written", token);
    Ok(Json(record))
}
