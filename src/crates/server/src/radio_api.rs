use crate::middleware::jwt_verify::Caller;
use crate::AppState;
use actix_web::{http::StatusCode, web, HttpResponse};
use application::error::AppError;
use domain::value::{QueueEntryId, SongId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
#[error(transparent)]
pub struct ApiError(#[from] AppError);

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl actix_web::error::ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0 {
            AppError::AuthError(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::EmptyQueue => StatusCode::CONFLICT,
            AppError::CollaboratorFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse<actix_web::body::BoxBody> {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToQueueRequest {
    pub song_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntryResponse {
    pub id: i64,
    pub song_id: i64,
    pub position: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResponse {
    pub is_radio_active: bool,
}

#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub removed: bool,
}

async fn get_queue(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.engine.queue_snapshot())
}

async fn add_to_queue(
    state: web::Data<AppState>,
    caller: web::ReqData<Caller>,
    body: web::Json<AddToQueueRequest>,
) -> Result<HttpResponse, ApiError> {
    let entry = state
        .engine
        .add_to_queue(SongId::from(body.song_id), caller.into_inner().0)
        .await?;
    Ok(HttpResponse::Created().json(QueueEntryResponse {
        id: entry.id.as_i64(),
        song_id: entry.song_id.as_i64(),
        position: entry.position,
    }))
}

async fn remove_from_queue(
    state: web::Data<AppState>,
    caller: web::ReqData<Caller>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let removed = state
        .engine
        .remove_from_queue(QueueEntryId::from(path.into_inner()), caller.into_inner().0)
        .await?;
    if removed {
        Ok(HttpResponse::Ok().json(RemoveResponse { removed }))
    } else {
        Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: "queue entry not found".to_string(),
        }))
    }
}

async fn skip_current_track(
    state: web::Data<AppState>,
    caller: web::ReqData<Caller>,
) -> Result<HttpResponse, ApiError> {
    state
        .engine
        .skip_current_track(caller.into_inner().0)
        .await?;
    Ok(HttpResponse::Ok().finish())
}

async fn toggle_radio_status(
    state: web::Data<AppState>,
    caller: web::ReqData<Caller>,
) -> Result<HttpResponse, ApiError> {
    let active = state
        .engine
        .toggle_radio_status(caller.into_inner().0)
        .await?;
    Ok(HttpResponse::Ok().json(ToggleResponse {
        is_radio_active: active,
    }))
}

pub fn configure_service(cfg: &mut web::ServiceConfig) {
    cfg.route("/queue", web::get().to(get_queue))
        .route("/queue", web::post().to(add_to_queue))
        .route("/queue/{id}", web::delete().to(remove_from_queue))
        .route("/skip", web::post().to(skip_current_track))
        .route("/toggle", web::post().to(toggle_radio_status));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::error::ResponseError;

    #[test]
    fn app_errors_map_to_stable_statuses() {
        let cases = [
            (AppError::AuthError("nope".into()), StatusCode::FORBIDDEN),
            (AppError::NotFound("song 1".into()), StatusCode::NOT_FOUND),
            (AppError::EmptyQueue, StatusCode::CONFLICT),
            (
                AppError::CollaboratorFailure("db down".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AppError::InvariantViolation("bad state".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }
}
