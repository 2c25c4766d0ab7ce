use std::sync::{Arc, Mutex};

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{debug, info};

use crate::error::AppError;
use crate::gsm::{self, UdhGenerator};
use crate::queue::{MessageQueue, QueueMessage};
use crate::types::{AcceptedResponse, HealthResponse, Message};
use crate::validate::validate;

pub struct AppState {
    pub queue: MessageQueue,
    pub udh: Mutex<UdhGenerator>,
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(queue: MessageQueue, api_key: Option<String>) -> Self {
        Self {
            queue,
            udh: Mutex::new(UdhGenerator::new()),
            api_key,
        }
    }
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Message>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(message) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;

    if let Err(errors) = validate(&message) {
        debug!("Rejected message to {}: {:?}", message.recipient, errors);
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(errors)).into_response());
    }

    let split = gsm::split_text(&message.body);
    let headers = state
        .udh
        .lock()
        .map_err(|_| anyhow::anyhow!("UDH generator lock poisoned"))?
        .headers(&message.originator, &message.body, split.parts.len());

    for (part, udh) in split.parts.iter().zip(headers) {
        state.queue.push(QueueMessage {
            originator: message.originator.clone(),
            body: gsm::encode_part(part, split.encoding),
            encoding: split.encoding,
            udh,
            recipient: message.recipient,
        })?;
    }

    info!(
        "Queued {} {} part(s) from {} to {}",
        split.parts.len(),
        split.encoding.as_str(),
        message.originator,
        message.recipient
    );

    Ok((
        StatusCode::OK,
        Json(AcceptedResponse {
            message,
            parts: split.parts.len(),
        }),
    )
        .into_response())
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        queued: state.queue.len(),
    })
}
