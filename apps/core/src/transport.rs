use serde::{Deserialize, Serialize};

use crate::contract::{CoreRequest, CoreResponse};
use crate::core_service::{CoreService, ServiceError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidJson,
    InvalidRequest,
    ItemNotFound,
    Launch,
    Store,
    Config,
    Clipboard,
    Provider,
    Startup,
    Metrics,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransportResponse {
    Ok { response: CoreResponse },
    Err { error: ErrorResponse },
}

pub fn handle_request(service: &mut CoreService, request: CoreRequest) -> TransportResponse {
    match service.handle_command(request) {
        Ok(response) => TransportResponse::Ok { response },
        Err(error) => {
            log::warn!(target: "runtime", "request failed: {error}");
            TransportResponse::Err {
                error: map_service_error(error),
            }
        }
    }
}

pub fn handle_json(service: &mut CoreService, payload: &str) -> String {
    let response = match serde_json::from_str::<CoreRequest>(payload) {
        Ok(request) => handle_request(service, request),
        Err(error) => TransportResponse::Err {
            error: ErrorResponse {
                code: ErrorCode::InvalidJson,
                message: error.to_string(),
            },
        },
    };

    encode(&response)
}

/// Encoded error response for failures that happen before a request reaches
/// the service.
pub fn error_json(code: ErrorCode, message: impl Into<String>) -> String {
    encode(&TransportResponse::Err {
        error: ErrorResponse {
            code,
            message: message.into(),
        },
    })
}

fn encode(response: &TransportResponse) -> String {
    match serde_json::to_string(response) {
        Ok(encoded) => encoded,
        Err(error) => format!(
            "{{\"status\":\"err\",\"error\":{{\"code\":\"invalid_request\",\"message\":{}}}}}",
            serde_json::Value::String(format!("response encoding failed: {error}"))
        ),
    }
}

fn map_service_error(error: ServiceError) -> ErrorResponse {
    let message = error.to_string();
    let code = match error {
        ServiceError::InvalidRequest(_) => ErrorCode::InvalidRequest,
        ServiceError::ItemNotFound(_) => ErrorCode::ItemNotFound,
        ServiceError::Launch(_) => ErrorCode::Launch,
        ServiceError::Store(_) => ErrorCode::Store,
        ServiceError::Config(_) => ErrorCode::Config,
        ServiceError::Clipboard(_) => ErrorCode::Clipboard,
        ServiceError::Provider(_) => ErrorCode::Provider,
        ServiceError::Startup(_) => ErrorCode::Startup,
        ServiceError::Metrics(_) => ErrorCode::Metrics,
    };
    ErrorResponse { code, message }
}
