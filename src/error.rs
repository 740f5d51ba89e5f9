use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Error unificado de la API. Todas las respuestas de error llevan
/// un cuerpo `{"error": "..."}` con un mensaje apto para mostrar al usuario.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validacion(String),

    #[error("Sesión inválida o expirada")]
    NoAutorizado,

    #[error("No tienes permiso para esta operación")]
    Prohibido,

    #[error("{0}")]
    NoEncontrado(String),

    #[error("{0}")]
    Conflicto(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl ApiError {
    fn codigo_pg(&self) -> Option<String> {
        match self {
            ApiError::Db(sqlx::Error::Database(db)) => db.code().map(|c| c.into_owned()),
            _ => None,
        }
    }

    fn mensaje(&self) -> String {
        match self {
            ApiError::Db(_) => match self.codigo_pg().as_deref() {
                // 23503 = foreign_key_violation, 23505 = unique_violation
                Some("23503") => "Referencia inválida (revisa los ids)".to_string(),
                Some("23505") => "Ya existe un registro con esos datos".to_string(),
                _ => "Error interno de base de datos".to_string(),
            },
            otro => otro.to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validacion(_) => StatusCode::BAD_REQUEST,
            ApiError::NoAutorizado => StatusCode::UNAUTHORIZED,
            ApiError::Prohibido => StatusCode::FORBIDDEN,
            ApiError::NoEncontrado(_) => StatusCode::NOT_FOUND,
            ApiError::Conflicto(_) => StatusCode::CONFLICT,
            ApiError::Db(_) => match self.codigo_pg().as_deref() {
                Some("23503") | Some("23505") => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "error interno");
        }
        HttpResponse::build(self.status_code()).json(json!({ "error": self.mensaje() }))
    }
}
