use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use askama::Template;
use thiserror::Error;

use crate::templates::render_with_status;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("malformed submission: {0}")]
    BadRequest(String),

    #[error("media storage error: {0}")]
    Media(#[from] std::io::Error),
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate {
    title: String,
    message: String,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Storage(_) | AppError::Hashing(_) | AppError::Media(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let template = match self {
            AppError::NotFound(what) => {
                log::info!("Not found: {what}");
                ErrorTemplate {
                    title: "Página não encontrada".to_string(),
                    message: format!("{what} não encontrado."),
                }
            }
            AppError::BadRequest(reason) => {
                log::info!("Rejected submission: {reason}");
                ErrorTemplate {
                    title: "Requisição inválida".to_string(),
                    message: "Não foi possível ler o formulário enviado.".to_string(),
                }
            }
            other => {
                log::error!("Request failed: {other}");
                ErrorTemplate {
                    title: "Algo deu errado".to_string(),
                    message: "Não foi possível concluir a operação. Tente novamente.".to_string(),
                }
            }
        };
        render_with_status(self.status_code(), template)
    }
}

pub type AppResult<T> = Result<T, AppError>;
