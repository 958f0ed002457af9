//! HTTP handlers for `/books`.
//!
//! Each handler opens its own warehouse session and closes it before
//! answering, whatever the outcome.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use shelf_db::{Connector, Session};
use shelf_http::AppError;

use super::models::{Book, CreateBook, ValidationError};
use super::repository::{self, BookError};

pub const CONNECT_FAILED_DETAIL: &str = "Internal server error - could not connect to database";
pub const CREATE_FAILED_DETAIL: &str = "Failed to create and retrieve the book";

#[derive(Clone)]
pub struct BooksState {
    pub connector: Arc<dyn Connector>,
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        let details = err
            .errors
            .iter()
            .map(|e| json!({ "field": e.field, "error": e.error }))
            .collect();
        AppError::validation(details, "Invalid book payload")
    }
}

impl From<BookError> for AppError {
    fn from(err: BookError) -> Self {
        match err {
            BookError::NotFound(_) => AppError::not_found(err.to_string()),
            BookError::NoIdAllocated | BookError::CreateInconsistency(_) => {
                tracing::error!(error = %err, "create could not return the new book");
                AppError::server("create_inconsistency", CREATE_FAILED_DETAIL)
            }
            BookError::Database(db) => {
                AppError::Internal(anyhow::Error::new(db).context("warehouse statement failed"))
            }
        }
    }
}

fn path_id(id: Result<Path<i64>, PathRejection>) -> Result<i64, AppError> {
    id.map(|Path(id)| id).map_err(|rejection| {
        AppError::validation(
            vec![json!({ "field": "id", "error": rejection.body_text() })],
            "Book id must be an integer",
        )
    })
}

fn book_body(payload: Result<Json<Value>, JsonRejection>) -> Result<CreateBook, AppError> {
    let Json(body) = payload.map_err(|rejection| {
        AppError::validation(
            vec![json!({ "field": "body", "error": rejection.body_text() })],
            "Request body is not valid JSON",
        )
    })?;
    Ok(CreateBook::from_value(&body)?)
}

async fn open_session(state: &BooksState) -> Result<Session, AppError> {
    Session::open(state.connector.as_ref()).await.map_err(|err| {
        tracing::error!(error = %err, "could not connect to warehouse");
        AppError::server("database_unavailable", CONNECT_FAILED_DETAIL)
    })
}

pub async fn list_books(State(state): State<BooksState>) -> Result<Json<Vec<Book>>, AppError> {
    let mut session = open_session(&state).await?;
    let result = repository::list(&mut session).await;
    session.close().await;

    Ok(Json(result?))
}

pub async fn get_book(
    State(state): State<BooksState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Book>, AppError> {
    let id = path_id(id)?;

    let mut session = open_session(&state).await?;
    let result = repository::get(&mut session, id).await;
    session.close().await;

    Ok(Json(result?))
}

pub async fn create_book(
    State(state): State<BooksState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Book>), AppError> {
    let new_book = book_body(payload)?;

    let mut session = open_session(&state).await?;
    let result = repository::create(&mut session, &new_book).await;
    session.close().await;

    let book = result?;
    tracing::info!(book_id = book.id, "book created");
    Ok((StatusCode::CREATED, Json(book)))
}

pub async fn update_book(
    State(state): State<BooksState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Book>, AppError> {
    let id = path_id(id)?;
    let replacement = book_body(payload)?;

    let mut session = open_session(&state).await?;
    let result = repository::update(&mut session, id, &replacement).await;
    session.close().await;

    let book = result?;
    tracing::info!(book_id = book.id, "book updated");
    Ok(Json(book))
}

pub async fn delete_book(
    State(state): State<BooksState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let id = path_id(id)?;

    let mut session = open_session(&state).await?;
    let result = repository::delete(&mut session, id).await;
    session.close().await;

    result?;
    tracing::info!(book_id = id, "book deleted");
    Ok(StatusCode::NO_CONTENT)
}
