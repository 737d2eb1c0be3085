use axum::{
    body::Bytes,
    extract::{
        Json, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::app::errors;

/// Unwrap a JSON body, turning extractor rejections into the shared 400 body.
pub fn body<T>(body: Result<Json<T>, JsonRejection>, path: &str) -> Result<T, Response> {
    body.map(|Json(inner)| inner)
        .map_err(|rejection| errors::json_error(StatusCode::BAD_REQUEST, rejection.body_text(), path))
}

/// A JSON body that may be omitted entirely; an empty body yields `T::default()`.
pub fn optional_body<T>(bytes: Bytes, path: &str) -> Result<T, Response>
where
    T: DeserializeOwned + Default,
{
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}"), path))
}

pub fn query<T>(query: Result<Query<T>, QueryRejection>, path: &str) -> Result<T, Response> {
    query
        .map(|Query(inner)| inner)
        .map_err(|rejection| errors::json_error(StatusCode::BAD_REQUEST, rejection.body_text(), path))
}

pub fn ok<T: Serialize>(result: Result<T, Response>) -> Response {
    respond(StatusCode::OK, result)
}

pub fn created<T: Serialize>(result: Result<T, Response>) -> Response {
    respond(StatusCode::CREATED, result)
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, Response>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(response) => response,
    }
}
