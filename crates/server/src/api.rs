//! Wire protocol shared by every `/api/` endpoint.
//!
//! Requests arrive as `{username, password, token, data}` and are answered with
//! `{status, error?, token?, data?}`. The open-ended `data` member is decoded
//! once, at the boundary, into the typed request of the endpoint.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

pub const STATUS_OK: &str = "ok";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_FATAL: &str = "fatal";

/// Matches axum's default body limit for the extractors below.
pub const MAX_REQUEST_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|_| AppError::BadRequest("Malformed JSON request data".to_string()))
    }

    /// Decode `data` into the request type of an endpoint. A missing or null
    /// `data` member decodes as an empty object.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match &self.data {
            Some(Value::Null) | None => Value::Object(Default::default()),
            Some(value) => value.clone(),
        };
        serde_json::from_value(value)
            .map_err(|e| AppError::BadRequest(format!("Malformed request data: {e}")))
    }
}

#[async_trait]
impl<S> FromRequest<S> for Envelope
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|_| AppError::BadRequest("Could not read request body".to_string()))?;
        Envelope::parse(&body)
    }
}

/// The typed `data` member of an API request.
pub struct ApiData<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiData<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let envelope = Envelope::from_request(req, state).await?;
        envelope.data().map(ApiData)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T = Value> {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            error: None,
            token: None,
            data: Some(data),
        }
    }

    pub fn with_token(mut self, token: String) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }
}

impl ApiResponse<Value> {
    pub fn empty() -> Self {
        Self {
            status: STATUS_OK.to_string(),
            error: None,
            token: None,
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR.to_string(),
            error: Some(message.into()),
            token: None,
            data: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_FATAL.to_string(),
            error: Some(message.into()),
            token: None,
            data: None,
        }
    }
}

/// A request flag that accepts either a boolean or a string, where any
/// non-empty string counts as set.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    pub fn is_set(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Text(s) => !s.is_empty(),
        }
    }
}
