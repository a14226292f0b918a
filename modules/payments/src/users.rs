//! Payer e-mail lookup against the user service.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Hard deadline for one lookup, independent of the caller.
pub const USER_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Error, Debug)]
pub enum UserLookupError {
    #[error("user {0} not found")]
    NotFound(i64),

    #[error("user lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("user service error: {0}")]
    Service(String),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_email(&self, user_id: i64) -> Result<String, UserLookupError>;
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    email: String,
}

/// `GET {base_url}/users/{id}` returning `{"email": ...}`.
#[derive(Clone)]
pub struct HttpUserDirectory {
    base_url: String,
    http_client: Client,
    timeout: Duration,
}

impl HttpUserDirectory {
    pub fn new(base_url: impl Into<String>) -> Result<Self, UserLookupError> {
        let http_client = Client::builder()
            .build()
            .map_err(|e| UserLookupError::Service(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            timeout: USER_LOOKUP_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch_email(&self, user_id: i64) -> Result<String, UserLookupError> {
        let url = format!("{}/users/{}", self.base_url, user_id);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| UserLookupError::Service(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(UserLookupError::NotFound(user_id)),
            status if !status.is_success() => Err(UserLookupError::Service(format!(
                "status {} from user service",
                status.as_u16()
            ))),
            _ => {
                let user: UserResponse = response
                    .json()
                    .await
                    .map_err(|e| UserLookupError::Service(e.to_string()))?;
                Ok(user.email)
            }
        }
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn get_user_email(&self, user_id: i64) -> Result<String, UserLookupError> {
        tokio::time::timeout(self.timeout, self.fetch_email(user_id))
            .await
            .map_err(|_| UserLookupError::Timeout(self.timeout))?
    }
}
