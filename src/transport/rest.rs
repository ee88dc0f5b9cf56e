use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::dispatch::PendingUpdate;
use crate::error::{TrackingError, TrackingResult};
use crate::models::{Shift, ShiftRequest};

use super::auth::AuthToken;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// The `/employee-tracking` endpoints this crate calls.
#[async_trait]
pub trait TrackingBackend: Send + Sync {
    async fn post_location(&self, update: &PendingUpdate) -> TrackingResult<()>;

    async fn start_shift(&self, request: &ShiftRequest) -> TrackingResult<Shift>;

    async fn end_shift(&self, request: &ShiftRequest) -> TrackingResult<Shift>;

    async fn current_shift(&self) -> TrackingResult<Option<Shift>>;

    async fn shift_history(&self, start: NaiveDate, end: NaiveDate) -> TrackingResult<Vec<Shift>>;
}

/// Responses come either bare or wrapped as `{"success": .., "data": ..}`.
/// `Bare` is tried first: a missing `data` would otherwise read as `None`
/// for optional payloads.
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Bare(T),
    Wrapped { data: T },
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(value) => value,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "error")]
    message: Option<String>,
}

pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: AuthToken,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, token: AuthToken) -> TrackingResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/employee-tracking/{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match self.token.bearer() {
            Some(bearer) => builder.header(reqwest::header::AUTHORIZATION, bearer),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> TrackingResult<T> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from(status, response).await);
        }
        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.into_inner())
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> TrackingResult<T> {
        debug!("POST /employee-tracking/{path}");
        self.send(self.request(Method::POST, path).json(body)).await
    }
}

async fn error_from(status: StatusCode, response: reqwest::Response) -> TrackingError {
    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    TrackingError::Network(format!("{} {message}", status.as_u16()))
}

#[async_trait]
impl TrackingBackend for HttpBackend {
    async fn post_location(&self, update: &PendingUpdate) -> TrackingResult<()> {
        // The body, if any, carries nothing we use.
        let response = self
            .request(Method::POST, "location")
            .json(update)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from(status, response).await);
        }
        Ok(())
    }

    async fn start_shift(&self, request: &ShiftRequest) -> TrackingResult<Shift> {
        self.post("start-shift", request).await
    }

    async fn end_shift(&self, request: &ShiftRequest) -> TrackingResult<Shift> {
        self.post("end-shift", request).await
    }

    async fn current_shift(&self) -> TrackingResult<Option<Shift>> {
        let response = self
            .request(Method::GET, "current-shift")
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(error_from(status, response).await);
        }
        let envelope: Envelope<Option<Shift>> = response.json().await?;
        Ok(envelope.into_inner())
    }

    async fn shift_history(&self, start: NaiveDate, end: NaiveDate) -> TrackingResult<Vec<Shift>> {
        let builder = self.request(Method::GET, "shift-history").query(&[
            ("start_date", start.format("%Y-%m-%d").to_string()),
            ("end_date", end.format("%Y-%m-%d").to_string()),
        ]);
        self.send(builder).await
    }
}
