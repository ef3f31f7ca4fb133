//! REST client for the reservation service.

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use roomhold_core::BookingError;
use roomhold_core::backend::{BackendFuture, BookingSummary, HoldGrant, HoldRequest, ReservationBackend, SessionGrant};
use roomhold_core::types::{HoldId, RoomTypeId, SessionId, StayDates};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionBody {
    check_in: NaiveDate,
    check_out: NaiveDate,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcquireHoldBody<'a> {
    session_id: &'a SessionId,
    item_type_id: &'a RoomTypeId,
    check_in: NaiveDate,
    check_out: NaiveDate,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryBody<'a> {
    hold_ids: &'a [HoldId],
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// [`ReservationBackend`] over HTTP
#[derive(Clone, Debug)]
pub struct HttpReservationBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpReservationBackend {
    /// Client for the service at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Client configured from [`BackendConfig`]
    #[must_use]
    pub fn from_config(config: &BackendConfig) -> Self {
        let backend = Self::new(config.url.clone());
        match &config.token {
            Some(token) => backend.with_token(token.clone()),
            None => backend,
        }
    }

    /// Sends `token` as a bearer token on every call
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BookingError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| BookingError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BookingError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| BookingError::Network(format!("unreadable response: {e}")))
    }
}

/// Maps a non-success answer onto the error taxonomy
fn map_status(status: StatusCode, body: &str) -> BookingError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|b| b.message.clone())
        .unwrap_or_else(|| format!("{status}: {body}"));

    match status {
        StatusCode::BAD_REQUEST => BookingError::Validation(message),
        StatusCode::NOT_FOUND => BookingError::Capacity(message),
        StatusCode::CONFLICT => {
            if parsed.and_then(|b| b.reason).as_deref() == Some("capacity") {
                BookingError::Capacity(message)
            } else {
                BookingError::LockConflict(message)
            }
        },
        status => BookingError::Network(message_with_status(status, &message)),
    }
}

fn message_with_status(status: StatusCode, message: &str) -> String {
    if message.starts_with(status.as_str()) {
        message.to_string()
    } else {
        format!("{status}: {message}")
    }
}

impl ReservationBackend for HttpReservationBackend {
    fn create_session(&self, dates: StayDates) -> BackendFuture<'_, SessionGrant> {
        Box::pin(async move {
            let body = CreateSessionBody {
                check_in: dates.check_in(),
                check_out: dates.check_out(),
            };
            self.send_json(self.client.post(self.url("sessions")).json(&body)).await
        })
    }

    fn acquire_hold(&self, request: HoldRequest) -> BackendFuture<'_, HoldGrant> {
        Box::pin(async move {
            let body = AcquireHoldBody {
                session_id: &request.session_id,
                item_type_id: &request.room_type,
                check_in: request.dates.check_in(),
                check_out: request.dates.check_out(),
                expires_at: request.expires_at,
            };
            self.send_json(self.client.post(self.url("holds")).json(&body)).await
        })
    }

    fn release_hold(&self, hold_id: HoldId) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.send(self.client.delete(self.url(&format!("holds/{hold_id}"))))
                .await
                .map(drop)
        })
    }

    fn release_all_holds(&self, session_id: SessionId) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.send(self.client.delete(self.url(&format!("sessions/{session_id}/holds"))))
                .await
                .map(drop)
        })
    }

    fn summary(&self, hold_ids: Vec<HoldId>) -> BackendFuture<'_, BookingSummary> {
        Box::pin(async move {
            let body = SummaryBody { hold_ids: &hold_ids };
            self.send_json(self.client.post(self.url("summary")).json(&body)).await
        })
    }
}
