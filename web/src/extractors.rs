//! Custom Axum extractors.
//!
//! Axum's built-in extractors reject with plain-text bodies. These wrap them so
//! every rejection is an [`AppError`] with the usual JSON shape:
//!
//! - [`JsonBody`]: JSON request body, 400 on malformed input
//! - [`QueryParams`]: query string, 400 on malformed input
//! - [`PathUuid`]: single `:id` path segment parsed as a UUID, 400 otherwise
//! - [`CorrelationId`]: the id assigned by the correlation middleware
//!
//! # Examples
//!
//! ```ignore
//! use regpay_web::extractors::{CorrelationId, JsonBody, PathUuid};
//!
//! async fn cancel(
//!     State(state): State<AppState>,
//!     correlation_id: CorrelationId,
//!     PathUuid(id): PathUuid,
//!     JsonBody(body): JsonBody<CancelRequest>,
//! ) -> Result<StatusCode, AppError> {
//!     tracing::info!(correlation_id = %correlation_id.0, registration_id = %id, "Cancelling");
//!     state.store.cancel(id, &body.reason).await?;
//!     Ok(StatusCode::NO_CONTENT)
//! }
//! ```

use axum::{
    Json, async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::request::Parts,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;

/// Correlation ID for request tracing.
///
/// Set by [`correlation_id_layer`](crate::middleware::correlation_id_layer).
/// Without the layer, falls back to the raw header or a new UUID v4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(id.clone());
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);

        Ok(Self(correlation_id))
    }
}

/// JSON body that rejects with [`AppError::bad_request`].
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// Query string that rejects with [`AppError::bad_request`].
#[derive(Debug, Clone)]
pub struct QueryParams<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// A single path parameter parsed as a UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathUuid(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for PathUuid
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::bad_request(rejection.body_text()))?;

        Uuid::parse_str(&raw)
            .map(Self)
            .map_err(|_| AppError::bad_request(format!("invalid registration id: {raw}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode, header},
        response::IntoResponse,
        routing::get,
    };
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Debug, Deserialize)]
    struct Reason {
        reason: String,
    }

    fn json_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("Valid request")
    }

    #[tokio::test]
    async fn test_json_body_parses() {
        let JsonBody(body) = JsonBody::<Reason>::from_request(json_request(r#"{"reason":"sick"}"#), &())
            .await
            .expect("Should extract");

        assert_eq!(body.reason, "sick");
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let err = JsonBody::<Reason>::from_request(json_request("{not json"), &())
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_missing_field_is_bad_request() {
        let err = JsonBody::<Reason>::from_request(json_request("{}"), &())
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_query_params_reject_bad_numbers() {
        #[derive(Debug, Deserialize)]
        struct Page {
            #[allow(dead_code)]
            limit: u32,
        }

        let req = Request::builder()
            .uri("/registrations?limit=lots")
            .body(())
            .expect("Valid request");
        let (mut parts, ()) = req.into_parts();

        let err = QueryParams::<Page>::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_path_uuid() {
        async fn handler(PathUuid(id): PathUuid) -> impl IntoResponse {
            id.to_string()
        }

        let app = Router::new().route("/registrations/:id", get(handler));
        let id = Uuid::new_v4();

        let ok = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/registrations/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let bad = app
            .oneshot(
                Request::builder()
                    .uri("/registrations/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_correlation_id_from_header() {
        let req = Request::builder()
            .header(CORRELATION_ID_HEADER, "req-1")
            .body(())
            .expect("Valid request");

        let (mut parts, ()) = req.into_parts();
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(correlation_id.0, "req-1");
    }

    #[tokio::test]
    async fn test_correlation_id_generates_new() {
        let req = Request::builder().body(()).expect("Valid request");

        let (mut parts, ()) = req.into_parts();
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert!(Uuid::parse_str(&correlation_id.0).is_ok());
    }
}
