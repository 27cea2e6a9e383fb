//! Request gates as axum extractors.
//!
//! Extractors run in argument order, so mutating handlers list `CsrfProtected`
//! before `CurrentUser`: signature check, then CSRF, then the store lookup and
//! last-seen touch. Path parameters go first of all so a malformed id is
//! rejected before any session work.

use std::convert::Infallible;

use axum::extract::{FromRequest, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::{IntoResponseParts, ResponseParts};

use super::AppState;
use crate::error::AppError;
use crate::storage::{Store, User};

/// `axum::Json` whose rejection is the usual JSON error body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// `axum::extract::Path` whose rejection is the usual JSON error body.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

/// `Set-Cookie` headers produced while resolving the session. Return it as a
/// response part so the sliding renewal reaches the client.
#[derive(Debug, Default)]
pub struct SessionRenewal(pub HeaderMap);

impl IntoResponseParts for SessionRenewal {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        // Append, never replace: handlers may set cookies of their own.
        for (name, value) in self.0.iter() {
            res.headers_mut().append(name.clone(), value.clone());
        }
        Ok(res)
    }
}

/// The authenticated caller for this request.
#[derive(Debug)]
pub struct CurrentUser {
    pub user: User,
    pub renewal: SessionRenewal,
}

impl<S: Store> FromRequestParts<AppState<S>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState<S>) -> Result<Self, Self::Rejection> {
        let mut renewal = HeaderMap::new();
        let user = state.sessions.resolve(&parts.headers, &mut renewal).await?;
        Ok(CurrentUser { user, renewal: SessionRenewal(renewal) })
    }
}

/// Proof that the request carries a valid session signature and a matching
/// CSRF cookie/header pair. Identity failures still win with 401.
#[derive(Debug, Clone, Copy)]
pub struct CsrfProtected;

impl<S: Store> FromRequestParts<AppState<S>> for CsrfProtected {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState<S>) -> Result<Self, Self::Rejection> {
        state.sessions.verify(&parts.headers)?;
        state.sessions.csrf().verify(&parts.headers)?;
        Ok(CsrfProtected)
    }
}
