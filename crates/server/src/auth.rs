//! Bearer-token authentication.

use std::future::{Ready, ready};

use actix_web::http::header;
use actix_web::{FromRequest, HttpRequest, dev::Payload, web};

use progress_core::model::UserId;

use crate::AppState;
use crate::error::ApiError;

/// The learner a request acts for, resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Learner(pub UserId);

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

impl FromRequest for Learner {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = req.app_data::<web::Data<AppState>>().and_then(|state| {
            bearer_token(req).and_then(|token| state.tokens.get(token).copied())
        });
        ready(user.map(Learner).ok_or(ApiError::Unauthorized))
    }
}
