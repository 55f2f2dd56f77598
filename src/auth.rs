use crate::error::ApiError;
use crate::model::Owner;
use crate::utils::get_header;
use crate::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::IntoResponse;
use sha3::{Digest, Sha3_256};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const API_KEY_HEADER: &str = "x-api-key";
pub const ANONYMOUS_TOKEN_HEADER: &str = "x-anonymous-token";
const ANONYMOUS_TOKEN_PARAM: &str = "anonymous_token";

/// Who is calling the management API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Caller {
    /// Vouched for by the authentication gateway.
    User(String),
    Anonymous(String),
    Nobody,
}

impl Caller {
    pub fn owner(&self) -> Result<Owner, ApiError> {
        match self {
            Caller::User(user_id) => Ok(Owner::User(user_id.clone())),
            Caller::Anonymous(token) => Ok(Owner::Anonymous(token.clone())),
            Caller::Nobody => Err(ApiError::Unauthorized),
        }
    }
}

pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(api_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn anonymous_token_from_query(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == ANONYMOUS_TOKEN_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Resolves the [`Caller`] and stores it in the request extensions.
///
/// A user id is only trusted together with the gateway key; a request that
/// claims one without the right key is turned away.
pub async fn identify(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<impl IntoResponse, ApiError> {
    let headers = request.headers();
    let caller = if let Some(user_id) = get_header(USER_ID_HEADER, headers) {
        let provided_api_key = get_header(API_KEY_HEADER, headers).ok_or_else(|| {
            tracing::warn!("User id presented without gateway key");
            ApiError::Unauthorized
        })?;
        match &state.config.encrypted_api_key {
            Some(expected) if *expected == hash_api_key(&provided_api_key) => Caller::User(user_id),
            _ => {
                tracing::warn!("User id presented with invalid gateway key");
                return Err(ApiError::Unauthorized);
            }
        }
    } else if let Some(token) = get_header(ANONYMOUS_TOKEN_HEADER, headers)
        .or_else(|| anonymous_token_from_query(request.uri().query()))
    {
        Caller::Anonymous(token)
    } else {
        Caller::Nobody
    };
    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}
