//! Caller identity extraction. Authentication happens upstream; the provider only maps what the
//! authenticating layer left on the request to a `RequestIdentity`.

use crate::identity::RequestIdentity;
use crate::state::AppState;
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLE_GROUP_HEADER: &str = "x-role-group";
pub const ADMIN_HEADER: &str = "x-admin";
pub const DEBUG_HEADER: &str = "x-debug";

pub trait IdentityProvider: Send + Sync {
    fn identify(&self, parts: &Parts) -> RequestIdentity;
}

/// Every caller is a non-admin without an authorized id.
#[derive(Clone, Copy, Debug, Default)]
pub struct Anonymous;

impl IdentityProvider for Anonymous {
    fn identify(&self, _parts: &Parts) -> RequestIdentity {
        RequestIdentity::anonymous()
    }
}

/// Reads `x-user-id`, `x-role-group`, `x-admin` and `x-debug`. Only for deployments where a
/// gateway sets (and strips client-supplied) values of these headers.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrustedHeaders;

impl IdentityProvider for TrustedHeaders {
    fn identify(&self, parts: &Parts) -> RequestIdentity {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };
        let flag = |name: &str| header(name).map_or(false, |v| v == "1" || v.eq_ignore_ascii_case("true"));
        RequestIdentity {
            is_admin: flag(ADMIN_HEADER),
            role_group: header(ROLE_GROUP_HEADER).and_then(|v| v.parse().ok()).unwrap_or(0),
            authorized_user_id: header(USER_ID_HEADER).and_then(|v| v.parse().ok()),
            debug: flag(DEBUG_HEADER),
        }
    }
}

/// Extractor for the caller identity, resolved through the state's `IdentityProvider`.
#[derive(Clone, Debug)]
pub struct Identity(pub RequestIdentity);

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);
        Ok(Identity(app.identity.identify(parts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut req = Request::builder().uri("/");
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        req.body(()).unwrap().into_parts().0
    }

    #[test]
    fn trusted_headers_map_to_identity() {
        let id = TrustedHeaders.identify(&parts(&[
            ("x-user-id", "42"),
            ("x-role-group", "3"),
            ("x-admin", "true"),
            ("x-debug", "1"),
        ]));
        assert_eq!(
            id,
            RequestIdentity {
                is_admin: true,
                role_group: 3,
                authorized_user_id: Some(42),
                debug: true,
            }
        );
    }

    #[test]
    fn malformed_headers_fall_back_to_anonymous_values() {
        let id = TrustedHeaders.identify(&parts(&[("x-user-id", "abc"), ("x-role-group", "300")]));
        assert_eq!(id, RequestIdentity::anonymous());
        assert_eq!(Anonymous.identify(&parts(&[("x-admin", "1")])), RequestIdentity::anonymous());
    }
}
