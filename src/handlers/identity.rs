//! Caller identity extraction.
//!
//! Authentication happens upstream. The gateway forwards the authenticated
//! principal in three headers, which are trusted as-is:
//!
//! - `x-fleet-owner`       : account that owns records and pays quota
//! - `x-fleet-subject`     : user, device or service acting for the owner
//! - `x-fleet-calling-type`: `USER`, `DEVICE` or `SERVICE`

use crate::{
    errors::AppError,
    models::caller::{Caller, CallingType},
};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};

pub const OWNER_HEADER: &str = "x-fleet-owner";
pub const SUBJECT_HEADER: &str = "x-fleet-subject";
pub const CALLING_TYPE_HEADER: &str = "x-fleet-calling-type";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    let value = headers
        .get(name)
        .ok_or_else(|| AppError::bad_request(format!("missing `{}` header", name)))?
        .to_str()
        .map_err(|_| AppError::bad_request(format!("`{}` header is not valid text", name)))?
        .trim();
    if value.is_empty() {
        return Err(AppError::bad_request(format!("`{}` header is empty", name)));
    }
    Ok(value)
}

/// Build a `Caller` from the forwarded identity headers.
pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, AppError> {
    let owner = header(headers, OWNER_HEADER)?;
    let subject = header(headers, SUBJECT_HEADER)?;
    let calling_type = header(headers, CALLING_TYPE_HEADER)?
        .parse::<CallingType>()
        .map_err(AppError::bad_request)?;
    Ok(Caller::new(owner, subject, calling_type))
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        caller_from_headers(&parts.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn reads_all_three_headers() {
        let caller = caller_from_headers(&headers(&[
            (OWNER_HEADER, "ownerA"),
            (SUBJECT_HEADER, "device-42"),
            (CALLING_TYPE_HEADER, "device"),
        ]))
        .unwrap();
        assert_eq!(caller, Caller::new("ownerA", "device-42", CallingType::Device));
    }

    #[test]
    fn missing_or_bad_headers_are_client_errors() {
        let err = caller_from_headers(&headers(&[(OWNER_HEADER, "ownerA")])).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = caller_from_headers(&headers(&[
            (OWNER_HEADER, " "),
            (SUBJECT_HEADER, "s"),
            (CALLING_TYPE_HEADER, "USER"),
        ]))
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = caller_from_headers(&headers(&[
            (OWNER_HEADER, "ownerA"),
            (SUBJECT_HEADER, "s"),
            (CALLING_TYPE_HEADER, "ROBOT"),
        ]))
        .unwrap_err();
        assert!(err.message.contains("ROBOT"));
    }
}
