// src/cors.rs

use actix_web::{
    http::header::{self, HeaderValue, InvalidHeaderValue},
    HttpResponse,
};

const ALLOWED_METHODS: &str = "POST";
const ALLOWED_HEADERS: &str = "Content-Type";
const MAX_AGE_SECS: &str = "3600";

/// Cross-origin headers for a single allowed origin.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origin: HeaderValue,
}

impl CorsPolicy {
    pub fn new(origin: &str) -> Result<Self, InvalidHeaderValue> {
        Ok(Self {
            origin: HeaderValue::from_str(origin)?,
        })
    }

    /// `204 No Content` advertising the allowed origin, methods and headers.
    pub fn preflight(&self) -> HttpResponse {
        HttpResponse::NoContent()
            .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, self.origin.clone()))
            .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS))
            .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS))
            .insert_header((header::ACCESS_CONTROL_MAX_AGE, MAX_AGE_SECS))
            .finish()
    }

    /// Adds the origin and allowed-headers to an actual (non-preflight) response.
    pub fn apply(&self, mut resp: HttpResponse) -> HttpResponse {
        let headers = resp.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.origin.clone());
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        resp
    }
}
