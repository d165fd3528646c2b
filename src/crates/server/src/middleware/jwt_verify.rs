use crate::AppState;
use actix_service::{forward_ready, Service, Transform};
use actix_web::{
    dev::ServiceRequest, dev::ServiceResponse, web, Error, HttpMessage, HttpRequest,
};
use domain::value::UserId;
use futures::future::{ok, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::rc::Rc;
use thiserror::Error;
use url::Url;

/// Authenticated caller identity, resolved from a verified token and placed
/// into request extensions for the handlers.
#[derive(Debug, Clone)]
pub struct Caller(pub UserId);

#[derive(Error, Debug)]
pub enum JwtError {
    #[error("no token found")]
    NoTokenFound,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("invalid subject: {0}")]
    InvalidSubject(String),
}

// There are two steps in middleware processing.
// 1. Middleware initialization, middleware factory gets called with
//    next service in chain as parameter.
// 2. Middleware's call method gets called with normal request.
pub struct JwtVerifier {}

impl<S, B> Transform<S, ServiceRequest> for JwtVerifier
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtVerifyMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(JwtVerifyMiddleware {
            service: Rc::new(service),
        })
    }
}

pub struct JwtVerifyMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for JwtVerifyMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);
    fn call(&self, req: ServiceRequest) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().unwrap().clone();
        let service = self.service.clone();
        let (http_request, payload) = req.into_parts();
        let fut = async move {
            // Websocket clients cannot set headers, so the token may also
            // arrive as a query parameter.
            let token_finders: Vec<TokenFinder> = vec![token_from_header, token_from_query];
            match verify_jwt(&state, &http_request, &token_finders) {
                Ok(caller) => {
                    let req = ServiceRequest::from_parts(http_request, payload);
                    req.extensions_mut().insert(caller);
                    service.call(req).await
                }
                Err(_) => Err(actix_web::error::ErrorUnauthorized("Unauthorized")),
            }
        };
        Box::pin(fut)
    }
}

type TokenFinder = fn(req: &HttpRequest) -> Option<String>;

fn token_from_header(req: &HttpRequest) -> Option<String> {
    if let Some(auth_header) = req.headers().get("Authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    None
}

fn token_from_query(req: &HttpRequest) -> Option<String> {
    let query_string = req.query_string();
    let url = Url::parse(&format!("http://localhost/?{}", query_string)).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.to_string())
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

fn verify_jwt(
    state: &web::Data<AppState>,
    req: &HttpRequest,
    finders: &[TokenFinder],
) -> Result<Caller, JwtError> {
    let token = finders
        .iter()
        .find_map(|finder| finder(req))
        .ok_or(JwtError::NoTokenFound)?;
    let secret = state.app_cfg.jwt_secret();
    let data = decode::<TokenClaims>(
        &token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| JwtError::InvalidToken(e.to_string()))?;
    let user_id: i64 = data
        .claims
        .sub
        .parse()
        .map_err(|_| JwtError::InvalidSubject(data.claims.sub.clone()))?;
    Ok(Caller(UserId::from(user_id)))
}
