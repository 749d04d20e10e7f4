use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{Cookie, CookieJar, Header, SameSite};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::{Data, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "signin_session";

/// Request ID that is attached to every request for tracking
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        RequestId(Uuid::new_v4().to_string())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Fairing that adds request ID to all requests and logs request/response information
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        let request_id = RequestId::new();
        let method = request.method();
        let uri = request.uri();

        // Store request_id in local_cache for later retrieval
        request.local_cache(|| Some(request_id.clone()));

        info!(
            request_id = %request_id.0,
            method = %method,
            uri = %uri,
            "incoming request"
        );
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let request_id = request
            .local_cache(|| None::<RequestId>)
            .as_ref()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let status = response.status();
        let method = request.method();
        let uri = request.uri();

        // Add request_id to response headers for client tracking
        response.set_header(Header::new("X-Request-Id", request_id.clone()));

        // Add security headers
        response.set_header(Header::new("X-Content-Type-Options", "nosniff"));
        response.set_header(Header::new("X-Frame-Options", "DENY"));
        response.set_header(Header::new("Cache-Control", "no-store"));

        // Log response with appropriate level based on status
        if status.class().is_server_error() || status.class().is_client_error() {
            warn!(
                request_id = %request_id,
                method = %method,
                uri = %uri,
                status = %status.code,
                "request completed with error"
            );
        } else {
            info!(
                request_id = %request_id,
                method = %method,
                uri = %uri,
                status = %status.code,
                "request completed"
            );
        }
    }
}

// ── ClientFingerprint guard ───────────────────────────────────────────────────

/// Coarse client identity: a digest of the client IP and `User-Agent`.
///
/// Combined with the submitted email it forms the rate limiter identifier, so one noisy client
/// cannot lock others out of the same account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFingerprint(pub String);

impl ClientFingerprint {
    pub fn from_parts(ip: Option<&str>, user_agent: Option<&str>) -> Self {
        let digest = Sha256::digest(format!("{}|{}", ip.unwrap_or("-"), user_agent.unwrap_or("-")).as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(16);
        ClientFingerprint(encoded)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientFingerprint {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, ()> {
        let ip = req.client_ip().map(|ip| ip.to_string());
        let user_agent = req.headers().get_one("User-Agent");
        Outcome::Success(ClientFingerprint::from_parts(ip.as_deref(), user_agent))
    }
}

impl<'a> OpenApiFromRequest<'a> for ClientFingerprint {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}

// ── SignInSessionId guard ─────────────────────────────────────────────────────

/// Sign-in session id from the private session cookie, if the browser sent a valid one.
#[derive(Debug, Clone, Copy)]
pub struct SignInSessionId(pub Option<Uuid>);

impl SignInSessionId {
    pub fn store(cookies: &CookieJar<'_>, id: Uuid) {
        if cookie_matches(cookies, id) {
            return;
        }
        cookies.add_private(
            Cookie::build((SESSION_COOKIE, id.to_string()))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Strict)
                .build(),
        );
    }
}

fn cookie_matches(cookies: &CookieJar<'_>, id: Uuid) -> bool {
    cookies
        .get_private(SESSION_COOKIE)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
        .is_some_and(|current| current == id)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SignInSessionId {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, ()> {
        let id = req.cookies().get_private(SESSION_COOKIE).and_then(|c| Uuid::parse_str(c.value()).ok());
        Outcome::Success(SignInSessionId(id))
    }
}

impl<'a> OpenApiFromRequest<'a> for SignInSessionId {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}
