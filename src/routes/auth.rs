use crate::error::app_error::AppError;
use crate::middleware::{ClientFingerprint, SignInSessionId};
use crate::models::captcha::CaptchaResponse;
use crate::models::sign_in::{EmailRequest, SignInOutcome, SignInRequest, SignInResponse, SignUpCheckResponse};
use crate::security::SecurityCore;
use crate::service::sign_in::SignInAttempt;
use chrono::Utc;
use rocket::http::{CookieJar, Status};
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::{Request, State, get, post};
use rocket_okapi::OpenApiError;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::openapi;
use rocket_okapi::response::OpenApiResponderInner;
use validator::Validate;

/// Sign-in body with the HTTP status derived from its outcome.
#[derive(Debug)]
pub struct SignInReply(pub SignInResponse);

pub fn outcome_status(outcome: &SignInOutcome) -> Status {
    match outcome {
        SignInOutcome::Success { .. } => Status::Ok,
        SignInOutcome::IncorrectPassword { .. } | SignInOutcome::EmailNotFound { .. } => Status::Unauthorized,
        SignInOutcome::AccountLocked { .. } => Status::Locked,
        SignInOutcome::SocialLoginConflict { .. } => Status::Conflict,
        SignInOutcome::RateLimited { .. } => Status::TooManyRequests,
        SignInOutcome::CaptchaRequired => Status::PreconditionRequired,
        SignInOutcome::OtherError => Status::ServiceUnavailable,
    }
}

impl<'r> Responder<'r, 'static> for SignInReply {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = outcome_status(&self.0.outcome);
        (status, Json(self.0)).respond_to(req)
    }
}

impl OpenApiResponderInner for SignInReply {
    fn responses(generator: &mut OpenApiGenerator) -> Result<Responses, OpenApiError> {
        let mut responses = Json::<SignInResponse>::responses(generator)?;
        for (code, description) in [
            ("401", "Incorrect password or unknown email"),
            ("409", "Account registered through a social login provider"),
            ("423", "Account temporarily locked"),
            ("428", "CAPTCHA answer required"),
            ("429", "Too many sign-in attempts"),
            ("503", "Sign-in temporarily unavailable"),
        ] {
            responses.responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

/// Sign in with email and password
///
/// Every response carries a tagged `outcome` and the CAPTCHA state of the session.
#[openapi(tag = "Sign-in")]
#[post("/sign-in", data = "<payload>")]
pub async fn post_sign_in(
    core: &State<SecurityCore>,
    cookies: &CookieJar<'_>,
    session_id: SignInSessionId,
    fingerprint: ClientFingerprint,
    payload: Json<SignInRequest>,
) -> Result<SignInReply, AppError> {
    payload.validate()?;

    let prior_attempts = core.sign_in.prior_attempts(&payload.email, &fingerprint.0).await;
    let now = Utc::now();
    let (id, session) = core.sessions.get_or_create(session_id.0, now).await;
    SignInSessionId::store(cookies, id);

    // The session lock is not held across the credential check so a newer submission can
    // overtake this one.
    let (submission, captcha) = {
        let mut session = session.lock().await;
        let submission = session.begin_submission(now);
        session.absorb_prior_failures(prior_attempts);
        (submission, session.captcha_gate(payload.captcha_answer.as_deref(), now))
    };

    let attempt = SignInAttempt {
        email: &payload.email,
        password: &payload.password,
        fingerprint: &fingerprint.0,
        captcha,
    };
    let outcome = core.sign_in.sign_in(&attempt).await;

    let finished = Utc::now();
    let mut session = session.lock().await;
    session.apply_outcome(submission, &outcome, finished)?;
    let view = session.captcha_view(finished);

    Ok(SignInReply(SignInResponse::new(outcome, view.required, view.question)))
}

/// Current CAPTCHA question for this sign-in session
#[openapi(tag = "Sign-in")]
#[get("/captcha")]
pub async fn get_captcha(core: &State<SecurityCore>, cookies: &CookieJar<'_>, session_id: SignInSessionId) -> Json<CaptchaResponse> {
    let now = Utc::now();
    let (id, session) = core.sessions.get_or_create(session_id.0, now).await;
    SignInSessionId::store(cookies, id);

    let view = session.lock().await.captcha_view(now);
    Json(view)
}

/// Replace the current CAPTCHA question
#[openapi(tag = "Sign-in")]
#[post("/captcha/refresh")]
pub async fn post_captcha_refresh(core: &State<SecurityCore>, cookies: &CookieJar<'_>, session_id: SignInSessionId) -> Json<CaptchaResponse> {
    let now = Utc::now();
    let (id, session) = core.sessions.get_or_create(session_id.0, now).await;
    SignInSessionId::store(cookies, id);

    let view = session.lock().await.refresh_captcha(now);
    Json(view)
}

/// Check whether an email can register with a password
#[openapi(tag = "Sign-up")]
#[post("/sign-up/check", data = "<payload>")]
pub async fn post_sign_up_check(
    core: &State<SecurityCore>,
    fingerprint: ClientFingerprint,
    payload: Json<EmailRequest>,
) -> Result<Json<SignUpCheckResponse>, AppError> {
    payload.validate()?;
    let response = core.sign_in.check_sign_up(&payload.email, &fingerprint.0).await?;
    Ok(Json(response))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![post_sign_in, get_captcha, post_captcha_refresh, post_sign_up_check]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use crate::models::directory::AuthProvider;
    use crate::test_utils::{ScriptedDirectory, StubVerifier, directory_user, test_core};
    use rocket::http::ContentType;
    use rocket::local::asynchronous::{Client, LocalResponse};
    use serde_json::{Value, json};
    use uuid::Uuid;

    const PASSWORD: &str = "correct horse battery staple";

    async fn client() -> Client {
        let mut google = directory_user("g@example.com");
        google.metadata.insert("provider".into(), "google".into());
        let alice = directory_user("alice@example.com");
        let verifier = StubVerifier::new().with_account(alice.id, "alice@example.com", PASSWORD);

        let config = Config::default();
        let core = test_core(&config, ScriptedDirectory::new(vec![alice, google]), verifier);
        Client::tracked(crate::build_rocket_with_core(&config, core)).await.expect("valid rocket instance")
    }

    async fn sign_in<'c>(client: &'c Client, email: &str, password: &str, captcha_answer: Option<&str>) -> LocalResponse<'c> {
        client
            .post("/api/v1/auth/sign-in")
            .header(ContentType::JSON)
            .body(json!({"email": email, "password": password, "captcha_answer": captcha_answer}).to_string())
            .dispatch()
            .await
    }

    #[test]
    fn statuses_follow_outcomes() {
        assert_eq!(outcome_status(&SignInOutcome::IncorrectPassword { remaining_attempts: 2 }), Status::Unauthorized);
        assert_eq!(outcome_status(&SignInOutcome::CaptchaRequired), Status::PreconditionRequired);
        assert_eq!(outcome_status(&SignInOutcome::OtherError), Status::ServiceUnavailable);
        assert_eq!(
            outcome_status(&SignInOutcome::Success {
                user_id: Uuid::new_v4(),
                two_factor: None
            }),
            Status::Ok
        );
    }

    #[rocket::async_test]
    async fn successful_sign_in() {
        let client = client().await;
        let response = sign_in(&client, "alice@example.com", PASSWORD, None).await;

        assert_eq!(response.status(), Status::Ok);
        assert!(response.cookies().get("signin_session").is_some());
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["outcome"]["kind"], "success");
        assert_eq!(body["category"], "success");
        assert_eq!(body["captcha_required"], false);
    }

    #[rocket::async_test]
    async fn wrong_password_reports_remaining_attempts() {
        let client = client().await;
        let response = sign_in(&client, "alice@example.com", "nope", None).await;

        assert_eq!(response.status(), Status::Unauthorized);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["outcome"]["kind"], "incorrect_password");
        assert_eq!(body["outcome"]["remaining_attempts"], 4);
    }

    #[rocket::async_test]
    async fn malformed_email_is_rejected_before_the_limiter() {
        let client = client().await;
        let response = sign_in(&client, "not-an-email", PASSWORD, None).await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = sign_in(&client, "alice@example.com", "nope", None).await;
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["outcome"]["remaining_attempts"], 4);
    }

    #[rocket::async_test]
    async fn social_account_is_a_terminal_conflict() {
        let client = client().await;
        let response = sign_in(&client, "g@example.com", PASSWORD, None).await;

        assert_eq!(response.status(), Status::Conflict);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["outcome"]["kind"], "social_login_conflict");
        assert_eq!(body["category"], "terminal");
        assert!(body["message"].as_str().unwrap().contains("Google"));
    }

    #[rocket::async_test]
    async fn captcha_escalates_after_repeated_failures() {
        let client = client().await;
        for _ in 0..3 {
            sign_in(&client, "nobody@example.com", "nope", None).await;
        }

        let captcha: Value = client.get("/api/v1/auth/captcha").dispatch().await.into_json().await.unwrap();
        assert_eq!(captcha["required"], true);
        assert_eq!(captcha["question"], "What is 2 + 3?");

        let response = sign_in(&client, "alice@example.com", PASSWORD, None).await;
        assert_eq!(response.status(), Status::PreconditionRequired);

        let response = sign_in(&client, "alice@example.com", PASSWORD, Some("5")).await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["captcha_required"], false);
    }

    #[rocket::async_test]
    async fn captcha_escalates_without_a_session_cookie() {
        let config = Config::default();
        let alice = directory_user("alice@example.com");
        let verifier = StubVerifier::new().with_account(alice.id, "alice@example.com", PASSWORD);
        let core = test_core(&config, ScriptedDirectory::new(vec![alice]), verifier);
        let client = Client::untracked(crate::build_rocket_with_core(&config, core)).await.expect("valid rocket instance");

        for _ in 0..2 {
            let response = sign_in(&client, "alice@example.com", "nope", None).await;
            assert_eq!(response.status(), Status::Unauthorized);
        }

        let response = sign_in(&client, "alice@example.com", "nope", None).await;
        assert_eq!(response.status(), Status::PreconditionRequired);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["captcha_required"], true);
        assert_eq!(body["captcha_question"], "What is 2 + 3?");
    }

    #[rocket::async_test]
    async fn captcha_is_not_required_for_a_fresh_session() {
        let client = client().await;
        let response = client.post("/api/v1/auth/captcha/refresh").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["required"], false);
        assert!(body["question"].is_null());
    }

    #[rocket::async_test]
    async fn sign_up_check_names_the_social_provider() {
        let client = client().await;
        let response = client
            .post("/api/v1/auth/sign-up/check")
            .header(ContentType::JSON)
            .body(json!({"email": "g@example.com"}).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let body: SignUpCheckBody = response.into_json().await.unwrap();
        assert!(!body.allowed);
        assert_eq!(body.providers, vec![AuthProvider::Google]);
    }

    #[derive(serde::Deserialize)]
    struct SignUpCheckBody {
        allowed: bool,
        providers: Vec<AuthProvider>,
    }
}
