use crate::error::app_error::AppError;
use crate::middleware::ClientFingerprint;
use crate::models::sign_in::EmailRequest;
use crate::models::unlock::UnlockResponse;
use crate::security::SecurityCore;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use validator::Validate;

/// Request an account unlock email
///
/// The reply is the same whether or not the account exists or is locked.
#[openapi(tag = "Account Unlock")]
#[post("/unlock/request", data = "<payload>")]
pub async fn post_unlock_request(
    core: &State<SecurityCore>,
    fingerprint: ClientFingerprint,
    payload: Json<EmailRequest>,
) -> Result<Json<UnlockResponse>, AppError> {
    payload.validate()?;
    let response = core.unlock.request(&payload.email, &fingerprint.0).await?;
    Ok(Json(response))
}

/// Unlock an account using an emailed token
///
/// Called when a user clicks their account unlock email link.
#[openapi(tag = "Account Unlock")]
#[get("/unlock?<token>&<user>")]
pub async fn get_unlock(core: &State<SecurityCore>, token: String, user: String) -> Result<Json<UnlockResponse>, AppError> {
    let response = core.unlock.apply(&user, &token).await?;
    Ok(Json(response))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![post_unlock_request, get_unlock]
}
