use schemars::JsonSchema;
use serde::Serialize;

#[derive(Debug, Serialize, JsonSchema)]
pub struct UnlockResponse {
    pub message: String,
}

/// Same wording whether or not the account exists or is locked.
pub const UNLOCK_REQUEST_MESSAGE: &str = "If this account is locked, we have sent an unlock link to its email address.";
