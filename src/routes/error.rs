use rocket::serde::Serialize;
use rocket::serde::json::Json;
use rocket::{Request, catch};

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct Error {
    pub message: String,
}

fn error(message: &str) -> Json<Error> {
    Json(Error { message: message.to_string() })
}

#[catch(400)]
pub fn bad_request(_: &Request) -> Json<Error> {
    error("Bad request")
}

#[catch(404)]
pub fn not_found(_: &Request) -> Json<Error> {
    error("Not found")
}

#[catch(409)]
pub fn conflict(_: &Request) -> Json<Error> {
    error("Conflict")
}

#[catch(422)]
pub fn unprocessable_entity(_: &Request) -> Json<Error> {
    error("Malformed request body")
}

#[catch(429)]
pub fn too_many_requests(_: &Request) -> Json<Error> {
    error("Too many requests")
}

#[catch(500)]
pub fn internal_error(_: &Request) -> Json<Error> {
    error("Internal server error")
}
