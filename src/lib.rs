mod config;
mod database;
mod db;
mod error;
mod middleware;
mod models;
mod routes;
mod security;
mod service;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use security::{Collaborators, SecurityCore};

use crate::db::stage_db;
use crate::middleware::RequestLogger;
use crate::routes as app_routes;
use crate::security::{stage_maintenance_shutdown, stage_security};
use rocket::{Build, Rocket, catchers, http::Method};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};
use rocket_okapi::{get_openapi_route, okapi::merge::marge_spec_list};
use tracing_subscriber::EnvFilter;

fn init_tracing(log_level: &str, json_format: bool) {
    // Configure logging with environment variable support
    // RUST_LOG environment variable can be used for fine-grained control per module:
    // Examples:
    //   RUST_LOG=debug                    - Set all to debug
    //   RUST_LOG=signin_shield=debug                - Set this crate to debug
    //   RUST_LOG=signin_shield::service=trace       - Set specific module to trace
    //   RUST_LOG=info,signin_shield::service=debug  - Global info, services at debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_line_number(true);

    // try_init: a second build in the same process keeps the first subscriber
    let result = if json_format { subscriber.json().try_init() } else { subscriber.try_init() };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

fn ensure_rocket_secret_key() {
    let profile = std::env::var("ROCKET_PROFILE").unwrap_or_else(|_| "debug".to_string());

    // Only enforce ROCKET_SECRET_KEY requirement for non-debug profiles
    if profile != "debug" && std::env::var("ROCKET_SECRET_KEY").is_err() {
        panic!(
            "ROCKET_SECRET_KEY is required for profile '{}'. Generate one with: openssl rand -base64 32",
            profile
        );
    }
}

fn build_cors(cors_config: &config::CorsConfig) -> CorsOptions {
    let is_wildcard = cors_config.allowed_origins.len() == 1 && cors_config.allowed_origins[0] == "*";

    // Validate that wildcard origins are not combined with credentials
    if is_wildcard && cors_config.allow_credentials {
        panic!(
            "Invalid CORS configuration: Cannot use wildcard origins (*) with credentials enabled. \
            Either set specific origins or disable credentials."
        );
    }

    let allowed_origins = if cors_config.allowed_origins.is_empty() {
        AllowedOrigins::some_exact::<&str>(&[])
    } else if is_wildcard {
        AllowedOrigins::all()
    } else {
        AllowedOrigins::some_exact(&cors_config.allowed_origins.iter().map(String::as_str).collect::<Vec<_>>())
    };

    CorsOptions {
        allowed_origins,
        allowed_methods: vec![Method::Get, Method::Post, Method::Options, Method::Head]
        .into_iter()
        .map(From::from)
        .collect(),
        allowed_headers: rocket_cors::AllowedHeaders::some(&["Content-Type", "Accept", "X-Request-ID"]),
        allow_credentials: cors_config.allow_credentials,
        ..Default::default()
    }
}

fn get_swagger_config(openapi_url: &str) -> SwaggerUIConfig {
    SwaggerUIConfig {
        url: openapi_url.to_string(),
        ..Default::default()
    }
}

fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return config::DEFAULT_API_BASE_PATH.to_string();
    }

    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };

    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }

    normalized
}

fn join_base_path(base_path: &str, path: &str) -> String {
    let base = base_path.trim_end_matches('/');
    let suffix = path.trim_start_matches('/');

    if base.is_empty() {
        format!("/{}", suffix)
    } else {
        format!("{}/{}", base, suffix)
    }
}

struct RouteSpec {
    path: &'static str,
    routes: Vec<rocket::Route>,
    openapi: rocket_okapi::okapi::openapi3::OpenApi,
}

fn collect_route_specs() -> Vec<RouteSpec> {
    let (auth_routes, auth_openapi) = app_routes::auth::routes();
    let (unlock_routes, unlock_openapi) = app_routes::unlock::routes();
    let (health_routes, health_openapi) = app_routes::health::routes();

    vec![
        RouteSpec {
            path: "/auth",
            routes: auth_routes,
            openapi: auth_openapi,
        },
        RouteSpec {
            path: "",
            routes: unlock_routes,
            openapi: unlock_openapi,
        },
        RouteSpec {
            path: "/health",
            routes: health_routes,
            openapi: health_openapi,
        },
    ]
}

fn mount_point(base_path: &str, path: &str) -> String {
    if path.is_empty() { base_path.to_string() } else { join_base_path(base_path, path) }
}

fn mount_api_routes(mut rocket: Rocket<Build>, base_path: &str, enable_swagger: bool) -> Rocket<Build> {
    let route_specs = collect_route_specs();

    if enable_swagger {
        let mut openapi_list = Vec::new();
        for spec in route_specs {
            rocket = rocket.mount(mount_point(base_path, spec.path), spec.routes);
            openapi_list.push((spec.path, spec.openapi));
        }

        match marge_spec_list(&openapi_list) {
            Ok(openapi_docs) => {
                let settings = rocket_okapi::settings::OpenApiSettings::default();
                rocket = rocket.mount(base_path, vec![get_openapi_route(openapi_docs, &settings)]);

                let docs_path = join_base_path(base_path, "docs");
                let openapi_url = join_base_path(base_path, "openapi.json");
                rocket = rocket.mount(docs_path, make_swagger_ui(&get_swagger_config(&openapi_url)));
            }
            Err(err) => tracing::error!(error = %err, "could not merge OpenAPI spec, docs disabled"),
        }
    } else {
        for spec in route_specs {
            rocket = rocket.mount(mount_point(base_path, spec.path), spec.routes);
        }
    }

    rocket
}

/// Routes, catchers and request-level fairings. Services are staged separately.
fn assemble_rocket(rocket: Rocket<Build>, config: &Config) -> Rocket<Build> {
    let base_path = normalize_base_path(&config.api.base_path);

    let mut rocket = rocket.attach(RequestLogger);
    match build_cors(&config.cors).to_cors() {
        Ok(cors) => rocket = rocket.attach(cors),
        Err(err) => tracing::error!(error = %err, "invalid CORS configuration, CORS disabled"),
    }

    rocket = mount_api_routes(rocket, &base_path, config.api.enable_swagger);
    rocket.register(
        base_path.as_str(),
        catchers![
            app_routes::error::bad_request,
            app_routes::error::not_found,
            app_routes::error::conflict,
            app_routes::error::unprocessable_entity,
            app_routes::error::too_many_requests,
            app_routes::error::internal_error
        ],
    )
}

pub fn build_rocket(config: Config) -> Rocket<Build> {
    init_tracing(&config.logging.level, config.logging.json_format);
    ensure_rocket_secret_key();

    let figment = rocket::Config::figment()
        .merge(("address", config.server.address.clone()))
        .merge(("port", config.server.port));

    assemble_rocket(rocket::custom(figment), &config)
        .attach(stage_db(config.database.clone()))
        .attach(stage_security(config))
        .attach(stage_maintenance_shutdown())
}

#[cfg(test)]
pub(crate) fn build_rocket_with_core(config: &Config, core: SecurityCore) -> Rocket<Build> {
    assemble_rocket(rocket::build(), config).manage(core)
}
