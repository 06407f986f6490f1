//! keel-api: REST API for the Keel control plane.
//!
//! Thin axum handlers over an `Arc<dyn Provider>`. JSON bodies use the
//! `{success, data, error}` envelope; logs, objects and proxied bytes are
//! streamed raw.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/system` | Rack name, version and status |
//! | GET | `/apps` | List apps |
//! | POST | `/apps` | Create an app |
//! | GET | `/apps/{app}` | Get an app |
//! | DELETE | `/apps/{app}` | Delete an app and everything it owns |
//! | GET | `/apps/{app}/builds` | List builds, newest first |
//! | POST | `/apps/{app}/builds` | Start a build |
//! | GET | `/apps/{app}/builds/{id}` | Get a build |
//! | PUT | `/apps/{app}/builds/{id}` | Partially update a build |
//! | GET | `/apps/{app}/builds/{id}/logs` | Follow build output |
//! | GET | `/apps/{app}/releases` | List releases, newest first |
//! | POST | `/apps/{app}/releases` | Create a release |
//! | GET | `/apps/{app}/releases/{id}` | Get a release |
//! | GET | `/apps/{app}/processes` | List running processes |
//! | POST | `/apps/{app}/processes` | Run a process |
//! | DELETE | `/apps/{app}/processes/{pid}` | Stop a process |
//! | POST | `/apps/{app}/processes/{pid}/files` | Unpack a tar archive into a process |
//! | DELETE | `/apps/{app}/processes/{pid}/files?files=a,b` | Remove files from a process |
//! | POST | `/apps/{app}/processes/{pid}/proxy/{port}` | Stream bytes to a process port |
//! | GET | `/apps/{app}/objects` | List object keys |
//! | GET/POST/HEAD/DELETE | `/apps/{app}/objects/{*key}` | Fetch, store, check, delete an object |
//! | GET | `/apps/{app}/tables/{table}` | List row ids |
//! | POST | `/apps/{app}/tables/{table}` | Store a row |
//! | GET/DELETE | `/apps/{app}/tables/{table}/{id}` | Fetch or delete a row |

pub mod handlers;
mod stream;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use keel_provider::Provider;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub provider: Arc<dyn Provider>,
}

/// Build the complete API router.
pub fn build_router(provider: Arc<dyn Provider>) -> Router {
    let state = ApiState { provider };

    Router::new()
        .route("/system", get(handlers::get_system))
        .route("/apps", get(handlers::list_apps).post(handlers::create_app))
        .route("/apps/{app}", get(handlers::get_app).delete(handlers::delete_app))
        .route("/apps/{app}/builds", get(handlers::list_builds).post(handlers::create_build))
        .route("/apps/{app}/builds/{id}", get(handlers::get_build).put(handlers::update_build))
        .route("/apps/{app}/builds/{id}/logs", get(handlers::build_logs))
        .route(
            "/apps/{app}/releases",
            get(handlers::list_releases).post(handlers::create_release),
        )
        .route("/apps/{app}/releases/{id}", get(handlers::get_release))
        .route(
            "/apps/{app}/processes",
            get(handlers::list_processes).post(handlers::run_process),
        )
        .route("/apps/{app}/processes/{pid}", delete(handlers::stop_process))
        .route(
            "/apps/{app}/processes/{pid}/files",
            post(handlers::upload_files).delete(handlers::delete_files),
        )
        .route("/apps/{app}/processes/{pid}/proxy/{port}", post(handlers::proxy))
        .route("/apps/{app}/objects", get(handlers::list_objects))
        .route(
            "/apps/{app}/objects/{*key}",
            get(handlers::fetch_object)
                .post(handlers::store_object)
                .head(handlers::object_exists)
                .delete(handlers::delete_object),
        )
        .route(
            "/apps/{app}/tables/{table}",
            get(handlers::list_rows).post(handlers::store_row),
        )
        .route(
            "/apps/{app}/tables/{table}/{id}",
            get(handlers::fetch_row).delete(handlers::delete_row),
        )
        .with_state(state)
}
