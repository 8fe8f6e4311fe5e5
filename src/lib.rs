pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use axum::{Router, extract::FromRef, http::StatusCode, response::{IntoResponse, Response}};
use tower_http::cors::CorsLayer;

use auth::Authenticator;
use chat::{
    dispatcher::{self, Dispatcher, Submitter},
    participants::ParticipantResolver,
    registry::ConnectionRegistry,
};
use store::Store;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub authenticator: Arc<dyn Authenticator>,
    pub registry: ConnectionRegistry,
    pub resolver: ParticipantResolver,
    pub submitter: Submitter,
}

impl AppState {
    /// Wire the shared components together. The returned dispatcher must be
    /// spawned for anything to be delivered.
    pub fn new(
        store: Arc<dyn Store>,
        authenticator: Arc<dyn Authenticator>,
        dispatch_backlog_warn: usize,
    ) -> (AppState, Dispatcher) {
        let registry = ConnectionRegistry::new();
        let resolver = ParticipantResolver::new(store.clone());
        let (submitter, dispatcher) = dispatcher::channel(resolver.clone(), registry.clone(), dispatch_backlog_warn);

        (
            AppState {
                store,
                authenticator,
                registry,
                resolver,
                submitter,
            },
            dispatcher,
        )
    }
}

pub fn router(app_state: AppState) -> Router {
    chat::router()
        .with_state(app_state)
        .layer(CorsLayer::permissive())
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
