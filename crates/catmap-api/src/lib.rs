pub mod access;
pub mod auth;
pub mod cats;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod storage;
pub mod users;
pub mod validation;

use tracing::error;

use crate::auth::{AppState, AppStateInner};
use crate::error::ApiResult;

/// Run a blocking database call off the async runtime.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&AppStateInner) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    let out = tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            anyhow::anyhow!("spawn_blocking join error: {}", e)
        })??;
    Ok(out)
}
