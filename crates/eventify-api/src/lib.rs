pub mod admin;
pub mod auth;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod media;
pub mod middleware;
pub mod notify;
pub mod payments;
pub mod policy;
pub mod routes;
pub mod state;
pub mod stats;
pub mod tickets;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{ApiError, ApiResult};
pub use state::{AppState, AppStateInner};
