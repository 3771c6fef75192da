mod errors;
mod routes;
mod server;
mod state;

pub use errors::ApiError;
pub use server::{router, GatewayServer};
pub use state::AppState;
