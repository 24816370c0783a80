pub mod api;
pub mod backend;
pub mod cache;
pub mod metrics;
pub mod observability;
pub mod server;
pub mod state;
pub mod sync;

pub use server::EdgeServer;
pub use state::AppState;
