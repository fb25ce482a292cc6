pub mod bootstrap;
pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod router;
pub mod routes;
pub mod state;
pub mod static_files;
pub mod tls;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use router::{Route, RouteTable};
pub use state::AppState;
