pub mod config;
pub mod gateway;
pub mod metrics;
pub mod route;
pub mod router;

pub use config::FileConfiguration;
pub use gateway::{Gateway, RoutingState};
pub use router::{RequestMeta, Resolution, RouteTable};
