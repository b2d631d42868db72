pub mod route_builder;

pub use route_builder::{build_router, register_routes};
