pub mod analytics;
pub mod routes;

pub use analytics::ApiState;
pub use routes::create_api_router;
