pub mod handlers;
pub mod rate_limit;
pub mod router;

pub use handlers::AppState;
pub use rate_limit::{
    RateLimitError, RateLimitResult, RateLimiter, WindowCounter, rate_limit_middleware,
};
pub use router::create_router;
