pub mod clock;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock, system_clock};
pub use error::{QuireError, Result};
pub use types::{Backend, CacheEnvelope, CacheStats};
