//! Attempt rate limiting logic and state management.

mod clock;
mod format;
mod identifier;
mod limiter;
mod policy;
mod record;
mod registry;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use format::{format_remaining_time, render_status_table};
pub use identifier::{ClientIdentifier, ClientSignals};
pub use limiter::{AttemptDecision, AttemptStatus, KeyStatus, RateLimiter};
pub use policy::{
    validate_limiter_name, LimiterConfig, LimiterPolicies, LOGIN, PASSWORD_RESET,
    RESEND_VERIFICATION,
};
pub use record::{AttemptKey, AttemptRecord};
pub use registry::LimiterRegistry;
pub use store::{AttemptStore, FileStore, MemoryStore, DEFAULT_NAMESPACE};
