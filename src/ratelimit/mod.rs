//! Sliding-window quota tracking.

mod clock;
mod descriptor;
mod headers;
mod region;
mod scope;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use descriptor::{parse_descriptor, DescriptorError, DescriptorErrorKind, LimitTier};
pub use headers::{
    parse_usage, RateLimitHeaders, ScopeUsage, APP_RATE_LIMIT, APP_RATE_LIMIT_COUNT,
    METHOD_RATE_LIMIT, METHOD_RATE_LIMIT_COUNT,
};
pub use region::{EndpointSnapshot, RegionHistory, RegionSnapshot, ScopeSnapshot};
pub use scope::ScopeHistory;
