pub mod pool;
pub mod target;

pub use pool::{DownstreamPool, RawResponse, TransportError};
pub use target::{DownstreamTarget, RelayMode};
