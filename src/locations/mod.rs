mod monitor;
mod queries;

pub use monitor::{LocationMonitor, LocationView};
pub use queries::{favorite_locations, LocationFilter, LocationQueries, ALL_TYPES, DEFAULT_LATEST_LIMIT};
