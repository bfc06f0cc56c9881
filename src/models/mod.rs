pub mod location;
pub mod log_entry;
pub mod user;

pub use location::Location;
pub use log_entry::{LogSnapshot, OccupancyLogEntry};
pub use user::UserProfile;
