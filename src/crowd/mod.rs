pub mod derive;
pub mod tracker;

pub use derive::{
    crowd_percentage, latest_without_count, percentage_of, usable_capacity, CrowdBand, CrowdLevel,
};
pub use tracker::{CrowdState, CrowdTracker};
