mod controller;
mod profile;
mod state;
mod worker;

pub use controller::SessionController;
pub use state::{FavoriteChange, SessionSnapshot};
