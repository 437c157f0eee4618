pub mod controller;
pub mod model;
pub mod progress;

pub use controller::SessionController;
