pub mod error;
pub mod fusion;
pub mod lead;
pub mod places;
pub mod provider;
pub mod serp;

pub use error::{ErrorKind, ProviderError};
pub use lead::Lead;
pub use provider::Provider;
