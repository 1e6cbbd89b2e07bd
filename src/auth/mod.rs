pub mod token;

pub use token::{RefreshError, TokenManager};
