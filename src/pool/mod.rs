pub mod account;
#[allow(clippy::module_inception)]
pub mod pool;
pub mod sync;

pub use account::{Account, AccountStatus, AuthMethod, Credentials};
pub use pool::{AccountPool, Selection};
pub use sync::SharedFileSync;
