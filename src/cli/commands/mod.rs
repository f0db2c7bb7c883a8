//! CLI command implementations

pub mod cache_key;
pub mod config;
pub mod inspect;
pub mod policy;

pub use cache_key::execute as cache_key;
pub use config::execute as config;
pub use inspect::execute as inspect;
pub use policy::execute as policy;
