//! Client authentication and host identity

mod host_key;
mod users;

pub use host_key::load_or_generate_host_key;
pub use users::UserKeys;
