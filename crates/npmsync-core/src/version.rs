/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `User-Agent` sent to registries.
pub const USER_AGENT: &str = concat!("npmsync/", env!("CARGO_PKG_VERSION"));
