//! Credential and profile models shared by the token store and gateway.

pub mod credentials;
pub mod profile;
pub mod secret;

pub use credentials::*;
pub use profile::*;
pub use secret::*;
