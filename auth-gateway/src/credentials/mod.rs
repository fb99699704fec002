//! Shared storage for the current bearer credential.

mod store;

pub use store::CredentialStore;
