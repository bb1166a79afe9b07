//! Credential persistence and request-time token management
//!
//! Grants are stored per audience in a [`Keyring`]: a JSON file by default,
//! or the platform secret store with the `keyring` feature.
//! At request time a [`GrantTokenProvider`] serves the cached token or
//! refreshes it through the stored grant, writing the result back.

pub mod cache;
pub mod factory;
pub mod keyring;
pub mod provider;
pub mod secret_store;
pub mod store;

pub use cache::KeyringTokenCache;
pub use factory::AuthFactory;
pub use keyring::{FileKeyring, Keyring, KeyringItem, MemoryKeyring};
pub use provider::GrantTokenProvider;
#[cfg(feature = "keyring")]
pub use secret_store::SystemSecretStore;
pub use secret_store::{SecretStore, SecretStoreKeyring};
pub use store::{Item, KeyringStore, hash_key};
