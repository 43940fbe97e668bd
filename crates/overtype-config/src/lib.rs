pub mod agents;
pub mod env_file;
pub mod keystore;
pub mod settings;

pub use agents::{agent_by_id, available_providers, ProviderAgent, AGENT_REGISTRY};
pub use env_file::EnvFile;
pub use keystore::{KeyStore, KeyringSource, MasterKeySource, StoredKey, KEYSTORE_FILE_NAME};
pub use settings::{ConfigSnapshot, Settings};
