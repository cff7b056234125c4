// jobhost Infrastructure - System Adapters
// Implements: ProcessSpawner (tokio::process + nix signals)

pub mod subprocess_spawner;

pub use subprocess_spawner::{SubprocessSpawner, DEFAULT_ENV_ALLOWLIST};
