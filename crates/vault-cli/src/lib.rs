//! Shared helpers for the `vaultd` and `vault-admin` binaries: the key-chain
//! file format and the chunk-store smoke test, both grounded in types
//! `vault-persona`/`vault-types` already expose.

pub mod chunk_test;
pub mod keychain;
