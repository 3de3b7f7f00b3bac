//! Key-chain file format read and written by the `vault-admin` key
//! commands. Key derivation itself is out of scope; each entry is a
//! randomly generated [`Identity`] standing in for a pmid keypair, the same
//! simplification [`Identity::derive_from`] documents for deterministic
//! content names elsewhere in this workspace.

use std::fs;
use std::io;
use std::path::Path;

use rand::RngCore;
use vault_types::{Identity, IDENTITY_BYTES};

/// Generates `count` fresh identities.
pub fn generate(count: usize) -> Vec<Identity> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let mut bytes = [0u8; IDENTITY_BYTES];
            rng.fill_bytes(&mut bytes);
            Identity::from(bytes)
        })
        .collect()
}

/// Writes one hex-encoded identity per line.
pub fn write(path: &Path, chain: &[Identity]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut out = String::with_capacity(chain.len() * (IDENTITY_BYTES * 2 + 1));
    for id in chain {
        for byte in id.as_bytes() {
            out.push_str(&format!("{byte:02x}"));
        }
        out.push('\n');
    }
    fs::write(path, out)
}

/// Reads a key-chain file written by [`write`].
pub fn read(path: &Path) -> io::Result<Vec<Identity>> {
    let content = fs::read_to_string(path)?;
    content.lines().filter(|line| !line.is_empty()).map(parse_identity).collect()
}

pub fn delete(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

fn parse_identity(line: &str) -> io::Result<Identity> {
    let malformed = || io::Error::new(io::ErrorKind::InvalidData, "malformed key-chain line");
    if line.len() != IDENTITY_BYTES * 2 {
        return Err(malformed());
    }
    let mut bytes = [0u8; IDENTITY_BYTES];
    for (i, byte) in bytes.iter_mut().enumerate() {
        let hex = line.get(i * 2..i * 2 + 2).ok_or_else(malformed)?;
        *byte = u8::from_str_radix(hex, 16).map_err(|_| malformed())?;
    }
    Ok(Identity::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.chain");
        let chain = generate(5);

        write(&path, &chain).unwrap();
        let loaded = read(&path).unwrap();

        assert_eq!(chain, loaded);
    }

    #[test]
    fn delete_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.chain");
        write(&path, &generate(1)).unwrap();

        delete(&path).unwrap();

        assert!(read(&path).is_err());
    }

    #[test]
    fn rejects_a_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.chain");
        fs::write(&path, "not-hex\n").unwrap();

        assert!(read(&path).is_err());
    }
}
