//! PKI and configuration loading.
//!
//! The PKI file is the shared root of trust for a deployment: the entry
//! coordinator's URL, the ordered mix chain with addresses and public keys,
//! and the user directory. All parties load the same JSON document; chain
//! order in the file *is* the onion layering order.
//!
//! Missing or malformed required fields are startup-fatal by design: a
//! mix network with a half-loaded PKI silently degrades anonymity, so the
//! binaries exit non-zero instead.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{collections::HashMap, fs, path::Path};

use murmur_crypto::PublicKey;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Errors from PKI and config loading.
#[derive(Error, Debug)]
pub enum PkiError {
    /// File could not be read or written.
    #[error("{path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON was malformed or missing required fields.
    #[error("{path}: {source}")]
    Json {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The PKI declares no mix servers.
    #[error("pki declares an empty mix chain")]
    EmptyChain,

    /// A server name is not part of the chain.
    #[error("unknown server: {0}")]
    UnknownServer(String),

    /// A user name is not in the directory.
    #[error("unknown user: {0}")]
    UnknownPerson(String),
}

/// One mix server entry, in chain order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Stable name, referenced by mix configs.
    pub name: String,
    /// TCP address of the mix's RPC listener.
    pub addr: String,
    /// The mix's onion public key.
    pub public_key: PublicKey,
}

/// The deployment-wide PKI document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pki {
    /// Entry coordinator URL, e.g. `ws://host:33001`.
    pub entry_server: String,
    /// Mix chain in onion layering order; head first, tail last.
    pub servers: Vec<ServerEntry>,
    /// User directory: name to public key.
    pub people: HashMap<String, PublicKey>,
}

impl Pki {
    /// Load and validate a PKI file.
    ///
    /// # Errors
    ///
    /// I/O and JSON errors, or `PkiError::EmptyChain` if no servers are
    /// declared.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PkiError> {
        let pki: Pki = read_json_file(path)?;
        if pki.servers.is_empty() {
            return Err(PkiError::EmptyChain);
        }
        Ok(pki)
    }

    /// The chain head, which the coordinator dials.
    pub fn first_server(&self) -> &ServerEntry {
        &self.servers[0]
    }

    /// The chain tail, where dead-drop exchange happens.
    pub fn last_server(&self) -> &ServerEntry {
        &self.servers[self.servers.len() - 1]
    }

    /// The successor of the named mix; `None` for the tail.
    ///
    /// # Errors
    ///
    /// `PkiError::UnknownServer` if the name is not in the chain.
    pub fn next_server(&self, name: &str) -> Result<Option<&ServerEntry>, PkiError> {
        let idx = self.server_index(name)?;
        Ok(self.servers.get(idx + 1))
    }

    /// Position of the named mix in the chain, 0 = head.
    ///
    /// # Errors
    ///
    /// `PkiError::UnknownServer` if the name is not in the chain.
    pub fn server_index(&self, name: &str) -> Result<usize, PkiError> {
        self.servers
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| PkiError::UnknownServer(name.to_string()))
    }

    /// Number of hops after the named mix (0 for the tail). Determines the
    /// expected onion size at that hop.
    ///
    /// # Errors
    ///
    /// `PkiError::UnknownServer` if the name is not in the chain.
    pub fn hops_after(&self, name: &str) -> Result<usize, PkiError> {
        Ok(self.servers.len() - 1 - self.server_index(name)?)
    }

    /// Mix public keys in chain order, the input to onion sealing.
    pub fn server_keys(&self) -> Vec<PublicKey> {
        self.servers.iter().map(|s| s.public_key).collect()
    }

    /// Look up a user's public key.
    ///
    /// # Errors
    ///
    /// `PkiError::UnknownPerson` if the name is not registered.
    pub fn person(&self, name: &str) -> Result<PublicKey, PkiError> {
        self.people
            .get(name)
            .copied()
            .ok_or_else(|| PkiError::UnknownPerson(name.to_string()))
    }
}

/// Read and deserialize a JSON file, with the path in any error.
///
/// # Errors
///
/// `PkiError::Io` / `PkiError::Json`.
pub fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, PkiError> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|source| PkiError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| PkiError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Serialize a value to pretty JSON and write it out. Used by the `--init`
/// config writers.
///
/// # Errors
///
/// `PkiError::Io` / `PkiError::Json`.
pub fn write_json_file<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), PkiError> {
    let path = path.as_ref();
    let data = serde_json::to_vec_pretty(value).map_err(|source| PkiError::Json {
        path: path.display().to_string(),
        source,
    })?;
    fs::write(path, data).map_err(|source| PkiError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_crypto::KeyPair;

    fn sample_pki(n: usize) -> Pki {
        let mut rng = rand::thread_rng();
        let servers = (0..n)
            .map(|i| ServerEntry {
                name: format!("mix{i}"),
                addr: format!("127.0.0.1:{}", 34000 + i),
                public_key: KeyPair::generate(&mut rng).public,
            })
            .collect();

        let mut people = HashMap::new();
        people.insert("alice".to_string(), KeyPair::generate(&mut rng).public);
        people.insert("bob".to_string(), KeyPair::generate(&mut rng).public);

        Pki { entry_server: "ws://127.0.0.1:33001".to_string(), servers, people }
    }

    #[test]
    fn chain_navigation() {
        let pki = sample_pki(3);
        assert_eq!(pki.first_server().name, "mix0");
        assert_eq!(pki.last_server().name, "mix2");
        assert_eq!(pki.next_server("mix0").unwrap().unwrap().name, "mix1");
        assert!(pki.next_server("mix2").unwrap().is_none());
        assert!(pki.next_server("nope").is_err());
        assert_eq!(pki.hops_after("mix0").unwrap(), 2);
        assert_eq!(pki.hops_after("mix2").unwrap(), 0);
    }

    #[test]
    fn server_keys_in_chain_order() {
        let pki = sample_pki(3);
        let keys = pki.server_keys();
        assert_eq!(keys.len(), 3);
        for (entry, key) in pki.servers.iter().zip(&keys) {
            assert_eq!(entry.public_key, *key);
        }
    }

    #[test]
    fn file_round_trip() {
        let pki = sample_pki(2);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pki.json");

        write_json_file(&path, &pki).unwrap();
        let loaded = Pki::load(&path).unwrap();
        assert_eq!(loaded.entry_server, pki.entry_server);
        assert_eq!(loaded.servers.len(), 2);
        assert_eq!(loaded.person("alice").unwrap(), pki.people["alice"]);
        assert!(loaded.person("mallory").is_err());
    }

    #[test]
    fn empty_chain_is_rejected() {
        let pki = Pki {
            entry_server: "ws://x".to_string(),
            servers: Vec::new(),
            people: HashMap::new(),
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pki.json");
        write_json_file(&path, &pki).unwrap();

        assert!(matches!(Pki::load(&path), Err(PkiError::EmptyChain)));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            Pki::load("/does/not/exist.json"),
            Err(PkiError::Io { .. })
        ));
    }
}
