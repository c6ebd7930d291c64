//! Mix server configuration.

use std::path::Path;

use murmur_crypto::{KeyPair, Laplace, PrivateKey, PublicKey};
use murmur_pki::{write_json_file, PkiError};
use serde::{Deserialize, Serialize};

/// Listen address used when the config omits one.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:2718";

/// JSON configuration for one mix server.
///
/// All fields except `listen_addr` are required; serde rejects a file with
/// any of them missing, which the binary turns into a non-zero exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixConf {
    /// This server's name as registered in the PKI chain.
    pub server_name: String,
    /// Onion public key; must match the PKI entry.
    pub public_key: PublicKey,
    /// Onion private key.
    pub private_key: PrivateKey,
    /// RPC listen address; defaults to [`DEFAULT_LISTEN_ADDR`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<String>,
    /// Laplace location for cover counts.
    pub convo_mu: f64,
    /// Laplace scale for cover counts.
    pub convo_b: f64,
}

impl MixConf {
    /// The Laplace distribution this config describes.
    pub fn laplace(&self) -> Laplace {
        Laplace { mu: self.convo_mu, b: self.convo_b }
    }

    /// Effective listen address.
    pub fn listen_addr(&self) -> &str {
        self.listen_addr.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR)
    }

    /// Write a default config with a freshly generated keypair, for the
    /// `--init` flag.
    ///
    /// # Errors
    ///
    /// File-system or serialization errors from [`write_json_file`].
    pub fn write_default(path: impl AsRef<Path>, server_name: &str) -> Result<(), PkiError> {
        let keys = KeyPair::generate(&mut rand::thread_rng());
        let conf = MixConf {
            server_name: server_name.to_string(),
            public_key: keys.public,
            private_key: keys.private,
            listen_addr: None,
            convo_mu: 300.0,
            convo_b: 13.8,
        };
        write_json_file(path, &conf)
    }
}
