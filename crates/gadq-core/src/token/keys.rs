//! Persisted signing keypair.
//!
//! Layout under the key directory:
//! - `ed25519_private.key`: raw 32-byte signing key
//! - `ed25519_public.key`: raw 32-byte verifying key
//!
//! The pair is loaded (or generated) on first use and cached for the lifetime
//! of the [`KeyStore`]. Concurrent first use runs the initializer once; the
//! other callers block until it finishes and then share the same pair.
//! Separate stores (or processes) sharing a directory agree on one pair too:
//! the private key is published with a link that only the first writer wins,
//! and the losers load what the winner wrote.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ed25519_dalek::{SigningKey, VerifyingKey};
use once_cell::sync::OnceCell;
use rand::rngs::OsRng;

use crate::error::{GadqError, Result};

pub const PRIVATE_KEY_FILE: &str = "ed25519_private.key";
pub const PUBLIC_KEY_FILE: &str = "ed25519_public.key";

/// Signing key plus its verifying key.
pub struct KeyPair {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let verifying = signing.verifying_key();
        Self { signing, verifying }
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }

    pub fn pubkey_hex(&self) -> String {
        hex::encode(self.verifying.as_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("verifying", &self.pubkey_hex())
            .finish_non_exhaustive()
    }
}

/// Directory-backed keypair cache.
#[derive(Debug)]
pub struct KeyStore {
    dir: PathBuf,
    cached: OnceCell<Arc<KeyPair>>,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cached: OnceCell::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cached keypair; loads or creates it on first call.
    pub fn keypair(&self) -> Result<Arc<KeyPair>> {
        self.cached
            .get_or_try_init(|| load_or_create(&self.dir).map(Arc::new))
            .cloned()
    }
}

fn load_or_create(dir: &Path) -> Result<KeyPair> {
    fs::create_dir_all(dir)
        .map_err(|e| GadqError::KeyStore(format!("create {}: {e}", dir.display())))?;

    let priv_path = dir.join(PRIVATE_KEY_FILE);
    let pub_path = dir.join(PUBLIC_KEY_FILE);

    if !priv_path.exists() {
        let kp = KeyPair::generate();
        if publish_private(&priv_path, &kp.signing.to_bytes())? {
            replace_public(&pub_path, kp.verifying.as_bytes())?;
            tracing::info!(dir = %dir.display(), pubkey = %kp.pubkey_hex(), "generated signing keypair");
            return Ok(kp);
        }
        tracing::debug!(dir = %dir.display(), "keypair created concurrently; loading it");
    }

    load(dir, &priv_path, &pub_path)
}

fn load(dir: &Path, priv_path: &Path, pub_path: &Path) -> Result<KeyPair> {
    let signing = SigningKey::from_bytes(&read_key(priv_path)?);
    let derived = signing.verifying_key();

    if pub_path.exists() {
        let stored = VerifyingKey::from_bytes(&read_key(pub_path)?).map_err(|_| {
            GadqError::KeyStore(format!("{} is not a valid ed25519 key", pub_path.display()))
        })?;
        if stored != derived {
            return Err(GadqError::KeyStore(
                "stored public key does not match private key".into(),
            ));
        }
    } else {
        tracing::warn!(path = %pub_path.display(), "public key missing; re-deriving");
        replace_public(pub_path, derived.as_bytes())?;
    }

    tracing::debug!(dir = %dir.display(), "loaded signing keypair");
    Ok(KeyPair { signing, verifying: derived })
}

fn read_key(path: &Path) -> Result<[u8; 32]> {
    let bytes = fs::read(path)
        .map_err(|e| GadqError::KeyStore(format!("read {}: {e}", path.display())))?;
    bytes.as_slice().try_into().map_err(|_| {
        GadqError::KeyStore(format!(
            "{}: expected 32 bytes, found {}",
            path.display(),
            bytes.len()
        ))
    })
}

/// Write the private key to a scratch file, then hard-link it into place.
/// The link fails if the key already exists, so exactly one writer wins and
/// readers never see a partial file. `Ok(false)` means another writer won.
fn publish_private(path: &Path, bytes: &[u8]) -> Result<bool> {
    let tmp = scratch_path(path);
    write_new(&tmp, bytes, true)?;

    let linked = fs::hard_link(&tmp, path);
    if let Err(e) = fs::remove_file(&tmp) {
        tracing::warn!(path = %tmp.display(), error = %e, "failed to remove scratch key file");
    }
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(GadqError::KeyStore(format!("publish {}: {e}", path.display()))),
    }
}

/// Atomically replace the public key file.
fn replace_public(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = scratch_path(path);
    write_new(&tmp, bytes, false)?;
    fs::rename(&tmp, path)
        .map_err(|e| GadqError::KeyStore(format!("rename {}: {e}", path.display())))
}

fn scratch_path(path: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let n = SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}.{n}.tmp", std::process::id()));
    PathBuf::from(name)
}

fn write_new(path: &Path, bytes: &[u8], secret: bool) -> Result<()> {
    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    if secret {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = secret;

    let mut f = opts
        .open(path)
        .map_err(|e| GadqError::KeyStore(format!("open {}: {e}", path.display())))?;
    f.write_all(bytes)
        .and_then(|_| f.sync_all())
        .map_err(|e| GadqError::KeyStore(format!("write {}: {e}", path.display())))
}
