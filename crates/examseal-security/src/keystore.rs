// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Key store — the long-lived RSA key pair and the license-sealing key.
//
// Layout of `KeyStoreConfig::key_dir`:
//
//   private.pem       PKCS#8 PEM private key          (mode 0600)
//   private.pem.age   same, passphrase-encrypted      (instead of private.pem)
//   public.pem        SPKI PEM public key
//   license.key       64 hex chars, AES-256 key
//
// First run generates and writes all three; later runs load them. A partial
// set is a fatal error: regenerating would silently invalidate every license
// already issued.

use std::fs;
use std::path::{Path, PathBuf};

use examseal_core::config::KeyStoreConfig;
use examseal_core::error::{ExamSealError, Result};
use examseal_core::types::ClientConfig;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info, instrument};

use crate::at_rest::PassphraseSeal;
use crate::envelope::SymmetricKey;
use crate::integrity::fingerprint;
use crate::wrap::OAEP_HASH;

const PRIVATE_PEM: &str = "private.pem";
const PRIVATE_AGE: &str = "private.pem.age";
const PUBLIC_PEM: &str = "public.pem";
const LICENSE_KEY: &str = "license.key";

fn ks_err(context: &str, e: impl std::fmt::Display) -> ExamSealError {
    ExamSealError::KeyStore(format!("{context}: {e}"))
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// Loaded key material. Read-only once constructed; share it by reference or
/// `Arc` across concurrent requests.
#[derive(Clone)]
pub struct KeyMaterial {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    public_key_pem: String,
    license_key: SymmetricKey,
}

impl KeyMaterial {
    /// Generate a fresh RSA key pair of `bits` and a random license key.
    #[instrument]
    pub fn generate(bits: usize) -> Result<Self> {
        let private_key =
            RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| ks_err("RSA key generation", e))?;
        let license_key = SymmetricKey::generate()?;
        let material = Self::from_parts(private_key, license_key)?;
        debug!(fingerprint = %material.public_key_fingerprint(), "key material generated");
        Ok(material)
    }

    /// Assemble key material from an existing private key and license key.
    pub fn from_parts(private_key: RsaPrivateKey, license_key: SymmetricKey) -> Result<Self> {
        let public_key = private_key.to_public_key();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| ks_err("encode public key", e))?;
        Ok(Self {
            private_key,
            public_key,
            public_key_pem,
            license_key,
        })
    }

    /// Signing and unwrapping key. Never leaves the server.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// SPKI PEM, as embedded in clients.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Key that seals licenses; clients embed the same key.
    pub fn license_sealing_key(&self) -> &SymmetricKey {
        &self.license_key
    }

    /// Fingerprint over the DER-encoded public key.
    pub fn public_key_fingerprint(&self) -> String {
        public_key_fingerprint(&self.public_key)
    }

    /// Everything a client build or client-config endpoint hands out.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            public_key: self.public_key_pem.clone(),
            license_encryption_key: self.license_key.to_hex(),
            oaep_hash: OAEP_HASH.to_owned(),
        }
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public_key", &self.public_key_fingerprint())
            .field("license_key", &self.license_key)
            .finish()
    }
}

/// Fingerprint of any RSA public key, e.g. a client's embedded copy.
pub fn public_key_fingerprint(public_key: &RsaPublicKey) -> String {
    match public_key.to_public_key_der() {
        Ok(der) => fingerprint(der.as_bytes()),
        Err(_) => "unencodable".into(),
    }
}

/// Parse an SPKI PEM public key, e.g. from a client configuration.
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem.trim())
        .map_err(|e| ExamSealError::ClientConfig(format!("public key PEM: {e}")))
}

// ---------------------------------------------------------------------------
// On-disk layout
// ---------------------------------------------------------------------------

struct KeyPaths {
    private_pem: PathBuf,
    private_age: PathBuf,
    public_pem: PathBuf,
    license_key: PathBuf,
}

impl KeyPaths {
    fn new(dir: &Path) -> Self {
        Self {
            private_pem: dir.join(PRIVATE_PEM),
            private_age: dir.join(PRIVATE_AGE),
            public_pem: dir.join(PUBLIC_PEM),
            license_key: dir.join(LICENSE_KEY),
        }
    }

    fn private_present(&self) -> bool {
        self.private_pem.exists() || self.private_age.exists()
    }

    fn any_present(&self) -> bool {
        self.private_present() || self.public_pem.exists() || self.license_key.exists()
    }

    fn all_present(&self) -> bool {
        self.private_present() && self.public_pem.exists() && self.license_key.exists()
    }
}

// ---------------------------------------------------------------------------
// Key store
// ---------------------------------------------------------------------------

/// Loads or creates key material under a configured directory.
#[derive(Debug)]
pub struct KeyStore {
    dir: PathBuf,
    material: KeyMaterial,
}

impl KeyStore {
    /// Load key material from `config.key_dir`, generating it on first run.
    ///
    /// Any failure here is a startup failure; the caller must not go on to
    /// serve requests.
    #[instrument(skip_all, fields(dir = %config.key_dir.display()))]
    pub fn load_or_create(config: &KeyStoreConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.key_dir)
            .map_err(|e| ks_err(&format!("create {}", config.key_dir.display()), e))?;

        let paths = KeyPaths::new(&config.key_dir);
        let passphrase = config.passphrase();

        let material = if paths.all_present() {
            let material = load(&paths, passphrase.as_deref())?;
            info!(fingerprint = %material.public_key_fingerprint(), "key material loaded");
            material
        } else if paths.any_present() {
            return Err(ExamSealError::KeyStore(format!(
                "incomplete key set in {}; refusing to regenerate",
                config.key_dir.display()
            )));
        } else {
            let material = KeyMaterial::generate(config.rsa_bits)?;
            persist(&paths, &material, passphrase.as_deref())?;
            info!(
                fingerprint = %material.public_key_fingerprint(),
                bits = config.rsa_bits,
                encrypted = passphrase.is_some(),
                "key material generated and persisted"
            );
            material
        };

        Ok(Self {
            dir: config.key_dir.clone(),
            material,
        })
    }

    /// Directory the key files live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    /// Hand the loaded keys to the service layer.
    pub fn into_material(self) -> KeyMaterial {
        self.material
    }

    /// SPKI PEM of the public key.
    pub fn public_key_pem(&self) -> &str {
        self.material.public_key_pem()
    }

    pub fn license_sealing_key(&self) -> &SymmetricKey {
        self.material.license_sealing_key()
    }
}

// ---------------------------------------------------------------------------
// Load / persist helpers
// ---------------------------------------------------------------------------

fn load(paths: &KeyPaths, passphrase: Option<&str>) -> Result<KeyMaterial> {
    let private_pem = if paths.private_age.exists() {
        let passphrase = passphrase.ok_or_else(|| {
            ExamSealError::KeyStore(format!(
                "{} is encrypted but no passphrase is configured",
                paths.private_age.display()
            ))
        })?;
        let sealed = fs::read(&paths.private_age).map_err(|e| ks_err("read private key", e))?;
        let plain = PassphraseSeal::new(passphrase)
            .decrypt(&sealed)
            .map_err(|e| ks_err("decrypt private key", e))?;
        String::from_utf8(plain).map_err(|e| ks_err("private key is not UTF-8", e))?
    } else {
        fs::read_to_string(&paths.private_pem).map_err(|e| ks_err("read private key", e))?
    };

    let private_key =
        RsaPrivateKey::from_pkcs8_pem(&private_pem).map_err(|e| ks_err("parse private key", e))?;

    let license_hex =
        fs::read_to_string(&paths.license_key).map_err(|e| ks_err("read license key", e))?;
    let license_key =
        SymmetricKey::from_hex(&license_hex).map_err(|e| ks_err("parse license key", e))?;

    let material = KeyMaterial::from_parts(private_key, license_key)?;

    let public_pem =
        fs::read_to_string(&paths.public_pem).map_err(|e| ks_err("read public key", e))?;
    let stored_public =
        parse_public_key_pem(&public_pem).map_err(|e| ks_err("parse public key", e))?;
    if &stored_public != material.public_key() {
        return Err(ExamSealError::KeyStore(
            "public.pem does not belong to the stored private key".into(),
        ));
    }

    Ok(material)
}

fn persist(paths: &KeyPaths, material: &KeyMaterial, passphrase: Option<&str>) -> Result<()> {
    let private_pem = material
        .private_key()
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| ks_err("encode private key", e))?;

    match passphrase {
        Some(passphrase) => {
            let sealed = PassphraseSeal::new(passphrase)
                .encrypt(private_pem.as_bytes())
                .map_err(|e| ks_err("encrypt private key", e))?;
            write_private(&paths.private_age, &sealed)?;
        }
        None => write_private(&paths.private_pem, private_pem.as_bytes())?,
    }

    fs::write(&paths.public_pem, material.public_key_pem())
        .map_err(|e| ks_err("write public key", e))?;
    write_private(&paths.license_key, material.license_sealing_key().to_hex().as_bytes())?;
    Ok(())
}

fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data).map_err(|e| ks_err(&format!("write {}", path.display()), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| ks_err(&format!("chmod {}", path.display()), e))?;
    }
    Ok(())
}
