//! Configuration types and shared small value types.

use crate::error::VaultError;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Namespace
// ---------------------------------------------------------------------------

/// A validated namespace: lowercase ASCII letters only (`^[a-z]+$`).
///
/// Namespaces prefix secure-store aliases (`namespace + ":" + key`) and are
/// otherwise opaque to the client, but the prefix form is stable on disk.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(raw: impl Into<String>) -> Result<Self, VaultError> {
        let raw = raw.into();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(VaultError::InvalidNamespace(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Memory policy (how encrypted HotCache entries are held in memory)
// ---------------------------------------------------------------------------

/// Controls whether encrypted values are cached as plaintext or ciphertext.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MemoryPolicy {
    /// Decrypt on snapshot load; reads are pure memory. Default.
    #[default]
    PlaintextInMemory,
    /// Cache the raw base64 ciphertext; reads pay one decrypt each.
    CiphertextInMemory,
}

// ---------------------------------------------------------------------------
// Crypto config
// ---------------------------------------------------------------------------

/// Symmetric key size for newly generated per-alias keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeySize {
    Bits128,
    Bits256,
}

impl KeySize {
    pub fn byte_len(self) -> usize {
        match self {
            Self::Bits128 => 16,
            Self::Bits256 => 32,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CryptoConfig {
    pub key_size: KeySize,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            key_size: KeySize::Bits256,
        }
    }
}

impl CryptoConfig {
    pub(crate) fn validate(&self) -> Result<(), VaultError> {
        // key_size is an enum with only valid variants by construction;
        // this exists as a seam for future scalar config (e.g. rotation
        // interval) that does need range validation at construction time,
        // matching spec's requirement that nonpositive timing config is
        // rejected eagerly.
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Security policy (construction-time posture probes)
// ---------------------------------------------------------------------------

/// What to do when a security posture check is satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PostureAction {
    #[default]
    Ignore,
    Warn,
    Block,
}

#[derive(Clone, Debug, Default)]
pub struct SecurityPolicy {
    pub rooted_device: PostureAction,
    pub debugger_attached: PostureAction,
    pub debug_build: PostureAction,
    pub emulator: PostureAction,
}

// ---------------------------------------------------------------------------
// Write coalescing tuning
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CoalescingConfig {
    /// Maximum operations folded into one backend edit.
    pub batch_cap: usize,
    /// Window the consumer waits for more ops after the first, before
    /// committing whatever has accumulated.
    pub window: Duration,
}

impl Default for CoalescingConfig {
    fn default() -> Self {
        Self {
            batch_cap: 50,
            window: Duration::from_millis(16),
        }
    }
}

impl CoalescingConfig {
    pub(crate) fn validate(&self) -> Result<(), VaultError> {
        if self.batch_cap == 0 {
            return Err(VaultError::InvalidConfig("batch_cap must be positive".into()));
        }
        if self.window.is_zero() {
            return Err(VaultError::InvalidConfig("coalescing window must be positive".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Vault construction options
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct VaultConfig {
    pub namespace: Option<String>,
    pub lazy_load: bool,
    pub memory_policy: MemoryPolicy,
    pub crypto: CryptoConfig,
    pub security: SecurityPolicy,
    pub coalescing: CoalescingConfig,
}

impl VaultConfig {
    pub(crate) fn validated_namespace(&self) -> Result<Option<Namespace>, VaultError> {
        self.namespace
            .as_ref()
            .map(|ns| Namespace::new(ns.clone()))
            .transpose()
    }

    pub(crate) fn validate(&self) -> Result<(), VaultError> {
        self.validated_namespace()?;
        self.crypto.validate()?;
        self.coalescing.validate()?;
        Ok(())
    }
}
