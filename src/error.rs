//! Error taxonomy for the vault.
//!
//! The read path is infallible from the client's perspective — decode and
//! decrypt failures are swallowed and a caller-supplied default is returned.
//! The write path is two-tier: direct writes are best-effort and never fail
//! synchronously, suspending writes surface `VaultError` on durable commit
//! failure or crypto unavailability.

use std::fmt;

/// Unified error type for vault construction and suspending operations.
#[derive(Debug)]
pub enum VaultError {
    /// Namespace did not match `^[a-z]+$`.
    InvalidNamespace(String),
    /// Unsupported key size, or a nonpositive timing configuration value.
    InvalidConfig(String),
    /// A construction-time security probe fired under a `block` policy.
    SecurityViolation(SecurityViolationKind),
    /// The secure key store was locked or lacked entitlement for an alias.
    CryptoUnavailable(String),
    /// AEAD tag verification failed on decrypt.
    DecryptFailed,
    /// Decrypt was attempted against an alias with no known key.
    KeyNotFound(String),
    /// Stored bytes could not be parsed into the requested shape.
    ParseFailed(String),
    /// A batched backend edit failed to commit.
    BackendCommitFailed(String),
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNamespace(ns) => write!(f, "invalid namespace: {:?} (must match [a-z]+)", ns),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            Self::SecurityViolation(kind) => write!(f, "security violation: {}", kind),
            Self::CryptoUnavailable(alias) => write!(f, "crypto unavailable for alias {:?}", alias),
            Self::DecryptFailed => write!(f, "decryption failed"),
            Self::KeyNotFound(alias) => write!(f, "key not found for alias {:?}", alias),
            Self::ParseFailed(msg) => write!(f, "parse failed: {}", msg),
            Self::BackendCommitFailed(msg) => write!(f, "backend commit failed: {}", msg),
        }
    }
}

impl std::error::Error for VaultError {}

/// Which security posture check tripped a `block` policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityViolationKind {
    RootedDevice,
    DebuggerAttached,
    DebugBuild,
    Emulator,
}

impl fmt::Display for SecurityViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootedDevice => write!(f, "rooted device detected"),
            Self::DebuggerAttached => write!(f, "debugger attached"),
            Self::DebugBuild => write!(f, "debug build"),
            Self::Emulator => write!(f, "running in emulator"),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-operation typed errors (mirror the crate's one-newtype-per-fallible-op
// convention rather than forcing every call site to match the full enum)
// ---------------------------------------------------------------------------

/// Error from `CryptoEngine::encrypt`/`decrypt`.
#[derive(Debug)]
pub struct CryptoError(pub VaultError);

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::error::Error for CryptoError {}
impl From<VaultError> for CryptoError {
    fn from(e: VaultError) -> Self {
        Self(e)
    }
}

/// Error from a suspending `Vault::put`.
#[derive(Debug)]
pub struct PutError(pub VaultError);

impl fmt::Display for PutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::error::Error for PutError {}
impl From<VaultError> for PutError {
    fn from(e: VaultError) -> Self {
        Self(e)
    }
}
impl From<CryptoError> for PutError {
    fn from(e: CryptoError) -> Self {
        Self(e.0)
    }
}

/// Error from a suspending `Vault::delete`.
#[derive(Debug)]
pub struct DeleteError(pub VaultError);

impl fmt::Display for DeleteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::error::Error for DeleteError {}
impl From<VaultError> for DeleteError {
    fn from(e: VaultError) -> Self {
        Self(e)
    }
}

/// Error from `Vault::clear_all`.
#[derive(Debug)]
pub struct ClearAllError(pub VaultError);

impl fmt::Display for ClearAllError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::error::Error for ClearAllError {}
impl From<VaultError> for ClearAllError {
    fn from(e: VaultError) -> Self {
        Self(e)
    }
}
