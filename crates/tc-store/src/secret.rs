use zeroize::Zeroizing;

/// Trait for providing secrets (passphrases) for key derivation
///
/// Used as a fallback when the OS keyring is unavailable or fails.
pub trait SecretProvider: Send + Sync {
    /// Get a passphrase for key derivation
    ///
    /// Returns None if the user cancels or no passphrase is available.
    /// The returned string will be automatically zeroized when dropped.
    fn get_passphrase(&self, prompt: &str) -> Option<Zeroizing<String>>;
}

/// No-op secret provider that always returns None
///
/// Use this when you want keyring-only storage with no passphrase fallback.
#[derive(Debug, Clone, Default)]
pub struct NoSecretProvider;

impl SecretProvider for NoSecretProvider {
    fn get_passphrase(&self, _prompt: &str) -> Option<Zeroizing<String>> {
        None
    }
}

/// Static secret provider for testing
#[derive(Debug, Clone)]
pub struct StaticSecretProvider {
    secret: String,
}

impl StaticSecretProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl SecretProvider for StaticSecretProvider {
    fn get_passphrase(&self, _prompt: &str) -> Option<Zeroizing<String>> {
        Some(Zeroizing::new(self.secret.clone()))
    }
}

/// Reads the passphrase from an environment variable (headless hosts, CI)
#[derive(Debug, Clone)]
pub struct EnvSecretProvider {
    variable: String,
}

impl EnvSecretProvider {
    pub const DEFAULT_VARIABLE: &'static str = "TOKENCACHE_PASSPHRASE";

    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }
}

impl Default for EnvSecretProvider {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VARIABLE)
    }
}

impl SecretProvider for EnvSecretProvider {
    fn get_passphrase(&self, _prompt: &str) -> Option<Zeroizing<String>> {
        std::env::var(&self.variable)
            .ok()
            .filter(|value| !value.is_empty())
            .map(Zeroizing::new)
    }
}
