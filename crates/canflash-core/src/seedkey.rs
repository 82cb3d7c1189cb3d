//! Seed/key algorithms
//!
//! The real algorithm is vendor supplied. Sessions only see the
//! [`SeedKeyResolver`] contract: identical seeds yield identical keys.

use crate::error::SeedKeyError;

/// Computes the key answering a security-access seed.
///
/// This crate does not load vendor seed/key modules. Locating the vendor
/// algorithm, for example a module named by a file path, is the
/// integrator's job: wrap it in a type implementing this trait and hand
/// that to the session. [`XorSecretResolver`] covers bench
/// ECUs with a shared secret, and [`FnResolver`] adapts a plain function.
///
/// ```
/// use std::sync::Arc;
/// use canflash_core::{FnResolver, SeedKeyError, SeedKeyResolver};
///
/// fn vendor_key(seed: &[u8]) -> Result<Vec<u8>, SeedKeyError> {
///     Ok(seed.iter().map(|b| b.rotate_left(3)).collect())
/// }
///
/// let resolver: Arc<dyn SeedKeyResolver> = Arc::new(FnResolver(vendor_key));
/// assert_eq!(resolver.compute_key(&[0x01]).unwrap(), vec![0x08]);
/// ```
pub trait SeedKeyResolver: Send + Sync {
    fn compute_key(&self, seed: &[u8]) -> Result<Vec<u8>, SeedKeyError>;
}

/// Key = seed XOR secret, cycling over the secret bytes
#[derive(Debug, Clone)]
pub struct XorSecretResolver {
    secret: Vec<u8>,
}

impl XorSecretResolver {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, SeedKeyError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(SeedKeyError::InvalidSecret("secret is empty".to_string()));
        }
        Ok(Self { secret })
    }

    /// Parse the secret from a hex string such as `"A5C3"`
    pub fn from_hex(secret_hex: &str) -> Result<Self, SeedKeyError> {
        let secret = hex::decode(secret_hex.trim())
            .map_err(|e| SeedKeyError::InvalidSecret(format!("invalid hex: {}", e)))?;
        Self::new(secret)
    }
}

impl SeedKeyResolver for XorSecretResolver {
    fn compute_key(&self, seed: &[u8]) -> Result<Vec<u8>, SeedKeyError> {
        if seed.is_empty() {
            return Err(SeedKeyError::EmptySeed);
        }
        Ok(seed
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ self.secret[i % self.secret.len()])
            .collect())
    }
}

/// Wraps a plain function or closure
pub struct FnResolver<F>(pub F);

impl<F> SeedKeyResolver for FnResolver<F>
where
    F: Fn(&[u8]) -> Result<Vec<u8>, SeedKeyError> + Send + Sync,
{
    fn compute_key(&self, seed: &[u8]) -> Result<Vec<u8>, SeedKeyError> {
        (self.0)(seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_cycles_secret() {
        let resolver = XorSecretResolver::from_hex("FF00").unwrap();
        let key = resolver.compute_key(&[0x12, 0x34, 0x56]).unwrap();
        assert_eq!(key, vec![0xED, 0x34, 0xA9]);
    }

    #[test]
    fn test_xor_is_deterministic() {
        let resolver = XorSecretResolver::new(vec![0x5A, 0xA5]).unwrap();
        let seed = [1, 2, 3, 4];
        assert_eq!(
            resolver.compute_key(&seed).unwrap(),
            resolver.compute_key(&seed).unwrap()
        );
    }

    #[test]
    fn test_xor_rejects_empty_input() {
        assert!(XorSecretResolver::new(Vec::new()).is_err());
        assert!(XorSecretResolver::from_hex("zz").is_err());
        let resolver = XorSecretResolver::new(vec![1]).unwrap();
        assert!(matches!(
            resolver.compute_key(&[]),
            Err(SeedKeyError::EmptySeed)
        ));
    }

    /// Stand-in for an algorithm loaded from a vendor module
    struct VendorAlgorithm {
        mask: u8,
    }

    impl SeedKeyResolver for VendorAlgorithm {
        fn compute_key(&self, seed: &[u8]) -> Result<Vec<u8>, SeedKeyError> {
            if seed.len() != 4 {
                return Err(SeedKeyError::Failed(format!(
                    "expected a 4-byte seed, got {}",
                    seed.len()
                )));
            }
            Ok(seed.iter().map(|b| b.wrapping_add(self.mask)).collect())
        }
    }

    #[test]
    fn test_custom_resolver_behind_trait_object() {
        let resolver: std::sync::Arc<dyn SeedKeyResolver> =
            std::sync::Arc::new(VendorAlgorithm { mask: 0x10 });
        assert_eq!(
            resolver.compute_key(&[0x00, 0x01, 0xF0, 0xFF]).unwrap(),
            vec![0x10, 0x11, 0x00, 0x0F]
        );
        assert!(resolver.compute_key(&[0x01]).is_err());
    }

    #[test]
    fn test_fn_resolver() {
        let resolver = FnResolver(|seed: &[u8]| -> Result<Vec<u8>, SeedKeyError> {
            Ok(seed.iter().rev().copied().collect())
        });
        assert_eq!(resolver.compute_key(&[1, 2, 3]).unwrap(), vec![3, 2, 1]);
    }
}
