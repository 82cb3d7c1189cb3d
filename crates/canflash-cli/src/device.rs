//! CAN driver and seed/key setup shared by the commands

use std::sync::Arc;

use anyhow::{Context, Result};
use canflash_core::{CanTransport, SeedKeyResolver, XorSecretResolver};

/// The CAN driver compiled into this binary
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub fn can_transport() -> Result<Arc<dyn CanTransport>> {
    Ok(Arc::new(canflash_core::socketcan::SocketCanTransport::new()))
}

#[cfg(not(all(target_os = "linux", feature = "socketcan")))]
pub fn can_transport() -> Result<Arc<dyn CanTransport>> {
    anyhow::bail!("No CAN driver in this build (SocketCAN requires Linux and the `socketcan` feature)")
}

/// Seed/key resolver from the group's hex secret
///
/// Only the shared-secret XOR algorithm is built in. ECUs with a vendor
/// algorithm need a build that supplies its own `SeedKeyResolver` here.
pub fn resolver(secret: Option<&str>, group: &str) -> Result<Arc<dyn SeedKeyResolver>> {
    let secret = secret.with_context(|| {
        format!(
            "No seed/key secret configured; set `secret` in [{}] or pass --set {}.secret=<hex>",
            group, group
        )
    })?;
    let resolver = XorSecretResolver::from_hex(secret)
        .with_context(|| format!("Invalid {}.secret", group))?;
    Ok(Arc::new(resolver))
}
