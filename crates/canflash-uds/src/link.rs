//! Diagnostic message link
//!
//! A [`DiagTransport`] moves whole UDS messages. Before a message can be
//! sent for an [`AddressRole`], the CAN-ID mapping for that role has to be
//! installed; [`MappingGuard`] scopes an installed mapping to one phase of
//! the session and removes it when dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use canflash_core::TransportError;
use tracing::{debug, warn};

/// Addressing role a message is sent under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressRole {
    /// Tester to one ECU, with responses on the paired ID
    Physical,
    /// Broadcast to all ECUs; no responses are read
    Functional,
}

impl fmt::Display for AddressRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressRole::Physical => write!(f, "physical"),
            AddressRole::Functional => write!(f, "functional"),
        }
    }
}

/// CAN-ID pair for one addressing role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanMapping {
    pub role: AddressRole,
    /// ID requests are sent on
    pub request_id: u32,
    /// ID responses arrive on; `None` for functional addressing
    pub response_id: Option<u32>,
}

impl CanMapping {
    pub fn physical(request_id: u32, response_id: u32) -> Self {
        Self {
            role: AddressRole::Physical,
            request_id,
            response_id: Some(response_id),
        }
    }

    pub fn functional(request_id: u32) -> Self {
        Self {
            role: AddressRole::Functional,
            request_id,
            response_id: None,
        }
    }
}

/// Message-level link used by the UDS service layer
#[async_trait]
pub trait DiagTransport: Send + Sync {
    /// Open the underlying CAN device
    fn open(&self) -> Result<(), TransportError>;

    /// Close the underlying CAN device and drop all mappings
    fn close(&self) -> Result<(), TransportError>;

    fn add_mapping(&self, mapping: CanMapping) -> Result<(), TransportError>;

    fn remove_mapping(&self, role: AddressRole) -> Result<(), TransportError>;

    /// Send one message without waiting for a response
    async fn send(&self, role: AddressRole, request: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next complete message on the role's response ID
    async fn receive(&self, role: AddressRole, timeout: Duration)
        -> Result<Vec<u8>, TransportError>;

    /// Send a request and wait for its response
    async fn send_receive(
        &self,
        role: AddressRole,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.send(role, request).await?;
        self.receive(role, timeout).await
    }
}

/// An installed CAN-ID mapping, removed again on drop
pub struct MappingGuard {
    transport: Arc<dyn DiagTransport>,
    role: AddressRole,
    released: bool,
}

impl MappingGuard {
    pub fn install(
        transport: Arc<dyn DiagTransport>,
        mapping: CanMapping,
    ) -> Result<Self, TransportError> {
        transport.add_mapping(mapping)?;
        debug!(
            role = %mapping.role,
            request_id = format!("0x{:X}", mapping.request_id),
            "CAN mapping installed"
        );
        Ok(Self {
            transport,
            role: mapping.role,
            released: false,
        })
    }

    pub fn role(&self) -> AddressRole {
        self.role
    }

    /// Remove the mapping and report the result
    pub fn release(mut self) -> Result<(), TransportError> {
        self.released = true;
        self.transport.remove_mapping(self.role)
    }
}

impl Drop for MappingGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.transport.remove_mapping(self.role) {
                warn!(role = %self.role, error = %e, "Failed to remove CAN mapping");
            }
        }
    }
}
