//! UDS flashing session
//!
//! State machine for the programming sequence:
//!
//! ```text
//! Uninitialized -> MappingConfigured -> Connected -> DefaultSession
//!   -> ExtendedSession -> ProgrammingSession -> SecurityUnlocked
//!   -> ProgrammingInProgress -> ResetPending
//! ```
//!
//! Each phase installs the CAN-ID mapping it needs and removes it again when
//! the phase ends, successful or not.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use canflash_core::{
    FlashSession, LogSink, ProtocolError, ProtocolResult, SeedKeyResolver, TransportError,
};
use canflash_srec::{SrecordImage, SrecordSegment};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::UdsConfig;
use crate::isotp::MAX_MESSAGE_LEN;
use crate::link::{AddressRole, CanMapping, DiagTransport, MappingGuard};
use crate::services::{reset_type, service_id, session_type, UdsClient};

/// Positive default-session responses in a row that count as connected
pub const CONNECT_CONFIRMATIONS: u32 = 3;

/// UDS session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdsState {
    Uninitialized,
    MappingConfigured,
    Connected,
    DefaultSession,
    ExtendedSession,
    ProgrammingSession,
    SecurityUnlocked,
    ProgrammingInProgress,
    ResetPending,
}

/// Next TransferData block sequence counter: 1..=255, then back to 1
pub fn next_block_counter(counter: u8) -> u8 {
    if counter == u8::MAX {
        1
    } else {
        counter + 1
    }
}

/// UDS implementation of [`FlashSession`]
pub struct UdsSession {
    transport: Arc<dyn DiagTransport>,
    config: UdsConfig,
    resolver: Arc<dyn SeedKeyResolver>,
    log: Arc<dyn LogSink>,
    state: RwLock<UdsState>,
    device_open: bool,
}

impl UdsSession {
    pub fn new(
        transport: Arc<dyn DiagTransport>,
        config: UdsConfig,
        resolver: Arc<dyn SeedKeyResolver>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            transport,
            config,
            resolver,
            log,
            state: RwLock::new(UdsState::Uninitialized),
            device_open: false,
        }
    }

    pub fn state(&self) -> UdsState {
        *self.state.read()
    }

    pub fn config(&self) -> &UdsConfig {
        &self.config
    }

    fn set_state(&self, state: UdsState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "UDS state change");
        }
    }

    fn require(&self, operation: &str, allowed: &[UdsState]) -> ProtocolResult<()> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(ProtocolError::invalid_state(operation, state))
        }
    }

    fn physical_mapping(&self) -> ProtocolResult<MappingGuard> {
        let mapping = CanMapping::physical(self.config.request_id, self.config.response_id);
        Ok(MappingGuard::install(self.transport.clone(), mapping)?)
    }

    fn functional_mapping(&self) -> ProtocolResult<MappingGuard> {
        let mapping = CanMapping::functional(self.config.functional_id);
        Ok(MappingGuard::install(self.transport.clone(), mapping)?)
    }

    fn client(&self, role: AddressRole) -> UdsClient {
        UdsClient::new(self.transport.clone(), role)
            .with_timeout(self.config.p2_timeout())
            .with_pending_timeout(self.config.pending_timeout())
    }

    /// Send TesterPresent on the physical address
    pub async fn tester_present(&self) -> ProtocolResult<()> {
        let _mapping = self.physical_mapping()?;
        self.client(AddressRole::Physical).tester_present(false).await
    }

    /// Erase, download and close the transfer of one segment
    async fn program_segment(
        &self,
        client: &UdsClient,
        index: usize,
        segment: &SrecordSegment,
        done: &mut usize,
        total: usize,
    ) -> ProtocolResult<()> {
        let address = segment.start_address;
        let length = segment.length();
        info!(
            segment = index,
            address = format!("0x{:08X}", address),
            length,
            "Programming segment"
        );
        self.log.info(&format!(
            "UDS: segment {} at 0x{:08X}, {} bytes",
            index, address, length
        ));

        let mut params = address.to_be_bytes().to_vec();
        params.extend_from_slice(&length.to_be_bytes());
        client
            .routine_control_checked("erase memory", self.config.routines.erase_memory, &params)
            .await?;

        let max_block_length = client
            .request_download(
                self.config.data_format,
                self.config.address_and_length_format,
                address,
                length,
            )
            .await?;
        // SID and block counter take two bytes of every block, and no block
        // may exceed what one ISO-TP message can carry
        let block_length = max_block_length.min(MAX_MESSAGE_LEN as u32);
        let chunk_size = block_length.saturating_sub(2) as usize;
        if chunk_size == 0 {
            return Err(ProtocolError::UnexpectedResponse {
                operation: format!("RequestDownload (maxNumberOfBlockLength {})", max_block_length),
                actual: max_block_length.to_be_bytes().to_vec(),
            });
        }
        debug!(
            segment = index,
            max_block_length,
            block_length,
            chunk_size,
            "Download accepted"
        );

        let mut counter = 1u8;
        for chunk in segment.data.chunks(chunk_size) {
            client.transfer_data(counter, chunk).await?;
            counter = next_block_counter(counter);
            *done += chunk.len();
            self.log.progress(*done, total);
        }

        client.request_transfer_exit().await?;
        Ok(())
    }
}

#[async_trait]
impl FlashSession for UdsSession {
    fn protocol(&self) -> &'static str {
        "UDS"
    }

    fn open(&mut self) -> ProtocolResult<()> {
        self.transport.open()?;
        self.device_open = true;
        self.set_state(UdsState::Uninitialized);
        Ok(())
    }

    fn close(&mut self) -> ProtocolResult<()> {
        self.set_state(UdsState::Uninitialized);
        if !self.device_open {
            return Ok(());
        }
        self.device_open = false;
        self.transport.close()?;
        Ok(())
    }

    async fn connect(&mut self, timeout: Duration) -> ProtocolResult<()> {
        if !self.device_open {
            return Err(TransportError::NotOpen.into());
        }
        self.require("connect", &[UdsState::Uninitialized])?;

        let mapping = self.physical_mapping()?;
        self.set_state(UdsState::MappingConfigured);
        let client = self.client(AddressRole::Physical);

        let deadline = tokio::time::Instant::now() + timeout;
        let mut confirmations = 0;
        let mut attempts = 0u32;
        while confirmations < CONNECT_CONFIRMATIONS {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!(attempts, "No stable default-session response");
                return Err(ProtocolError::ConnectTimeout(timeout));
            }
            attempts += 1;
            let attempt = client
                .clone()
                .with_timeout(remaining.min(self.config.p2_timeout()));
            match attempt.diagnostic_session_control(session_type::DEFAULT).await {
                Ok(_) => confirmations += 1,
                Err(e) => {
                    debug!(attempt = attempts, error = %e, "Connect attempt failed");
                    confirmations = 0;
                }
            }
        }

        mapping.release()?;
        self.set_state(UdsState::Connected);
        info!(attempts, "UDS connected");
        self.set_state(UdsState::DefaultSession);
        Ok(())
    }

    async fn unlock(&mut self) -> ProtocolResult<()> {
        self.require("unlock", &[UdsState::DefaultSession, UdsState::ExtendedSession])?;

        // all ECUs on the bus switch to the extended session together
        {
            let mapping = self.functional_mapping()?;
            self.client(AddressRole::Functional)
                .send_only(&[service_id::DIAGNOSTIC_SESSION_CONTROL, session_type::EXTENDED])
                .await?;
            mapping.release()?;
        }
        self.set_state(UdsState::ExtendedSession);

        let mapping = self.physical_mapping()?;
        let client = self.client(AddressRole::Physical);

        client
            .diagnostic_session_control(session_type::PROGRAMMING)
            .await?;
        self.set_state(UdsState::ProgrammingSession);

        let level = self.config.security_level;
        let seed = client.security_access_request_seed(level).await?;
        debug!(level, seed = %hex::encode_upper(&seed), "Seed received");

        if seed.iter().all(|b| *b == 0) {
            // an all-zero seed means the level is already unlocked
            info!(level, "Security level already unlocked");
        } else {
            let key = self.resolver.compute_key(&seed)?;
            client.security_access_send_key(level, &key).await?;
        }
        mapping.release()?;

        self.set_state(UdsState::SecurityUnlocked);
        info!(level, "Security access granted");
        Ok(())
    }

    async fn erase_write_program(&mut self, image: &SrecordImage) -> ProtocolResult<Duration> {
        self.require("erase_write_program", &[UdsState::SecurityUnlocked])?;
        let started = Instant::now();
        self.set_state(UdsState::ProgrammingInProgress);

        let mapping = self.physical_mapping()?;
        let client = self.client(AddressRole::Physical);
        let total = image.total_len();
        let mut done = 0;

        for (index, segment) in image.segments().iter().enumerate() {
            self.program_segment(&client, index, segment, &mut done, total)
                .await?;
        }

        let crc = image.crc32_bytes();
        info!(crc = format!("0x{:08X}", image.crc32()), "Checking data integrity");
        client
            .routine_control_checked(
                "check data integrity",
                self.config.routines.check_integrity,
                &crc,
            )
            .await?;
        client
            .routine_control_checked(
                "check programming dependencies",
                self.config.routines.check_dependencies,
                &[],
            )
            .await?;
        self.log.info("UDS: integrity and dependency checks passed");

        client.ecu_reset(reset_type::HARD_RESET).await?;
        mapping.release()?;
        self.set_state(UdsState::ResetPending);

        let elapsed = started.elapsed();
        info!(elapsed_ms = elapsed.as_millis() as u64, "Programming complete");
        Ok(elapsed)
    }

    async fn disconnect(&mut self) -> ProtocolResult<()> {
        // the ECU is restarting; nothing is left to tear down on the bus
        debug!(state = ?self.state(), "UDS disconnect");
        self.set_state(UdsState::Uninitialized);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_counter_skips_zero() {
        assert_eq!(next_block_counter(1), 2);
        assert_eq!(next_block_counter(254), 255);
        assert_eq!(next_block_counter(255), 1);

        let mut counter = 1u8;
        for _ in 0..1000 {
            counter = next_block_counter(counter);
            assert_ne!(counter, 0);
        }
    }
}
