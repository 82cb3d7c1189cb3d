//! UDS service layer
//!
//! Builds requests, waits out "response pending" replies and turns negative
//! responses into [`ProtocolError::NegativeResponse`] carrying the Annex A
//! text.

use std::sync::Arc;
use std::time::Duration;

use canflash_core::{ProtocolError, ProtocolResult, TransportError};
use tracing::{debug, warn};

use crate::link::{AddressRole, DiagTransport};
use crate::nrc::NegativeResponseCode;

/// UDS service identifiers used for flashing
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const REQUEST_DOWNLOAD: u8 = 0x34;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const REQUEST_TRANSFER_EXIT: u8 = 0x37;
    pub const TESTER_PRESENT: u8 = 0x3E;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;

    /// Offset added to a SID in its positive response
    pub const POSITIVE_OFFSET: u8 = 0x40;
}

/// DiagnosticSessionControl (0x10) session types
pub mod session_type {
    pub const DEFAULT: u8 = 0x01;
    pub const PROGRAMMING: u8 = 0x02;
    pub const EXTENDED: u8 = 0x03;
}

/// RoutineControl (0x31) sub-functions
pub mod routine_sub_function {
    pub const START_ROUTINE: u8 = 0x01;
}

/// ECUReset (0x11) sub-functions
pub mod reset_type {
    pub const HARD_RESET: u8 = 0x01;
}

/// Name of a service for log lines and errors
pub fn service_name(sid: u8) -> &'static str {
    match sid {
        service_id::DIAGNOSTIC_SESSION_CONTROL => "DiagnosticSessionControl",
        service_id::ECU_RESET => "ECUReset",
        service_id::SECURITY_ACCESS => "SecurityAccess",
        service_id::ROUTINE_CONTROL => "RoutineControl",
        service_id::REQUEST_DOWNLOAD => "RequestDownload",
        service_id::TRANSFER_DATA => "TransferData",
        service_id::REQUEST_TRANSFER_EXIT => "RequestTransferExit",
        service_id::TESTER_PRESENT => "TesterPresent",
        _ => "UnknownService",
    }
}

/// Encode `value` as a big-endian field of `width` bytes
///
/// Fails when `value` does not fit, rather than dropping its high bytes.
fn be_field(value: u32, width: usize) -> ProtocolResult<Vec<u8>> {
    let bytes = value.to_be_bytes();
    if width >= bytes.len() {
        let mut field = vec![0u8; width - bytes.len()];
        field.extend_from_slice(&bytes);
        Ok(field)
    } else if value >> (8 * width) != 0 {
        Err(ProtocolError::InvalidConfig(format!(
            "0x{:X} does not fit in a {}-byte field",
            value, width
        )))
    } else {
        Ok(bytes[bytes.len() - width..].to_vec())
    }
}

/// UDS client bound to one addressing role
#[derive(Clone)]
pub struct UdsClient {
    transport: Arc<dyn DiagTransport>,
    role: AddressRole,
    timeout: Duration,
    pending_timeout: Duration,
}

impl UdsClient {
    pub fn new(transport: Arc<dyn DiagTransport>, role: AddressRole) -> Self {
        Self {
            transport,
            role,
            timeout: Duration::from_millis(1000),
            pending_timeout: Duration::from_millis(30000),
        }
    }

    /// P2 timeout for each response
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overall bound while the ECU keeps answering "response pending"
    pub fn with_pending_timeout(mut self, pending_timeout: Duration) -> Self {
        self.pending_timeout = pending_timeout;
        self
    }

    pub fn role(&self) -> AddressRole {
        self.role
    }

    /// Send a request and return its positive response
    pub async fn send_request(&self, request: &[u8]) -> ProtocolResult<Vec<u8>> {
        let sid = request
            .first()
            .copied()
            .ok_or_else(|| ProtocolError::InvalidConfig("empty UDS request".to_string()))?;
        let operation = service_name(sid);
        let started = tokio::time::Instant::now();

        let mut response = self
            .transport
            .send_receive(self.role, request, self.timeout)
            .await
            .map_err(|e| self.map_timeout(e, operation, self.timeout))?;

        loop {
            if response.first() != Some(&service_id::NEGATIVE_RESPONSE) {
                break;
            }
            if response.len() < 3 || response[1] != sid {
                return Err(ProtocolError::unexpected(operation, &response));
            }

            let nrc = NegativeResponseCode::from(response[2]);
            if nrc != NegativeResponseCode::ResponsePending {
                warn!(sid = format!("0x{:02X}", sid), nrc = %nrc, "Negative response");
                return Err(ProtocolError::NegativeResponse {
                    service: operation.to_string(),
                    code: nrc.code(),
                    description: nrc.description().to_string(),
                });
            }

            let remaining = self.pending_timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(ProtocolError::Timeout {
                    operation: format!("{} (response pending)", operation),
                    timeout: self.pending_timeout,
                });
            }
            debug!(sid = format!("0x{:02X}", sid), "Response pending");
            response = self
                .transport
                .receive(self.role, remaining)
                .await
                .map_err(|e| self.map_timeout(e, operation, self.pending_timeout))?;
        }

        if response.first() != Some(&sid.wrapping_add(service_id::POSITIVE_OFFSET)) {
            return Err(ProtocolError::unexpected(operation, &response));
        }
        Ok(response)
    }

    fn map_timeout(&self, err: TransportError, operation: &str, timeout: Duration) -> ProtocolError {
        match err {
            TransportError::Timeout(_) => ProtocolError::Timeout {
                operation: operation.to_string(),
                timeout,
            },
            other => ProtocolError::Transport(other),
        }
    }

    /// Send a request that expects no response (functional broadcast)
    pub async fn send_only(&self, request: &[u8]) -> ProtocolResult<()> {
        self.transport.send(self.role, request).await?;
        Ok(())
    }

    // =========================================================================
    // Session management (0x10, 0x3E, 0x27)
    // =========================================================================

    /// DiagnosticSessionControl (0x10); the response must echo the session
    pub async fn diagnostic_session_control(&self, session: u8) -> ProtocolResult<Vec<u8>> {
        let request = [service_id::DIAGNOSTIC_SESSION_CONTROL, session];
        let response = self.send_request(&request).await?;
        if response.get(1) != Some(&session) {
            return Err(ProtocolError::unexpected(
                service_name(service_id::DIAGNOSTIC_SESSION_CONTROL),
                &response,
            ));
        }
        Ok(response)
    }

    /// TesterPresent (0x3E)
    pub async fn tester_present(&self, suppress_response: bool) -> ProtocolResult<()> {
        let sub_function = if suppress_response { 0x80 } else { 0x00 };
        let request = [service_id::TESTER_PRESENT, sub_function];
        if suppress_response {
            self.send_only(&request).await
        } else {
            self.send_request(&request).await?;
            Ok(())
        }
    }

    /// SecurityAccess requestSeed (odd sub-function)
    pub async fn security_access_request_seed(&self, level: u8) -> ProtocolResult<Vec<u8>> {
        let sub_function = level.wrapping_mul(2).wrapping_sub(1);
        let request = [service_id::SECURITY_ACCESS, sub_function];
        let response = self.send_request(&request).await?;

        // 0x67 [sub_function] [seed...]
        if response.len() < 3 || response[1] != sub_function {
            return Err(ProtocolError::unexpected("SecurityAccess requestSeed", &response));
        }
        Ok(response[2..].to_vec())
    }

    /// SecurityAccess sendKey (even sub-function)
    pub async fn security_access_send_key(&self, level: u8, key: &[u8]) -> ProtocolResult<()> {
        let sub_function = level.wrapping_mul(2);
        let mut request = vec![service_id::SECURITY_ACCESS, sub_function];
        request.extend_from_slice(key);

        let response = self.send_request(&request).await?;
        if response.get(1) != Some(&sub_function) {
            return Err(ProtocolError::unexpected("SecurityAccess sendKey", &response));
        }
        Ok(())
    }

    // =========================================================================
    // Routine Control (0x31)
    // =========================================================================

    /// Start a routine and return its status record (bytes after the routine ID)
    pub async fn routine_control_start(
        &self,
        routine_id: u16,
        params: &[u8],
    ) -> ProtocolResult<Vec<u8>> {
        let mut request = vec![
            service_id::ROUTINE_CONTROL,
            routine_sub_function::START_ROUTINE,
        ];
        request.extend_from_slice(&routine_id.to_be_bytes());
        request.extend_from_slice(params);

        let response = self.send_request(&request).await?;

        // 0x71 [sub-function] [routineIdHi] [routineIdLo] [statusRecord...]
        if response.len() < 4 || response[1..4] != request[1..4] {
            return Err(ProtocolError::unexpected(
                format!("RoutineControl 0x{:04X}", routine_id),
                &response,
            ));
        }
        Ok(response[4..].to_vec())
    }

    /// Start a routine whose status record must end in 0x00 (success)
    pub async fn routine_control_checked(
        &self,
        name: &str,
        routine_id: u16,
        params: &[u8],
    ) -> ProtocolResult<()> {
        let status = self.routine_control_start(routine_id, params).await?;
        match status.last() {
            Some(0x00) => Ok(()),
            Some(&status) => Err(ProtocolError::RoutineFailed {
                name: name.to_string(),
                routine: routine_id,
                status,
            }),
            None => Err(ProtocolError::unexpected(
                format!("RoutineControl {} (no status)", name),
                &status,
            )),
        }
    }

    // =========================================================================
    // Programming Services (0x34, 0x36, 0x37, 0x11)
    // =========================================================================

    /// RequestDownload (0x34); returns the ECU's raw maxNumberOfBlockLength
    ///
    /// The block length includes the SID and the sequence counter, so each
    /// TransferData request may carry two bytes less of payload.
    pub async fn request_download(
        &self,
        data_format: u8,
        address_and_length_format: u8,
        address: u32,
        size: u32,
    ) -> ProtocolResult<u32> {
        let size_len = (address_and_length_format >> 4) as usize;
        let address_len = (address_and_length_format & 0x0F) as usize;
        if !(1..=4).contains(&size_len) || !(1..=4).contains(&address_len) {
            return Err(ProtocolError::InvalidConfig(format!(
                "unsupported addressAndLengthFormatIdentifier 0x{:02X}",
                address_and_length_format
            )));
        }

        let mut request = vec![
            service_id::REQUEST_DOWNLOAD,
            data_format,
            address_and_length_format,
        ];
        request.extend_from_slice(&be_field(address, address_len)?);
        request.extend_from_slice(&be_field(size, size_len)?);

        let response = self.send_request(&request).await?;

        // 0x74 [lengthFormatIdentifier] [maxNumberOfBlockLength...]
        let num_bytes = response.get(1).map(|f| (f >> 4) as usize).unwrap_or(0);
        if num_bytes == 0 || num_bytes > 4 || response.len() < 2 + num_bytes {
            return Err(ProtocolError::unexpected("RequestDownload", &response));
        }
        let max_block_length = response[2..2 + num_bytes]
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | *b as u32);
        Ok(max_block_length)
    }

    /// TransferData (0x36); the response must echo the block counter
    pub async fn transfer_data(&self, block_counter: u8, data: &[u8]) -> ProtocolResult<()> {
        let mut request = Vec::with_capacity(data.len() + 2);
        request.push(service_id::TRANSFER_DATA);
        request.push(block_counter);
        request.extend_from_slice(data);

        let response = self.send_request(&request).await?;
        if response.get(1) != Some(&block_counter) {
            return Err(ProtocolError::unexpected(
                format!("TransferData block {}", block_counter),
                &response,
            ));
        }
        Ok(())
    }

    /// RequestTransferExit (0x37)
    pub async fn request_transfer_exit(&self) -> ProtocolResult<Vec<u8>> {
        let response = self
            .send_request(&[service_id::REQUEST_TRANSFER_EXIT])
            .await?;
        Ok(response[1..].to_vec())
    }

    /// ECUReset (0x11); returns the power-down time when reported
    pub async fn ecu_reset(&self, reset: u8) -> ProtocolResult<Option<u8>> {
        let response = self.send_request(&[service_id::ECU_RESET, reset]).await?;
        if response.get(1) != Some(&reset) {
            return Err(ProtocolError::unexpected("ECUReset", &response));
        }
        Ok(response.get(2).copied())
    }
}
