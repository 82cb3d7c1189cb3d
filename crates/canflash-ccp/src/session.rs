//! CCP session
//!
//! ```text
//! Uninitialized -> DeviceOpen -> Connected -> Unlocked -> Programming -> Disconnected
//!                                          \           \-> Measuring -> Unlocked
//!                                           \-> Measuring
//! ```
//!
//! Every command waits for its CRM and checks the counter and return code;
//! anything else fails the call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use canflash_conv::{decode, encode_within_limits, CalibrationItem};
use canflash_core::{
    recv_from, CanTransport, DeviceConfig, DeviceGuard, FlashSession, LogSink, ProtocolError,
    ProtocolResult, SeedKeyResolver, TransportError,
};
use canflash_srec::{SrecordImage, SrecordSegment};
use tracing::{debug, info, warn};

use crate::command::{
    address_bytes, build_cro, code, command_name, describe_return_code, disconnect, pid,
    session_status, start_stop, Crm, CRM_DATA_LEN, MAX_PAYLOAD,
};
use crate::config::CcpConfig;
use crate::daq::{DaqAllocation, DaqListInfo};
use crate::measure::{spawn_receive_loop, MeasurementHandle, ReceiveStats};
use crate::telemetry::TelemetryQueue;

/// CCP version this master speaks
pub const CCP_VERSION: (u8, u8) = (2, 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcpState {
    Uninitialized,
    DeviceOpen,
    Connected,
    Unlocked,
    Measuring,
    Programming,
    Disconnected,
}

/// Error counters kept for the lifetime of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounters {
    /// Frames the driver refused to send
    pub transmission: u32,
    /// CRMs with a wrong counter or a non-zero return code
    pub unexpected: u32,
    pub timeouts: u32,
}

/// EXCHANGE_ID reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveId {
    pub id_length: u8,
    pub data_type: u8,
    pub resources_available: u8,
    pub resources_protected: u8,
}

/// GET_SEED reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    /// False if the resource needs no unlock
    pub protected: bool,
    pub seed: Vec<u8>,
}

/// CCP implementation of [`FlashSession`], plus calibration and DAQ access
pub struct CcpSession {
    transport: Arc<dyn CanTransport>,
    device: DeviceConfig,
    config: CcpConfig,
    resolver: Arc<dyn SeedKeyResolver>,
    log: Arc<dyn LogSink>,
    guard: Option<DeviceGuard>,
    state: CcpState,
    ctr: u8,
    privileges: u8,
    counters: ErrorCounters,
    measurement: Option<MeasurementHandle>,
    resume_state: CcpState,
}

impl CcpSession {
    pub fn new(
        transport: Arc<dyn CanTransport>,
        device: DeviceConfig,
        config: CcpConfig,
        resolver: Arc<dyn SeedKeyResolver>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            transport,
            device,
            config,
            resolver,
            log,
            guard: None,
            state: CcpState::Uninitialized,
            ctr: 0,
            privileges: 0,
            counters: ErrorCounters::default(),
            measurement: None,
            resume_state: CcpState::Connected,
        }
    }

    pub fn state(&self) -> CcpState {
        self.state
    }

    pub fn config(&self) -> &CcpConfig {
        &self.config
    }

    pub fn counters(&self) -> ErrorCounters {
        self.counters
    }

    /// Resources unlocked so far
    pub fn privileges(&self) -> u8 {
        self.privileges
    }

    pub fn is_measuring(&self) -> bool {
        self.state == CcpState::Measuring
    }

    fn set_state(&mut self, state: CcpState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "CCP state change");
            self.state = state;
        }
    }

    fn require(&self, operation: &str, allowed: &[CcpState]) -> ProtocolResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ProtocolError::invalid_state(operation, self.state))
        }
    }

    fn require_connected(&self, operation: &str) -> ProtocolResult<()> {
        self.require(
            operation,
            &[CcpState::Connected, CcpState::Unlocked, CcpState::Programming],
        )
    }

    // ========================================================================
    // Command transport
    // ========================================================================

    /// Send one CRO and wait for the matching CRM
    async fn command(
        &mut self,
        cmd: u8,
        params: &[u8],
        timeout: Duration,
    ) -> ProtocolResult<[u8; CRM_DATA_LEN]> {
        if self.guard.is_none() {
            return Err(TransportError::NotOpen.into());
        }
        let ctr = self.ctr;
        self.ctr = self.ctr.wrapping_add(1);
        let frame = build_cro(cmd, ctr, params)?;
        let name = command_name(cmd);
        debug!(command = name, ctr, data = %hex::encode_upper(frame), "CRO");

        if let Err(e) = self.transport.send_frame(self.config.cro_id, &frame).await {
            self.counters.transmission += 1;
            return Err(e.into());
        }

        let crm = self.await_crm(name, timeout).await?;
        if crm.ctr != ctr {
            self.counters.unexpected += 1;
            warn!(command = name, expected = ctr, actual = crm.ctr, "CRM counter mismatch");
            let mut actual = vec![pid::COMMAND_RETURN, crm.err, crm.ctr];
            actual.extend_from_slice(&crm.data);
            return Err(ProtocolError::unexpected(name, &actual));
        }
        if crm.err != 0 {
            self.counters.unexpected += 1;
            return Err(ProtocolError::NegativeResponse {
                service: name.to_string(),
                code: crm.err,
                description: describe_return_code(crm.err).to_string(),
            });
        }
        Ok(crm.data)
    }

    /// Wait for the next CRM, skipping event messages and DAQ frames
    async fn await_crm(&mut self, name: &str, timeout: Duration) -> ProtocolResult<Crm> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let frame = match recv_from(self.transport.as_ref(), self.config.dto_id, remaining).await
            {
                Ok(frame) => frame,
                Err(TransportError::Timeout(_)) => {
                    self.counters.timeouts += 1;
                    return Err(ProtocolError::Timeout {
                        operation: name.to_string(),
                        timeout,
                    });
                }
                Err(e) => return Err(e.into()),
            };

            match frame.data.first() {
                Some(&pid::COMMAND_RETURN) => {
                    return Crm::parse(&frame.data).ok_or_else(|| {
                        self.counters.unexpected += 1;
                        ProtocolError::unexpected(name, &frame.data)
                    });
                }
                Some(&pid::EVENT) => {
                    let event = frame.data.get(1).copied().unwrap_or_default();
                    warn!(event, text = describe_return_code(event), "CCP event message");
                    self.log.warn(&format!(
                        "CCP: event message: {} (0x{:02X})",
                        describe_return_code(event),
                        event
                    ));
                }
                _ => debug!(data = %hex::encode_upper(&frame.data), "Skipping DAQ frame"),
            }
        }
    }

    async fn simple(&mut self, cmd: u8, params: &[u8]) -> ProtocolResult<[u8; CRM_DATA_LEN]> {
        let timeout = self.config.command_timeout();
        self.command(cmd, params, timeout).await
    }

    // ========================================================================
    // Elementary commands
    // ========================================================================

    pub async fn get_ccp_version(&mut self) -> ProtocolResult<(u8, u8)> {
        self.require_connected("GET_CCP_VERSION")?;
        let data = self
            .simple(code::GET_CCP_VERSION, &[CCP_VERSION.0, CCP_VERSION.1])
            .await?;
        Ok((data[0], data[1]))
    }

    pub async fn exchange_id(&mut self) -> ProtocolResult<SlaveId> {
        self.require_connected("EXCHANGE_ID")?;
        let data = self.simple(code::EXCHANGE_ID, &[]).await?;
        let id = SlaveId {
            id_length: data[0],
            data_type: data[1],
            resources_available: data[2],
            resources_protected: data[3],
        };
        debug!(?id, "Slave ID");
        Ok(id)
    }

    pub async fn get_seed(&mut self, resource: u8) -> ProtocolResult<Seed> {
        self.require_connected("GET_SEED")?;
        let data = self.simple(code::GET_SEED, &[resource]).await?;
        Ok(Seed {
            protected: data[0] != 0,
            seed: data[1..5].to_vec(),
        })
    }

    /// Send a key; returns the privilege mask the ECU now grants
    pub async fn send_key(&mut self, key: &[u8]) -> ProtocolResult<u8> {
        self.require_connected("UNLOCK")?;
        let data = self.simple(code::UNLOCK, key).await?;
        Ok(data[0])
    }

    /// Seed/key unlock of one resource (CAL, DAQ or PGM)
    pub async fn unlock_resource(&mut self, resource: u8) -> ProtocolResult<()> {
        let seed = self.get_seed(resource).await?;
        if !seed.protected {
            info!(resource = format!("0x{:02X}", resource), "Resource not protected");
            self.privileges |= resource;
        } else {
            debug!(resource, seed = %hex::encode_upper(&seed.seed), "Seed received");
            let key = self.resolver.compute_key(&seed.seed)?;
            if key.len() > 6 {
                return Err(ProtocolError::SecurityAccess(format!(
                    "key of {} bytes does not fit an UNLOCK frame",
                    key.len()
                )));
            }
            let privileges = self.send_key(&key).await?;
            if privileges & resource == 0 {
                return Err(ProtocolError::SecurityAccess(format!(
                    "resource 0x{:02X} still locked (privileges 0x{:02X})",
                    resource, privileges
                )));
            }
            self.privileges = privileges;
        }
        if self.state == CcpState::Connected {
            self.set_state(CcpState::Unlocked);
        }
        Ok(())
    }

    pub async fn set_mta(&mut self, mta: u8, extension: u8, address: u32) -> ProtocolResult<()> {
        self.require_connected("SET_MTA")?;
        let mut params = vec![mta, extension];
        params.extend_from_slice(&address_bytes(address));
        self.simple(code::SET_MTA, &params).await?;
        Ok(())
    }

    /// Read `length` bytes starting at `address`
    pub async fn upload(
        &mut self,
        address: u32,
        extension: u8,
        length: usize,
    ) -> ProtocolResult<Vec<u8>> {
        self.require_connected("UPLOAD")?;
        self.set_mta(0, extension, address).await?;
        let mut out = Vec::with_capacity(length);
        while out.len() < length {
            let n = (length - out.len()).min(MAX_PAYLOAD);
            let data = self.simple(code::UPLOAD, &[n as u8]).await?;
            out.extend_from_slice(&data[..n]);
        }
        Ok(out)
    }

    /// Write `data` starting at `address`
    pub async fn download(&mut self, address: u32, extension: u8, data: &[u8]) -> ProtocolResult<()> {
        self.require_connected("DNLOAD")?;
        self.set_mta(0, extension, address).await?;
        for chunk in data.chunks(MAX_PAYLOAD) {
            let mut params = vec![chunk.len() as u8];
            params.extend_from_slice(chunk);
            self.simple(code::DNLOAD, &params).await?;
        }
        Ok(())
    }

    async fn clear_memory(&mut self, length: u32) -> ProtocolResult<()> {
        let timeout = self.config.clear_timeout();
        self.command(code::CLEAR_MEMORY, &length.to_le_bytes(), timeout)
            .await?;
        Ok(())
    }

    async fn program(&mut self, chunk: &[u8]) -> ProtocolResult<()> {
        let mut params = vec![chunk.len() as u8];
        params.extend_from_slice(chunk);
        self.simple(code::PROGRAM, &params).await?;
        Ok(())
    }

    /// Device-side checksum over `length` bytes from the current MTA
    pub async fn build_checksum(&mut self, length: u32) -> ProtocolResult<u32> {
        self.require_connected("BUILD_CHKSUM")?;
        let timeout = self.config.checksum_timeout();
        let data = self
            .command(code::BUILD_CHKSUM, &length.to_le_bytes(), timeout)
            .await?;
        let size = data[0] as usize;
        if !(1..=4).contains(&size) {
            self.counters.unexpected += 1;
            return Err(ProtocolError::unexpected("BUILD_CHKSUM", &data));
        }
        let mut bytes = [0u8; 4];
        bytes[..size].copy_from_slice(&data[1..1 + size]);
        Ok(u32::from_le_bytes(bytes))
    }

    pub async fn get_daq_size(&mut self, daq_number: u8) -> ProtocolResult<DaqListInfo> {
        self.require_connected("GET_DAQ_SIZE")?;
        let mut params = vec![daq_number, 0];
        params.extend_from_slice(&self.config.dto_id.to_le_bytes());
        let data = self.simple(code::GET_DAQ_SIZE, &params).await?;
        let info = DaqListInfo {
            daq_number,
            odts_size: data[0],
            first_pid: data[1],
        };
        debug!(?info, "DAQ list size");
        Ok(info)
    }

    /// GET_DAQ_SIZE for every configured DAQ list
    pub async fn read_daq_lists(&mut self) -> ProtocolResult<Vec<DaqListInfo>> {
        let numbers: Vec<u8> = self.config.daq_lists.iter().map(|l| l.daq_number).collect();
        let mut lists = Vec::with_capacity(numbers.len());
        for daq_number in numbers {
            lists.push(self.get_daq_size(daq_number).await?);
        }
        Ok(lists)
    }

    // ========================================================================
    // EPK and calibration
    // ========================================================================

    /// Read the EPK string stored at `address`
    pub async fn read_epk(&mut self, address: u32, length: usize) -> ProtocolResult<String> {
        let bytes = self.upload(address, 0, length).await?;
        Ok(String::from_utf8_lossy(&bytes)
            .trim_end_matches('\0')
            .to_string())
    }

    /// Compare the ECU's EPK with the one embedded in `image`
    pub async fn check_epk(&mut self, image: &SrecordImage, address: u32) -> ProtocolResult<()> {
        let expected = image.get_epk(address).ok_or_else(|| {
            ProtocolError::InvalidConfig(format!("image has no EPK segment at 0x{:08X}", address))
        })?;
        let expected = String::from_utf8_lossy(expected)
            .trim_end_matches('\0')
            .to_string();
        let device = self.read_epk(address, expected.len()).await?;
        if device != expected {
            return Err(ProtocolError::EpkMismatch { device, expected });
        }
        info!(epk = %device, "EPK matches");
        Ok(())
    }

    pub async fn read_calibration(&mut self, item: &CalibrationItem) -> ProtocolResult<String> {
        let d = &item.descriptor;
        let raw = self
            .upload(d.address, d.address_extension, d.element_size())
            .await?;
        Ok(decode(d, &raw)?)
    }

    /// Encode `value` within the item's limits and write it
    pub async fn write_calibration(
        &mut self,
        item: &CalibrationItem,
        value: &str,
    ) -> ProtocolResult<()> {
        let d = &item.descriptor;
        let raw = encode_within_limits(d, value)?;
        self.download(d.address, d.address_extension, &raw).await?;
        info!(item = %d.name, value, raw = %hex::encode_upper(&raw), "Calibration written");
        self.log.info(&format!("CCP: {} = {}", d.name, value));
        Ok(())
    }

    // ========================================================================
    // Measurement
    // ========================================================================

    /// Push the DAQ layout to the ECU, start all lists together and spawn the
    /// receive loop. The returned queue is fed until [`Self::stop_measure`].
    pub async fn start_measure(
        &mut self,
        allocation: Arc<DaqAllocation>,
    ) -> ProtocolResult<Arc<TelemetryQueue>> {
        self.require("start_measure", &[CcpState::Connected, CcpState::Unlocked])?;

        for (daq, odt, element, entry) in allocation.entries() {
            self.simple(code::SET_DAQ_PTR, &[daq, odt, element]).await?;
            let mut params = vec![entry.size as u8, entry.descriptor.address_extension];
            params.extend_from_slice(&address_bytes(entry.descriptor.address));
            self.simple(code::WRITE_DAQ, &params).await?;
        }

        self.simple(
            code::SET_S_STATUS,
            &[session_status::DAQ | session_status::RUN],
        )
        .await?;

        for list in allocation.lists() {
            let channel = self.config.daq_list(list.daq_number()).copied();
            let (event_channel, prescaler) = channel
                .map(|c| (c.event_channel, c.prescaler))
                .unwrap_or((list.daq_number(), 1));
            let mut params = vec![
                start_stop::PREPARE,
                list.daq_number(),
                list.last_odt(),
                event_channel,
            ];
            params.extend_from_slice(&prescaler.to_le_bytes());
            self.simple(code::START_STOP, &params).await?;
        }
        self.simple(code::START_STOP_ALL, &[start_stop::START]).await?;

        let handle = spawn_receive_loop(
            self.transport.clone(),
            self.config.dto_id,
            allocation.clone(),
            self.config.daq_poll(),
        );
        let queue = handle.queue();
        self.measurement = Some(handle);
        self.resume_state = self.state;
        self.set_state(CcpState::Measuring);

        info!(
            lists = allocation.lists().len(),
            items = allocation.item_count(),
            "Measurement started"
        );
        self.log.info(&format!(
            "CCP: measuring {} item(s) in {} DAQ list(s)",
            allocation.item_count(),
            allocation.lists().len()
        ));
        Ok(queue)
    }

    /// Stop the receive loop, then stop data transmission on the ECU
    pub async fn stop_measure(&mut self) -> ProtocolResult<ReceiveStats> {
        self.require("stop_measure", &[CcpState::Measuring])?;
        let stats = match self.measurement.take() {
            Some(handle) => handle.stop().await,
            None => ReceiveStats::default(),
        };
        self.set_state(self.resume_state);
        self.simple(code::START_STOP_ALL, &[start_stop::STOP]).await?;
        info!(frames = stats.frames, samples = stats.samples, "Measurement stopped");
        Ok(stats)
    }

    // ========================================================================
    // Flashing
    // ========================================================================

    async fn program_segment(
        &mut self,
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
            "CCP: segment {} at 0x{:08X}, {} bytes",
            index, address, length
        ));

        self.set_mta(0, 0, address).await?;
        self.clear_memory(length).await?;

        self.set_mta(0, 0, address).await?;
        for chunk in segment.data.chunks(MAX_PAYLOAD) {
            self.program(chunk).await?;
            *done += chunk.len();
            self.log.progress(*done, total);
        }
        Ok(())
    }

    async fn verify_segment(&mut self, index: usize, segment: &SrecordSegment) -> ProtocolResult<()> {
        self.set_mta(0, 0, segment.start_address).await?;
        let device = self.build_checksum(segment.length()).await?;
        let local = segment.crc16_modbus() as u32;
        if device != local {
            warn!(segment = index, device, local, "Checksum mismatch");
            return Err(ProtocolError::VerificationFailed {
                segment: index,
                device,
                local,
            });
        }
        debug!(segment = index, checksum = format!("0x{:04X}", local), "Segment verified");
        Ok(())
    }

    /// Start the flashed program with the configured user command
    async fn launch(&mut self, address: u32) -> ProtocolResult<()> {
        let command = self.config.launch_command;
        self.simple(command, &address_bytes(address)).await?;
        info!(address = format!("0x{:08X}", address), "Program launched");
        Ok(())
    }
}

#[async_trait]
impl FlashSession for CcpSession {
    fn protocol(&self) -> &'static str {
        "CCP"
    }

    fn open(&mut self) -> ProtocolResult<()> {
        let guard = DeviceGuard::open(
            self.transport.clone(),
            &self.device.channel,
            self.device.bitrate,
        )?;
        self.guard = Some(guard);
        self.privileges = 0;
        self.set_state(CcpState::DeviceOpen);
        Ok(())
    }

    fn close(&mut self) -> ProtocolResult<()> {
        // dropping the handle clears the flag and aborts the loop
        self.measurement = None;
        self.set_state(CcpState::Uninitialized);
        match self.guard.take() {
            Some(guard) => Ok(guard.close()?),
            None => Ok(()),
        }
    }

    async fn connect(&mut self, timeout: Duration) -> ProtocolResult<()> {
        if self.guard.is_none() {
            return Err(TransportError::NotOpen.into());
        }
        self.require("connect", &[CcpState::DeviceOpen, CcpState::Disconnected])?;

        let station = self.config.station_address.to_le_bytes();
        let command = self.config.connect_command;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut attempts = 0u32;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!(attempts, "No CONNECT acknowledge");
                return Err(ProtocolError::ConnectTimeout(timeout));
            }
            attempts += 1;
            let attempt_timeout = remaining.min(self.config.command_timeout());
            match self.command(command, &station, attempt_timeout).await {
                Ok(_) => break,
                Err(e @ ProtocolError::Transport(_)) => return Err(e),
                Err(e) => debug!(attempt = attempts, error = %e, "Connect attempt failed"),
            }
        }

        self.privileges = 0;
        self.set_state(CcpState::Connected);
        info!(
            attempts,
            station = format!("0x{:04X}", self.config.station_address),
            "CCP connected"
        );
        Ok(())
    }

    async fn unlock(&mut self) -> ProtocolResult<()> {
        self.require("unlock", &[CcpState::Connected, CcpState::Unlocked])?;
        let id = self.exchange_id().await?;
        let resource = self.config.program_resource;
        if id.resources_available & resource == 0 {
            warn!(
                available = id.resources_available,
                resource, "ECU does not report the programming resource"
            );
        }
        self.unlock_resource(resource).await
    }

    async fn erase_write_program(&mut self, image: &SrecordImage) -> ProtocolResult<Duration> {
        self.require("erase_write_program", &[CcpState::Unlocked])?;
        if self.privileges & self.config.program_resource == 0 {
            return Err(ProtocolError::SecurityAccess(format!(
                "programming resource 0x{:02X} is locked",
                self.config.program_resource
            )));
        }
        let started = Instant::now();
        self.set_state(CcpState::Programming);

        let total = image.total_len();
        let mut done = 0;
        for (index, segment) in image.segments().iter().enumerate() {
            self.program_segment(index, segment, &mut done, total)
                .await?;
        }
        // empty PROGRAM closes the last block
        self.program(&[]).await?;

        for (index, segment) in image.segments().iter().enumerate() {
            self.verify_segment(index, segment).await?;
        }
        self.log.info("CCP: all segments verified");

        self.launch(image.program_start_address()).await?;
        // the ECU now runs the new program and no longer answers this session
        self.set_state(CcpState::Disconnected);

        let elapsed = started.elapsed();
        info!(elapsed_ms = elapsed.as_millis() as u64, "Programming complete");
        Ok(elapsed)
    }

    async fn disconnect(&mut self) -> ProtocolResult<()> {
        if self.state == CcpState::Measuring {
            self.stop_measure().await?;
        }
        match self.state {
            CcpState::Connected | CcpState::Unlocked | CcpState::Programming => {
                let mut params = vec![disconnect::END_OF_SESSION, 0];
                params.extend_from_slice(&self.config.station_address.to_le_bytes());
                self.simple(code::DISCONNECT, &params).await?;
                self.privileges = 0;
                self.set_state(CcpState::Disconnected);
                Ok(())
            }
            CcpState::Disconnected => Ok(()),
            state => Err(ProtocolError::invalid_state("disconnect", state)),
        }
    }
}
