//! CCP ECU simulator on top of the core mock transport

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use canflash_ccp::{resource, CcpConfig, CcpSession};
use canflash_core::mock::reply;
use canflash_core::{CanFrame, DeviceConfig, MemorySink, MockCanTransport, XorSecretResolver};
use canflash_srec::{crc16_modbus, record_checksum, SrecordImage};
use parking_lot::Mutex;

pub const CRO: u32 = 0x7E0;
pub const DTO: u32 = 0x7E1;
pub const SECRET: &str = "0A0B0C0D";
pub const SEED: [u8; 4] = [0x11, 0x22, 0x33, 0x44];
pub const LAUNCH: u8 = 0x21;

/// One WRITE_DAQ entry as the ECU stored it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaqEntry {
    pub daq: u8,
    pub odt: u8,
    pub element: u8,
    pub size: u8,
    pub address: u32,
}

/// START_STOP parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartStop {
    pub mode: u8,
    pub daq: u8,
    pub last_odt: u8,
    pub event_channel: u8,
    pub prescaler: u16,
}

pub struct EcuSim {
    pub memory: BTreeMap<u32, u8>,
    pub mta: u32,
    pub protected: u8,
    pub unlocked: u8,
    pub pending_resource: u8,
    pub connected: bool,
    /// CONNECT requests to leave unanswered
    pub ignore_connects: usize,
    pub silent: bool,
    pub cros: Vec<Vec<u8>>,
    /// Answer this command with this return code
    pub fail: Option<(u8, u8)>,
    /// Answer this command with a wrong counter
    pub wrong_ctr_for: Option<u8>,
    /// Send an event message before the CRM of this command
    pub event_before: Option<u8>,
    pub corrupt_checksum_at: Option<u32>,
    pub daq_lists: HashMap<u8, (u8, u8)>,
    pub daq_ptr: (u8, u8, u8),
    pub daq_entries: Vec<DaqEntry>,
    pub session_status: u8,
    pub start_stop: Vec<StartStop>,
    pub started: Option<bool>,
    pub launched: Option<u32>,
    pub empty_programs: usize,
}

impl Default for EcuSim {
    fn default() -> Self {
        let mut daq_lists = HashMap::new();
        daq_lists.insert(0, (4, 0x00));
        daq_lists.insert(1, (2, 0x04));
        Self {
            memory: BTreeMap::new(),
            mta: 0,
            protected: resource::CAL | resource::DAQ | resource::PGM,
            unlocked: 0,
            pending_resource: 0,
            connected: false,
            ignore_connects: 0,
            silent: false,
            cros: Vec::new(),
            fail: None,
            wrong_ctr_for: None,
            event_before: None,
            corrupt_checksum_at: None,
            daq_lists,
            daq_ptr: (0, 0, 0),
            daq_entries: Vec::new(),
            session_status: 0,
            start_stop: Vec::new(),
            started: None,
            launched: None,
            empty_programs: 0,
        }
    }
}

fn le32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

impl EcuSim {
    pub fn expected_key() -> Vec<u8> {
        let secret = hex::decode(SECRET).unwrap();
        SEED.iter().zip(secret).map(|(s, k)| s ^ k).collect()
    }

    pub fn read(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| *self.memory.get(&(address + i)).unwrap_or(&0xFF))
            .collect()
    }

    pub fn write(&mut self, address: u32, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.memory.insert(address + i as u32, *b);
        }
    }

    /// Command codes received so far
    pub fn commands(&self) -> Vec<u8> {
        self.cros.iter().map(|c| c[0]).collect()
    }

    fn crm(err: u8, ctr: u8, data: &[u8]) -> CanFrame {
        let mut frame = vec![0xFF, err, ctr];
        frame.extend_from_slice(data);
        frame.resize(8, 0);
        reply(DTO, &frame)
    }

    pub fn handle(&mut self, frame: &CanFrame) -> Vec<CanFrame> {
        if frame.id != CRO || frame.data.len() != 8 {
            return Vec::new();
        }
        self.cros.push(frame.data.clone());
        if self.silent {
            return Vec::new();
        }
        let cmd = frame.data[0];
        let ctr = frame.data[1];
        let p: Vec<u8> = frame.data[2..].to_vec();

        let mut out = Vec::new();
        if self.event_before == Some(cmd) {
            out.push(reply(DTO, &[0xFE, 0x20, 0, 0, 0, 0, 0, 0]));
        }
        let ctr_out = if self.wrong_ctr_for == Some(cmd) {
            ctr.wrapping_add(1)
        } else {
            ctr
        };
        if let Some((failing, err)) = self.fail {
            if failing == cmd {
                out.push(Self::crm(err, ctr_out, &[]));
                return out;
            }
        }

        let (err, data) = self.execute(cmd, &p);
        match err {
            None => out,
            Some(err) => {
                out.push(Self::crm(err, ctr_out, &data));
                out
            }
        }
    }

    /// Returns `None` for "no reply"
    fn execute(&mut self, cmd: u8, p: &[u8]) -> (Option<u8>, Vec<u8>) {
        const ACK: Option<u8> = Some(0x00);
        match cmd {
            0x01 => {
                if self.ignore_connects > 0 {
                    self.ignore_connects -= 1;
                    return (None, vec![]);
                }
                self.connected = true;
                (ACK, vec![])
            }
            0x17 => (
                ACK,
                vec![
                    4,
                    0,
                    resource::CAL | resource::DAQ | resource::PGM,
                    self.protected,
                ],
            ),
            0x1B => (ACK, vec![2, 1]),
            0x12 => {
                let res = p[0];
                self.pending_resource = res;
                if self.protected & res != 0 && self.unlocked & res == 0 {
                    let mut data = vec![1];
                    data.extend_from_slice(&SEED);
                    (ACK, data)
                } else {
                    (ACK, vec![0, 0, 0, 0, 0])
                }
            }
            0x13 => {
                if p[..4] == Self::expected_key()[..] {
                    self.unlocked |= self.pending_resource;
                    (ACK, vec![self.unlocked])
                } else {
                    (Some(0x35), vec![])
                }
            }
            0x02 => {
                self.mta = le32(&p[2..6]);
                (ACK, vec![])
            }
            0x03 => {
                let n = p[0] as usize;
                let (mta, data) = (self.mta, p[1..1 + n].to_vec());
                self.write(mta, &data);
                self.mta += n as u32;
                let mut reply = vec![0];
                reply.extend_from_slice(&self.mta.to_le_bytes());
                (ACK, reply)
            }
            0x04 => {
                let n = p[0] as usize;
                let data = self.read(self.mta, n);
                self.mta += n as u32;
                (ACK, data)
            }
            0x10 => {
                if self.unlocked & resource::PGM == 0 {
                    return (Some(0x33), vec![]);
                }
                let size = le32(&p[0..4]);
                for a in self.mta..self.mta + size {
                    self.memory.insert(a, 0xFF);
                }
                (ACK, vec![])
            }
            0x18 => {
                if self.unlocked & resource::PGM == 0 {
                    return (Some(0x33), vec![]);
                }
                let n = p[0] as usize;
                if n == 0 {
                    self.empty_programs += 1;
                }
                let (mta, data) = (self.mta, p[1..1 + n].to_vec());
                self.write(mta, &data);
                self.mta += n as u32;
                (ACK, vec![])
            }
            0x0E => {
                let size = le32(&p[0..4]) as usize;
                let mut crc = crc16_modbus(&self.read(self.mta, size));
                if self.corrupt_checksum_at == Some(self.mta) {
                    crc ^= 0x0101;
                }
                let mut data = vec![2];
                data.extend_from_slice(&crc.to_le_bytes());
                (ACK, data)
            }
            LAUNCH => {
                self.launched = Some(le32(&p[0..4]));
                (ACK, vec![])
            }
            0x07 => {
                self.connected = false;
                (ACK, vec![])
            }
            0x14 => match self.daq_lists.get(&p[0]).copied() {
                Some((odts, first_pid)) => {
                    let daq = p[0];
                    self.daq_entries.retain(|e| e.daq != daq);
                    (ACK, vec![odts, first_pid])
                }
                None => (Some(0x32), vec![]),
            },
            0x15 => {
                self.daq_ptr = (p[0], p[1], p[2]);
                (ACK, vec![])
            }
            0x16 => {
                let (daq, odt, element) = self.daq_ptr;
                self.daq_entries.push(DaqEntry {
                    daq,
                    odt,
                    element,
                    size: p[0],
                    address: le32(&p[2..6]),
                });
                (ACK, vec![])
            }
            0x0C => {
                self.session_status = p[0];
                (ACK, vec![])
            }
            0x06 => {
                self.start_stop.push(StartStop {
                    mode: p[0],
                    daq: p[1],
                    last_odt: p[2],
                    event_channel: p[3],
                    prescaler: u16::from_le_bytes([p[4], p[5]]),
                });
                (ACK, vec![])
            }
            0x08 => {
                self.started = Some(p[0] == 1);
                (ACK, vec![])
            }
            _ => (Some(0x30), vec![]),
        }
    }
}

pub struct Rig {
    pub session: CcpSession,
    pub mock: MockCanTransport,
    pub sim: Arc<Mutex<EcuSim>>,
    pub log: Arc<MemorySink>,
}

pub fn config() -> CcpConfig {
    CcpConfig {
        cro_id: CRO,
        dto_id: DTO,
        command_timeout_ms: 100,
        daq_poll_ms: 10,
        ..CcpConfig::default()
    }
}

pub fn rig_with(sim: EcuSim, config: CcpConfig) -> Rig {
    let sim = Arc::new(Mutex::new(sim));
    let responder_sim = sim.clone();
    let mock = MockCanTransport::with_responder(move |frame| responder_sim.lock().handle(frame));
    let log = Arc::new(MemorySink::new());
    let session = CcpSession::new(
        Arc::new(mock.clone()),
        DeviceConfig::default(),
        config,
        Arc::new(XorSecretResolver::from_hex(SECRET).unwrap()),
        log.clone(),
    );
    Rig {
        session,
        mock,
        sim,
        log,
    }
}

pub fn rig() -> Rig {
    rig_with(EcuSim::default(), config())
}

const HEADER: &str = "S00F000068656C6C6F202020202000003C";

pub fn s3(address: u32, data: &[u8]) -> String {
    let mut bytes = vec![(4 + data.len() + 1) as u8];
    bytes.extend_from_slice(&address.to_be_bytes());
    bytes.extend_from_slice(data);
    format!("S3{}{:02X}", hex::encode_upper(&bytes), record_checksum(&bytes))
}

pub fn s7(address: u32) -> String {
    let mut bytes = vec![5u8];
    bytes.extend_from_slice(&address.to_be_bytes());
    format!("S7{}{:02X}", hex::encode_upper(&bytes), record_checksum(&bytes))
}

/// Segments at 0x1000 (12 bytes) and 0x2000 (4 bytes), start address 0x1000
pub fn two_segment_image() -> SrecordImage {
    let text = [
        HEADER.to_string(),
        s3(0x1000, &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]),
        s3(0x1008, &[0x09, 0x0A, 0x0B, 0x0C]),
        s3(0x2000, &[0xA1, 0xA2, 0xA3, 0xA4]),
        s7(0x1000),
    ]
    .join("\n");
    SrecordImage::parse(&text).unwrap()
}
