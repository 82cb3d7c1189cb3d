//! Mock diagnostic transport for testing
//!
//! Answers requests from a request/response table (exact match first, then
//! prefix match) and otherwise with a generated positive response. Mapping
//! installs/removals and every request are recorded so tests can check the
//! session's addressing discipline.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use canflash_core::TransportError;
use parking_lot::{Mutex, RwLock};

use crate::link::{AddressRole, CanMapping, DiagTransport};
use crate::services::service_id;

type Handler = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Recorded mapping change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingEvent {
    Added(AddressRole),
    Removed(AddressRole),
}

/// Mock UDS link
pub struct MockDiagTransport {
    open: AtomicBool,
    open_count: AtomicUsize,
    close_count: AtomicUsize,
    mappings: RwLock<HashMap<AddressRole, CanMapping>>,
    mapping_events: Mutex<Vec<MappingEvent>>,
    /// Predefined responses (request -> response); newest entries win
    responses: RwLock<Vec<(Vec<u8>, Vec<u8>)>>,
    /// Requests (by prefix) that never get an answer
    silent: RwLock<Vec<Vec<u8>>>,
    handler: Mutex<Option<Handler>>,
    /// Responses delivered by `receive` after a "response pending"
    followups: Mutex<VecDeque<Vec<u8>>>,
    unread: Mutex<Option<Vec<u8>>>,
    requests: Mutex<Vec<(AddressRole, Vec<u8>)>>,
}

impl Default for MockDiagTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDiagTransport {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
            open_count: AtomicUsize::new(0),
            close_count: AtomicUsize::new(0),
            mappings: RwLock::new(HashMap::new()),
            mapping_events: Mutex::new(Vec::new()),
            responses: RwLock::new(Self::default_responses()),
            silent: RwLock::new(Vec::new()),
            handler: Mutex::new(None),
            followups: Mutex::new(VecDeque::new()),
            unread: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Add a response for a request (exact or prefix); overrides earlier entries
    pub fn add_response(&self, request: Vec<u8>, response: Vec<u8>) {
        self.responses.write().insert(0, (request, response));
    }

    /// Never answer requests starting with `prefix`
    pub fn add_silent(&self, prefix: Vec<u8>) {
        self.silent.write().push(prefix);
    }

    /// Answer requests from a closure first; `None` falls back to the table
    pub fn set_handler<F>(&self, handler: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        *self.handler.lock() = Some(Box::new(handler));
    }

    /// Queue a message for a `receive` that follows "response pending"
    pub fn queue_followup(&self, response: Vec<u8>) {
        self.followups.lock().push_back(response);
    }

    /// All requests sent so far, with the role they were sent under
    pub fn requests(&self) -> Vec<(AddressRole, Vec<u8>)> {
        self.requests.lock().clone()
    }

    pub fn mapping_events(&self) -> Vec<MappingEvent> {
        self.mapping_events.lock().clone()
    }

    pub fn installed_mappings(&self) -> usize {
        self.mappings.read().len()
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    fn default_responses() -> Vec<(Vec<u8>, Vec<u8>)> {
        vec![
            // SecurityAccess requestSeed level 1 -> 4-byte seed
            (vec![0x27, 0x01], vec![0x67, 0x01, 0x11, 0x22, 0x33, 0x44]),
            // RequestDownload -> maxNumberOfBlockLength 0x0102
            (vec![0x34], vec![0x74, 0x20, 0x01, 0x02]),
        ]
    }

    fn find_response(&self, request: &[u8]) -> Option<Vec<u8>> {
        if let Some(handler) = self.handler.lock().as_mut() {
            if let Some(response) = handler(request) {
                return Some(response);
            }
        }

        if self
            .silent
            .read()
            .iter()
            .any(|prefix| request.starts_with(prefix))
        {
            return None;
        }

        let responses = self.responses.read();
        if let Some((_, resp)) = responses.iter().find(|(req, _)| req == request) {
            return Some(resp.clone());
        }
        if let Some((_, resp)) = responses.iter().find(|(req, _)| request.starts_with(req)) {
            return Some(resp.clone());
        }

        Some(Self::positive_response(request))
    }

    /// Positive response echoing the sub-function where the service has one
    fn positive_response(request: &[u8]) -> Vec<u8> {
        let sid = request[0];
        let mut response = vec![sid.wrapping_add(service_id::POSITIVE_OFFSET)];
        match sid {
            service_id::DIAGNOSTIC_SESSION_CONTROL
            | service_id::ECU_RESET
            | service_id::SECURITY_ACCESS
            | service_id::TESTER_PRESENT
            | service_id::TRANSFER_DATA => {
                response.extend(request.get(1).copied());
            }
            service_id::ROUTINE_CONTROL => {
                response.extend_from_slice(&request[1..request.len().min(4)]);
                response.push(0x00);
            }
            _ => {}
        }
        response
    }

    fn check(&self, role: AddressRole) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }
        if !self.mappings.read().contains_key(&role) {
            return Err(TransportError::NoMapping(role.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DiagTransport for MockDiagTransport {
    fn open(&self) -> Result<(), TransportError> {
        self.open.store(true, Ordering::SeqCst);
        self.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        self.mappings.write().clear();
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn add_mapping(&self, mapping: CanMapping) -> Result<(), TransportError> {
        self.mappings.write().insert(mapping.role, mapping);
        self.mapping_events
            .lock()
            .push(MappingEvent::Added(mapping.role));
        Ok(())
    }

    fn remove_mapping(&self, role: AddressRole) -> Result<(), TransportError> {
        self.mappings
            .write()
            .remove(&role)
            .ok_or_else(|| TransportError::NoMapping(role.to_string()))?;
        self.mapping_events.lock().push(MappingEvent::Removed(role));
        Ok(())
    }

    async fn send(&self, role: AddressRole, request: &[u8]) -> Result<(), TransportError> {
        self.check(role)?;
        if request.is_empty() {
            return Err(TransportError::InvalidFrame("empty request".to_string()));
        }
        tracing::debug!(role = %role, request = %hex::encode_upper(request), "Mock UDS: request");
        self.requests.lock().push((role, request.to_vec()));

        // functional requests and suppressed positive responses are not answered
        let suppressed = request.len() >= 2
            && request[0] == service_id::TESTER_PRESENT
            && request[1] & 0x80 != 0;
        *self.unread.lock() = if role == AddressRole::Functional || suppressed {
            None
        } else {
            self.find_response(request)
        };
        Ok(())
    }

    async fn receive(
        &self,
        role: AddressRole,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.check(role)?;
        let next = self
            .unread
            .lock()
            .take()
            .or_else(|| self.followups.lock().pop_front());
        match next {
            Some(response) => Ok(response),
            None => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::Timeout(timeout))
            }
        }
    }
}
