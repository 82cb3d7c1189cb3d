//! DAQ list allocation
//!
//! Measurement items are grouped by their DAQ list (sampling channel) and
//! packed into ODTs of at most [`ODT_CAPACITY`] bytes. Packing is first-fit by
//! descending element size: every 4-byte item is placed first, then 2-byte,
//! then 1-byte, each into the earliest ODT with room. Items of equal size keep
//! their selection order, so the same input always yields the same layout.

use std::collections::BTreeMap;

use canflash_conv::{decode, ConvResult, Conversion, DaqSchedule, ItemDescriptor, MeasurementItem};
use tracing::debug;

use crate::error::{SchedulingError, SchedulingResult};

/// Payload bytes of one ODT (a DTO is 8 bytes, the first one is the PID)
pub const ODT_CAPACITY: usize = 7;

/// DAQ list properties reported by GET_DAQ_SIZE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaqListInfo {
    pub daq_number: u8,
    pub odts_size: u8,
    pub first_pid: u8,
}

/// One element of an ODT
#[derive(Debug, Clone, PartialEq)]
pub struct OdtEntry {
    /// Position of the item in the caller's selection
    pub index: usize,
    pub descriptor: ItemDescriptor,
    pub size: usize,
    /// Byte offset inside the ODT payload (after the PID)
    pub offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Odt {
    pub entries: Vec<OdtEntry>,
}

impl Odt {
    /// Bytes used so far
    pub fn used(&self) -> usize {
        self.entries.iter().map(|e| e.size).sum()
    }

    fn fits(&self, size: usize) -> bool {
        self.used() + size <= ODT_CAPACITY
    }

    fn push(&mut self, index: usize, descriptor: ItemDescriptor, size: usize) {
        let offset = self.used();
        self.entries.push(OdtEntry {
            index,
            descriptor,
            size,
            offset,
        });
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaqList {
    pub info: DaqListInfo,
    pub odts: Vec<Odt>,
}

impl DaqList {
    pub fn daq_number(&self) -> u8 {
        self.info.daq_number
    }

    /// Index of the last ODT in use, as sent with START_STOP
    pub fn last_odt(&self) -> u8 {
        self.odts.len().saturating_sub(1) as u8
    }

    /// True if `pid` lies in `[first_pid, first_pid + odts_size)`
    pub fn owns_pid(&self, pid: u8) -> bool {
        let first = self.info.first_pid as u16;
        let pid = pid as u16;
        pid >= first && pid < first + self.info.odts_size as u16
    }

    pub fn odt_for_pid(&self, pid: u8) -> Option<&Odt> {
        if !self.owns_pid(pid) {
            return None;
        }
        self.odts.get((pid - self.info.first_pid) as usize)
    }
}

/// Result of [`allocate_daq`]: the ODT layout of every DAQ list in use
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DaqAllocation {
    lists: Vec<DaqList>,
}

impl DaqAllocation {
    pub fn lists(&self) -> &[DaqList] {
        &self.lists
    }

    pub fn list(&self, daq_number: u8) -> Option<&DaqList> {
        self.lists.iter().find(|l| l.info.daq_number == daq_number)
    }

    pub fn item_count(&self) -> usize {
        self.entries().count()
    }

    /// Every entry in packing order with its (daq, odt, element) position
    pub fn entries(&self) -> impl Iterator<Item = (u8, u8, u8, &OdtEntry)> {
        self.lists.iter().flat_map(|list| {
            list.odts.iter().enumerate().flat_map(move |(odt, o)| {
                o.entries.iter().enumerate().map(move |(element, entry)| {
                    (list.info.daq_number, odt as u8, element as u8, entry)
                })
            })
        })
    }

    /// Find the ODT a DTO belongs to by its PID
    pub fn odt_for_pid(&self, pid: u8) -> Option<&Odt> {
        self.lists.iter().find_map(|list| list.odt_for_pid(pid))
    }

    /// Split one DAQ frame into its items and decode each slice.
    ///
    /// Returns `None` when no DAQ list owns the PID. Decode failures are
    /// reported per item.
    pub fn decode_frame(&self, frame: &[u8]) -> Option<Vec<(usize, ConvResult<String>)>> {
        let (&pid, payload) = frame.split_first()?;
        let odt = self.odt_for_pid(pid)?;
        Some(
            odt.entries
                .iter()
                .map(|entry| {
                    let start = entry.offset.min(payload.len());
                    let end = (entry.offset + entry.size).min(payload.len());
                    (entry.index, decode(&entry.descriptor, &payload[start..end]))
                })
                .collect(),
        )
    }
}

fn conversion_supported(descriptor: &ItemDescriptor) -> bool {
    match &descriptor.conversion {
        Conversion::RatFunc(coeffs) => coeffs.is_linear(),
        Conversion::TabVerb(_) => true,
        Conversion::Other(_) => false,
    }
}

/// Pack measurement items into the DAQ lists reported by the device.
///
/// The item's position in `items` is its selection index; decoded samples are
/// keyed by it. On success every item's `schedule` is filled in. On failure no
/// item is modified.
pub fn allocate_daq(
    items: &mut [MeasurementItem],
    lists: &[DaqListInfo],
) -> SchedulingResult<DaqAllocation> {
    if items.is_empty() {
        return Err(SchedulingError::NoItems);
    }

    let unsupported: Vec<String> = items
        .iter()
        .filter(|item| !conversion_supported(&item.descriptor))
        .map(|item| item.name().to_string())
        .collect();
    if !unsupported.is_empty() {
        return Err(SchedulingError::UnsupportedConversion { items: unsupported });
    }

    let mut groups: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
    for (index, item) in items.iter().enumerate() {
        groups.entry(item.daq_number).or_default().push(index);
    }

    let mut allocated = Vec::new();
    let mut overflow_lists = Vec::new();
    let mut overflow_items = Vec::new();

    for (daq_number, mut indices) in groups {
        let info = lists
            .iter()
            .find(|l| l.daq_number == daq_number)
            .copied()
            .ok_or_else(|| SchedulingError::UnknownDaqList {
                daq_number,
                items: indices
                    .iter()
                    .map(|&i| items[i].name().to_string())
                    .collect(),
            })?;

        // stable: equal sizes keep selection order
        indices.sort_by_key(|&i| std::cmp::Reverse(items[i].descriptor.element_size()));

        let mut odts: Vec<Odt> = Vec::new();
        for index in indices {
            let descriptor = &items[index].descriptor;
            let size = descriptor.element_size();
            match odts.iter_mut().find(|odt| odt.fits(size)) {
                Some(odt) => odt.push(index, descriptor.clone(), size),
                None => {
                    let mut odt = Odt::default();
                    odt.push(index, descriptor.clone(), size);
                    odts.push(odt);
                }
            }
        }

        if odts.len() > info.odts_size as usize {
            overflow_lists.push(daq_number);
            overflow_items.extend(
                odts[info.odts_size as usize..]
                    .iter()
                    .flat_map(|odt| odt.entries.iter())
                    .map(|entry| entry.descriptor.name.clone()),
            );
            continue;
        }

        debug!(daq_number, odts = odts.len(), odts_size = info.odts_size, "DAQ list packed");
        allocated.push(DaqList { info, odts });
    }

    if !overflow_items.is_empty() {
        return Err(SchedulingError::CapacityExceeded {
            daq_numbers: overflow_lists,
            items: overflow_items,
        });
    }

    let allocation = DaqAllocation { lists: allocated };
    for (daq_number, odt_number, element_number, entry) in allocation.entries() {
        let first_pid = allocation
            .list(daq_number)
            .map(|l| l.info.first_pid)
            .unwrap_or_default();
        items[entry.index].schedule = Some(DaqSchedule {
            daq_number,
            odt_number,
            element_number,
            pid: first_pid.wrapping_add(odt_number),
        });
    }
    Ok(allocation)
}
