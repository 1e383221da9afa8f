// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Address lists: the system-wide registry of the host's own addresses and the
//! per-identity lists held by associations.
//!
//! A list keeps an explicit current record. For an identity this is the address the
//! association uses as its source or destination. Records are addressed by a
//! [`RecordId`] that stays valid until the record is removed.

use net::Family;
use std::fmt::Display;
use std::net::IpAddr;
use std::time::Instant;

use crate::errors::MobilityError;

/// Kernel interface index. Zero stands for "no interface", e.g. for addresses taken
/// from the host identity configuration.
pub type IfIndex = u32;

/// Verification status of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressStatus {
    Unverified,
    Active,
    Deleted,
}

impl Display for AddressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressStatus::Unverified => write!(f, "unverified"),
            AddressStatus::Active => write!(f, "active"),
            AddressStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// Stable identifier of a record within its list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u64);

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One address of a list
#[derive(Debug, Clone)]
pub struct AddressRecord {
    id: RecordId,
    pub addr: IpAddr,
    pub ifindex: IfIndex,
    pub status: AddressStatus,
    pub preferred: bool,
    pub lifetime: u32,
    pub created: Instant,
}

impl AddressRecord {
    #[must_use]
    pub fn id(&self) -> RecordId {
        self.id
    }
    #[must_use]
    pub fn family(&self) -> Family {
        Family::of(&self.addr)
    }
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AddressStatus::Active
    }
}

/// Which records [`AddressList::remove`] removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveBy {
    /// Every record holding this address, whatever its interface
    Address(IpAddr),
    /// Every record on this interface
    Interface(IfIndex),
}

/// An ordered list of addresses with a current record
#[derive(Debug, Default, Clone)]
pub struct AddressList {
    records: Vec<AddressRecord>,
    current: Option<RecordId>,
    next_id: u64,
}

impl AddressList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an address learnt on interface `ifindex`. If the list already has the same
    /// address on the same interface, that record is returned and nothing changes.
    /// New records are appended as [`AddressStatus::Unverified`]. The first record of
    /// an empty list becomes the current one.
    pub fn add(&mut self, addr: IpAddr, ifindex: IfIndex) -> RecordId {
        if let Some(existing) = self
            .records
            .iter()
            .find(|r| r.addr == addr && r.ifindex == ifindex)
        {
            return existing.id;
        }
        let id = RecordId(self.next_id);
        self.next_id += 1;
        self.records.push(AddressRecord {
            id,
            addr,
            ifindex,
            status: AddressStatus::Unverified,
            preferred: false,
            lifetime: 0,
            created: Instant::now(),
        });
        if self.current.is_none() {
            self.current = Some(id);
        }
        id
    }

    /// Remove records by address or by interface. Returns how many were removed.
    /// If the current record goes, the first remaining record becomes current.
    pub fn remove(&mut self, by: RemoveBy) -> usize {
        let before = self.records.len();
        self.records.retain(|r| match by {
            RemoveBy::Address(addr) => r.addr != addr,
            RemoveBy::Interface(ifindex) => r.ifindex != ifindex,
        });
        if self.current.is_some_and(|id| self.position(id).is_none()) {
            self.current = self.records.first().map(|r| r.id);
        }
        before - self.records.len()
    }

    /// Remove one record. The current record must be replaced first.
    ///
    /// # Errors
    ///
    /// Fails if the record is the current one or is not in the list.
    pub fn remove_entry(&mut self, id: RecordId) -> Result<AddressRecord, MobilityError> {
        if self.current == Some(id) {
            return Err(MobilityError::CurrentRecord(id));
        }
        let pos = self.position(id).ok_or(MobilityError::NoSuchRecord(id))?;
        Ok(self.records.remove(pos))
    }

    /// The interface of the first record holding `addr`
    #[must_use]
    pub fn find(&self, addr: &IpAddr) -> Option<IfIndex> {
        self.records.iter().find(|r| r.addr == *addr).map(|r| r.ifindex)
    }

    /// The first record holding `addr`
    #[must_use]
    pub fn find_record(&self, addr: &IpAddr) -> Option<&AddressRecord> {
        self.records.iter().find(|r| r.addr == *addr)
    }

    fn position(&self, id: RecordId) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&AddressRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut AddressRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    #[must_use]
    pub fn current(&self) -> Option<&AddressRecord> {
        self.current.and_then(|id| self.get(id))
    }

    #[must_use]
    pub fn current_id(&self) -> Option<RecordId> {
        self.current
    }

    /// Mark a record active and restart its lifetime clock
    pub fn make_active(&mut self, id: RecordId) {
        if let Some(record) = self.get_mut(id) {
            record.status = AddressStatus::Active;
            record.created = Instant::now();
        }
    }

    /// Clear the preferred flag of every record
    pub fn clear_preferred(&mut self) {
        self.records.iter_mut().for_each(|r| r.preferred = false);
    }

    /// Mark one record preferred, clearing the flag on all others
    pub fn mark_preferred(&mut self, id: RecordId) {
        self.records.iter_mut().for_each(|r| r.preferred = r.id == id);
    }

    /// The first record flagged preferred
    #[must_use]
    pub fn preferred(&self) -> Option<&AddressRecord> {
        self.records.iter().find(|r| r.preferred)
    }

    /// Rewrite the current record to hold `addr` on `ifindex`, active and preferred,
    /// with a fresh lifetime. An empty list gets a new current record.
    pub fn replace_current(&mut self, addr: IpAddr, ifindex: IfIndex) -> RecordId {
        let id = match self.current {
            Some(id) => id,
            None => self.add(addr, ifindex),
        };
        if let Some(record) = self.get_mut(id) {
            record.addr = addr;
            record.ifindex = ifindex;
            record.lifetime = 0;
        }
        self.make_active(id);
        self.mark_preferred(id);
        id
    }

    pub fn iter(&self) -> impl Iterator<Item = &AddressRecord> {
        self.records.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Display for AddressList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for r in &self.records {
            let mark = if self.current == Some(r.id) { '*' } else { ' ' };
            write!(f, "{mark}({}){} {}", r.ifindex, r.addr, r.status)?;
            if r.preferred {
                write!(f, " preferred")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
