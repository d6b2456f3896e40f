//! The persistent update record.
use crc::{CRC_32_ISO_HDLC, Crc};

use crate::layout::Bank;

pub const METADATA_MAGIC: u32 = 0xB007_B007;
pub const METADATA_SIZE_BYTES: usize = 24;
/// Version written by [`Metadata::provisioned`], 1.0.0 packed as `0x00MMmmpp`.
pub const PROVISIONED_VERSION: u32 = 0x0001_0000;

pub(crate) static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

// Layout: magic, active bank, pending, boot attempts, confirmed, version,
// app size, app crc32, record crc32. Little endian.
const MAGIC: core::ops::Range<usize> = 0..4;
const ACTIVE_BANK: usize = 4;
const UPDATE_PENDING: usize = 5;
const BOOT_ATTEMPTS: usize = 6;
const CONFIRMED: usize = 7;
const VERSION: core::ops::Range<usize> = 8..12;
const APP_SIZE: core::ops::Range<usize> = 12..16;
const APP_CRC: core::ops::Range<usize> = 16..20;
const RECORD_CRC: core::ops::Range<usize> = 20..24;
const CRC_COVERED: core::ops::Range<usize> = 0..20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Metadata {
    pub active_bank: Bank,
    pub version: u32,
    /// Length of the last staged image, 0 when unknown.
    pub app_size: u32,
    pub app_crc: u32,
    pub update_pending: bool,
    /// Boots of an image that has not been confirmed yet.
    pub boot_attempts: u8,
    pub confirmed: bool,
}

impl Metadata {
    /// Record written when a device is provisioned with an image in bank A.
    pub const fn provisioned() -> Self {
        Self {
            version: PROVISIONED_VERSION,
            ..Self::recovered(Bank::A)
        }
    }

    /// Record rebuilt from scratch after the metadata region was found empty
    /// or corrupt and `bank` was the first bank that validated.
    pub const fn recovered(bank: Bank) -> Self {
        Self {
            active_bank: bank,
            version: 0,
            app_size: 0,
            app_crc: 0,
            update_pending: false,
            boot_attempts: 0,
            confirmed: true,
        }
    }

    pub fn inactive_bank(&self) -> Bank {
        self.active_bank.other()
    }

    pub fn encode(&self) -> [u8; METADATA_SIZE_BYTES] {
        let mut bytes = [0u8; METADATA_SIZE_BYTES];
        put_u32(&mut bytes, MAGIC, METADATA_MAGIC);
        put_u8(&mut bytes, ACTIVE_BANK, self.active_bank.to_byte());
        put_u8(&mut bytes, UPDATE_PENDING, u8::from(self.update_pending));
        put_u8(&mut bytes, BOOT_ATTEMPTS, self.boot_attempts);
        put_u8(&mut bytes, CONFIRMED, u8::from(self.confirmed));
        put_u32(&mut bytes, VERSION, self.version);
        put_u32(&mut bytes, APP_SIZE, self.app_size);
        put_u32(&mut bytes, APP_CRC, self.app_crc);
        let record_crc = CRC32.checksum(bytes.get(CRC_COVERED).unwrap_or(&[]));
        put_u32(&mut bytes, RECORD_CRC, record_crc);
        bytes
    }

    /// Returns `None` unless the magic, the record checksum and every
    /// enumerated field are intact.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if get_u32(bytes, MAGIC)? != METADATA_MAGIC {
            return None;
        }
        let record_crc = get_u32(bytes, RECORD_CRC)?;
        if CRC32.checksum(bytes.get(CRC_COVERED)?) != record_crc {
            return None;
        }
        Some(Self {
            active_bank: Bank::from_byte(*bytes.get(ACTIVE_BANK)?)?,
            update_pending: get_bool(bytes, UPDATE_PENDING)?,
            boot_attempts: *bytes.get(BOOT_ATTEMPTS)?,
            confirmed: get_bool(bytes, CONFIRMED)?,
            version: get_u32(bytes, VERSION)?,
            app_size: get_u32(bytes, APP_SIZE)?,
            app_crc: get_u32(bytes, APP_CRC)?,
        })
    }
}

fn put_u32(bytes: &mut [u8], range: core::ops::Range<usize>, value: u32) {
    if let Some(slot) = bytes.get_mut(range) {
        slot.copy_from_slice(&value.to_le_bytes());
    }
}

fn put_u8(bytes: &mut [u8], index: usize, value: u8) {
    if let Some(slot) = bytes.get_mut(index) {
        *slot = value;
    }
}

fn get_u32(bytes: &[u8], range: core::ops::Range<usize>) -> Option<u32> {
    let chunk = bytes.get(range)?.try_into().ok()?;
    Some(u32::from_le_bytes(chunk))
}

fn get_bool(bytes: &[u8], index: usize) -> Option<bool> {
    match bytes.get(index)? {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}
