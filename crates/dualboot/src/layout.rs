//! Fixed memory map of the device.
//!
//! All addresses are absolute execute-in-place addresses. [`SectorFlash`](crate::SectorFlash)
//! translates them into device offsets by subtracting [`FlashLayout::flash_base`].

use core::ops::{Range, RangeInclusive};

use serde::{Deserialize, Serialize};

/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// Banks must start on this boundary.
pub const BANK_ALIGNMENT: u32 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bank {
    A,
    B,
}

impl Bank {
    pub const fn other(self) -> Bank {
        match self {
            Bank::A => Bank::B,
            Bank::B => Bank::A,
        }
    }

    pub(crate) const fn to_byte(self) -> u8 {
        match self {
            Bank::A => 0,
            Bank::B => 1,
        }
    }

    pub(crate) const fn from_byte(byte: u8) -> Option<Bank> {
        match byte {
            0 => Some(Bank::A),
            1 => Some(Bank::B),
            _ => None,
        }
    }
}

/// Erase and program granularity of the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub sector_size: u32,
    pub page_size: u32,
}

impl Geometry {
    pub const RP2350: Geometry = Geometry {
        sector_size: 4096,
        page_size: 256,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashLayout {
    pub geometry: Geometry,
    /// Start of the execute-in-place window.
    pub flash_base: u32,
    pub flash_size: u32,
    pub metadata_start: u32,
    pub metadata_size: u32,
    pub bank_a_start: u32,
    pub bank_b_start: u32,
    pub bank_size: u32,
    /// Accepted initial stack pointers, inclusive.
    pub ram_start: u32,
    pub ram_end: u32,
}

impl FlashLayout {
    /// 4 MiB QSPI flash with a 252 KiB loader, one metadata sector and two
    /// 1920 KiB banks.
    pub const RP2350: FlashLayout = FlashLayout {
        geometry: Geometry::RP2350,
        flash_base: 0x1000_0000,
        flash_size: 0x0040_0000,
        metadata_start: 0x1003_F000,
        metadata_size: 0x1000,
        bank_a_start: 0x1004_0000,
        bank_b_start: 0x1022_0000,
        bank_size: 0x001E_0000,
        ram_start: 0x2000_0000,
        ram_end: 0x2008_2000,
    };

    pub const fn bank_start(&self, bank: Bank) -> u32 {
        match bank {
            Bank::A => self.bank_a_start,
            Bank::B => self.bank_b_start,
        }
    }

    /// Addresses backed by the device; the end is exclusive.
    pub fn flash_range(&self) -> Range<u32> {
        self.flash_base..self.flash_base.saturating_add(self.flash_size)
    }

    pub fn ram_range(&self) -> RangeInclusive<u32> {
        self.ram_start..=self.ram_end
    }

    /// Checks alignment and that the metadata region and both banks are
    /// disjoint and inside the device.
    pub const fn is_well_formed(&self) -> bool {
        let sector = self.geometry.sector_size;
        let page = self.geometry.page_size;
        if sector == 0 || page == 0 || sector % page != 0 {
            return false;
        }
        if self.metadata_size == 0 || self.metadata_size % sector != 0 {
            return false;
        }
        if self.metadata_start % sector != 0 || self.bank_size % sector != 0 {
            return false;
        }
        if self.bank_a_start % BANK_ALIGNMENT != 0 || self.bank_b_start % BANK_ALIGNMENT != 0 {
            return false;
        }
        let Some(flash_end) = self.flash_base.checked_add(self.flash_size) else {
            return false;
        };
        let Some(metadata_end) = self.metadata_start.checked_add(self.metadata_size) else {
            return false;
        };
        let Some(bank_a_end) = self.bank_a_start.checked_add(self.bank_size) else {
            return false;
        };
        let Some(bank_b_end) = self.bank_b_start.checked_add(self.bank_size) else {
            return false;
        };
        if self.metadata_start < self.flash_base || metadata_end > flash_end {
            return false;
        }
        if self.bank_a_start < self.flash_base || bank_a_end > flash_end {
            return false;
        }
        if self.bank_b_start < self.flash_base || bank_b_end > flash_end {
            return false;
        }
        !overlaps(self.metadata_start, metadata_end, self.bank_a_start, bank_a_end)
            && !overlaps(self.metadata_start, metadata_end, self.bank_b_start, bank_b_end)
            && !overlaps(self.bank_a_start, bank_a_end, self.bank_b_start, bank_b_end)
    }
}

const fn overlaps(a_start: u32, a_end: u32, b_start: u32, b_end: u32) -> bool {
    a_start < b_end && b_start < a_end
}

const _: () = assert!(FlashLayout::RP2350.is_well_formed());
