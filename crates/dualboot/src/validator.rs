use embedded_storage::nor_flash::NorFlash;

use crate::error::StorageError;
use crate::flash::SectorFlash;
use crate::layout::{Bank, FlashLayout};
use crate::log;
use crate::metadata::CRC32;

const CRC_CHUNK: usize = 256;

/// First two words of a Cortex-M vector table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootDescriptor {
    pub initial_sp: u32,
    pub entry_point: u32,
}

/// Cheap plausibility checks on the images in the banks.
pub struct BankValidator<'a, F: NorFlash> {
    flash: &'a mut SectorFlash<F>,
    layout: &'a FlashLayout,
}

impl<'a, F: NorFlash> BankValidator<'a, F> {
    pub(crate) fn new(flash: &'a mut SectorFlash<F>, layout: &'a FlashLayout) -> Self {
        Self { flash, layout }
    }

    pub fn descriptor(&mut self, bank: Bank) -> Result<BootDescriptor, StorageError> {
        let start = self.layout.bank_start(bank);
        let initial_sp = self.flash.read_u32(start)?;
        let entry_point = self.flash.read_u32(start.saturating_add(4))?;
        Ok(BootDescriptor {
            initial_sp,
            entry_point,
        })
    }

    /// A bank is valid when its stack pointer lies in RAM (top inclusive) and
    /// its entry point inside the device. Unreadable banks are invalid.
    pub fn is_valid(&mut self, bank: Bank) -> bool {
        let descriptor = match self.descriptor(bank) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                log::warn!("bank {:?} unreadable: {:?}", bank, err.kind());
                return false;
            }
        };
        let valid = self.layout.ram_range().contains(&descriptor.initial_sp)
            && self.layout.flash_range().contains(&descriptor.entry_point);
        if !valid {
            log::warn!(
                "bank {:?} rejected: sp {:#x} entry {:#x}",
                bank,
                descriptor.initial_sp,
                descriptor.entry_point
            );
        }
        valid
    }

    /// Compares the CRC-32 of the first `size` bytes of `bank` with `expected`.
    pub fn image_matches(&mut self, bank: Bank, size: u32, expected: u32) -> bool {
        if size > self.layout.bank_size {
            return false;
        }
        match self.image_crc(bank, size) {
            Ok(crc) => crc == expected,
            Err(err) => {
                log::warn!("bank {:?} crc read failed: {:?}", bank, err.kind());
                false
            }
        }
    }

    fn image_crc(&mut self, bank: Bank, size: u32) -> Result<u32, StorageError> {
        let mut digest = CRC32.digest();
        let mut buffer = [0u8; CRC_CHUNK];
        let mut addr = self.layout.bank_start(bank);
        let mut remaining = usize::try_from(size).unwrap_or(usize::MAX);
        while remaining > 0 {
            let take = remaining.min(CRC_CHUNK);
            let chunk = buffer.get_mut(..take).unwrap_or(&mut []);
            self.flash.read(addr, chunk)?;
            digest.update(chunk);
            remaining = remaining.saturating_sub(take);
            addr = addr.saturating_add(u32::try_from(take).unwrap_or(u32::MAX));
        }
        Ok(digest.finalize())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::mock_flash::{banked_flash, install_image, plausible_image};

    #[test]
    fn erased_bank_is_invalid() {
        let mut flash = banked_flash();
        assert!(!flash.validator().is_valid(Bank::A));
        assert!(!flash.validator().is_valid(Bank::B));
    }

    #[test]
    fn plausible_descriptor_is_valid() {
        let mut flash = banked_flash();
        let start = flash.layout().bank_b_start;
        plausible_image(flash.device(), start);
        assert!(flash.validator().is_valid(Bank::B));
        assert!(!flash.validator().is_valid(Bank::A));
    }

    #[test]
    fn ram_top_and_last_flash_byte_are_accepted() {
        let mut flash = banked_flash();
        let layout = flash.layout().clone();
        install_image(
            flash.device(),
            layout.bank_a_start,
            layout.ram_end,
            layout.flash_base + layout.flash_size - 1,
            &[],
        );
        assert!(flash.validator().is_valid(Bank::A));
    }

    #[test]
    fn entry_one_past_device_end_is_invalid() {
        let mut flash = banked_flash();
        let layout = flash.layout().clone();
        install_image(
            flash.device(),
            layout.bank_a_start,
            0x2000_1000,
            layout.flash_base + layout.flash_size,
            &[],
        );
        assert!(!flash.validator().is_valid(Bank::A));
    }

    #[test]
    fn stack_pointer_outside_ram_is_invalid() {
        let mut flash = banked_flash();
        let layout = flash.layout().clone();
        install_image(
            flash.device(),
            layout.bank_a_start,
            layout.ram_end + 4,
            layout.bank_a_start + 0x101,
            &[],
        );
        assert!(!flash.validator().is_valid(Bank::A));
    }

    #[test]
    fn entry_outside_flash_is_invalid() {
        let mut flash = banked_flash();
        let layout = flash.layout().clone();
        install_image(flash.device(), layout.bank_a_start, 0x2000_1000, 0x0000_0101, &[]);
        assert!(!flash.validator().is_valid(Bank::A));
    }

    #[test]
    fn image_crc_covers_requested_length() {
        let mut flash = banked_flash();
        let start = flash.layout().bank_a_start;
        let image: std::vec::Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        flash.device().poke(start, &image);
        let crc = CRC32.checksum(&image);
        assert!(flash.validator().image_matches(Bank::A, 1000, crc));
        assert!(!flash.validator().image_matches(Bank::A, 999, crc));
        let too_large = flash.layout().bank_size + 1;
        assert!(!flash.validator().image_matches(Bank::A, too_large, crc));
    }
}
