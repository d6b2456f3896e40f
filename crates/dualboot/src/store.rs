use embedded_storage::nor_flash::NorFlash;

use crate::error::{StorageError, StorageErrorKind};
use crate::flash::SectorFlash;
use crate::layout::{Bank, FlashLayout};
use crate::log;
use crate::metadata::{METADATA_SIZE_BYTES, Metadata};

/// Reads and rewrites the record in the metadata region.
///
/// Writes erase the whole region first, so a power cut between the erase and
/// the program leaves the region empty. [`select_boot_target`](crate::select_boot_target)
/// recovers from that.
pub struct MetadataStore<'a, F: NorFlash> {
    flash: &'a mut SectorFlash<F>,
    layout: &'a FlashLayout,
}

impl<'a, F: NorFlash> MetadataStore<'a, F> {
    pub(crate) fn new(flash: &'a mut SectorFlash<F>, layout: &'a FlashLayout) -> Self {
        Self { flash, layout }
    }

    /// `Ok(None)` means the region holds no valid record.
    pub fn read(&mut self) -> Result<Option<Metadata>, StorageError> {
        let mut bytes = [0u8; METADATA_SIZE_BYTES];
        self.flash.read(self.layout.metadata_start, &mut bytes)?;
        let record = Metadata::decode(&bytes);
        if record.is_none() {
            log::warn!("no valid metadata at {:#x}", self.layout.metadata_start);
        }
        Ok(record)
    }

    pub fn write(&mut self, record: &Metadata) -> Result<(), StorageError> {
        let page = self.layout.geometry.page_size;
        let len = u32::try_from(METADATA_SIZE_BYTES)
            .ok()
            .and_then(|size| size.checked_next_multiple_of(page))
            .ok_or(StorageError::new(StorageErrorKind::TooLarge))?;
        if len > self.layout.metadata_size {
            return Err(StorageError::new(StorageErrorKind::TooLarge));
        }
        self.flash
            .erase(self.layout.metadata_start, self.layout.metadata_size)?;
        self.flash
            .program(self.layout.metadata_start, &record.encode(), len)?;
        log::debug!(
            "metadata written: bank {:?} version {} pending {}",
            record.active_bank,
            record.version,
            record.update_pending
        );
        Ok(())
    }

    /// Writes the record a freshly provisioned device starts from.
    pub fn provision(&mut self) -> Result<Metadata, StorageError> {
        let record = Metadata::provisioned();
        self.write(&record)?;
        Ok(record)
    }

    pub fn active_bank(&mut self) -> Result<Option<Bank>, StorageError> {
        Ok(self.read()?.map(|record| record.active_bank))
    }

    pub fn firmware_version(&mut self) -> Result<Option<u32>, StorageError> {
        Ok(self.read()?.map(|record| record.version))
    }

    /// Marks the running image healthy and stops the boot attempt count.
    ///
    /// Returns `Ok(false)` without touching the flash when the record is
    /// already confirmed or missing.
    pub fn confirm_boot(&mut self) -> Result<bool, StorageError> {
        let Some(mut record) = self.read()? else {
            return Ok(false);
        };
        if record.confirmed && record.boot_attempts == 0 {
            return Ok(false);
        }
        record.confirmed = true;
        record.boot_attempts = 0;
        self.write(&record)?;
        log::info!("image in bank {:?} confirmed", record.active_bank);
        Ok(true)
    }
}
