//! Streaming an image into a bank.
use crc::Digest;
use embedded_storage::nor_flash::NorFlash;
use heapless::Vec;

use crate::error::{StorageError, StorageErrorKind};
use crate::flash::SectorFlash;
use crate::layout::{Bank, FlashLayout};
use crate::log;
use crate::metadata::CRC32;

/// Largest sector the writer can buffer.
pub const MAX_SECTOR_SIZE: usize = 4096;

/// Destination for downloaded image bytes.
pub trait ImageSink {
    fn write(&mut self, chunk: &[u8]) -> Result<(), StorageError>;
}

/// Length and CRC-32 of everything written into a bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StagedImage {
    pub bank: Bank,
    pub size: u32,
    pub crc: u32,
}

/// Buffers one sector, then erases and programs it.
pub struct BankWriter<'a, F: NorFlash> {
    flash: &'a mut SectorFlash<F>,
    bank: Bank,
    next_addr: u32,
    end_addr: u32,
    sector_size: usize,
    page_size: u32,
    buffer: Vec<u8, MAX_SECTOR_SIZE>,
    digest: Digest<'static, u32>,
    written: u32,
}

impl<'a, F: NorFlash> BankWriter<'a, F> {
    pub(crate) fn new(
        flash: &'a mut SectorFlash<F>,
        layout: &FlashLayout,
        bank: Bank,
    ) -> Result<Self, StorageError> {
        let geometry = flash.geometry();
        let sector_size = usize::try_from(geometry.sector_size)
            .map_err(|_| StorageError::new(StorageErrorKind::UnsupportedGeometry))?;
        if sector_size > MAX_SECTOR_SIZE {
            return Err(StorageError::new(StorageErrorKind::UnsupportedGeometry));
        }
        let start = layout.bank_start(bank);
        let end_addr = start
            .checked_add(layout.bank_size)
            .ok_or(StorageError::new(StorageErrorKind::OutOfBounds))?;
        Ok(Self {
            flash,
            bank,
            next_addr: start,
            end_addr,
            sector_size,
            page_size: geometry.page_size,
            buffer: Vec::new(),
            digest: CRC32.digest(),
            written: 0,
        })
    }

    pub fn bank(&self) -> Bank {
        self.bank
    }

    /// Bytes accepted so far, including any still buffered.
    pub fn written(&self) -> u32 {
        self.written
    }

    /// Flushes the partially filled last sector and reports what was staged.
    pub fn finish(mut self) -> Result<StagedImage, StorageError> {
        self.flush()?;
        log::info!("staged {} bytes in bank {:?}", self.written, self.bank);
        Ok(StagedImage {
            bank: self.bank,
            size: self.written,
            crc: self.digest.finalize(),
        })
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let sector = u32::try_from(self.sector_size)
            .map_err(|_| StorageError::new(StorageErrorKind::UnsupportedGeometry))?;
        let len = u32::try_from(self.buffer.len())
            .ok()
            .and_then(|len| len.checked_next_multiple_of(self.page_size))
            .ok_or(StorageError::new(StorageErrorKind::TooLarge))?;
        self.flash.erase(self.next_addr, sector)?;
        self.flash.program(self.next_addr, &self.buffer, len)?;
        self.next_addr = self
            .next_addr
            .checked_add(sector)
            .ok_or(StorageError::new(StorageErrorKind::OutOfBounds))?;
        self.buffer.clear();
        Ok(())
    }
}

impl<F: NorFlash> ImageSink for BankWriter<'_, F> {
    fn write(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        let chunk_len =
            u32::try_from(chunk.len()).map_err(|_| StorageError::new(StorageErrorKind::TooLarge))?;
        let capacity = self.end_addr.saturating_sub(self.next_addr);
        let buffered = u32::try_from(self.buffer.len())
            .map_err(|_| StorageError::new(StorageErrorKind::TooLarge))?;
        if chunk_len > capacity.saturating_sub(buffered) {
            log::error!("image overflows bank {:?}", self.bank);
            return Err(StorageError::new(StorageErrorKind::TooLarge));
        }

        let mut rest = chunk;
        while !rest.is_empty() {
            let room = self.sector_size.saturating_sub(self.buffer.len());
            let (head, tail) = rest.split_at(rest.len().min(room));
            self.buffer
                .extend_from_slice(head)
                .map_err(|_| StorageError::new(StorageErrorKind::TooLarge))?;
            if self.buffer.len() == self.sector_size {
                self.flush()?;
            }
            rest = tail;
        }
        self.digest.update(chunk);
        self.written = self.written.saturating_add(chunk_len);
        Ok(())
    }
}
