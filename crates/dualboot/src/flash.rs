//! Erase/program primitives over an `embedded-storage` NOR flash.
use embedded_storage::nor_flash::NorFlash;

use crate::error::{StorageError, StorageErrorKind, map_flash_error};
use crate::layout::{Bank, ERASED_BYTE, FlashLayout, Geometry};
use crate::log;
use crate::store::MetadataStore;
use crate::validator::BankValidator;
use crate::writer::BankWriter;

/// Largest program page the primitives can pad in place.
pub const MAX_PAGE_SIZE: usize = 256;

/// Sector/page granular access to the medium.
///
/// Every erase and program runs inside a critical section so nothing executes
/// from flash while it is busy. Nothing is read back after programming.
pub struct SectorFlash<F: NorFlash> {
    flash: F,
    base: u32,
    geometry: Geometry,
}

impl<F: NorFlash> SectorFlash<F> {
    pub fn new(flash: F, base: u32, geometry: Geometry) -> Result<Self, StorageError> {
        let sector = usize::try_from(geometry.sector_size)
            .map_err(|_| StorageError::new(StorageErrorKind::UnsupportedGeometry))?;
        let page = usize::try_from(geometry.page_size)
            .map_err(|_| StorageError::new(StorageErrorKind::UnsupportedGeometry))?;
        if page == 0 || page > MAX_PAGE_SIZE || sector % page != 0 {
            return Err(StorageError::new(StorageErrorKind::UnsupportedGeometry));
        }
        if sector % F::ERASE_SIZE != 0 || page % F::WRITE_SIZE != 0 || page % F::READ_SIZE != 0 {
            return Err(StorageError::new(StorageErrorKind::UnsupportedGeometry));
        }
        Ok(Self {
            flash,
            base,
            geometry,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Erases `len` bytes at `addr`. Both must be whole sectors.
    pub fn erase(&mut self, addr: u32, len: u32) -> Result<(), StorageError> {
        let sector = self.geometry.sector_size;
        if addr % sector != 0 || len % sector != 0 {
            return Err(StorageError::new(StorageErrorKind::Misaligned));
        }
        let from = self.offset(addr, len)?;
        let to = from
            .checked_add(len)
            .ok_or(StorageError::new(StorageErrorKind::OutOfBounds))?;
        let flash = &mut self.flash;
        critical_section::with(|_| flash.erase(from, to).map_err(map_flash_error))
    }

    /// Programs `data` at `addr`, padding with the erased value up to `len`.
    ///
    /// `addr` must be page aligned and `len` a whole number of pages. The
    /// target range must already be erased.
    pub fn program(&mut self, addr: u32, data: &[u8], len: u32) -> Result<(), StorageError> {
        let page = self.geometry.page_size;
        if addr % page != 0 || len % page != 0 {
            return Err(StorageError::new(StorageErrorKind::Misaligned));
        }
        let len_bytes =
            usize::try_from(len).map_err(|_| StorageError::new(StorageErrorKind::TooLarge))?;
        if data.len() > len_bytes {
            return Err(StorageError::new(StorageErrorKind::TooLarge));
        }
        let start = self.offset(addr, len)?;
        let page_len =
            usize::try_from(page).map_err(|_| StorageError::new(StorageErrorKind::Misaligned))?;
        let pages = len / page;
        let flash = &mut self.flash;

        critical_section::with(|_| -> Result<(), StorageError> {
            let mut buffer = [ERASED_BYTE; MAX_PAGE_SIZE];
            let page_buf = buffer
                .get_mut(..page_len)
                .ok_or(StorageError::new(StorageErrorKind::UnsupportedGeometry))?;
            let mut remaining = data;
            let mut offset = start;
            for _ in 0..pages {
                let take = remaining.len().min(page_len);
                let (chunk, rest) = remaining.split_at(take);
                page_buf.fill(ERASED_BYTE);
                page_buf
                    .get_mut(..take)
                    .ok_or(StorageError::new(StorageErrorKind::TooLarge))?
                    .copy_from_slice(chunk);
                flash.write(offset, page_buf).map_err(map_flash_error)?;
                remaining = rest;
                offset = offset
                    .checked_add(page)
                    .ok_or(StorageError::new(StorageErrorKind::OutOfBounds))?;
            }
            Ok(())
        })
    }

    pub fn read(&mut self, addr: u32, out: &mut [u8]) -> Result<(), StorageError> {
        let len =
            u32::try_from(out.len()).map_err(|_| StorageError::new(StorageErrorKind::TooLarge))?;
        let offset = self.offset(addr, len)?;
        self.flash.read(offset, out).map_err(map_flash_error)
    }

    pub fn read_u32(&mut self, addr: u32) -> Result<u32, StorageError> {
        let mut bytes = [0u8; 4];
        self.read(addr, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn release(self) -> F {
        self.flash
    }

    fn offset(&self, addr: u32, len: u32) -> Result<u32, StorageError> {
        let offset = addr
            .checked_sub(self.base)
            .ok_or(StorageError::new(StorageErrorKind::OutOfBounds))?;
        let end = offset
            .checked_add(len)
            .ok_or(StorageError::new(StorageErrorKind::OutOfBounds))?;
        let end =
            usize::try_from(end).map_err(|_| StorageError::new(StorageErrorKind::OutOfBounds))?;
        if end > self.flash.capacity() {
            return Err(StorageError::new(StorageErrorKind::OutOfBounds));
        }
        Ok(offset)
    }
}

/// Owner of the whole medium.
///
/// The metadata store, validator and bank writer are views that borrow this
/// handle mutably, so at most one of them touches the flash at a time.
pub struct BankedFlash<F: NorFlash> {
    flash: SectorFlash<F>,
    layout: FlashLayout,
}

impl<F: NorFlash> BankedFlash<F> {
    pub fn new(flash: F, layout: FlashLayout) -> Result<Self, StorageError> {
        if !layout.is_well_formed() {
            log::error!("flash layout is not well formed");
            return Err(StorageError::new(StorageErrorKind::UnsupportedGeometry));
        }
        let size = usize::try_from(layout.flash_size)
            .map_err(|_| StorageError::new(StorageErrorKind::UnsupportedGeometry))?;
        if flash.capacity() < size {
            log::error!("flash capacity {} below layout size {}", flash.capacity(), size);
            return Err(StorageError::new(StorageErrorKind::UnsupportedGeometry));
        }
        let flash = SectorFlash::new(flash, layout.flash_base, layout.geometry)?;
        Ok(Self { flash, layout })
    }

    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    pub fn metadata(&mut self) -> MetadataStore<'_, F> {
        MetadataStore::new(&mut self.flash, &self.layout)
    }

    pub fn validator(&mut self) -> BankValidator<'_, F> {
        BankValidator::new(&mut self.flash, &self.layout)
    }

    /// Starts streaming a new image into `bank`.
    pub fn bank_writer(&mut self, bank: Bank) -> Result<BankWriter<'_, F>, StorageError> {
        BankWriter::new(&mut self.flash, &self.layout, bank)
    }

    pub fn sectors(&mut self) -> &mut SectorFlash<F> {
        &mut self.flash
    }

    pub fn release(self) -> F {
        self.flash.release()
    }
}

#[cfg(test)]
impl<F: NorFlash> BankedFlash<F> {
    pub(crate) fn device(&mut self) -> &mut F {
        &mut self.flash.flash
    }
}
