extern crate std;

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash, check_erase, check_read, check_write,
};

use crate::flash::BankedFlash;
use crate::layout::FlashLayout;

pub(crate) const MOCK_BASE: u32 = 0x1000_0000;

const READ_SIZE: usize = 1;
const WRITE_SIZE: usize = 4;
const ERASE_SIZE: usize = 4096;

/// In-memory NOR flash: erase sets bytes to `0xFF`, program only succeeds on
/// erased bytes.
pub(crate) struct MockFlash {
    pub(crate) storage: std::vec::Vec<u8>,
    pub(crate) erase_calls: usize,
    pub(crate) write_calls: usize,
    /// Once this many writes have succeeded every further write fails.
    pub(crate) fail_writes_after: Option<usize>,
    pub(crate) fail_reads: bool,
}

impl MockFlash {
    pub(crate) fn new(bytes: usize) -> Self {
        Self {
            storage: std::vec![0xFF; bytes],
            erase_calls: 0,
            write_calls: 0,
            fail_writes_after: None,
            fail_reads: false,
        }
    }

    pub(crate) fn slice(&self, addr: u32, len: usize) -> &[u8] {
        let start = (addr - MOCK_BASE) as usize;
        &self.storage[start..start + len]
    }

    pub(crate) fn poke(&mut self, addr: u32, bytes: &[u8]) {
        let start = (addr - MOCK_BASE) as usize;
        self.storage[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl ErrorType for MockFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MockFlash {
    const READ_SIZE: usize = READ_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        if self.fail_reads {
            return Err(NorFlashErrorKind::Other);
        }
        let start = offset as usize;
        let end = start + bytes.len();
        bytes.copy_from_slice(&self.storage[start..end]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.storage.len()
    }
}

impl NorFlash for MockFlash {
    const WRITE_SIZE: usize = WRITE_SIZE;
    const ERASE_SIZE: usize = ERASE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        self.erase_calls += 1;
        for byte in &mut self.storage[from as usize..to as usize] {
            *byte = 0xFF;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        if let Some(limit) = self.fail_writes_after {
            if self.write_calls >= limit {
                return Err(NorFlashErrorKind::Other);
            }
        }
        self.write_calls += 1;
        let start = offset as usize;
        for (idx, &value) in bytes.iter().enumerate() {
            let slot = &mut self.storage[start + idx];
            if *slot != 0xFF {
                return Err(NorFlashErrorKind::Other);
            }
            *slot = value;
        }
        Ok(())
    }
}

/// Full-size device with the RP2350 layout.
pub(crate) fn banked_flash() -> BankedFlash<MockFlash> {
    let layout = FlashLayout::RP2350;
    let flash = MockFlash::new(layout.flash_size as usize);
    BankedFlash::new(flash, layout).expect("banked flash")
}

/// Writes a boot descriptor plus `body` at `bank_start`, bypassing the
/// primitives.
pub(crate) fn install_image(flash: &mut MockFlash, bank_start: u32, sp: u32, entry: u32, body: &[u8]) {
    let mut image = std::vec::Vec::new();
    image.extend_from_slice(&sp.to_le_bytes());
    image.extend_from_slice(&entry.to_le_bytes());
    image.extend_from_slice(body);
    flash.poke(bank_start, &image);
}

/// Boot descriptor that passes validation for an image in `bank_start`.
pub(crate) fn plausible_image(flash: &mut MockFlash, bank_start: u32) {
    install_image(flash, bank_start, 0x2008_0000, bank_start + 0x101, &[0xA5; 64]);
}
