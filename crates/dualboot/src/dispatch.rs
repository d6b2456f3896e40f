//! Handing the core over to an image.
use crate::error::BootError;
use crate::layout::{Bank, FlashLayout};

/// One of the two bank start addresses. Only constructed from the layout, so
/// a launcher can never be pointed anywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EntryTarget {
    bank: Bank,
    vector_table: u32,
}

impl EntryTarget {
    pub(crate) fn for_bank(layout: &FlashLayout, bank: Bank) -> Self {
        Self {
            bank,
            vector_table: layout.bank_start(bank),
        }
    }

    /// Looks `addr` up in the table of bank starts.
    pub fn resolve(layout: &FlashLayout, addr: u32) -> Result<Self, BootError> {
        [Bank::A, Bank::B]
            .into_iter()
            .map(|bank| Self::for_bank(layout, bank))
            .find(|target| target.vector_table == addr)
            .ok_or(BootError::UnknownEntryAddress(addr))
    }

    pub fn bank(&self) -> Bank {
        self.bank
    }

    pub fn vector_table(&self) -> u32 {
        self.vector_table
    }
}

/// Irreversible transfer of control to an image.
pub trait Launch {
    fn launch(&mut self, target: EntryTarget) -> !;
}

/// Relocates the vector table and jumps through it on a Cortex-M core.
#[cfg(feature = "cortex-m")]
pub struct CortexMLauncher;

#[cfg(feature = "cortex-m")]
impl Launch for CortexMLauncher {
    fn launch(&mut self, target: EntryTarget) -> ! {
        use cortex_m::asm;

        cortex_m::interrupt::disable();
        asm::dsb();
        asm::isb();
        // SAFETY: VTOR is written once, with interrupts off, right before the
        // jump. `target` only ever holds a bank start from the layout.
        unsafe {
            (*cortex_m::peripheral::SCB::PTR).vtor.write(target.vector_table);
        }
        asm::dsb();
        asm::isb();
        // SAFETY: the bank passed validation, so its first word is a stack
        // pointer in RAM and its second an entry point in flash.
        unsafe { asm::bootload(target.vector_table as *const u32) }
    }
}
