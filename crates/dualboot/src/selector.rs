//! Boot-time bank selection.
//!
//! Runs once per reset, before anything else touches the flash:
//!
//! 1. read the metadata record, rebuilding it from the banks if it is missing
//! 2. commit a pending update
//! 3. count boots of an unconfirmed image and roll back once it has had
//!    [`MAX_BOOT_ATTEMPTS`] chances
//! 4. hand back the entry target of the active bank
use embedded_storage::nor_flash::NorFlash;

use crate::commit::{CommitOutcome, commit_update};
use crate::dispatch::EntryTarget;
use crate::error::BootError;
use crate::flash::BankedFlash;
use crate::layout::Bank;
use crate::log;
use crate::metadata::Metadata;

/// Boots an unconfirmed image gets before the loader falls back.
pub const MAX_BOOT_ATTEMPTS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootDecision {
    pub target: EntryTarget,
    /// Record as persisted before dispatch.
    pub record: Metadata,
    /// The record was missing and rebuilt from the banks.
    pub recovered: bool,
    pub commit: Option<CommitOutcome>,
    /// The active image exhausted its boot attempts and the other bank took over.
    pub rolled_back: bool,
}

pub fn select_boot_target<F: NorFlash>(
    flash: &mut BankedFlash<F>,
) -> Result<BootDecision, BootError> {
    let (mut record, recovered) = match flash.metadata().read()? {
        Some(record) => (record, false),
        None => (recover(flash)?, true),
    };

    let mut commit = None;
    if record.update_pending {
        let (next, outcome) = commit_update(flash, &record)?;
        record = next;
        commit = Some(outcome);
    }

    let mut rolled_back = false;
    if !record.confirmed {
        if record.boot_attempts >= MAX_BOOT_ATTEMPTS {
            let fallback = record.inactive_bank();
            if flash.validator().is_valid(fallback) {
                log::warn!(
                    "bank {:?} never confirmed after {} boots, rolling back to {:?}",
                    record.active_bank,
                    record.boot_attempts,
                    fallback
                );
                record.active_bank = fallback;
                record.confirmed = true;
                record.boot_attempts = 0;
                flash.metadata().write(&record)?;
                rolled_back = true;
            } else {
                log::warn!("bank {:?} unconfirmed but nothing to roll back to", record.active_bank);
            }
        } else {
            record.boot_attempts = record.boot_attempts.saturating_add(1);
            flash.metadata().write(&record)?;
            log::info!(
                "trial boot {} of {} for bank {:?}",
                record.boot_attempts,
                MAX_BOOT_ATTEMPTS,
                record.active_bank
            );
        }
    }

    let target = EntryTarget::for_bank(flash.layout(), record.active_bank);
    log::info!("booting bank {:?} at {:#x}", target.bank(), target.vector_table());
    Ok(BootDecision {
        target,
        record,
        recovered,
        commit,
        rolled_back,
    })
}

/// Probes bank A then bank B and persists a fresh record for the first one
/// that validates.
fn recover<F: NorFlash>(flash: &mut BankedFlash<F>) -> Result<Metadata, BootError> {
    for bank in [Bank::A, Bank::B] {
        if flash.validator().is_valid(bank) {
            log::warn!("metadata missing, recovering onto bank {:?}", bank);
            let record = Metadata::recovered(bank);
            flash.metadata().write(&record)?;
            return Ok(record);
        }
    }
    log::error!("no bootable image in either bank");
    Err(BootError::NoValidBank)
}
