//! Switching to a staged image.
use embedded_storage::nor_flash::NorFlash;

use crate::error::StorageError;
use crate::flash::BankedFlash;
use crate::log;
use crate::metadata::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommitOutcome {
    /// The staged image validated and is now active, on trial.
    Switched,
    /// The staged image was rejected; the active bank is unchanged.
    Discarded,
}

/// Resolves a pending update recorded in `record` and persists the result.
///
/// The decision only depends on the contents of the inactive bank, which the
/// metadata write never touches, so running this again after a power cut
/// reaches the same record.
pub fn commit_update<F: NorFlash>(
    flash: &mut BankedFlash<F>,
    record: &Metadata,
) -> Result<(Metadata, CommitOutcome), StorageError> {
    let target = record.inactive_bank();
    let mut validator = flash.validator();
    let mut accepted = validator.is_valid(target);
    if accepted && record.app_size != 0 {
        accepted = validator.image_matches(target, record.app_size, record.app_crc);
        if !accepted {
            log::warn!("staged image in bank {:?} failed crc check", target);
        }
    }

    let mut next = *record;
    next.update_pending = false;
    next.boot_attempts = 0;
    let outcome = if accepted {
        next.active_bank = target;
        next.confirmed = false;
        log::info!("switching to bank {:?}, version {}", target, next.version);
        CommitOutcome::Switched
    } else {
        next.app_size = 0;
        next.app_crc = 0;
        log::warn!("discarding staged image, staying on bank {:?}", record.active_bank);
        CommitOutcome::Discarded
    };
    flash.metadata().write(&next)?;
    Ok((next, outcome))
}
