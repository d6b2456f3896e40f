//! Application-side download of a new image into the inactive bank.
use embedded_storage::nor_flash::NorFlash;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageErrorKind};
use crate::flash::BankedFlash;
use crate::layout::Bank;
use crate::log;
use crate::metadata::Metadata;
use crate::writer::{ImageSink, StagedImage};

/// Connect attempts per update request.
pub const DEFAULT_CONNECT_ATTEMPTS: u8 = 3;

/// IPv4 address and port of the image server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Endpoint {
    pub address: [u8; 4],
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateConfig {
    pub endpoint: Endpoint,
    pub connect_attempts: u8,
}

impl UpdateConfig {
    pub const fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
        }
    }
}

/// Byte source for a new image.
///
/// `receive_into` returns the number of bytes handed to `sink`. Exactly
/// `max_len` means the transfer completed; fewer means it was cut short; an
/// error means it failed outright.
pub trait UpdateTransport {
    type Error: core::fmt::Debug;

    fn disconnect(&mut self);
    fn connect(&mut self, endpoint: &Endpoint) -> bool;
    fn receive_into(&mut self, sink: &mut dyn ImageSink, max_len: u32) -> Result<u32, Self::Error>;
}

pub trait SystemControl {
    /// Resets the device. Implementations normally do not return.
    fn restart(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OrchestratorState {
    Listening,
    Updating { image_len: u32, attempts_left: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateOutcome {
    /// Nothing requested.
    Idle,
    /// Could not reach the server; another attempt follows on the next poll.
    Retrying { attempts_left: u8 },
    /// Could not reach the server and the attempts are used up.
    ConnectFailed,
    /// Image staged and marked pending; the device was restarted.
    Staged { bank: Bank, version: u32, size: u32 },
    /// Transfer ended early or failed; metadata untouched, device restarted.
    Aborted { received: u32, expected: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    Busy,
    TooLarge,
    /// The running image is unconfirmed.
    TrialInProgress,
    Storage(StorageErrorKind),
}

pub struct UpdateOrchestrator<T, S> {
    transport: T,
    system: S,
    config: UpdateConfig,
    state: OrchestratorState,
}

impl<T: UpdateTransport, S: SystemControl> UpdateOrchestrator<T, S> {
    pub fn new(transport: T, system: S, config: UpdateConfig) -> Self {
        Self {
            transport,
            system,
            config,
            state: OrchestratorState::Listening,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Queues a download of `image_len` bytes for the next [`poll`](Self::poll).
    ///
    /// Refused while the running image is on trial: the inactive bank then
    /// holds the only fallback and must not be overwritten.
    pub fn request_update<F: NorFlash>(
        &mut self,
        flash: &mut BankedFlash<F>,
        image_len: u32,
    ) -> Result<(), RequestError> {
        if !matches!(self.state, OrchestratorState::Listening) {
            return Err(RequestError::Busy);
        }
        if image_len == 0 || image_len > flash.layout().bank_size {
            return Err(RequestError::TooLarge);
        }
        match flash.metadata().read() {
            Ok(Some(record)) if !record.confirmed => {
                log::warn!(
                    "update refused, bank {:?} still on trial",
                    record.active_bank
                );
                return Err(RequestError::TrialInProgress);
            }
            Ok(_) => {}
            Err(err) => return Err(RequestError::Storage(err.kind())),
        }
        self.state = OrchestratorState::Updating {
            image_len,
            attempts_left: self.config.connect_attempts.max(1),
        };
        log::info!("update of {} bytes requested", image_len);
        Ok(())
    }

    /// Drives a requested update. Blocks for the whole transfer.
    pub fn poll<F: NorFlash>(
        &mut self,
        flash: &mut BankedFlash<F>,
    ) -> Result<UpdateOutcome, StorageError> {
        let OrchestratorState::Updating {
            image_len,
            attempts_left,
        } = self.state
        else {
            return Ok(UpdateOutcome::Idle);
        };

        self.transport.disconnect();
        if !self.transport.connect(&self.config.endpoint) {
            let attempts_left = attempts_left.saturating_sub(1);
            if attempts_left == 0 {
                log::error!("giving up on update, server unreachable");
                self.state = OrchestratorState::Listening;
                return Ok(UpdateOutcome::ConnectFailed);
            }
            log::warn!("connect failed, {} attempts left", attempts_left);
            self.state = OrchestratorState::Updating {
                image_len,
                attempts_left,
            };
            return Ok(UpdateOutcome::Retrying { attempts_left });
        }
        self.state = OrchestratorState::Listening;

        let target = match flash.metadata().read() {
            Ok(current) => current
                .map(|record| record.inactive_bank())
                .unwrap_or(Bank::B),
            Err(err) => {
                log::error!("metadata unreadable: {:?}", err.kind());
                self.transport.disconnect();
                self.system.restart();
                return Ok(UpdateOutcome::Aborted {
                    received: 0,
                    expected: image_len,
                });
            }
        };
        log::info!("downloading {} bytes into bank {:?}", image_len, target);

        let (received, staged) = self.download(flash, target, image_len);
        self.transport.disconnect();

        let outcome = match staged {
            Some(staged) if received == image_len && staged.size == image_len => {
                mark_pending(flash, staged).map(|record| UpdateOutcome::Staged {
                    bank: staged.bank,
                    version: record.version,
                    size: staged.size,
                })
            }
            _ => {
                log::warn!("transfer ended at {} of {} bytes", received, image_len);
                Ok(UpdateOutcome::Aborted {
                    received,
                    expected: image_len,
                })
            }
        };
        self.system.restart();
        outcome
    }

    fn download<F: NorFlash>(
        &mut self,
        flash: &mut BankedFlash<F>,
        target: Bank,
        image_len: u32,
    ) -> (u32, Option<StagedImage>) {
        let mut writer = match flash.bank_writer(target) {
            Ok(writer) => writer,
            Err(err) => {
                log::error!("bank writer unavailable: {:?}", err.kind());
                return (0, None);
            }
        };
        let received = match self.transport.receive_into(&mut writer, image_len) {
            Ok(received) => received,
            Err(_) => {
                log::error!("transfer failed after {} bytes", writer.written());
                return (writer.written(), None);
            }
        };
        match writer.finish() {
            Ok(staged) => (received, Some(staged)),
            Err(err) => {
                log::error!("final sector write failed: {:?}", err.kind());
                (received, None)
            }
        }
    }
}

/// Records a fully received image as pending, starting from a default record
/// when the region is unreadable.
fn mark_pending<F: NorFlash>(
    flash: &mut BankedFlash<F>,
    staged: StagedImage,
) -> Result<Metadata, StorageError> {
    let mut record = flash
        .metadata()
        .read()?
        .unwrap_or(Metadata::recovered(staged.bank.other()));
    record.update_pending = true;
    record.version = record.version.wrapping_add(1);
    record.app_size = staged.size;
    record.app_crc = staged.crc;
    flash.metadata().write(&record)?;
    log::info!("version {} pending in bank {:?}", record.version, staged.bank);
    Ok(record)
}
