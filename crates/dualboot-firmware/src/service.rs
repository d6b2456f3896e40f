use dualboot::{
    BankedFlash, ErrorLocation, RequestError, StorageError, SystemControl, UpdateOrchestrator,
    UpdateOutcome, UpdateTransport,
};
use embedded_storage::nor_flash::NorFlash;
use postcard::from_bytes_cobs;
use thiserror_no_std::Error;

use crate::log;
use crate::protocol::{DeviceStatus, ErrorType, Request, RequestId, Response};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("postcard encoding failed")]
    Postcard(#[from] postcard::Error),
    #[error("storage error")]
    Storage(#[from] StorageError),
}

/// Everything the control and updater tasks share: the one flash handle and
/// the update state machine that writes through it.
pub struct UpdateShared<F: NorFlash, T, S> {
    pub flash: BankedFlash<F>,
    pub service: UpdateService<T, S>,
}

pub struct UpdateService<T, S> {
    updater: UpdateOrchestrator<T, S>,
}

impl<T: UpdateTransport, S: SystemControl> UpdateService<T, S> {
    pub fn new(updater: UpdateOrchestrator<T, S>) -> Self {
        Self { updater }
    }

    pub fn updater(&mut self) -> &mut UpdateOrchestrator<T, S> {
        &mut self.updater
    }

    pub fn status<F: NorFlash>(
        &self,
        flash: &mut BankedFlash<F>,
    ) -> Result<DeviceStatus, StorageError> {
        let record = flash.metadata().read()?;
        Ok(DeviceStatus {
            active_bank: record.map(|record| record.active_bank),
            version: record.map(|record| record.version),
            update_pending: record.is_some_and(|record| record.update_pending),
            confirmed: record.is_some_and(|record| record.confirmed),
            updating: !matches!(
                self.updater.state(),
                dualboot::OrchestratorState::Listening
            ),
        })
    }

    /// Runs a requested download, if any.
    pub fn poll<F: NorFlash>(
        &mut self,
        flash: &mut BankedFlash<F>,
    ) -> Result<UpdateOutcome, StorageError> {
        self.updater.poll(flash)
    }

    /// Decodes one COBS frame from `in_buff` and writes the encoded reply to
    /// `out_buff`, returning its length.
    pub fn process_message<F: NorFlash>(
        &mut self,
        flash: &mut BankedFlash<F>,
        in_buff: &mut [u8],
        out_buff: &mut [u8],
    ) -> Result<usize, ServiceError> {
        let request: Request = match from_bytes_cobs(in_buff) {
            Ok(request) => request,
            Err(_) => {
                log::warn!("dropping undecodable control frame");
                return write_error(None, ErrorType::InvalidMessage, None, out_buff);
            }
        };
        let request_id = request.request_id();

        match request {
            Request::Status { request_id } => match self.status(flash) {
                Ok(status) => write_response(&Response::Status { request_id, status }, out_buff),
                Err(error) => write_storage_error(request_id, &error, out_buff),
            },
            Request::StartUpdate { image_len, .. } => {
                match self.updater.request_update(flash, image_len) {
                    Ok(()) => write_response(&Response::Accepted { request_id }, out_buff),
                    Err(RequestError::Busy) => {
                        write_error(Some(request_id), ErrorType::Busy, None, out_buff)
                    }
                    Err(RequestError::TooLarge) => {
                        write_error(Some(request_id), ErrorType::ImageTooLarge, None, out_buff)
                    }
                    Err(RequestError::TrialInProgress) => {
                        write_error(Some(request_id), ErrorType::TrialInProgress, None, out_buff)
                    }
                    Err(RequestError::Storage(kind)) => {
                        write_error(Some(request_id), ErrorType::Storage(kind), None, out_buff)
                    }
                }
            }
            Request::ConfirmBoot { .. } => match flash.metadata().confirm_boot() {
                Ok(_) => write_response(&Response::Accepted { request_id }, out_buff),
                Err(error) => write_storage_error(request_id, &error, out_buff),
            },
        }
    }
}

/// Declares the running image healthy so the loader stops counting trial boots.
pub fn confirm_running_image<F: NorFlash>(
    flash: &mut BankedFlash<F>,
) -> Result<bool, StorageError> {
    let changed = flash.metadata().confirm_boot()?;
    if changed {
        log::info!("running image confirmed");
    }
    Ok(changed)
}

fn write_response(response: &Response, out_buff: &mut [u8]) -> Result<usize, ServiceError> {
    let wrote = postcard::to_slice_cobs(response, out_buff)?;
    Ok(wrote.len())
}

fn write_storage_error(
    request_id: RequestId,
    error: &StorageError,
    out_buff: &mut [u8],
) -> Result<usize, ServiceError> {
    log::error!("storage error {:?}", error.kind());
    write_error(
        Some(request_id),
        ErrorType::Storage(error.kind()),
        Some(error.location().clone()),
        out_buff,
    )
}

fn write_error(
    request_id: Option<RequestId>,
    error_type: ErrorType,
    location: Option<ErrorLocation>,
    out_buff: &mut [u8],
) -> Result<usize, ServiceError> {
    write_response(
        &Response::Error {
            request_id,
            error_type,
            location,
        },
        out_buff,
    )
}
