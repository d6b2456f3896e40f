use dualboot::{SystemControl, UpdateOutcome, UpdateTransport};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Timer;
use embedded_storage::nor_flash::NorFlash;
use heapless::Vec;

use crate::log;
use crate::service::UpdateShared;

pub const UPDATE_POLL_MS: u64 = 200;

pub type SharedUpdate<F, T, S> = Mutex<CriticalSectionRawMutex, UpdateShared<F, T, S>>;

pub struct Disconnected {}

/// Packet link carrying COBS framed control messages.
#[allow(async_fn_in_trait)]
pub trait ControlChannel {
    async fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, Disconnected>;
    async fn write_packet(&mut self, data: &[u8]) -> Result<(), Disconnected>;
}

/// One pass of the updater: runs a pending download while holding the lock.
pub async fn update_tick<F, T, S>(shared: &SharedUpdate<F, T, S>) -> UpdateOutcome
where
    F: NorFlash,
    T: UpdateTransport,
    S: SystemControl,
{
    let mut guard = shared.lock().await;
    let UpdateShared { flash, service } = &mut *guard;
    match service.poll(flash) {
        Ok(outcome) => {
            if !matches!(outcome, UpdateOutcome::Idle) {
                log::info!("update poll: {:?}", outcome);
            }
            outcome
        }
        Err(error) => {
            log::error!("update failed on storage: {:?}", error.kind());
            UpdateOutcome::Idle
        }
    }
}

pub async fn update_loop<F, T, S>(shared: &'static SharedUpdate<F, T, S>) -> !
where
    F: NorFlash,
    T: UpdateTransport,
    S: SystemControl,
{
    loop {
        update_tick(shared).await;
        Timer::after_millis(UPDATE_POLL_MS).await;
    }
}

pub async fn control_loop<C, F, T, S, const BUF_SIZE: usize, const IN_CAP: usize, const OUT_CAP: usize>(
    channel: &mut C,
    shared: &SharedUpdate<F, T, S>,
    buf: &mut [u8; BUF_SIZE],
    frame: &mut Vec<u8, IN_CAP>,
) -> Result<(), Disconnected>
where
    C: ControlChannel,
    F: NorFlash,
    T: UpdateTransport,
    S: SystemControl,
{
    loop {
        let n = channel.read_packet(buf).await?;
        let Some(data) = buf.get(..n) else {
            continue;
        };
        for &byte in data {
            if frame.push(byte).is_err() {
                frame.clear();
                continue;
            }

            if byte == 0 {
                let mut out_buf = [0u8; OUT_CAP];
                let wrote = {
                    let mut guard = shared.lock().await;
                    let UpdateShared { flash, service } = &mut *guard;
                    match service.process_message(flash, frame.as_mut_slice(), out_buf.as_mut_slice())
                    {
                        Ok(wrote) => wrote,
                        Err(_) => {
                            log::warn!("control reply did not fit");
                            0
                        }
                    }
                };
                frame.clear();

                if wrote > 0 {
                    if let Some(bytes) = out_buf.get(..wrote) {
                        channel.write_packet(bytes).await?;
                    }
                }
            }
        }
    }
}
