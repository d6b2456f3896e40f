extern crate std;

use std::cell::Cell;
use std::rc::Rc;
use std::vec::Vec;

use dualboot::{
    Bank, BankedFlash, CommitOutcome, Endpoint, FlashLayout, ImageSink, StorageError,
    SystemControl, UpdateConfig, UpdateOrchestrator, UpdateOutcome,
    UpdateTransport, select_boot_target,
};
use embassy_futures::block_on;
use embassy_sync::mutex::Mutex;
use embedded_storage::nor_flash::{
    ErrorType as FlashErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash, check_erase,
    check_read, check_write,
};
use postcard::{from_bytes_cobs, to_vec_cobs};

use super::*;
use crate::protocol::{Controller, ErrorType, Request, RequestId, Response};

const FLASH_BYTES: usize = 0x40_0000;
const FLASH_BASE: u32 = 0x1000_0000;

struct RamFlash {
    storage: Vec<u8>,
}

impl RamFlash {
    fn new() -> Self {
        Self {
            storage: std::vec![0xFF; FLASH_BYTES],
        }
    }

    fn poke(&mut self, addr: u32, bytes: &[u8]) {
        let start = (addr - FLASH_BASE) as usize;
        self.storage[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl FlashErrorType for RamFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for RamFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.storage[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.storage.len()
    }
}

impl NorFlash for RamFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        self.storage[from as usize..to as usize].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        let start = offset as usize;
        for (cell, byte) in self.storage[start..start + bytes.len()].iter_mut().zip(bytes) {
            if *cell != 0xFF {
                return Err(NorFlashErrorKind::Other);
            }
            *cell = *byte;
        }
        Ok(())
    }
}

struct ImageServer {
    image: Vec<u8>,
    reachable: bool,
}

impl UpdateTransport for ImageServer {
    type Error = StorageError;

    fn disconnect(&mut self) {}

    fn connect(&mut self, _endpoint: &Endpoint) -> bool {
        self.reachable
    }

    fn receive_into(&mut self, sink: &mut dyn ImageSink, max_len: u32) -> Result<u32, StorageError> {
        let limit = self.image.len().min(max_len as usize);
        for chunk in self.image[..limit].chunks(1024) {
            sink.write(chunk)?;
        }
        Ok(limit as u32)
    }
}

#[derive(Clone, Default)]
struct Resets(Rc<Cell<usize>>);

impl SystemControl for Resets {
    fn restart(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

fn image_for(bank_start: u32, len: usize) -> Vec<u8> {
    let mut image = Vec::with_capacity(len);
    image.extend_from_slice(&0x2008_0000u32.to_le_bytes());
    image.extend_from_slice(&(bank_start + 0x1C1).to_le_bytes());
    image.extend((8..len).map(|i| (i % 251) as u8));
    image
}

type Shared = SharedUpdate<RamFlash, ImageServer, Resets>;

fn device(image: Vec<u8>, reachable: bool, resets: &Resets) -> Shared {
    let layout = FlashLayout::RP2350;
    let mut ram = RamFlash::new();
    ram.poke(layout.bank_a_start, &image_for(layout.bank_a_start, 512));
    let mut flash = BankedFlash::new(ram, layout).expect("flash");
    flash.metadata().provision().expect("provision");

    let updater = UpdateOrchestrator::new(
        ImageServer { image, reachable },
        resets.clone(),
        UpdateConfig::new(Endpoint {
            address: [192, 168, 1, 20],
            port: 8080,
        }),
    );
    Mutex::new(UpdateShared {
        flash,
        service: UpdateService::new(updater),
    })
}

fn exchange(shared: &Shared, request: &Request) -> Response {
    let mut frame = to_vec_cobs::<_, 64>(request).expect("encode");
    let mut out = [0u8; 256];
    let wrote = block_on(async {
        let mut guard = shared.lock().await;
        let UpdateShared { flash, service } = &mut *guard;
        service
            .process_message(flash, &mut frame[..], &mut out)
            .expect("process")
    });
    from_bytes_cobs(&mut out[..wrote]).expect("decode")
}

#[test]
fn status_reports_provisioned_record() {
    let resets = Resets::default();
    let shared = device(Vec::new(), true, &resets);
    let mut controller = Controller::new();

    let Response::Status { request_id, status } = exchange(&shared, &controller.status()) else {
        panic!("expected status");
    };
    assert_eq!(request_id.value(), 1);
    assert_eq!(status.active_bank, Some(Bank::A));
    assert_eq!(status.version, Some(0x0001_0000));
    assert!(status.confirmed);
    assert!(!status.update_pending);
    assert!(!status.updating);
}

#[test]
fn requested_update_is_staged_on_next_tick() {
    let resets = Resets::default();
    let b = FlashLayout::RP2350.bank_b_start;
    let shared = device(image_for(b, 10_000), true, &resets);
    let mut controller = Controller::new();

    let reply = exchange(&shared, &controller.start_update(10_000));
    assert!(matches!(reply, Response::Accepted { .. }));
    let busy = exchange(&shared, &controller.start_update(10_000));
    assert!(matches!(
        busy,
        Response::Error {
            error_type: ErrorType::Busy,
            ..
        }
    ));

    let outcome = block_on(update_tick(&shared));
    assert!(matches!(outcome, UpdateOutcome::Staged { bank: Bank::B, size: 10_000, .. }));
    assert_eq!(resets.0.get(), 1);
    assert_eq!(block_on(update_tick(&shared)), UpdateOutcome::Idle);

    let Response::Status { status, .. } = exchange(&shared, &controller.status()) else {
        panic!("expected status");
    };
    assert!(status.update_pending);
    assert_eq!(status.active_bank, Some(Bank::A));
}

#[test]
fn unreachable_server_gives_up_without_restart() {
    let resets = Resets::default();
    let shared = device(Vec::new(), false, &resets);
    let mut controller = Controller::new();
    exchange(&shared, &controller.start_update(4096));

    assert_eq!(
        block_on(update_tick(&shared)),
        UpdateOutcome::Retrying { attempts_left: 2 }
    );
    assert_eq!(
        block_on(update_tick(&shared)),
        UpdateOutcome::Retrying { attempts_left: 1 }
    );
    assert_eq!(block_on(update_tick(&shared)), UpdateOutcome::ConnectFailed);
    assert_eq!(resets.0.get(), 0);
}

#[test]
fn oversized_and_malformed_requests_are_refused() {
    let resets = Resets::default();
    let shared = device(Vec::new(), true, &resets);
    let mut controller = Controller::new();

    let too_big = FlashLayout::RP2350.bank_size + 1;
    let reply = exchange(&shared, &controller.start_update(too_big));
    assert!(matches!(
        reply,
        Response::Error {
            request_id: Some(_),
            error_type: ErrorType::ImageTooLarge,
            ..
        }
    ));

    let mut garbage = [0x05, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
    let mut out = [0u8; 64];
    let wrote = block_on(async {
        let mut guard = shared.lock().await;
        let UpdateShared { flash, service } = &mut *guard;
        service
            .process_message(flash, &mut garbage, &mut out)
            .expect("process")
    });
    let reply: Response = from_bytes_cobs(&mut out[..wrote]).expect("decode");
    assert_eq!(
        reply,
        Response::Error {
            request_id: None,
            error_type: ErrorType::InvalidMessage,
            location: None,
        }
    );
}

#[test]
fn confirm_after_switch_ends_trial() {
    let resets = Resets::default();
    let b = FlashLayout::RP2350.bank_b_start;
    let shared = device(image_for(b, 3000), true, &resets);
    let mut controller = Controller::new();
    exchange(&shared, &controller.start_update(3000));
    block_on(update_tick(&shared));

    block_on(async {
        let mut guard = shared.lock().await;
        let decision = select_boot_target(&mut guard.flash).expect("boot");
        assert_eq!(decision.commit, Some(CommitOutcome::Switched));
        assert_eq!(decision.target.bank(), Bank::B);
    });

    let refused = exchange(&shared, &controller.start_update(3000));
    assert!(matches!(
        refused,
        Response::Error {
            request_id: Some(_),
            error_type: ErrorType::TrialInProgress,
            ..
        }
    ));

    block_on(async {
        let mut guard = shared.lock().await;
        assert!(confirm_running_image(&mut guard.flash).expect("confirm"));
        assert!(!confirm_running_image(&mut guard.flash).expect("confirm again"));
    });
    let accepted = exchange(&shared, &controller.start_update(3000));
    assert!(matches!(accepted, Response::Accepted { .. }));

    let Response::Status { status, .. } = exchange(&shared, &controller.status()) else {
        panic!("expected status");
    };
    assert_eq!(status.active_bank, Some(Bank::B));
    assert!(status.confirmed);
}

struct ScriptedChannel {
    incoming: Vec<Vec<u8>>,
    sent: Vec<Vec<u8>>,
}

impl ControlChannel for ScriptedChannel {
    async fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, Disconnected> {
        if self.incoming.is_empty() {
            return Err(Disconnected {});
        }
        let packet = self.incoming.remove(0);
        buf[..packet.len()].copy_from_slice(&packet);
        Ok(packet.len())
    }

    async fn write_packet(&mut self, data: &[u8]) -> Result<(), Disconnected> {
        self.sent.push(data.to_vec());
        Ok(())
    }
}

#[test]
fn control_loop_answers_frames_split_across_packets() {
    let resets = Resets::default();
    let shared = device(Vec::new(), true, &resets);
    let mut controller = Controller::new();
    let frame = to_vec_cobs::<_, 64>(&controller.confirm_boot()).expect("encode");
    let (head, tail) = frame.split_at(2);

    let mut channel = ScriptedChannel {
        incoming: std::vec![head.to_vec(), tail.to_vec()],
        sent: Vec::new(),
    };
    let mut buf = [0u8; 64];
    let mut assembled: heapless::Vec<u8, 128> = heapless::Vec::new();
    let result = block_on(control_loop::<_, _, _, _, 64, 128, 256>(
        &mut channel,
        &shared,
        &mut buf,
        &mut assembled,
    ));
    assert!(result.is_err());
    assert!(assembled.is_empty());

    assert_eq!(channel.sent.len(), 1);
    let mut reply = channel.sent.remove(0);
    let reply: Response = from_bytes_cobs(&mut reply).expect("decode");
    assert_eq!(
        reply,
        Response::Accepted {
            request_id: RequestId::new(1)
        }
    );
}
