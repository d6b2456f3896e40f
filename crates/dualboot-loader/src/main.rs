#![no_std]
#![no_main]

use cortex_m::asm;
use defmt::{error, info, warn};
use dualboot::{
    BankedFlash, BootError, CortexMLauncher, EntryTarget, FlashLayout, Launch, select_boot_target,
};
use embassy_rp as hal;
use embassy_rp::block::ImageDef;
use embassy_rp::flash;
use embassy_rp::peripherals;

mod build_constants {
    include!(concat!(env!("OUT_DIR"), "/memory_consts.rs"));
}

use build_constants::FLASH_SIZE;

// Panic handler
use panic_probe as _;
// Defmt Logging
use defmt_rtt as _;

/// Tell the Boot ROM about our application
#[unsafe(link_section = ".start_block")]
#[used]
pub static IMAGE_DEF: ImageDef = hal::block::ImageDef::secure_exe();

type FlashDriver = flash::Flash<'static, peripherals::FLASH, flash::Blocking, FLASH_SIZE>;

#[cortex_m_rt::entry]
fn main() -> ! {
    let p = embassy_rp::init(Default::default());
    let driver: FlashDriver = flash::Flash::new_blocking(p.FLASH);

    let mut flash = match BankedFlash::new(driver, FlashLayout::RP2350) {
        Ok(flash) => flash,
        Err(err) => {
            error!("flash unusable: {:?}", err.kind());
            halt();
        }
    };

    match select_boot_target(&mut flash) {
        Ok(decision) => {
            if decision.recovered {
                warn!("metadata rebuilt from bank {:?}", decision.target.bank());
            }
            if let Some(commit) = decision.commit {
                info!("pending update {:?}", commit);
            }
            info!(
                "jumping to bank {:?} version {:#x}",
                decision.target.bank(),
                decision.record.version
            );
            let _ = flash.release();
            match EntryTarget::resolve(&FlashLayout::RP2350, decision.target.vector_table()) {
                Ok(target) => CortexMLauncher.launch(target),
                Err(_) => {
                    error!("selected target is not a bank start");
                    halt();
                }
            }
        }
        Err(BootError::NoValidBank) => {
            error!("no bootable firmware, waiting for a debugger");
            halt();
        }
        Err(BootError::Storage(err)) => {
            error!("boot selection failed: {:?}", err.kind());
            halt();
        }
        Err(BootError::UnknownEntryAddress(addr)) => {
            error!("refusing to jump to {:#x}", addr);
            halt();
        }
    }
}

fn halt() -> ! {
    loop {
        asm::wfi();
    }
}
