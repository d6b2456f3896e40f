#![no_std]

#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::arithmetic_side_effects,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]
#![cfg_attr(not(test), warn(clippy::missing_panics_doc))]

//! Dual-bank firmware update core.
//!
//! The medium is split into a loader, a one-sector metadata region and two
//! equal firmware banks. The loader runs [`selector::select_boot_target`] on
//! every reset and hands the result to a [`dispatch::Launch`] implementation.
//! The application stages new images through [`orchestrator::UpdateOrchestrator`].

pub mod commit;
pub mod dispatch;
pub mod error;
pub mod flash;
pub mod layout;
pub mod metadata;
pub mod orchestrator;
pub mod selector;
pub mod store;
pub mod validator;
pub mod writer;

#[cfg(test)]
mod mock_flash;

pub use commit::{CommitOutcome, commit_update};
pub use dispatch::{EntryTarget, Launch};
#[cfg(feature = "cortex-m")]
pub use dispatch::CortexMLauncher;
pub use error::{BootError, ErrorLocation, StorageError, StorageErrorKind};
pub use flash::{BankedFlash, SectorFlash};
pub use layout::{Bank, FlashLayout, Geometry};
pub use metadata::Metadata;
pub use orchestrator::{
    Endpoint, OrchestratorState, RequestError, SystemControl, UpdateConfig, UpdateOrchestrator,
    UpdateOutcome, UpdateTransport,
};
pub use selector::{BootDecision, MAX_BOOT_ATTEMPTS, select_boot_target};
pub use store::MetadataStore;
pub use validator::{BankValidator, BootDescriptor};
pub use writer::{BankWriter, ImageSink, StagedImage};

#[cfg(feature = "defmt")]
pub(crate) use defmt as log;

#[cfg(all(feature = "log", not(feature = "defmt")))]
pub(crate) use logger_crate as log;

#[cfg(not(any(feature = "log", feature = "defmt")))]
pub(crate) mod log {
    macro_rules! info {
        ( $( $x:expr ),* ) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use info;
    macro_rules! debug {
        ( $( $x:expr ),* ) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use debug;
    macro_rules! error {
        ( $( $x:expr ),* ) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use error;
    macro_rules! warner {
        ( $( $x:expr ),* ) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use warner as warn;
}
