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

//! Application side of the dual-bank updater: the control protocol, the
//! service answering it and the async loops that drive both.

pub mod protocol;
#[cfg(feature = "cortex-m")]
pub mod restart;
pub mod service;
pub mod update_io;

#[cfg(test)]
mod test;

pub use service::{ServiceError, UpdateService, UpdateShared, confirm_running_image};
pub use update_io::{ControlChannel, Disconnected, SharedUpdate, control_loop, update_loop, update_tick};

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
    macro_rules! error {
        ( $( $x:expr ),* ) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use error;
    macro_rules! warner {
        ( $( $x:expr ),* ) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use warner as warn;
}
