use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};
use heapless::String;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

pub const ERROR_LOCATION_FILE_MAX: usize = 96;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorLocation {
    pub file: String<ERROR_LOCATION_FILE_MAX>,
    pub line: u32,
    pub column: u32,
}

impl ErrorLocation {
    #[track_caller]
    pub fn capture() -> Self {
        let loc = core::panic::Location::caller();
        Self::from_parts(loc.file(), loc.line(), loc.column())
    }

    pub fn from_parts(file: &str, line: u32, column: u32) -> Self {
        let mut file_name = String::new();
        for ch in file.chars() {
            if file_name.push(ch).is_err() {
                break;
            }
        }
        Self {
            file: file_name,
            line,
            column,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageErrorKind {
    /// Address or length is not a multiple of the sector or page size.
    Misaligned,
    /// Address range falls outside the device or the target region.
    OutOfBounds,
    /// Data does not fit the region it is written to.
    TooLarge,
    /// The flash device reported a failure.
    DeviceFailed,
    /// The device geometry cannot serve the configured layout.
    UnsupportedGeometry,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("misaligned flash access")]
    Misaligned { location: ErrorLocation },
    #[error("flash access out of bounds")]
    OutOfBounds { location: ErrorLocation },
    #[error("data too large for region")]
    TooLarge { location: ErrorLocation },
    #[error("flash device failure")]
    DeviceFailed { location: ErrorLocation },
    #[error("unsupported flash geometry")]
    UnsupportedGeometry { location: ErrorLocation },
}

impl StorageError {
    #[track_caller]
    pub fn new(kind: StorageErrorKind) -> Self {
        let location = ErrorLocation::capture();
        match kind {
            StorageErrorKind::Misaligned => StorageError::Misaligned { location },
            StorageErrorKind::OutOfBounds => StorageError::OutOfBounds { location },
            StorageErrorKind::TooLarge => StorageError::TooLarge { location },
            StorageErrorKind::DeviceFailed => StorageError::DeviceFailed { location },
            StorageErrorKind::UnsupportedGeometry => {
                StorageError::UnsupportedGeometry { location }
            }
        }
    }

    pub fn kind(&self) -> StorageErrorKind {
        match self {
            StorageError::Misaligned { .. } => StorageErrorKind::Misaligned,
            StorageError::OutOfBounds { .. } => StorageErrorKind::OutOfBounds,
            StorageError::TooLarge { .. } => StorageErrorKind::TooLarge,
            StorageError::DeviceFailed { .. } => StorageErrorKind::DeviceFailed,
            StorageError::UnsupportedGeometry { .. } => StorageErrorKind::UnsupportedGeometry,
        }
    }

    pub fn location(&self) -> &ErrorLocation {
        match self {
            StorageError::Misaligned { location }
            | StorageError::OutOfBounds { location }
            | StorageError::TooLarge { location }
            | StorageError::DeviceFailed { location }
            | StorageError::UnsupportedGeometry { location } => location,
        }
    }
}

#[derive(Error, Debug)]
pub enum BootError {
    #[error("storage error")]
    Storage(#[from] StorageError),
    /// Neither bank holds a plausible image and no metadata survived.
    #[error("no valid firmware bank")]
    NoValidBank,
    /// Dispatch was asked to jump somewhere other than a bank start.
    #[error("unknown entry address {0:#x}")]
    UnknownEntryAddress(u32),
}

#[track_caller]
pub(crate) fn map_flash_error<E: NorFlashError>(error: E) -> StorageError {
    match error.kind() {
        NorFlashErrorKind::NotAligned => StorageError::new(StorageErrorKind::Misaligned),
        NorFlashErrorKind::OutOfBounds => StorageError::new(StorageErrorKind::OutOfBounds),
        NorFlashErrorKind::Other => StorageError::new(StorageErrorKind::DeviceFailed),
        _ => StorageError::new(StorageErrorKind::DeviceFailed),
    }
}
