use dualboot::{Bank, ErrorLocation, StorageErrorKind};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Snapshot of the metadata record as seen by the running application.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceStatus {
    /// `None` when the record is missing or unreadable.
    pub active_bank: Option<Bank>,
    pub version: Option<u32>,
    pub update_pending: bool,
    pub confirmed: bool,
    /// A download has been requested and not yet attempted.
    pub updating: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorType {
    InvalidMessage,
    Busy,
    ImageTooLarge,
    /// The running image is unconfirmed; updates wait for confirmation.
    TrialInProgress,
    Storage(StorageErrorKind),
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Request {
    /// Report the metadata record and updater state.
    Status { request_id: RequestId },
    /// Download an image of `image_len` bytes into the inactive bank.
    StartUpdate { request_id: RequestId, image_len: u32 },
    /// Mark the running image healthy.
    ConfirmBoot { request_id: RequestId },
}

impl Request {
    pub fn request_id(&self) -> RequestId {
        match self {
            Request::Status { request_id }
            | Request::StartUpdate { request_id, .. }
            | Request::ConfirmBoot { request_id } => *request_id,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Response {
    Status {
        request_id: RequestId,
        status: DeviceStatus,
    },
    Accepted { request_id: RequestId },
    Error {
        request_id: Option<RequestId>,
        error_type: ErrorType,
        location: Option<ErrorLocation>,
    },
}

impl Response {
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Response::Status { request_id, .. } => Some(*request_id),
            Response::Accepted { request_id } => Some(*request_id),
            Response::Error { request_id, .. } => *request_id,
        }
    }
}

/// Host side helper that numbers outgoing requests.
pub struct Controller {
    next_request: u64,
}

impl Controller {
    pub fn new() -> Self {
        Controller { next_request: 0 }
    }

    pub fn status(&mut self) -> Request {
        Request::Status {
            request_id: self.next_request_id(),
        }
    }

    pub fn start_update(&mut self, image_len: u32) -> Request {
        Request::StartUpdate {
            request_id: self.next_request_id(),
            image_len,
        }
    }

    pub fn confirm_boot(&mut self) -> Request {
        Request::ConfirmBoot {
            request_id: self.next_request_id(),
        }
    }

    fn next_request_id(&mut self) -> RequestId {
        self.next_request = self.next_request.wrapping_add(1);
        RequestId(self.next_request)
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}
