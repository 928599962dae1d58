//! Errors surfaced by the switch controller.

use crate::channel_list::FormatError;
use crate::relay::Relay;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("malformed channel list: {0}")]
    Format(#[from] FormatError),

    #[error("transport failure: {0}")]
    Io(#[from] io::Error),

    #[error("relay {relay} is outside {lines} lines / taps 0..={taps}")]
    RelayOutOfRange { relay: Relay, lines: u32, taps: u32 },

    #[error("Unknown line {0:?}")]
    UnknownLine(String),

    #[error("Unknown tap {0:?}")]
    UnknownTap(String),

    #[error("unexpected identification {0:?}")]
    BadIdentification(String),

    #[error("Unknown model {0}. Are you using the right driver for your instrument?")]
    WrongModel(String),

    #[error("Incompatible firmware {found}. You need at least {required}")]
    IncompatibleFirmware { found: String, required: String },
}

pub type Result<T> = std::result::Result<T, SwitchError>;
