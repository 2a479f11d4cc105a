use std::any::Any;
use std::io;

use thiserror::Error;

use crate::source::types::ContainerFormat;

/// Fatal container-level failure. Nothing is played when parsing returns one of these.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("stream is not seekable: {0}")]
    NotSeekable(#[source] io::Error),
    #[error("stream could not be read: {0}")]
    Unreadable(#[source] io::Error),
    #[error("malformed {format} container: {reason}")]
    MalformedContainer {
        format: ContainerFormat,
        reason: String,
    },
    #[error("canvas {width}x{height} exceeds the {limit} pixel limit")]
    TooLarge { width: u32, height: u32, limit: u64 },
}

impl DecodeError {
    pub(crate) fn malformed(format: ContainerFormat, reason: impl Into<String>) -> Self {
        DecodeError::MalformedContainer {
            format,
            reason: reason.into(),
        }
    }
}

/// A single frame whose pixels could not be produced. Playback recovers from these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("frame {index} failed to decode: {reason}")]
pub struct FrameDecodeError {
    pub index: usize,
    pub reason: String,
}

/// Failure setting up playback for a source.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Frame(#[from] FrameDecodeError),
    #[error("failed to spawn playback thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = DecodeError::malformed(ContainerFormat::Apng, "truncated fdAT");
        assert_eq!(err.to_string(), "malformed APNG container: truncated fdAT");

        let err = FrameDecodeError {
            index: 3,
            reason: "no palette".into(),
        };
        assert_eq!(err.to_string(), "frame 3 failed to decode: no palette");

        let wrapped: PlaybackError = DecodeError::TooLarge {
            width: 10,
            height: 10,
            limit: 50,
        }
        .into();
        assert_eq!(wrapped.to_string(), "canvas 10x10 exceeds the 50 pixel limit");
    }
}
