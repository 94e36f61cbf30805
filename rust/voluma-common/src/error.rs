use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn inactive_side(op: impl Into<String>, side: impl Into<String>) -> Error {
        Error(
            ErrorKind::InactiveSide {
                op: op.into(),
                side: side.into(),
            }
            .into(),
        )
    }

    pub fn no_device_support(op: impl Into<String>) -> Error {
        Error(ErrorKind::NoDeviceSupport { op: op.into() }.into())
    }

    pub fn stale_side(op: impl Into<String>, side: impl Into<String>, stamp: u64, newest: u64) -> Error {
        Error(
            ErrorKind::StaleSide {
                op: op.into(),
                side: side.into(),
                stamp,
                newest,
            }
            .into(),
        )
    }

    pub fn direction_mismatch(op: impl Into<String>, direction: impl Into<String>) -> Error {
        Error(
            ErrorKind::DirectionMismatch {
                op: op.into(),
                direction: direction.into(),
            }
            .into(),
        )
    }

    pub fn alloc_failed(bytes: usize, source: std::io::Error) -> Error {
        Error(ErrorKind::AllocFailed { bytes, source }.into())
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("{op}: {side} side of the buffer is not allocated")]
    InactiveSide { op: String, side: String },

    #[error("{op}: device support is not compiled in")]
    NoDeviceSupport { op: String },

    #[error("{op}: {side} side holds an older time stamp than its counterpart ({stamp} < {newest})")]
    StaleSide {
        op: String,
        side: String,
        stamp: u64,
        newest: u64,
    },

    #[error("{op}: copy direction {direction} does not match the buffers' active sides")]
    DirectionMismatch { op: String, direction: String },

    #[error("failed to allocate {bytes} bytes: {source}")]
    AllocFailed {
        bytes: usize,
        source: std::io::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}
