//! Top-level error type for board operations.

use thiserror::Error;

use crate::device::DeviceError;
use crate::hw_trait::HwError;
use crate::regmap::RegisterMapError;
use crate::topology::TopologyError;

/// Coarse classification of a failure, for callers that only need to know
/// whether to fix their arguments, the wiring, or a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Register, length, channel, page or value out of range; nothing was sent.
    InvalidParameter,
    /// Bus-level write or read error, including short reads.
    TransportFailure,
    /// Device answered with the wrong byte count or data that fails its check.
    ProtocolMismatch,
    /// A routed device was accessed while its mux pointed elsewhere.
    StaleRoute,
    /// Register-map or topology text could not be read or parsed.
    ParseFailure,
}

impl HwError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HwError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            HwError::ProtocolMismatch { .. }
            | HwError::Checksum { .. }
            | HwError::UnexpectedValue(_) => ErrorKind::ProtocolMismatch,
            HwError::StaleRoute { .. } => ErrorKind::StaleRoute,
            // Short reads land here too.
            HwError::I2c(_)
            | HwError::Io(_)
            | HwError::Timeout
            | HwError::Other(_) => ErrorKind::TransportFailure,
        }
    }
}

/// Board operation errors.
#[derive(Error, Debug)]
pub enum Error {
    /// A single register access failed
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Failure outside any particular device, e.g. building an endpoint
    #[error(transparent)]
    Hw(#[from] HwError),

    /// Register map could not be loaded
    #[error(transparent)]
    RegisterMap(#[from] RegisterMapError),

    /// Board topology could not be loaded or is inconsistent
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// A multi-step sequence stopped at its first failing step
    #[error("{sequence} aborted at step {step}/{steps} ({step_name})")]
    SequenceAborted {
        sequence: &'static str,
        step: usize,
        steps: usize,
        step_name: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Programming a register map stopped at the first failing line
    #[error("{file}:{line}: programming write {payload:02x?} failed")]
    Program {
        file: String,
        line: usize,
        payload: Vec<u8>,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Classify this error, looking through sequence and programming wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Device(e) => e.kind(),
            Error::Hw(e) => e.kind(),
            Error::RegisterMap(_) => ErrorKind::ParseFailure,
            Error::Topology(e) => e.kind(),
            Error::SequenceAborted { source, .. } | Error::Program { source, .. } => source.kind(),
        }
    }
}

/// Convenient Result type for board operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw_trait::I2cError;

    #[test]
    fn short_read_is_a_transport_failure() {
        let e = HwError::I2c(I2cError::ShortRead {
            addr: 0x18,
            expected: 2,
            received: 1,
        });
        assert_eq!(e.kind(), ErrorKind::TransportFailure);
    }

    #[test]
    fn sequence_wrapper_keeps_inner_kind() {
        let inner = Error::Hw(HwError::InvalidParameter("page 9".into()));
        let e = Error::SequenceAborted {
            sequence: "power off",
            step: 1,
            steps: 5,
            step_name: "write protect",
            source: Box::new(inner),
        };
        assert_eq!(e.kind(), ErrorKind::InvalidParameter);
        assert_eq!(
            e.to_string(),
            "power off aborted at step 1/5 (write protect)"
        );
    }
}
