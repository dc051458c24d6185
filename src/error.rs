use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while loading world, molecule or container descriptions.
#[derive(Debug, Error)]
pub enum WorldError {
    /// The description file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// Path of the unreadable file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The description file is not valid JSON or lacks required fields.
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        /// Path of the malformed file.
        path: PathBuf,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
    /// A link references a sphere index outside the molecule's sphere list.
    #[error("link [{a}, {b}] is out of range for a molecule of {count} spheres")]
    LinkOutOfRange {
        /// First sphere index of the link.
        a: usize,
        /// Second sphere index of the link.
        b: usize,
        /// Number of spheres the molecule declares.
        count: usize,
    },
    /// A container description is missing the extent field its type requires.
    #[error("container of type \"{kind}\" is missing its \"{field}\" field")]
    MissingField {
        /// Declared container type.
        kind: String,
        /// Name of the missing field.
        field: &'static str,
    },
}

/// Failures raised by the distributed collision exchange.
#[cfg(feature = "distributed")]
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Transport-level failure on a peer connection.
    #[error("cluster transport failed: {0}")]
    Io(#[from] std::io::Error),
    /// A message could not be encoded or decoded.
    #[error("cluster message codec failed: {0}")]
    Codec(#[from] bincode::Error),
    /// The cluster was described as having no processes at all.
    #[error("world size {world_size} is invalid, a cluster needs at least one process")]
    InvalidWorldSize {
        /// The rejected process count.
        world_size: usize,
    },
    /// A peer returned a record buffer of the wrong length.
    #[error("peer {rank} returned {got} floats, expected {expected}")]
    BufferMismatch {
        /// Rank of the offending peer.
        rank: usize,
        /// Length of the buffer that was sent out.
        expected: usize,
        /// Length of the buffer that came back.
        got: usize,
    },
    /// A peer sent a message that does not belong to the current phase.
    #[error("unexpected message during {phase}")]
    UnexpectedMessage {
        /// Phase the exchange was in when the message arrived.
        phase: &'static str,
    },
}
