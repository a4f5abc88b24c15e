//! Error taxonomy of the field layer.
//!
//! Every variant describes a misconfigured program or environment. None is
//! retried or defaulted locally; they propagate to the caller with `?`.

use crate::field::types::DeviceId;
use crate::simulation::routing::RouteError;
use crate::simulation::types::Position;

/// Errors raised by message stores, distance caches and execution contexts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    /// A construction or call precondition was violated.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The distance function cannot relate these two kinds of position.
    #[error("device {device}: no distance between {from} and {to}, position kinds are incompatible")]
    TypeMismatch { device: DeviceId, from: Position, to: Position },

    /// A 2-D only primitive received a position of another dimensionality.
    #[error("device {device}: position {position} has {dimensions} dimensions, only 2 are supported")]
    UnsupportedDimension { device: DeviceId, position: Position, dimensions: usize },

    /// A distance target resolved to no live device.
    #[error("device {device}: target {target} does not exist in the environment")]
    UnknownDevice { device: DeviceId, target: String },

    /// A malformed argument, e.g. a coordinate list that is not a pair.
    #[error("device {device}: invalid argument: {reason}")]
    InvalidArgument { device: DeviceId, reason: String },

    /// The underlying distance function failed; nothing was cached.
    #[error("device {device}: distance from {from} to {to} could not be computed: {source}")]
    DistanceComputation {
        device: DeviceId,
        from: Position,
        to: Position,
        #[source]
        source: RouteError,
    },

    /// The environment lacks a capability the caller asked for explicitly.
    #[error("device {device}: environment does not support {capability}")]
    MissingCapability { device: DeviceId, capability: &'static str },
}

/// Convenience alias for `Result<T, FieldError>`.
pub type FieldResult<T> = Result<T, FieldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_dimension_names_device_and_position() {
        let e = FieldError::UnsupportedDimension {
            device: DeviceId(7),
            position: Position::spatial(1.0, 2.0, 3.0),
            dimensions: 3,
        };
        let s = e.to_string();
        assert!(s.contains("D7"));
        assert!(s.contains("(1, 2, 3)"));
    }

    #[test]
    fn type_mismatch_does_not_blame_routing() {
        let e = FieldError::TypeMismatch {
            device: DeviceId(2),
            from: Position::planar(0.0, 0.0),
            to: Position::spatial(1.0, 2.0, 3.0),
        };
        let s = e.to_string();
        assert!(!s.contains("routed"));
        assert!(s.contains("D2"));
        assert!(s.contains("(1, 2, 3)"));
    }

    #[test]
    fn distance_computation_keeps_source() {
        use std::error::Error;
        let e = FieldError::DistanceComputation {
            device: DeviceId(1),
            from: Position::planar(0.0, 0.0),
            to: Position::planar(5.0, 5.0),
            source: RouteError::Unreachable,
        };
        assert!(e.source().is_some());
    }

    #[test]
    fn error_is_std_error() {
        let e: Box<dyn std::error::Error> = Box::new(FieldError::Precondition("negative retention".into()));
        assert!(e.to_string().contains("negative retention"));
    }
}
