//! Snapshot output seam.
//!
//! ASCII/binary snapshot I/O is out of scope for the physics core; this
//! module only names the boundary a future I/O layer would implement,
//! so the driver can call out to "whatever writes snapshots" without
//! depending on any particular format.

use crate::error::Result;
use crate::particle::{GasParticle, StarParticle};

/// A destination for periodic simulation snapshots.
///
/// No implementation of this trait lives in this crate; a caller that
/// wants snapshot output supplies its own (writing a particular column
/// format, talking to a plotting process, streaming to disk, or
/// anything else).
pub trait SnapshotSink {
    /// Writes one snapshot at simulation time `t`.
    ///
    /// # Errors
    ///
    /// Implementations may fail for any I/O or format reason, reported
    /// as [`crate::error::Error::IoFormat`] or propagated via
    /// [`crate::error::Error::Other`].
    fn write_snapshot(&mut self, t: f64, gas: &[GasParticle], stars: &[StarParticle]) -> Result<()>;
}

/// A sink that discards every snapshot. Useful in tests and as the
/// default when no output is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl SnapshotSink for NullSink {
    fn write_snapshot(&mut self, _t: f64, _gas: &[GasParticle], _stars: &[StarParticle]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_always_succeeds() {
        let mut sink = NullSink;
        assert!(sink.write_snapshot(0.0, &[], &[]).is_ok());
    }
}
