//! Structured execution errors and source-location translation
//!
//! Failures reported by the solver identify graph nodes by digest. Before
//! they reach the user they are annotated with the build instructions those
//! nodes were generated from, using the definition's source map.

use crate::error::{BridgeError, BridgeResult};
use crate::graph::{Definition, Range, SourceInfo};
use crate::result::{release_all, ResultRef};
use std::fmt;
use std::sync::Mutex;
use tracing::warn;

/// Position of a build instruction in a human-authored source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub info: SourceInfo,
    pub ranges: Vec<Range>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.info.filename)?;
        for (i, range) in self.ranges.iter().enumerate() {
            let sep = if i == 0 { ":" } else { "," };
            if range.start.line == range.end.line {
                write!(f, "{}{}", sep, range.start.line)?;
            } else {
                write!(f, "{}{}-{}", sep, range.start.line, range.end.line)?;
            }
        }
        Ok(())
    }
}

/// Failure of a process that already produced some outputs
///
/// The error owns the partial results until someone takes them over with
/// [`ExecError::take_results`] or releases them with [`ExecError::release`].
/// Whichever happens first empties the slot, so a result is never released
/// twice.
pub struct ExecError {
    cause: Box<BridgeError>,
    results: Mutex<Option<Vec<ResultRef>>>,
}

impl ExecError {
    pub fn new(cause: BridgeError, inputs: Vec<ResultRef>, mounts: Vec<ResultRef>) -> Self {
        let mut results = inputs;
        results.extend(mounts);
        Self {
            cause: Box::new(cause),
            results: Mutex::new(Some(results)),
        }
    }

    pub fn cause(&self) -> &BridgeError {
        &self.cause
    }

    /// Number of partial results still owned by the error
    pub fn owned_results(&self) -> usize {
        self.slot().as_ref().map_or(0, Vec::len)
    }

    /// Transfer ownership of the partial results to the caller
    pub fn take_results(&self) -> Vec<ResultRef> {
        self.slot().take().unwrap_or_default()
    }

    /// Release the partial results if nobody took them over
    pub async fn release(&self) -> BridgeResult<()> {
        let results = self.take_results();
        release_all(results).await
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Vec<ResultRef>>> {
        self.results.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)
    }
}

impl fmt::Debug for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecError")
            .field("cause", &self.cause)
            .field("owned_results", &self.owned_results())
            .finish()
    }
}

impl Drop for ExecError {
    fn drop(&mut self) {
        let owned = self.owned_results();
        if owned > 0 {
            warn!(owned, "execution error dropped while still owning partial results");
        }
    }
}

/// Annotate an error with the source locations of the nodes it names
///
/// Each location is attached as often as the node lists it; locations
/// already present in the chain count towards that, so translating the
/// same error twice is harmless. Errors that name no node,
/// or definitions without a source map, pass through unchanged.
pub fn attach_sources(err: BridgeError, def: &Definition) -> BridgeError {
    if def.source.is_none() {
        return err;
    }

    let digests: Vec<_> = err.vertex_digests().into_iter().cloned().collect();
    let mut err = err;
    for digest in digests {
        let mut wanted: Vec<SourceLocation> = Vec::new();
        for (info, ranges) in def.locations_for(&digest) {
            let location = SourceLocation {
                info: info.clone(),
                ranges: ranges.to_vec(),
            };
            wanted.push(location.clone());
            // a location listed n times is attached n times
            let needed = wanted.iter().filter(|l| **l == location).count();
            let present = err
                .source_locations()
                .into_iter()
                .filter(|l| **l == location)
                .count();
            if present >= needed {
                continue;
            }
            err = BridgeError::WithSource {
                location,
                source: Box::new(err),
            };
        }
    }
    err
}
