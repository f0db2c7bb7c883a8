//! Lazily evaluated build requests

use super::Bridge;
use crate::cache::CacheOptionsEntry;
use crate::errdefs::{attach_sources, ExecError};
use crate::error::{BridgeError, BridgeResult};
use crate::graph::Definition;
use crate::policy::SourcePolicy;
use crate::provenance::{capture_provenance, Capture};
use crate::result::{release_all, CachedResultRef, ResultRef};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// A build request as submitted by a frontend
#[derive(Debug, Clone, Default)]
pub struct SolveRequest {
    pub definition: Arc<Definition>,
    pub cache_imports: Vec<CacheOptionsEntry>,
    /// `None` entries are rejected when the request is evaluated
    pub source_policies: Vec<Option<SourcePolicy>>,
}

/// Handle to the result of a build request
///
/// The request is evaluated on the first call to [`ResultProxy::result`].
/// Concurrent callers wait for that evaluation and share its outcome, which
/// is kept until [`ResultProxy::release`]. Canceled evaluations are not
/// kept, so the next caller starts over.
pub struct ResultProxy {
    id: String,
    bridge: Arc<Bridge>,
    req: SolveRequest,
    flight: tokio::sync::Mutex<()>,
    state: Mutex<ProxyState>,
}

#[derive(Default)]
struct ProxyState {
    released: bool,
    outcome: Option<Result<CachedResultRef, Arc<BridgeError>>>,
    /// Partial results rescued from execution errors
    err_results: Vec<ResultRef>,
    provenance: Option<Arc<Capture>>,
}

impl ResultProxy {
    pub(super) fn new(bridge: Arc<Bridge>, req: SolveRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            bridge,
            req,
            flight: tokio::sync::Mutex::new(()),
            state: Mutex::new(ProxyState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn definition(&self) -> &Definition {
        &self.req.definition
    }

    /// Provenance of the successful result, once evaluated
    pub fn provenance(&self) -> Option<Arc<Capture>> {
        self.lock_state().provenance.clone()
    }

    /// Evaluate the request, or return the outcome of an earlier evaluation
    ///
    /// Errors naming a graph node carry the source locations of that node.
    pub async fn result(&self, cancel: &CancellationToken) -> BridgeResult<CachedResultRef> {
        self.evaluate(cancel)
            .await
            .map_err(|e| attach_sources(e, &self.req.definition))
    }

    async fn evaluate(&self, cancel: &CancellationToken) -> BridgeResult<CachedResultRef> {
        let _flight = tokio::select! {
            guard = self.flight.lock() => guard,
            _ = cancel.cancelled() => return Err(BridgeError::Canceled),
        };

        {
            let state = self.lock_state();
            if state.released {
                return Err(BridgeError::Released("accessing released result"));
            }
            match &state.outcome {
                Some(Ok(res)) => return Ok(res.clone()),
                Some(Err(e)) => return Err(BridgeError::Shared(e.clone())),
                None => {}
            }
        }

        let res = self
            .bridge
            .load_result(
                cancel,
                &self.req.definition,
                &self.req.cache_imports,
                &self.req.source_policies,
            )
            .await;

        let partials = match &res {
            Err(e) => e.exec_error().map(ExecError::take_results).unwrap_or_default(),
            Ok(_) => vec![],
        };

        if let Err(e) = &res {
            if cancel.is_cancelled() && e.is_canceled() {
                debug!(id = %self.id, "evaluation canceled");
                self.adopt(partials).await;
                return res;
            }
        }

        let (res, capture) = match res {
            Ok(res) => match capture_provenance(&*res) {
                Ok(capture) => (Ok(res), Some(Arc::new(capture))),
                Err(e) => {
                    debug!(id = %self.id, error = %e, "discarding result without provenance");
                    if let Err(rerr) = res.release().await {
                        warn!(result = %res.id(), error = %rerr, "failed to release result");
                    }
                    (Err(e), None)
                }
            },
            Err(e) => (Err(e), None),
        };

        let stale = {
            let mut state = self.lock_state();
            if state.released {
                Some((partials, res.ok()))
            } else {
                state.err_results.extend(partials);
                state.provenance = capture;
                state.outcome = Some(match res {
                    Ok(res) => Ok(res),
                    Err(e) => Err(Arc::new(e)),
                });
                None
            }
        };

        if let Some((partials, fresh)) = stale {
            if let Err(e) = release_all(partials).await {
                warn!(id = %self.id, error = %e, "failed to release partial results");
            }
            if let Some(fresh) = fresh {
                if let Err(e) = fresh.release().await {
                    warn!(result = %fresh.id(), error = %e, "failed to release result");
                }
            }
            return Err(BridgeError::Released("evaluating released result"));
        }

        match &self.lock_state().outcome {
            Some(Ok(res)) => Ok(res.clone()),
            Some(Err(e)) => Err(BridgeError::Shared(e.clone())),
            None => Err(BridgeError::Internal("evaluation stored no outcome".to_string())),
        }
    }

    /// Take ownership of partial results from a canceled evaluation
    async fn adopt(&self, partials: Vec<ResultRef>) {
        if partials.is_empty() {
            return;
        }
        let stale = {
            let mut state = self.lock_state();
            if state.released {
                Some(partials)
            } else {
                state.err_results.extend(partials);
                None
            }
        };
        if let Some(partials) = stale {
            if let Err(e) = release_all(partials).await {
                warn!(id = %self.id, error = %e, "failed to release partial results");
            }
        }
    }

    /// Release everything the proxy owns
    ///
    /// Partial results are released first, then the memoized result. Later
    /// calls only log a warning. The proxy cannot be evaluated afterwards.
    pub async fn release(&self) -> BridgeResult<()> {
        let (partials, res, again) = {
            let mut state = self.lock_state();
            let again = state.released;
            state.released = true;
            let partials = std::mem::take(&mut state.err_results);
            let res = match &state.outcome {
                Some(Ok(res)) if !again => Some(res.clone()),
                _ => None,
            };
            (partials, res, again)
        };

        if again {
            warn!(id = %self.id, "release of already released result");
        }

        let mut outcome = release_all(partials).await;
        if let Some(res) = res {
            if let Err(e) = res.release().await {
                warn!(result = %res.id(), error = %e, "failed to release result");
                outcome = Err(e);
            }
        }
        outcome
    }

    fn lock_state(&self) -> MutexGuard<'_, ProxyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
