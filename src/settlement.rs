use crate::engine::MatchingEngine;
use crate::error::ExchangeResult;
use crate::event_bus::EventBus;
use crate::events::Event;

/// Runs `body` as one atomic unit of work over the repository and matching
/// engine. Events are buffered and flushed to the bus only if `body`
/// succeeds; on error the repository and engine are restored to the
/// pre-call snapshot and the buffered events are discarded, so a partially
/// matched order that fails mid-settlement leaves no trace.
pub fn run_unit_of_work<R, T, F>(
    repo: &mut R,
    engine: &mut MatchingEngine,
    bus: &EventBus,
    body: F,
) -> ExchangeResult<T>
where
    R: Clone,
    F: FnOnce(&mut R, &mut MatchingEngine, &mut Vec<Event>) -> ExchangeResult<T>,
{
    let repo_snapshot = repo.clone();
    let engine_snapshot = engine.clone();
    let mut events = Vec::new();

    match body(repo, engine, &mut events) {
        Ok(value) => {
            bus.publish_all(&events);
            Ok(value)
        }
        Err(err) => {
            tracing::error!(error = %err, "settlement unit of work rolled back");
            *repo = repo_snapshot;
            *engine = engine_snapshot;
            Err(err)
        }
    }
}
