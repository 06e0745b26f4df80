//! Built-in scenarios against the knowledge API.

mod backups;
mod collections;
mod concepts;
mod encryption;
mod jobs;
mod links;
mod notes;
mod templates;

use crate::{
    Error, Failure, Result,
    check::id_of,
    ledger::ResourceKind,
    scenario::{Registry, ScenarioContext},
};
use serde_json::Value;

/// An identifier no server will ever have handed out.
pub const NIL_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Every built-in scenario, in run order.
pub fn registry() -> Registry {
    Registry::new()
        .register(notes::scenario())
        .register(collections::scenario())
        .register(links::scenario())
        .register(templates::scenario())
        .register(concepts::scenario())
        .register(jobs::scenario())
        .register(encryption::scenario())
        .register(backups::scenario())
}

/// Expects a create call to be refused.
///
/// If the server accepts it anyway the new record is tracked before the
/// case fails, so teardown still removes it. `known_id` names records whose
/// identifier is chosen by the caller.
async fn expect_create_rejected(
    ctx: &mut ScenarioContext,
    kind: ResourceKind,
    operation: &str,
    arguments: Value,
    known_id: Option<&str>,
) -> Result<Failure> {
    match ctx.call_expect_error(operation, arguments).await {
        Err(Error::UnexpectedSuccess { operation, payload }) => {
            let id = known_id
                .map(str::to_string)
                .or_else(|| id_of(&payload).ok());
            if let Some(id) = id {
                ctx.track(kind, id);
            }
            Err(Error::UnexpectedSuccess { operation, payload })
        }
        other => other,
    }
}
