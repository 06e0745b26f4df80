use crate::{
    Result, check,
    check::{list, resolve, tolerate_unavailable},
    scenario::{Scenario, ScenarioContext},
};
use futures::{FutureExt, future::BoxFuture};
use serde_json::json;

/// Backups are optional per deployment. When the server says they are not
/// configured, the whole scenario is tolerated.
pub fn scenario() -> Scenario {
    Scenario::new("backups")
        .describe("Backup status and listing, where backups are configured")
        .setup(setup)
        .case("status reports a state", status)
        .case("backups can be listed", listed)
}

fn setup(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let status = tolerate_unavailable(ctx.call("backup_status", json!({})).await)?;
        ctx.set_fixture("status", status);
        Ok(())
    }
    .boxed()
}

fn status(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let status = ctx.fixture("status")?;
        check!(status.is_object(), "backup status {status} is not an object");
        resolve(status, &["status", "state", "last_backup"])?;
        Ok(())
    }
    .boxed()
}

fn listed(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let payload = tolerate_unavailable(ctx.call("list_backups", json!({})).await)?;
        list(&payload, &["backups", "items", "data", "result.backups"])?;
        Ok(())
    }
    .boxed()
}
