use super::{NIL_ID, expect_create_rejected};
use crate::{
    ErrorCategory, Result, check,
    check::{LINK_LIST_ALIASES, contains_id, expect_category, id_of, list},
    ledger::ResourceKind,
    scenario::{Scenario, ScenarioContext},
};
use futures::{FutureExt, future::BoxFuture};
use serde_json::json;

pub fn scenario() -> Scenario {
    Scenario::new("links")
        .describe("Link notes to each other")
        .setup(setup)
        .case("link two notes", create_link)
        .case("links are listed for the source note", listed)
        .case("links are cleaned up before their notes", drain_order)
        .case("linking to a missing note fails", missing_target)
}

fn setup(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let tag = ctx.tag().to_string();
        for (key, content) in [("source", "# Source"), ("target", "# Target")] {
            let note = ctx
                .create(
                    ResourceKind::Note,
                    "create_note",
                    json!({ "content": content, "tags": [tag] }),
                )
                .await?;
            ctx.set_fixture(key, id_of(&note)?);
        }
        Ok(())
    }
    .boxed()
}

fn create_link(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let source = ctx.fixture_str("source")?;
        let target = ctx.fixture_str("target")?;
        let link = ctx
            .create(
                ResourceKind::Link,
                "create_link",
                json!({ "from_id": source, "to_id": target, "kind": "related" }),
            )
            .await?;
        ctx.set_fixture("link", id_of(&link)?);
        Ok(())
    }
    .boxed()
}

fn listed(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let source = ctx.fixture_str("source")?;
        let link = ctx.fixture_str("link")?;
        let payload = ctx.call("get_note_links", json!({ "id": source })).await?;
        let links = list(&payload, LINK_LIST_ALIASES)?;
        check!(contains_id(links, &link), "link {link} not listed for {source}");
        Ok(())
    }
    .boxed()
}

fn drain_order(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let link = ctx.fixture_str("link")?;
        let entries = ctx.ledger().entries();
        let position = |kind: ResourceKind, id: &str| {
            entries
                .iter()
                .position(|entry| entry.kind == kind && entry.id == id)
        };

        let link_at = position(ResourceKind::Link, &link);
        let notes_at = [
            position(ResourceKind::Note, &ctx.fixture_str("source")?),
            position(ResourceKind::Note, &ctx.fixture_str("target")?),
        ];
        check!(link_at.is_some(), "link {link} is not tracked");
        check!(
            notes_at.iter().all(|note| note.is_some() && *note < link_at),
            "link is tracked before its notes"
        );
        Ok(())
    }
    .boxed()
}

fn missing_target(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let source = ctx.fixture_str("source")?;
        let failure = expect_create_rejected(
            ctx,
            ResourceKind::Link,
            "create_link",
            json!({ "from_id": source, "to_id": NIL_ID, "kind": "related" }),
            None,
        )
        .await?;
        expect_category(&failure, &[ErrorCategory::NotFound])
    }
    .boxed()
}
