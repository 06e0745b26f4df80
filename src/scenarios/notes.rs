use super::{NIL_ID, expect_create_rejected};
use crate::{
    ErrorCategory, Result, check,
    check::{
        CONTENT_ALIASES, NOTE_LIST_ALIASES, contains_id, expect_category, expect_eq,
        expect_mentions, id_of, list, resolve,
    },
    ledger::ResourceKind,
    scenario::{Scenario, ScenarioContext},
};
use futures::{FutureExt, future::BoxFuture};
use serde_json::json;

pub fn scenario() -> Scenario {
    Scenario::new("notes")
        .describe("Create, read, list and delete notes")
        .setup(setup)
        .case("created notes get distinct ids", distinct_ids)
        .case("get returns the stored content", get_round_trips)
        .case("list by tag finds created notes", list_by_tag)
        .case("deleting a missing note reports not found", delete_missing)
        .case("empty content is rejected", empty_content)
        .case("explicit delete removes the note", explicit_delete)
}

fn setup(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let tag = ctx.tag().to_string();
        for (key, content) in [("note_a", "# A"), ("note_b", "# B")] {
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

fn distinct_ids(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let a = ctx.fixture_str("note_a")?;
        let b = ctx.fixture_str("note_b")?;
        check!(!a.is_empty(), "note id is empty");
        check!(a != b, "both notes got id {a}");
        Ok(())
    }
    .boxed()
}

fn get_round_trips(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let id = ctx.fixture_str("note_a")?;
        let note = ctx.call("get_note", json!({ "id": id })).await?;
        expect_eq(resolve(&note, CONTENT_ALIASES)?, &json!("# A"), "content")
    }
    .boxed()
}

fn list_by_tag(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let tag = ctx.tag().to_string();
        let payload = ctx
            .call("list_notes", json!({ "tags": [tag], "limit": 50 }))
            .await?;
        let notes = list(&payload, NOTE_LIST_ALIASES)?;
        for key in ["note_a", "note_b"] {
            let id = ctx.fixture_str(key)?;
            check!(contains_id(notes, &id), "note {id} missing from tag listing");
        }
        Ok(())
    }
    .boxed()
}

fn delete_missing(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let failure = ctx
            .call_expect_error("delete_note", json!({ "id": NIL_ID }))
            .await?;
        expect_mentions(&failure, &["not found", "error"])?;
        expect_category(&failure, &[ErrorCategory::NotFound])
    }
    .boxed()
}

fn empty_content(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let tag = ctx.tag().to_string();
        let failure = expect_create_rejected(
            ctx,
            ResourceKind::Note,
            "create_note",
            json!({ "content": "", "tags": [tag] }),
            None,
        )
        .await?;
        expect_category(
            &failure,
            &[ErrorCategory::Validation, ErrorCategory::BadRequest],
        )
    }
    .boxed()
}

fn explicit_delete(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let tag = ctx.tag().to_string();
        let note = ctx
            .create(
                ResourceKind::Note,
                "create_note",
                json!({ "content": "# C", "tags": [tag] }),
            )
            .await?;
        let id = id_of(&note)?;
        let tracked = ctx.ledger().len();

        ctx.delete(ResourceKind::Note, &id).await?;
        check!(
            ctx.ledger().len() == tracked - 1,
            "deleted note is still tracked"
        );

        let failure = ctx
            .call_expect_error("get_note", json!({ "id": id }))
            .await?;
        expect_category(&failure, &[ErrorCategory::NotFound])
    }
    .boxed()
}
