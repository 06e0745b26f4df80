use super::NIL_ID;
use crate::{
    ErrorCategory, Result, check,
    check::{
        COLLECTION_LIST_ALIASES, NOTE_LIST_ALIASES, contains_id, expect_category, expect_eq,
        expect_mentions, id_of, list, str_field,
    },
    ledger::ResourceKind,
    scenario::{Scenario, ScenarioContext},
};
use futures::{FutureExt, future::BoxFuture};
use serde_json::json;

pub fn scenario() -> Scenario {
    Scenario::new("collections")
        .describe("Group notes into collections")
        .setup(setup)
        .case("list includes the collection", listed)
        .case("get returns the collection name", get_by_id)
        .case("notes can be moved into the collection", move_note)
        .case("deleting a missing collection fails", delete_missing)
}

fn setup(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let name = ctx.unique("collection");
        let collection = ctx
            .create(
                ResourceKind::Collection,
                "create_collection",
                json!({ "name": name, "description": "conformance run" }),
            )
            .await?;
        ctx.set_fixture("collection", id_of(&collection)?);
        ctx.set_fixture("collection_name", name);

        let tag = ctx.tag().to_string();
        let note = ctx
            .create(
                ResourceKind::Note,
                "create_note",
                json!({ "content": "# Filed", "tags": [tag] }),
            )
            .await?;
        ctx.set_fixture("note", id_of(&note)?);
        Ok(())
    }
    .boxed()
}

fn listed(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let id = ctx.fixture_str("collection")?;
        let payload = ctx.call("list_collections", json!({})).await?;
        let collections = list(&payload, COLLECTION_LIST_ALIASES)?;
        check!(contains_id(collections, &id), "collection {id} not listed");
        Ok(())
    }
    .boxed()
}

fn get_by_id(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let id = ctx.fixture_str("collection")?;
        let name = ctx.fixture_str("collection_name")?;
        let collection = ctx.call("get_collection", json!({ "id": id })).await?;
        expect_eq(&json!(str_field(&collection, "name")?), &json!(name), "name")
    }
    .boxed()
}

fn move_note(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let collection = ctx.fixture_str("collection")?;
        let note = ctx.fixture_str("note")?;
        ctx.call(
            "move_note_to_collection",
            json!({ "note_id": note, "collection_id": collection }),
        )
        .await?;

        let payload = ctx
            .call("get_collection_notes", json!({ "id": collection }))
            .await?;
        let notes = list(&payload, NOTE_LIST_ALIASES)?;
        check!(contains_id(notes, &note), "note {note} not in collection");
        Ok(())
    }
    .boxed()
}

fn delete_missing(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let failure = ctx
            .call_expect_error("delete_collection", json!({ "id": NIL_ID }))
            .await?;
        expect_mentions(&failure, &["not found", "error"])?;
        expect_category(&failure, &[ErrorCategory::NotFound])
    }
    .boxed()
}
