use super::{NIL_ID, expect_create_rejected};
use crate::{
    ErrorCategory, Result, check,
    check::{
        CONTENT_ALIASES, TEMPLATE_LIST_ALIASES, contains_id, expect_category, expect_contains,
        expect_no_placeholders, id_of, list, resolve,
    },
    ledger::ResourceKind,
    scenario::{Scenario, ScenarioContext},
};
use futures::{FutureExt, future::BoxFuture};
use serde_json::json;

const TEMPLATE_BODY: &str = "# {{title}}\n\n{{body}}";

pub fn scenario() -> Scenario {
    Scenario::new("templates")
        .describe("Create notes from templates with variable substitution")
        .setup(setup)
        .case("list includes the template", listed)
        .case("instantiation substitutes every variable", instantiate)
        .case("instantiating a missing template fails", missing_template)
}

fn setup(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let name = ctx.unique("template");
        let template = ctx
            .create(
                ResourceKind::Template,
                "create_template",
                json!({ "name": name, "content": TEMPLATE_BODY }),
            )
            .await?;
        ctx.set_fixture("template", id_of(&template)?);
        Ok(())
    }
    .boxed()
}

fn listed(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let id = ctx.fixture_str("template")?;
        let payload = ctx.call("list_templates", json!({})).await?;
        let templates = list(&payload, TEMPLATE_LIST_ALIASES)?;
        check!(contains_id(templates, &id), "template {id} not listed");
        Ok(())
    }
    .boxed()
}

fn instantiate(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let id = ctx.fixture_str("template")?;
        let tag = ctx.tag().to_string();
        // Instantiation returns the new note's id only.
        let note = ctx
            .create(
                ResourceKind::Note,
                "instantiate_template",
                json!({
                    "id": id,
                    "variables": { "title": "X", "body": "Y" },
                    "tags": [tag],
                }),
            )
            .await?;
        let note_id = id_of(&note)?;

        let note = ctx.call("get_note", json!({ "id": note_id })).await?;
        let content = resolve(&note, CONTENT_ALIASES)?
            .as_str()
            .unwrap_or_default();
        expect_contains(content, "X")?;
        expect_contains(content, "Y")?;
        expect_no_placeholders(content)
    }
    .boxed()
}

fn missing_template(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let failure = expect_create_rejected(
            ctx,
            ResourceKind::Note,
            "instantiate_template",
            json!({ "id": NIL_ID, "variables": { "title": "X" } }),
            None,
        )
        .await?;
        expect_category(&failure, &[ErrorCategory::NotFound])
    }
    .boxed()
}
