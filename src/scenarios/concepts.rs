use super::{NIL_ID, expect_create_rejected};
use crate::{
    ErrorCategory, Result, check,
    check::{expect_category, expect_eq, id_of, resolve},
    ledger::ResourceKind,
    scenario::{Scenario, ScenarioContext},
};
use futures::{FutureExt, future::BoxFuture};
use serde_json::json;

pub fn scenario() -> Scenario {
    Scenario::new("concepts")
        .describe("SKOS concept schemes and their concepts")
        .setup(setup)
        .case("create a concept in the scheme", create_concept)
        .case("concepts are cleaned up before their scheme", drain_order)
        .case("duplicate scheme notation is rejected", duplicate_notation)
        .case("concept in a missing scheme fails", missing_scheme)
}

fn setup(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let notation = ctx.unique("CT").to_uppercase();
        let scheme = ctx
            .create(
                ResourceKind::ConceptScheme,
                "create_concept_scheme",
                json!({ "notation": notation, "title": "Conformance scheme" }),
            )
            .await?;
        ctx.set_fixture("scheme", id_of(&scheme)?);
        ctx.set_fixture("notation", notation);
        Ok(())
    }
    .boxed()
}

fn create_concept(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let scheme = ctx.fixture_str("scheme")?;
        let concept = ctx
            .create(
                ResourceKind::Concept,
                "create_concept",
                json!({ "scheme_id": scheme, "pref_label": "Conformance" }),
            )
            .await?;
        let id = id_of(&concept)?;
        ctx.set_fixture("concept", id.clone());

        let concept = ctx.call("get_concept", json!({ "id": id })).await?;
        let label = resolve(&concept, &["pref_label", "prefLabel", "label"])?;
        expect_eq(label, &json!("Conformance"), "pref_label")
    }
    .boxed()
}

fn drain_order(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let scheme = ctx.fixture_str("scheme")?;
        let concept = ctx.fixture_str("concept")?;
        let entries = ctx.ledger().entries();
        let scheme_at = entries.iter().position(|e| e.id == scheme);
        let concept_at = entries.iter().position(|e| e.id == concept);
        check!(
            scheme_at.is_some() && scheme_at < concept_at,
            "concept would be deleted after its scheme"
        );
        Ok(())
    }
    .boxed()
}

fn duplicate_notation(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let notation = ctx.fixture_str("notation")?;
        let failure = expect_create_rejected(
            ctx,
            ResourceKind::ConceptScheme,
            "create_concept_scheme",
            json!({ "notation": notation, "title": "Duplicate" }),
            None,
        )
        .await?;
        expect_category(
            &failure,
            &[
                ErrorCategory::Conflict,
                ErrorCategory::Validation,
                ErrorCategory::BadRequest,
            ],
        )
    }
    .boxed()
}

fn missing_scheme(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let failure = expect_create_rejected(
            ctx,
            ResourceKind::Concept,
            "create_concept",
            json!({ "scheme_id": NIL_ID, "pref_label": "Orphan" }),
            None,
        )
        .await?;
        expect_category(&failure, &[ErrorCategory::NotFound])
    }
    .boxed()
}
