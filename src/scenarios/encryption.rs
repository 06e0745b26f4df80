use super::expect_create_rejected;
use crate::{
    Error, ErrorCategory, Result, check,
    check::{
        KEYSET_LIST_ALIASES, expect_category, expect_mentions, list, resolve,
        tolerate_unavailable,
    },
    ledger::ResourceKind,
    scenario::{Scenario, ScenarioContext},
};
use futures::{FutureExt, future::BoxFuture};
use serde_json::{Value, json};

const PASSPHRASE: &str = "correct horse battery staple";

/// Encryption is optional per deployment. When the server says it is not
/// configured, setup fails as unavailable and every case is tolerated.
pub fn scenario() -> Scenario {
    Scenario::new("encryption")
        .describe("Public-key encryption keysets")
        .setup(setup)
        .case("keyset exposes a public key", public_key)
        .case("short passphrase is rejected", short_passphrase)
        .case("list includes the keyset", listed)
        .case("duplicate keyset name is rejected", duplicate_name)
}

fn setup(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let name = ctx.unique("keyset");
        let keyset = tolerate_unavailable(
            ctx.call(
                "pke_create_keyset",
                json!({ "name": name, "passphrase": PASSPHRASE }),
            )
            .await,
        )?;
        // Keysets are addressed by the caller-chosen name.
        ctx.track(ResourceKind::Keyset, name.clone());
        ctx.set_fixture("keyset", name);
        ctx.set_fixture("created", keyset);
        Ok(())
    }
    .boxed()
}

fn public_key(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let keyset = ctx.fixture("created")?;
        resolve(keyset, &["public_key", "publicKey", "address"])?;
        Ok(())
    }
    .boxed()
}

fn short_passphrase(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let name = ctx.unique("keyset");
        let failure = expect_create_rejected(
            ctx,
            ResourceKind::Keyset,
            "pke_create_keyset",
            json!({ "name": name, "passphrase": "short" }),
            Some(name.as_str()),
        )
        .await?;
        if failure.category == ErrorCategory::Unavailable {
            return Err(Error::Unavailable(failure.message));
        }
        expect_mentions(&failure, &["minimum", "at least", "too short"])?;
        expect_category(
            &failure,
            &[ErrorCategory::Validation, ErrorCategory::BadRequest],
        )
    }
    .boxed()
}

fn listed(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let name = ctx.fixture_str("keyset")?;
        let payload = ctx.call("pke_list_keysets", json!({})).await?;
        let keysets = list(&payload, KEYSET_LIST_ALIASES)?;
        check!(
            keysets
                .iter()
                .any(|keyset| keyset.get("name").and_then(Value::as_str) == Some(name.as_str())),
            "keyset {name} not listed"
        );
        Ok(())
    }
    .boxed()
}

fn duplicate_name(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let name = ctx.fixture_str("keyset")?;
        let failure = ctx
            .call_expect_error(
                "pke_create_keyset",
                json!({ "name": name, "passphrase": PASSPHRASE }),
            )
            .await?;
        expect_category(
            &failure,
            &[ErrorCategory::Conflict, ErrorCategory::Validation],
        )
    }
    .boxed()
}
