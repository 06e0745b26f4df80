use crate::{
    ErrorCategory, Result, check,
    check::{JOB_LIST_ALIASES, contains_id, expect_category, id_of, list, resolve},
    ledger::ResourceKind,
    scenario::{Scenario, ScenarioContext},
};
use futures::{FutureExt, future::BoxFuture};
use serde_json::{Value, json};

pub fn scenario() -> Scenario {
    Scenario::new("jobs")
        .describe("Queue background jobs for a note")
        .setup(setup)
        .case("queue a job for a note", queue_job)
        .case("repeat queueing creates distinct jobs", duplicates_allowed)
        .case("deduplicated queueing reuses the pending job", duplicates_merged)
        .case("queue stats report pending work", queue_stats)
        .case("unknown job type is rejected", unknown_type)
}

// Jobs have no delete operation; they go away with their note.
fn setup(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let tag = ctx.tag().to_string();
        let note = ctx
            .create(
                ResourceKind::Note,
                "create_note",
                json!({ "content": "# Queued", "tags": [tag] }),
            )
            .await?;
        ctx.set_fixture("note", id_of(&note)?);
        Ok(())
    }
    .boxed()
}

async fn queue(ctx: &ScenarioContext, job_type: &str, deduplicate: bool) -> Result<Value> {
    let note = ctx.fixture_str("note")?;
    ctx.call(
        "create_job",
        json!({
            "note_id": note,
            "job_type": job_type,
            "deduplicate": deduplicate,
        }),
    )
    .await
}

fn queue_job(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let note = ctx.fixture_str("note")?;
        let deduplicate = ctx.settings().deduplicate_jobs;
        let job = id_of(&queue(ctx, "embedding", deduplicate).await?)?;

        let payload = ctx.call("list_jobs", json!({ "note_id": note })).await?;
        let jobs = list(&payload, JOB_LIST_ALIASES)?;
        check!(contains_id(jobs, &job), "job {job} not listed for note {note}");
        Ok(())
    }
    .boxed()
}

fn duplicates_allowed(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let first = id_of(&queue(ctx, "linking", false).await?)?;
        let second = id_of(&queue(ctx, "linking", false).await?)?;
        check!(first != second, "duplicate job reused id {first}");
        Ok(())
    }
    .boxed()
}

fn duplicates_merged(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let first = id_of(&queue(ctx, "title_generation", true).await?)?;
        let second = id_of(&queue(ctx, "title_generation", true).await?)?;
        check!(first == second, "deduplicated job was queued twice as {first} and {second}");
        Ok(())
    }
    .boxed()
}

fn queue_stats(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let stats = ctx.call("get_queue_stats", json!({})).await?;
        let pending = resolve(&stats, &["pending", "queued", "result.pending"])?;
        check!(pending.is_u64(), "pending count {pending} is not a count");
        Ok(())
    }
    .boxed()
}

fn unknown_type(ctx: &mut ScenarioContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let note = ctx.fixture_str("note")?;
        let failure = ctx
            .call_expect_error(
                "create_job",
                json!({ "note_id": note, "job_type": "not_a_job_type" }),
            )
            .await?;
        expect_category(
            &failure,
            &[ErrorCategory::Validation, ErrorCategory::BadRequest],
        )
    }
    .boxed()
}
