use crate::{Error, Result, store::Store};
use rmcp::{
    RoleServer,
    handler::server::{
        ServerHandler,
        tool::{Parameters, ToolCallContext, ToolRouter},
    },
    model::{
        CallToolRequestParam, CallToolResult, Content, Implementation, ListToolsResult,
        PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    tool, tool_router,
};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, sync::Arc};

type McpResult<T = (), E = rmcp::ErrorData> = core::result::Result<T, E>;

/// Job types the queue accepts.
pub const JOB_TYPES: &[&str] = &[
    "ai_revision",
    "embedding",
    "linking",
    "title_generation",
    "concept_tagging",
];

#[derive(Clone)]
pub struct Server {
    store: Arc<Store>,
    tool_router: ToolRouter<Self>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct ById {
    #[schemars(description = "Identifier of the record")]
    id: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct CreateNote {
    #[schemars(description = "Markdown body of the note")]
    content: String,
    tags: Option<Vec<String>>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct ListNotes {
    #[schemars(description = "Only notes carrying every one of these tags")]
    tags: Option<Vec<String>>,
    limit: Option<usize>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct CreateCollection {
    name: String,
    description: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct MoveNoteToCollection {
    note_id: String,
    collection_id: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct CreateLink {
    from_id: String,
    to_id: String,
    #[schemars(description = "Relationship kind, defaults to `related`")]
    kind: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct CreateTemplate {
    name: String,
    #[schemars(description = "Body with `{{variable}}` placeholders")]
    content: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct InstantiateTemplate {
    id: String,
    variables: Option<BTreeMap<String, Value>>,
    tags: Option<Vec<String>>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct CreateConceptScheme {
    #[schemars(description = "Short unique code for the scheme")]
    notation: String,
    title: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct CreateConcept {
    scheme_id: String,
    pref_label: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct CreateJob {
    note_id: String,
    job_type: String,
    #[schemars(description = "Reuse a pending job of the same type for the same note")]
    deduplicate: Option<bool>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct ListJobs {
    note_id: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct CreateKeyset {
    name: String,
    passphrase: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct ByName {
    name: String,
}

/// Domain failures become error results; unusable arguments become
/// protocol errors.
fn respond(result: Result<Value>) -> McpResult<CallToolResult> {
    match result {
        Ok(value) => Ok(CallToolResult::success(vec![Content::json(value)?])),
        Err(err @ Error::InvalidInput(_)) => Err(err.into()),
        Err(err) => {
            tracing::debug!(%err, "tool error");
            Ok(CallToolResult::error(vec![Content::text(err.to_string())]))
        }
    }
}

#[tool_router]
impl Server {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Create a note")]
    async fn create_note(
        &self,
        Parameters(params): Parameters<CreateNote>,
    ) -> McpResult<CallToolResult> {
        respond(
            self.store
                .create_note(params.content, params.tags.unwrap_or_default()),
        )
    }

    #[tool(description = "Fetch a note by id")]
    async fn get_note(&self, Parameters(params): Parameters<ById>) -> McpResult<CallToolResult> {
        respond(self.store.get_note(&params.id))
    }

    #[tool(description = "List notes, optionally filtered by tags")]
    async fn list_notes(
        &self,
        Parameters(params): Parameters<ListNotes>,
    ) -> McpResult<CallToolResult> {
        let tags = params.tags.unwrap_or_default();
        respond(self.store.list_notes(&tags, params.limit))
    }

    #[tool(description = "Delete a note together with its links and jobs")]
    async fn delete_note(&self, Parameters(params): Parameters<ById>) -> McpResult<CallToolResult> {
        respond(self.store.delete_note(&params.id))
    }

    #[tool(description = "Create a collection")]
    async fn create_collection(
        &self,
        Parameters(params): Parameters<CreateCollection>,
    ) -> McpResult<CallToolResult> {
        respond(
            self.store
                .create_collection(params.name, params.description),
        )
    }

    #[tool(description = "List all collections")]
    async fn list_collections(&self) -> McpResult<CallToolResult> {
        respond(self.store.list_collections())
    }

    #[tool(description = "Fetch a collection by id")]
    async fn get_collection(
        &self,
        Parameters(params): Parameters<ById>,
    ) -> McpResult<CallToolResult> {
        respond(self.store.get_collection(&params.id))
    }

    #[tool(description = "File a note under a collection")]
    async fn move_note_to_collection(
        &self,
        Parameters(params): Parameters<MoveNoteToCollection>,
    ) -> McpResult<CallToolResult> {
        respond(
            self.store
                .move_note_to_collection(&params.note_id, &params.collection_id),
        )
    }

    #[tool(description = "List the notes filed under a collection")]
    async fn get_collection_notes(
        &self,
        Parameters(params): Parameters<ById>,
    ) -> McpResult<CallToolResult> {
        respond(self.store.get_collection_notes(&params.id))
    }

    #[tool(description = "Delete a collection, leaving its notes unfiled")]
    async fn delete_collection(
        &self,
        Parameters(params): Parameters<ById>,
    ) -> McpResult<CallToolResult> {
        respond(self.store.delete_collection(&params.id))
    }

    #[tool(description = "Link two notes")]
    async fn create_link(
        &self,
        Parameters(params): Parameters<CreateLink>,
    ) -> McpResult<CallToolResult> {
        let kind = params.kind.unwrap_or_else(|| "related".to_string());
        respond(self.store.create_link(params.from_id, params.to_id, kind))
    }

    #[tool(description = "List the incoming and outgoing links of a note")]
    async fn get_note_links(
        &self,
        Parameters(params): Parameters<ById>,
    ) -> McpResult<CallToolResult> {
        respond(self.store.get_note_links(&params.id))
    }

    #[tool(description = "Delete a link")]
    async fn delete_link(&self, Parameters(params): Parameters<ById>) -> McpResult<CallToolResult> {
        respond(self.store.delete_link(&params.id))
    }

    #[tool(description = "Create a note template")]
    async fn create_template(
        &self,
        Parameters(params): Parameters<CreateTemplate>,
    ) -> McpResult<CallToolResult> {
        respond(self.store.create_template(params.name, params.content))
    }

    #[tool(description = "List all templates")]
    async fn list_templates(&self) -> McpResult<CallToolResult> {
        respond(self.store.list_templates())
    }

    #[tool(description = "Create a note from a template, substituting variables")]
    async fn instantiate_template(
        &self,
        Parameters(params): Parameters<InstantiateTemplate>,
    ) -> McpResult<CallToolResult> {
        let variables: Map<String, Value> =
            params.variables.unwrap_or_default().into_iter().collect();
        respond(self.store.instantiate_template(
            &params.id,
            variables,
            params.tags.unwrap_or_default(),
        ))
    }

    #[tool(description = "Delete a template")]
    async fn delete_template(
        &self,
        Parameters(params): Parameters<ById>,
    ) -> McpResult<CallToolResult> {
        respond(self.store.delete_template(&params.id))
    }

    #[tool(description = "Create a SKOS concept scheme")]
    async fn create_concept_scheme(
        &self,
        Parameters(params): Parameters<CreateConceptScheme>,
    ) -> McpResult<CallToolResult> {
        let title = params.title.unwrap_or_else(|| params.notation.clone());
        respond(self.store.create_concept_scheme(params.notation, title))
    }

    #[tool(description = "Create a concept inside a scheme")]
    async fn create_concept(
        &self,
        Parameters(params): Parameters<CreateConcept>,
    ) -> McpResult<CallToolResult> {
        respond(self.store.create_concept(params.scheme_id, params.pref_label))
    }

    #[tool(description = "Fetch a concept by id")]
    async fn get_concept(&self, Parameters(params): Parameters<ById>) -> McpResult<CallToolResult> {
        respond(self.store.get_concept(&params.id))
    }

    #[tool(description = "Delete a concept")]
    async fn delete_concept(
        &self,
        Parameters(params): Parameters<ById>,
    ) -> McpResult<CallToolResult> {
        respond(self.store.delete_concept(&params.id))
    }

    #[tool(description = "Delete an empty concept scheme")]
    async fn delete_concept_scheme(
        &self,
        Parameters(params): Parameters<ById>,
    ) -> McpResult<CallToolResult> {
        respond(self.store.delete_concept_scheme(&params.id))
    }

    #[tool(description = "Queue a processing job for a note")]
    async fn create_job(
        &self,
        Parameters(params): Parameters<CreateJob>,
    ) -> McpResult<CallToolResult> {
        if !JOB_TYPES.contains(&params.job_type.as_str()) {
            return respond(Err(Error::InvalidInput(format!(
                "unknown job type `{}`",
                params.job_type
            ))));
        }
        respond(self.store.create_job(
            params.note_id,
            params.job_type,
            params.deduplicate.unwrap_or(false),
        ))
    }

    #[tool(description = "List queued jobs, optionally for one note")]
    async fn list_jobs(&self, Parameters(params): Parameters<ListJobs>) -> McpResult<CallToolResult> {
        respond(self.store.list_jobs(params.note_id.as_deref()))
    }

    #[tool(description = "Summarize the job queue")]
    async fn get_queue_stats(&self) -> McpResult<CallToolResult> {
        respond(self.store.get_queue_stats())
    }

    #[tool(description = "Create an encryption keyset protected by a passphrase")]
    async fn pke_create_keyset(
        &self,
        Parameters(params): Parameters<CreateKeyset>,
    ) -> McpResult<CallToolResult> {
        respond(self.store.create_keyset(params.name, &params.passphrase))
    }

    #[tool(description = "List encryption keysets")]
    async fn pke_list_keysets(&self) -> McpResult<CallToolResult> {
        respond(self.store.list_keysets())
    }

    #[tool(description = "Delete an encryption keyset by name")]
    async fn pke_delete_keyset(
        &self,
        Parameters(params): Parameters<ByName>,
    ) -> McpResult<CallToolResult> {
        respond(self.store.delete_keyset(&params.name))
    }

    #[tool(description = "Report the state of scheduled backups")]
    async fn backup_status(&self) -> McpResult<CallToolResult> {
        respond(self.store.backup_status())
    }

    #[tool(description = "List stored backups")]
    async fn list_backups(&self) -> McpResult<CallToolResult> {
        respond(self.store.list_backups())
    }
}

impl ServerHandler for Server {
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> McpResult<CallToolResult> {
        if self.store.is_stalled() {
            tracing::debug!(tool = %request.name, "stalling");
            return std::future::pending().await;
        }
        let tcc = ToolCallContext::new(self, request, context);
        self.tool_router.call(tcc).await
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> McpResult<ListToolsResult> {
        Ok(ListToolsResult::with_all_items(self.tool_router.list_all()))
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some("In-memory knowledge base for conformance testing.".into()),
        }
    }
}
