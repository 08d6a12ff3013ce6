use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use graph_memory_mcp_rs::batch::BatchOperation;
use graph_memory_mcp_rs::error::GraphError;
use graph_memory_mcp_rs::graph::{EntityInput, RelationInput, RelationKey};
use graph_memory_mcp_rs::logging::{init_logging, TransportMode};
use graph_memory_mcp_rs::manager::KnowledgeGraphManager;
use graph_memory_mcp_rs::merge::MergeStrategy;
use graph_memory_mcp_rs::temporal::TemporalQuery;

const DEFAULT_WORKSPACE: &str = "default";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Enable streamable HTTP mode (default: stdio)
    #[arg(short = 's', long = "stream")]
    stream_mode: bool,

    /// HTTP port for stream mode
    #[arg(short = 'p', long, default_value = "8000")]
    port: u16,

    /// Bind address for stream mode
    #[arg(short = 'b', long, default_value = "127.0.0.1")]
    bind: String,

    /// SQLite database path (tabular backend). Falls back to the
    /// GRAPH_MEMORY_DB_PATH environment variable.
    #[arg(long, value_name = "FILE")]
    db_path: Option<PathBuf>,

    /// Directory for per-workspace JSON documents (file backend, used when no
    /// database path is given)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Enable file logging. Optionally specify log file name (default: graph-memory-mcp-rs.log)
    #[arg(short = 'l', long, value_name = "FILE", num_args = 0..=1, default_missing_value = "graph-memory-mcp-rs.log")]
    log: Option<String>,
}

#[derive(Clone)]
struct GraphMemoryServer {
    manager: Arc<KnowledgeGraphManager>,
    tool_router: ToolRouter<Self>,
}

impl GraphMemoryServer {
    fn new(manager: Arc<KnowledgeGraphManager>) -> Self {
        Self {
            manager,
            tool_router: Self::tool_router(),
        }
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "graph-memory-mcp-rs".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                website_url: None,
                icons: None,
            },
            instructions: None,
        }
    }
}

#[tool_router]
impl GraphMemoryServer {
    /// Create new entities in the knowledge graph
    #[tool(
        name = "create_entities",
        description = "Create multiple entities in the knowledge graph. Re-creating an existing entity merges the new observations into it."
    )]
    async fn create_entities(
        &self,
        Parameters(args): Parameters<CreateEntitiesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let touched = self
            .manager
            .create_entities(workspace(&args.workspace), args.entities, args.user_id.as_deref())
            .await
            .map_err(engine_err)?;

        let summary = format!("{} entities created or merged", touched.len());
        Ok(structured(summary, json!(touched)))
    }

    /// Create relations between entities
    #[tool(
        name = "create_relations",
        description = "Create multiple relations between entities. Relations whose (from, to, relationType) triple already exists are skipped."
    )]
    async fn create_relations(
        &self,
        Parameters(args): Parameters<CreateRelationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let created = self
            .manager
            .create_relations(workspace(&args.workspace), args.relations, args.user_id.as_deref())
            .await
            .map_err(engine_err)?;

        let summary = format!("{} relations created successfully", created.len());
        Ok(structured(summary, json!(created)))
    }

    /// Add an observation to an entity
    #[tool(
        name = "add_observation",
        description = "Add a single observation to an existing entity. Fails if the entity does not exist."
    )]
    async fn add_observation(
        &self,
        Parameters(args): Parameters<AddObservationArgs>,
    ) -> Result<CallToolResult, McpError> {
        let entity = self
            .manager
            .add_observation(
                workspace(&args.workspace),
                &args.entity_name,
                args.observation,
                args.user_id.as_deref(),
            )
            .await
            .map_err(engine_err)?;

        let summary = format!("Observation added to '{}'", entity.name);
        Ok(structured(summary, json!(entity)))
    }

    /// Update an entity's observations and metadata
    #[tool(
        name = "update_entity",
        description = "Union new observations into an existing entity and shallow-merge metadata (new keys overwrite)."
    )]
    async fn update_entity(
        &self,
        Parameters(args): Parameters<UpdateEntityArgs>,
    ) -> Result<CallToolResult, McpError> {
        let entity = self
            .manager
            .update_entity(
                workspace(&args.workspace),
                &args.entity_name,
                args.observations.unwrap_or_default(),
                args.user_id.as_deref(),
                args.metadata,
            )
            .await
            .map_err(engine_err)?;

        let summary = format!("Entity '{}' updated", entity.name);
        Ok(structured(summary, json!(entity)))
    }

    /// Delete entities and their relations
    #[tool(
        name = "delete_entities",
        description = "Delete entities by name, cascading to every relation that references them. Missing names are skipped."
    )]
    async fn delete_entities(
        &self,
        Parameters(args): Parameters<DeleteEntitiesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let count = self
            .manager
            .delete_entities(workspace(&args.workspace), args.entity_names)
            .await
            .map_err(engine_err)?;

        Ok(CallToolResult::success(vec![Content::text(format!(
            "{} entities deleted successfully",
            count
        ))]))
    }

    /// Delete relations
    #[tool(
        name = "delete_relations",
        description = "Delete relations matching the given (from, to, relationType) triples exactly. Best effort: absent triples are ignored."
    )]
    async fn delete_relations(
        &self,
        Parameters(args): Parameters<DeleteRelationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let count = self
            .manager
            .delete_relations(workspace(&args.workspace), args.relations)
            .await
            .map_err(engine_err)?;

        Ok(CallToolResult::success(vec![Content::text(format!(
            "{} relations deleted successfully",
            count
        ))]))
    }

    /// Read entire knowledge graph
    #[tool(name = "read_graph", description = "Read the entire knowledge graph of a workspace")]
    async fn read_graph(
        &self,
        Parameters(args): Parameters<ReadGraphArgs>,
    ) -> Result<CallToolResult, McpError> {
        let graph = self
            .manager
            .read_graph(workspace(&args.workspace))
            .await
            .map_err(engine_err)?;

        let summary = format!(
            "Knowledge graph contains {} entities and {} relations",
            graph.entities.len(),
            graph.relations.len()
        );
        Ok(structured(summary, json!(graph)))
    }

    /// Free-text search across the graph
    #[tool(
        name = "search_nodes",
        description = "Search entities by free text across names, types and observations. Returns matches plus the relations among them."
    )]
    async fn search_nodes(
        &self,
        Parameters(args): Parameters<SearchNodesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .manager
            .search_nodes(workspace(&args.workspace), args.query)
            .await
            .map_err(engine_err)?;

        let summary = format!(
            "Found {} entities and {} relations",
            result.entities.len(),
            result.relations.len()
        );
        Ok(structured(summary, json!(result)))
    }

    /// Field query over entities
    #[tool(
        name = "search_entities",
        description = "Search entities by name and/or type substring (case-insensitive). Omitted fields match everything."
    )]
    async fn search_entities(
        &self,
        Parameters(args): Parameters<SearchEntitiesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let entities = self
            .manager
            .search_entities(workspace(&args.workspace), args.name, args.entity_type)
            .await
            .map_err(engine_err)?;

        let summary = format!("Found {} entities", entities.len());
        Ok(structured(summary, json!(entities)))
    }

    /// Field query over relations
    #[tool(
        name = "search_relations",
        description = "Search relations by from/to/relationType substring (case-insensitive). Omitted fields match everything."
    )]
    async fn search_relations(
        &self,
        Parameters(args): Parameters<SearchRelationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let relations = self
            .manager
            .search_relations(
                workspace(&args.workspace),
                args.from,
                args.to,
                args.relation_type,
            )
            .await
            .map_err(engine_err)?;

        let summary = format!("Found {} relations", relations.len());
        Ok(structured(summary, json!(relations)))
    }

    /// Relations created by a user
    #[tool(
        name = "search_relations_by_user",
        description = "List relations created by a given user, optionally narrowed by relation type."
    )]
    async fn search_relations_by_user(
        &self,
        Parameters(args): Parameters<SearchRelationsByUserArgs>,
    ) -> Result<CallToolResult, McpError> {
        let relations = self
            .manager
            .search_relations_by_user(workspace(&args.workspace), &args.user_id, args.relation_type)
            .await
            .map_err(engine_err)?;

        let summary = format!("Found {} relations", relations.len());
        Ok(structured(summary, json!(relations)))
    }

    /// Open specific nodes by names
    #[tool(
        name = "open_nodes",
        description = "Open specific entities by name, with the relations connecting them"
    )]
    async fn open_nodes(
        &self,
        Parameters(args): Parameters<OpenNodesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .manager
            .open_nodes(workspace(&args.workspace), args.names)
            .await
            .map_err(engine_err)?;

        let summary = format!(
            "Retrieved {} entities and {} relations",
            result.entities.len(),
            result.relations.len()
        );
        Ok(structured(summary, json!(result)))
    }

    /// Set relation strength
    #[tool(
        name = "update_relation_strength",
        description = "Set the strength of an existing relation. Values are clamped into [0, 1]."
    )]
    async fn update_relation_strength(
        &self,
        Parameters(args): Parameters<UpdateRelationStrengthArgs>,
    ) -> Result<CallToolResult, McpError> {
        let relation = self
            .manager
            .update_relation_strength(
                workspace(&args.workspace),
                &args.from,
                &args.to,
                &args.relation_type,
                args.strength,
            )
            .await
            .map_err(engine_err)?;

        let summary = format!(
            "Relation '{}' -> '{}' strength set to {}",
            relation.from, relation.to, relation.strength
        );
        Ok(structured(summary, json!(relation)))
    }

    /// Merge duplicate entities
    #[tool(
        name = "merge_entities",
        description = "Merge source entities into a target entity. 'combine' unions observations and metadata; 'replace' keeps the target as-is. Relations are rewired to the target."
    )]
    async fn merge_entities(
        &self,
        Parameters(args): Parameters<MergeEntitiesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let merged = self
            .manager
            .merge_entities(
                workspace(&args.workspace),
                &args.target,
                args.sources,
                args.strategy,
            )
            .await
            .map_err(engine_err)?;

        let summary = format!("Entities merged into '{}'", merged.name);
        Ok(structured(summary, json!(merged)))
    }

    /// Find likely duplicate entities
    #[tool(
        name = "detect_duplicates",
        description = "Group entities of the same type whose similarity meets the threshold (default 0.8). Offline operation: compares every pair per type."
    )]
    async fn detect_duplicates(
        &self,
        Parameters(args): Parameters<DetectDuplicatesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let groups = self
            .manager
            .detect_duplicates(workspace(&args.workspace), args.threshold)
            .await
            .map_err(engine_err)?;

        let summary = format!("Found {} duplicate groups", groups.len());
        Ok(structured(summary, json!(groups)))
    }

    /// Apply a heterogeneous batch of mutations
    #[tool(
        name = "execute_batch",
        description = "Apply a list of create_entity/create_relation/update_entity/delete_entity operations. Failed operations are reported individually and do not abort the batch."
    )]
    async fn execute_batch(
        &self,
        Parameters(args): Parameters<ExecuteBatchArgs>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self
            .manager
            .execute_batch(workspace(&args.workspace), args.operations, args.user_id.as_deref())
            .await
            .map_err(engine_err)?;

        let summary = format!(
            "Batch finished: {} succeeded, {} failed",
            outcome.successful, outcome.failed
        );
        Ok(structured(summary, json!(outcome)))
    }

    /// Time-windowed creations and updates
    #[tool(
        name = "get_temporal_events",
        description = "List entities and relations created or updated within a time window (default: epoch to now), with optional name/type/user filters."
    )]
    async fn get_temporal_events(
        &self,
        Parameters(args): Parameters<GetTemporalEventsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let events = self
            .manager
            .get_temporal_events(workspace(&args.workspace), args.query)
            .await
            .map_err(engine_err)?;

        let summary = format!("Found {} temporal events", events.len());
        Ok(structured(summary, json!(events)))
    }
}

#[tool_handler]
impl ServerHandler for GraphMemoryServer {
    fn get_info(&self) -> ServerInfo {
        self.server_info()
    }
}

// Tool argument schemas

#[derive(Debug, Deserialize, JsonSchema)]
struct CreateEntitiesArgs {
    entities: Vec<EntityInput>,
    workspace: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CreateRelationsArgs {
    relations: Vec<RelationInput>,
    workspace: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AddObservationArgs {
    #[serde(rename = "entityName")]
    entity_name: String,
    observation: String,
    workspace: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UpdateEntityArgs {
    #[serde(rename = "entityName")]
    entity_name: String,
    observations: Option<Vec<String>>,
    metadata: Option<HashMap<String, Value>>,
    workspace: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DeleteEntitiesArgs {
    #[serde(rename = "entityNames")]
    entity_names: Vec<String>,
    workspace: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DeleteRelationsArgs {
    relations: Vec<RelationKey>,
    workspace: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ReadGraphArgs {
    workspace: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchNodesArgs {
    query: Option<String>,
    workspace: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchEntitiesArgs {
    name: Option<String>,
    #[serde(rename = "entityType")]
    entity_type: Option<String>,
    workspace: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchRelationsArgs {
    from: Option<String>,
    to: Option<String>,
    #[serde(rename = "relationType")]
    relation_type: Option<String>,
    workspace: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchRelationsByUserArgs {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "relationType")]
    relation_type: Option<String>,
    workspace: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct OpenNodesArgs {
    names: Vec<String>,
    workspace: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UpdateRelationStrengthArgs {
    from: String,
    to: String,
    #[serde(rename = "relationType")]
    relation_type: String,
    strength: f64,
    workspace: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct MergeEntitiesArgs {
    target: String,
    sources: Vec<String>,
    strategy: MergeStrategy,
    workspace: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DetectDuplicatesArgs {
    threshold: Option<f64>,
    workspace: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExecuteBatchArgs {
    operations: Vec<BatchOperation>,
    workspace: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GetTemporalEventsArgs {
    #[serde(flatten)]
    query: TemporalQuery,
    workspace: Option<String>,
}

fn workspace(arg: &Option<String>) -> &str {
    arg.as_deref().unwrap_or(DEFAULT_WORKSPACE)
}

fn structured(summary: String, content: Value) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text(&summary)],
        structured_content: Some(content),
        is_error: Some(false),
        meta: None,
    }
}

fn engine_err(err: GraphError) -> McpError {
    match &err {
        GraphError::Validation(_) | GraphError::NotFound { .. } => {
            McpError::invalid_params(err.to_string(), None)
        }
        GraphError::Persistence(_) => McpError::internal_error(
            "Storage backend failure",
            Some(json!({ "error": err.to_string() })),
        ),
    }
}

/// Run server in stdio mode (default)
async fn run_stdio_mode(server: GraphMemoryServer) -> Result<()> {
    let transport = stdio();
    let svc = server.serve(transport).await?;
    svc.waiting().await?;
    Ok(())
}

/// Run server in streamable HTTP mode
async fn run_stream_mode(server: GraphMemoryServer, bind: &str, port: u16) -> Result<()> {
    use rmcp::transport::StreamableHttpService;
    use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;

    let addr = format!("{}:{}", bind, port);
    tracing::info!("Starting MCP HTTP server on http://{}/mcp", addr);

    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = axum::Router::new()
        .nest_service("/mcp", service)
        .route("/health", axum::routing::get(|| async { "OK" }));

    let tcp_listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}

fn default_data_dir() -> PathBuf {
    let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("graph-memory-mcp");
    path.push("workspaces");
    path
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mode = if args.stream_mode {
        TransportMode::Stream
    } else {
        TransportMode::Stdio
    };

    // stdio mode must not log to stderr: any output during the handshake
    // reads as "connection closed" to MCP clients.
    init_logging(mode, args.log).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let db_path = args
        .db_path
        .or_else(|| std::env::var("GRAPH_MEMORY_DB_PATH").ok().map(PathBuf::from));

    let manager = match db_path {
        Some(path) => Arc::new(KnowledgeGraphManager::with_sqlite_store(&path)?),
        None => {
            let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
            Arc::new(KnowledgeGraphManager::with_file_store(data_dir)?)
        }
    };

    let server = GraphMemoryServer::new(manager);

    match mode {
        TransportMode::Stdio => run_stdio_mode(server).await,
        TransportMode::Stream => run_stream_mode(server, &args.bind, args.port).await,
    }
}
