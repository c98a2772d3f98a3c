use std::{path::Path, sync::Arc};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    collaborators::IndexReport,
    error,
    fusion::{FusedResult, RetrievalStrategy},
    ingestion::extract_title,
    intent,
    router::{Outcome, Router},
    text_util,
};

#[derive(Clone)]
pub struct DocrouteMcpServer {
    router: Arc<Router>,
    tool_router: ToolRouter<Self>,
}

impl DocrouteMcpServer {
    pub fn new(router: Router) -> Self {
        Self {
            router: Arc::new(router),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl DocrouteMcpServer {
    /// Classify an utterance without acting on it.
    #[tool(
        name = "docroute_classify",
        description = "Classify an utterance into one intent (greeting, meta question, filesystem command, collection command, index command or content question) and show the path it mentions. Nothing is executed."
    )]
    pub async fn docroute_classify(
        &self,
        params: Parameters<UtteranceParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let intent = intent::classify_text(&params.0.text)
            .map_err(|e| mcp_error("classification failed", e))?;

        let structured = serde_json::to_value(&intent)
            .map_err(|e| mcp_error("failed to serialize intent", e))?;

        Ok({
            let mut result = CallToolResult::success(vec![Content::text(intent.kind().to_string())]);
            result.structured_content = Some(structured);
            result.is_error = Some(false);
            result
        })
    }

    /// Classify an utterance and carry it out.
    #[tool(
        name = "docroute_route",
        description = "Route an utterance: answer content questions from the active collection, run filesystem and collection commands, index folders or preview a folder reorganization. Organization plans only run after docroute_confirm_organization."
    )]
    pub async fn docroute_route(
        &self,
        params: Parameters<UtteranceParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let routed = match self.router.route(&params.0.text).await {
            Ok(routed) => routed,
            Err(e) if e.is_security_refusal() => {
                let message = e.to_string();
                return Ok({
                    let mut result = CallToolResult::success(vec![Content::text(message.clone())]);
                    result.structured_content = Some(json!({ "refused": message }));
                    result.is_error = Some(true);
                    result
                });
            }
            Err(e) => return Err(mcp_error("routing failed", e)),
        };

        let summary = summarize(&routed.outcome);
        let structured = serde_json::to_value(&routed)
            .map_err(|e| mcp_error("failed to serialize outcome", e))?;

        Ok({
            let mut result = CallToolResult::success(vec![Content::text(summary)]);
            result.structured_content = Some(structured);
            result.is_error = Some(false);
            result
        })
    }

    /// Fused search over the active collection.
    #[tool(
        name = "docroute_search",
        description = "Search the active collection with reciprocal-rank fusion of semantic and lexical rankings. Pass strategy pure_semantic or pure_fulltext to use one ranking alone."
    )]
    pub async fn docroute_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let top_k = params.limit.unwrap_or(self.router.settings().top_k);
        let strategy = match params.strategy.as_deref() {
            Some(name) => name.parse::<RetrievalStrategy>().map_err(|e| {
                rmcp::ErrorData::invalid_params(e, None)
            })?,
            None => self.router.settings().strategy,
        };

        let results = self
            .router
            .search_with(&params.query, top_k, strategy)
            .await
            .map_err(|e| mcp_error("search failed", e))?;

        let include_snippet = params.include_snippet.unwrap_or(true);
        let items: Vec<SearchResultItem> = results
            .into_iter()
            .map(|r| search_item(r, &params.query, include_snippet))
            .collect();

        let summary = format_search_summary(&items, &params.query);
        let structured = serde_json::to_value(SearchResponse {
            query: params.query,
            collection: self.router.active_collection().to_string(),
            result_count: items.len(),
            results: items,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        Ok({
            let mut result = CallToolResult::success(vec![Content::text(summary)]);
            result.structured_content = Some(structured);
            result.is_error = Some(false);
            result
        })
    }

    /// Confirm and carry out a previewed organization plan.
    #[tool(
        name = "docroute_confirm_organization",
        description = "Confirm an organization plan by id and move the files. Refuses plans that changed since they were proposed."
    )]
    pub async fn docroute_confirm_organization(
        &self,
        params: Parameters<ConfirmParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let report = self
            .router
            .confirm_organization(&params.0.id)
            .await
            .map_err(|e| mcp_error("organization failed", e))?;

        let failed = report.outcomes.iter().filter(|o| !o.success).count();
        let summary = format!(
            "Plan {}: {} request(s), {failed} failed",
            report.id,
            report.outcomes.len()
        );
        let structured = serde_json::to_value(&report)
            .map_err(|e| mcp_error("failed to serialize report", e))?;

        Ok({
            let mut result = CallToolResult::success(vec![Content::text(summary)]);
            result.structured_content = Some(structured);
            result.is_error = Some(!report.all_succeeded());
            result
        })
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocrouteMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("docroute", env!("CARGO_PKG_VERSION"))
                    .with_title("docroute MCP"),
            )
            .with_instructions(
                "Use docroute_route for anything the user says. Use docroute_search to look up documents directly, and docroute_confirm_organization only after the user approved a previewed plan.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UtteranceParams {
    /// What the user said.
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Maximum number of results (default: the top_k setting).
    pub limit: Option<usize>,
    /// Include title and snippet previews (default: true).
    pub include_snippet: Option<bool>,
    /// hybrid_rrf, pure_semantic or pure_fulltext (default: the strategy
    /// setting).
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmParams {
    /// Id of the plan returned by the organization preview.
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    collection: String,
    result_count: usize,
    results: Vec<SearchResultItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultItem {
    doc_id: String,
    rank: usize,
    rrf_score: f64,
    semantic_rank: Option<usize>,
    lexical_rank: Option<usize>,
    title: Option<String>,
    snippet: Option<String>,
}

fn search_item(
    result: FusedResult,
    query: &str,
    include_snippet: bool,
) -> SearchResultItem {
    let (title, snippet) = if include_snippet {
        let path = Path::new(result.document_id.as_str());
        match std::fs::read_to_string(path) {
            Ok(content) => (
                Some(extract_title(&content, path)),
                text_util::extract_snippet(&content, query)
                    .map(|(snippet, _)| snippet),
            ),
            Err(_) => (None, None),
        }
    } else {
        (None, None)
    };

    SearchResultItem {
        doc_id: result.document_id.to_string(),
        rank: result.rank,
        rrf_score: result.rrf_score,
        semantic_rank: result.semantic_rank,
        lexical_rank: result.lexical_rank,
        title,
        snippet,
    }
}

fn format_search_summary(results: &[SearchResultItem], query: &str) -> String {
    if results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        results.len(),
        suffix
    ));

    for item in results {
        lines.push(format!(
            "{}. {:.4} {}",
            item.rank, item.rrf_score, item.doc_id
        ));
    }

    lines.join("\n")
}

fn summarize(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Reply { text } | Outcome::Answer { text, .. } => text.clone(),
        Outcome::Filesystem { outcomes } => outcomes
            .iter()
            .map(|o| {
                let status = if o.success { "ok" } else { "failed" };
                format!("{status}: {} ({})", o.path.display(), o.detail)
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Outcome::OrganizationPreview { plan } => format!(
            "Proposed plan {} with {} move(s) into {} folder(s). Nothing has \
             been moved yet.",
            plan.id,
            plan.move_count(),
            plan.proposals.len()
        ),
        Outcome::Similar { results } => results
            .iter()
            .map(|r| format!("{}. {}", r.rank, r.document_id))
            .collect::<Vec<_>>()
            .join("\n"),
        Outcome::CollectionCreated { collection } => {
            format!("Created collection '{}'", collection.name)
        }
        Outcome::Collections {
            collections,
            active,
        } => {
            let names: Vec<&str> =
                collections.iter().map(|c| c.name.as_str()).collect();
            format!("Collections: {} (active: {active})", names.join(", "))
        }
        Outcome::CollectionSwitched { previous, active } => {
            format!("Switched from '{previous}' to '{active}'")
        }
        Outcome::CollectionDeleted { name } => {
            format!("Deleted collection '{name}'")
        }
        Outcome::CollectionDetails { collection } => {
            format!("Collection '{}'", collection.name)
        }
        Outcome::Indexed { report } => match report {
            IndexReport::Indexed {
                collection,
                documents,
                ..
            } => {
                format!("Indexed {documents} document(s) into '{collection}'")
            }
            IndexReport::NeedsClarification { question } => question.clone(),
        },
    }
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

/// Serve the router over MCP on stdin/stdout until the client leaves.
pub async fn serve_stdio(router: Router) -> error::Result<()> {
    let server = DocrouteMcpServer::new(router);
    let transport = rmcp::transport::stdio();
    let running = server.serve(transport).await.map_err(|e| {
        error::Error::Config(format!("MCP server initialization failed: {e}"))
    })?;
    running
        .waiting()
        .await
        .map_err(|e| error::Error::Config(format!("MCP server error: {e}")))?;
    Ok(())
}
