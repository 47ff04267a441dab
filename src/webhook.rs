use std::error::Error;
use std::io::Read;
use std::sync::Arc;
use std::thread;

use serde::Serialize;
use serde_json::Value;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{error, info, warn};

use crate::catalog::{load_catalog, Catalog};
use crate::classifier::Classifier;
use crate::config::Settings;
use crate::engine::{ChangedFile, ImpactEngine};
use crate::error::ChangeSetError;
use crate::executor::run_selected_tests;
use crate::github::{ChangeSetProvider, GithubClient};
use crate::llm::client::LlmClient;
use crate::llm::ReasoningDelegate;

const WEBHOOK_PATH: &str = "/webhook";
/// Push payloads from the hosting service stay well under this.
const MAX_BODY_BYTES: u64 = 25 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookReply {
    Success { triggered_tests: Vec<String> },
    Ignored,
}

/// Shared by every delivery. Nothing in here is mutated after startup.
pub struct WebhookContext {
    pub classifier: Classifier,
    pub catalog: Catalog,
    pub delegate: Box<dyn ReasoningDelegate>,
    pub provider: Box<dyn ChangeSetProvider>,
}

impl WebhookContext {
    /// Resolves one push delivery. Anything that is not a push with a head
    /// commit, or whose change set cannot be fetched, is acknowledged as
    /// ignored.
    pub fn handle_payload(&self, body: &[u8]) -> WebhookReply {
        let Ok(payload) = serde_json::from_slice::<Value>(body) else {
            warn!("webhook body is not JSON");
            return WebhookReply::Ignored;
        };

        let Some(commit_id) = payload
            .get("head_commit")
            .and_then(|c| c.get("id"))
            .and_then(Value::as_str)
        else {
            info!("delivery has no head commit, ignoring");
            return WebhookReply::Ignored;
        };

        if self.catalog.is_empty() {
            warn!("test catalog is empty, ignoring delivery");
            return WebhookReply::Ignored;
        }

        let files = match self.provider.changed_files(commit_id) {
            Ok(files) => files,
            Err(ChangeSetError::NoFiles(_)) => Vec::new(),
            Err(e) => {
                warn!(commit = commit_id, error = %e, "change set unavailable, ignoring delivery");
                return WebhookReply::Ignored;
            }
        };

        let changed: Vec<ChangedFile> = files.into_iter().map(ChangedFile::from).collect();
        let engine = ImpactEngine::new(&self.classifier, self.delegate.as_ref());
        let result = engine.resolve(&changed, &self.catalog);

        let triggered_tests: Vec<String> = self
            .catalog
            .in_catalog_order(&result.selected_ids)
            .into_iter()
            .map(|c| c.id.clone())
            .collect();
        run_selected_tests(&triggered_tests);

        info!(
            commit = commit_id,
            triggered = triggered_tests.len(),
            basis = result.basis.describe(),
            "delivery resolved"
        );
        WebhookReply::Success { triggered_tests }
    }
}

/// Builds the context from settings and serves until the process exits.
pub fn run(settings: &Settings, listen: Option<String>) -> Result<(), Box<dyn Error>> {
    let repo = Settings::require(&settings.repo, "GITHUB_REPO")?;
    let token = Settings::require(&settings.github_token, "GITHUB_TOKEN")?;
    let provider_cfg = settings.provider_config()?;
    let classifier = settings.classifier()?;
    let catalog = load_catalog(&settings.catalog_path)?;

    let ctx = Arc::new(WebhookContext {
        classifier,
        catalog,
        delegate: Box::new(LlmClient::new(provider_cfg)?),
        provider: Box::new(GithubClient::new(&settings.github_api_url, repo, token)?),
    });

    let addr = listen.unwrap_or_else(|| settings.listen.clone());
    let server = Server::http(addr.as_str()).map_err(|e| format!("bind {addr}: {e}"))?;
    info!(%addr, repo, cases = ctx.catalog.len(), "webhook listening on {WEBHOOK_PATH}");

    serve(server, ctx);
    Ok(())
}

/// One thread per delivery; deliveries share only the read-only context.
pub fn serve(server: Server, ctx: Arc<WebhookContext>) {
    for request in server.incoming_requests() {
        let ctx = Arc::clone(&ctx);
        thread::spawn(move || handle_request(&ctx, request));
    }
}

fn handle_request(ctx: &WebhookContext, mut request: Request) {
    let path = request.url().split('?').next().unwrap_or_default().to_string();

    if *request.method() != Method::Post || path != WEBHOOK_PATH {
        respond(request, 404, &serde_json::json!({ "error": "not found" }));
        return;
    }

    let reply = match read_body(request.as_reader(), MAX_BODY_BYTES) {
        Ok(Some(body)) => ctx.handle_payload(&body),
        Ok(None) => {
            warn!(limit = MAX_BODY_BYTES, "webhook body too large, ignoring");
            WebhookReply::Ignored
        }
        Err(e) => {
            warn!(error = %e, "could not read webhook body");
            WebhookReply::Ignored
        }
    };

    let value = serde_json::to_value(&reply).unwrap_or_else(|_| serde_json::json!({ "status": "ignored" }));
    respond(request, 200, &value);
}

/// Reads at most `limit` bytes. `None` when the body is longer than that.
fn read_body(reader: &mut dyn Read, limit: u64) -> std::io::Result<Option<Vec<u8>>> {
    let mut body = Vec::new();
    reader.take(limit + 1).read_to_end(&mut body)?;
    if body.len() as u64 > limit {
        return Ok(None);
    }
    Ok(Some(body))
}

fn respond(request: Request, status: u16, body: &Value) {
    let mut response = Response::from_string(body.to_string()).with_status_code(status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response = response.with_header(header);
    }
    if let Err(e) = request.respond(response) {
        error!(error = %e, "failed to write webhook response");
    }
}
