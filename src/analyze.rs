use std::error::Error;

use tracing::{info, warn};

use crate::catalog::{load_catalog, Catalog};
use crate::config::Settings;
use crate::engine::{ChangedFile, ImpactEngine, ImpactResult};
use crate::error::{ChangeSetError, ImpactError};
use crate::executor::run_selected_tests;
use crate::github::{ChangeSetProvider, GithubClient};
use crate::llm::client::LlmClient;
use crate::report::{render, AnalysisSummary};

pub struct Analysis {
    pub result: ImpactResult,
    pub used_fallback: bool,
}

/// One-shot run against `IMPACTGREP_COMMIT`.
pub fn run(settings: &Settings) -> Result<(), Box<dyn Error>> {
    let repo = Settings::require(&settings.repo, "GITHUB_REPO")?;
    let token = Settings::require(&settings.github_token, "GITHUB_TOKEN")?;
    let commit = Settings::require(&settings.commit, "IMPACTGREP_COMMIT")?;
    let provider_cfg = settings.provider_config()?;
    let classifier = settings.classifier()?;

    let catalog = load_catalog(&settings.catalog_path)?;
    if catalog.is_empty() {
        return Err(ImpactError::CatalogUnavailable(format!(
            "no test cases in {}",
            settings.catalog_path.display()
        ))
        .into());
    }

    let github = GithubClient::new(&settings.github_api_url, repo, token)?;
    let delegate = LlmClient::new(provider_cfg)?;
    info!(
        repo,
        commit,
        model = %delegate.config().model,
        cases = catalog.len(),
        "analyzing commit"
    );

    let engine = ImpactEngine::new(&classifier, &delegate);
    let analysis = analyze_commit(commit, &github, &engine, &catalog, &settings.fallback_files);

    let summary = AnalysisSummary::new(
        repo,
        commit,
        analysis.used_fallback,
        &analysis.result,
        &catalog,
    );
    run_selected_tests(&summary.selected);
    print!("{}", render(&summary));
    Ok(())
}

/// Resolves one commit. A change set the host cannot deliver is replaced by
/// `fallback` so the engine can still be exercised offline; the swap is
/// logged and flagged on the result.
pub fn analyze_commit(
    commit: &str,
    provider: &dyn ChangeSetProvider,
    engine: &ImpactEngine<'_>,
    catalog: &Catalog,
    fallback: &[String],
) -> Analysis {
    let (files, used_fallback) = match provider.changed_files(commit) {
        Ok(files) => (files, false),
        Err(ChangeSetError::NoFiles(_)) => {
            warn!(
                commit,
                "no files found in commit (empty commit, merge commit or invalid commit id)"
            );
            (Vec::new(), false)
        }
        Err(e) => {
            warn!(error = %e, "change set unavailable, using example files");
            (fallback.to_vec(), true)
        }
    };

    let changed: Vec<ChangedFile> = files.into_iter().map(ChangedFile::from).collect();
    Analysis {
        result: engine.resolve(&changed, catalog),
        used_fallback,
    }
}
