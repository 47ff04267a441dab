use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::classifier::{Classifier, ClassifierRules};
use crate::error::ImpactError;
use crate::llm::client::{Provider, ProviderConfig};

const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_CATALOG: &str = "test_cases/test_cases.csv";
const DEFAULT_LISTEN: &str = "127.0.0.1:5000";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_FALLBACK_FILES: &[&str] = &["index.html", "styles/home.css"];

/// Everything the frontends need, read once at startup and passed down.
#[derive(Debug, Clone)]
pub struct Settings {
    pub repo: Option<String>,
    pub github_token: Option<String>,
    pub github_api_url: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_timeout: Duration,
    pub catalog_path: PathBuf,
    pub commit: Option<String>,
    pub rules_path: Option<PathBuf>,
    pub fallback_files: Vec<String>,
    pub listen: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            repo: var("GITHUB_REPO"),
            github_token: var("GITHUB_TOKEN"),
            github_api_url: var("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            llm_provider: var("IMPACTGREP_LLM_PROVIDER").unwrap_or_else(|| "openai".into()),
            llm_model: var("IMPACTGREP_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
            llm_api_key: var("IMPACTGREP_LLM_API_KEY").or_else(|| var("OPENAI_API_KEY")),
            llm_base_url: var("IMPACTGREP_LLM_BASE_URL"),
            llm_timeout: Duration::from_secs(
                var("IMPACTGREP_LLM_TIMEOUT_SECS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .filter(|s| *s > 0)
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            catalog_path: var("IMPACTGREP_CATALOG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG)),
            commit: var("IMPACTGREP_COMMIT"),
            rules_path: var("IMPACTGREP_RULES").map(PathBuf::from),
            fallback_files: var("IMPACTGREP_FALLBACK_FILES")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_else(|| DEFAULT_FALLBACK_FILES.iter().map(|s| s.to_string()).collect()),
            listen: var("IMPACTGREP_LISTEN").unwrap_or_else(|| DEFAULT_LISTEN.into()),
        }
    }

    pub fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ImpactError> {
        value
            .as_deref()
            .ok_or_else(|| ImpactError::ConfigurationMissing(format!("{name} is not set")))
    }

    pub fn provider_config(&self) -> Result<ProviderConfig, ImpactError> {
        let api_key = Self::require(&self.llm_api_key, "OPENAI_API_KEY")?;
        Ok(ProviderConfig {
            provider: Provider::parse(&self.llm_provider)?,
            model: self.llm_model.clone(),
            api_key: api_key.to_string(),
            base_url: self.llm_base_url.clone(),
            timeout: self.llm_timeout,
        })
    }

    /// Rules from `IMPACTGREP_RULES`, else the per-user rules file, else the
    /// built-in tables.
    pub fn classifier(&self) -> Result<Classifier, ImpactError> {
        let path = self
            .rules_path
            .clone()
            .or_else(|| user_rules_path().filter(|p| p.exists()));

        let rules = match path {
            Some(p) => {
                debug!(path = %p.display(), "loading classifier rules");
                ClassifierRules::load(&p)?
            }
            None => ClassifierRules::default(),
        };
        Ok(Classifier::new(rules))
    }
}

fn user_rules_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("impactgrep").join("rules.toml"))
}
