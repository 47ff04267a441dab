use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ImpactError;

/// Outcome of classifying one changed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleVerdict {
    Ignore,
    Global,
    Specific(String),
    Unknown,
}

impl fmt::Display for ModuleVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleVerdict::Ignore => write!(f, "ignored"),
            ModuleVerdict::Global => write!(f, "all modules"),
            ModuleVerdict::Specific(m) => write!(f, "{m}"),
            ModuleVerdict::Unknown => write!(f, "unknown"),
        }
    }
}

/// Marker sets and module tables. Pure data: loadable from TOML so the
/// tables can change without touching [`Classifier::classify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierRules {
    pub noise_markers: Vec<String>,
    pub global_names: Vec<String>,
    pub stylesheet_extensions: Vec<String>,
    /// Directory name -> module.
    pub directories: BTreeMap<String, String>,
    /// Base name without extension -> module.
    pub file_names: BTreeMap<String, String>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        fn strings(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }
        fn table(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        }

        Self {
            noise_markers: strings(&["test", "sample", "demo", "example", "temp"]),
            global_names: strings(&["global", "app", "main", "reset"]),
            stylesheet_extensions: strings(&["css", "scss", "sass", "less"]),
            directories: table(&[
                ("home", "Homepage"),
                ("landing", "Homepage"),
                ("index", "Homepage"),
                ("contact", "Contact Form"),
                ("routes", "API Routes"),
                ("api", "API Routes"),
                ("backend", "API Routes"),
                ("server", "API Routes"),
                ("config", "Performance"),
                ("build", "Performance"),
            ]),
            file_names: table(&[
                ("index", "Homepage"),
                ("home", "Homepage"),
                ("homepage", "Homepage"),
                ("landing", "Homepage"),
                ("contact", "Contact Form"),
                ("contact-form", "Contact Form"),
                ("contactform", "Contact Form"),
                ("server", "API Routes"),
                ("routes", "API Routes"),
                ("api", "API Routes"),
                ("webpack.config", "Performance"),
                ("package", "Performance"),
                (".babelrc", "Performance"),
            ]),
        }
    }
}

impl ClassifierRules {
    pub fn load(path: &Path) -> Result<Self, ImpactError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            ImpactError::ConfigurationMissing(format!("rules file {}: {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            ImpactError::ConfigurationMissing(format!("rules file {}: {e}", path.display()))
        })
    }
}

/// Deterministic path -> module rules. Holds a lowercased copy of the
/// tables so lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: ClassifierRules,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(ClassifierRules::default())
    }
}

impl Classifier {
    pub fn new(rules: ClassifierRules) -> Self {
        let lower = |v: Vec<String>| -> Vec<String> {
            v.into_iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        let lower_keys = |m: BTreeMap<String, String>| -> BTreeMap<String, String> {
            m.into_iter()
                .map(|(k, v)| (k.trim().to_lowercase(), v))
                .collect()
        };

        Self {
            rules: ClassifierRules {
                noise_markers: lower(rules.noise_markers),
                global_names: lower(rules.global_names),
                stylesheet_extensions: lower(
                    rules
                        .stylesheet_extensions
                        .into_iter()
                        .map(|e| e.trim_start_matches('.').to_string())
                        .collect(),
                ),
                directories: lower_keys(rules.directories),
                file_names: lower_keys(rules.file_names),
            },
        }
    }

    /// First match wins: noise, global stylesheet, directory, file name.
    pub fn classify(&self, path: &str) -> ModuleVerdict {
        let segments: Vec<String> = path
            .split(['/', '\\'])
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != ".")
            .map(str::to_lowercase)
            .collect();

        let Some((file_name, dirs)) = segments.split_last() else {
            return ModuleVerdict::Unknown;
        };

        if segments
            .iter()
            .any(|seg| self.rules.noise_markers.iter().any(|m| seg.contains(m.as_str())))
        {
            return ModuleVerdict::Ignore;
        }

        let (stem, ext) = split_name(file_name);

        if self.rules.global_names.iter().any(|g| g == stem)
            && self.rules.stylesheet_extensions.iter().any(|e| e == ext)
        {
            return ModuleVerdict::Global;
        }

        // deepest directory is the most specific
        if let Some(module) = dirs
            .iter()
            .rev()
            .find_map(|d| self.rules.directories.get(d.as_str()))
        {
            return ModuleVerdict::Specific(module.clone());
        }

        if let Some(module) = self
            .rules
            .file_names
            .get(stem)
            .or_else(|| self.rules.file_names.get(file_name.as_str()))
        {
            return ModuleVerdict::Specific(module.clone());
        }

        ModuleVerdict::Unknown
    }
}

/// `webpack.config.js` -> (`webpack.config`, `js`); dotfiles keep their name.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        None | Some(0) => (name, ""),
        Some(i) => (&name[..i], &name[i + 1..]),
    }
}
