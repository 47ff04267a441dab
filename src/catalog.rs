use std::collections::{BTreeSet, HashSet};
use std::fmt::Display;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use calamine::{open_workbook_auto, Reader};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ImpactError;

const ID_COLUMN: &str = "TC_ID";
const MODULE_COLUMN: &str = "Module";
const DESCRIPTION_COLUMN: &str = "Test Case";

/// One recorded test case. Field names on the wire follow the spreadsheet
/// columns the catalog is kept in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(rename = "TC_ID", alias = "id")]
    pub id: String,
    #[serde(rename = "Module", alias = "module")]
    pub module: String,
    #[serde(rename = "Test Case", alias = "description", default)]
    pub description: String,
}

/// Read-only table of test cases shared by every resolution run of a process.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    cases: Vec<TestCase>,
    ids: HashSet<String>,
}

#[derive(Deserialize)]
struct TomlCatalog {
    #[serde(default)]
    test_case: Vec<TestCase>,
}

impl Catalog {
    pub fn new(cases: Vec<TestCase>) -> Result<Self, ImpactError> {
        let mut ids = HashSet::with_capacity(cases.len());
        for case in &cases {
            if case.id.trim().is_empty() {
                return Err(ImpactError::CatalogUnavailable(format!(
                    "test case in module '{}' has an empty {ID_COLUMN}",
                    case.module
                )));
            }
            if !ids.insert(case.id.clone()) {
                return Err(ImpactError::CatalogUnavailable(format!(
                    "duplicate {ID_COLUMN} '{}'",
                    case.id
                )));
            }
        }
        Ok(Self { cases, ids })
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn ids(&self) -> &HashSet<String> {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Distinct module names in first-seen order.
    pub fn modules(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.cases
            .iter()
            .filter(|c| seen.insert(c.module.as_str()))
            .map(|c| c.module.clone())
            .collect()
    }

    pub fn all_ids(&self) -> BTreeSet<String> {
        self.ids.iter().cloned().collect()
    }

    /// Ids of every case whose module is in `modules`. Module names compare
    /// case-insensitively so rule tables need not match catalog casing.
    pub fn ids_in_modules(&self, modules: &BTreeSet<String>) -> BTreeSet<String> {
        let wanted: HashSet<String> = modules.iter().map(|m| normalize_module(m)).collect();
        self.cases
            .iter()
            .filter(|c| wanted.contains(&normalize_module(&c.module)))
            .map(|c| c.id.clone())
            .collect()
    }

    /// `ids` reordered to catalog order, dropping anything unknown.
    pub fn in_catalog_order<'a>(&'a self, ids: &BTreeSet<String>) -> Vec<&'a TestCase> {
        self.cases.iter().filter(|c| ids.contains(&c.id)).collect()
    }
}

fn normalize_module(m: &str) -> String {
    m.trim().to_lowercase()
}

/// Loads the catalog from `path`. A missing file yields an empty catalog so
/// callers can decide what an empty table means for them; anything that
/// exists but cannot be read as a catalog is `CatalogUnavailable`.
pub fn load_catalog(path: &Path) -> Result<Catalog, ImpactError> {
    match fs::metadata(path) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "test case file not found, using empty catalog");
            return Ok(Catalog::default());
        }
        Err(e) => return Err(unavailable(path, e)),
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let cases = match ext.as_str() {
        "csv" => read_csv(&read_text(path)?).map_err(|e| unavailable(path, e))?,
        "json" => serde_json::from_str::<Vec<TestCase>>(&read_text(path)?)
            .map_err(|e| unavailable(path, e))?,
        "toml" => {
            toml::from_str::<TomlCatalog>(&read_text(path)?)
                .map_err(|e| unavailable(path, e))?
                .test_case
        }
        "xlsx" | "xlsm" | "xls" | "ods" => read_workbook(path).map_err(|e| unavailable(path, e))?,
        other => {
            return Err(ImpactError::CatalogUnavailable(format!(
                "unsupported catalog format '{other}' (expected xlsx, csv, json or toml)"
            )))
        }
    };

    let catalog = Catalog::new(cases)?;
    debug!(path = %path.display(), cases = catalog.len(), "loaded test catalog");
    Ok(catalog)
}

fn unavailable(path: &Path, e: impl Display) -> ImpactError {
    ImpactError::CatalogUnavailable(format!("{}: {e}", path.display()))
}

fn read_text(path: &Path) -> Result<String, ImpactError> {
    fs::read_to_string(path).map_err(|e| unavailable(path, e))
}

/// Header names are matched case-insensitively and rewritten to the
/// canonical column names before rows are deserialized.
fn read_csv(raw: &str) -> Result<Vec<TestCase>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(raw.trim_start_matches('\u{feff}').as_bytes());

    let headers: StringRecord = reader
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .map(canonical_column)
        .collect();
    for name in [ID_COLUMN, MODULE_COLUMN, DESCRIPTION_COLUMN] {
        if !headers.iter().any(|h| h == name) {
            return Err(format!("missing column '{name}'"));
        }
    }

    let mut cases = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        cases.push(
            record
                .deserialize::<TestCase>(Some(&headers))
                .map_err(|e| e.to_string())?,
        );
    }
    Ok(cases)
}

fn canonical_column(header: &str) -> &str {
    [ID_COLUMN, MODULE_COLUMN, DESCRIPTION_COLUMN]
        .into_iter()
        .find(|name| header.eq_ignore_ascii_case(name))
        .unwrap_or(header)
}

/// First sheet of a workbook, header row first.
fn read_workbook(path: &Path) -> Result<Vec<TestCase>, String> {
    let mut workbook = open_workbook_auto(path).map_err(|e| e.to_string())?;
    let sheet = workbook
        .worksheet_range_at(0)
        .ok_or("workbook has no sheets")?
        .map_err(|e| e.to_string())?;

    let mut rows = sheet
        .rows()
        .map(|row| row.iter().map(|c| c.to_string().trim().to_string()).collect::<Vec<_>>());
    let header = rows.next().ok_or("sheet has no header row")?;

    let column = |name: &str| {
        header
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| format!("missing column '{name}'"))
    };
    let id_col = column(ID_COLUMN)?;
    let module_col = column(MODULE_COLUMN)?;
    let desc_col = column(DESCRIPTION_COLUMN)?;

    Ok(rows
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .map(|row| TestCase {
            id: cell(&row, id_col),
            module: cell(&row, module_col),
            description: cell(&row, desc_col),
        })
        .collect())
}

fn cell(row: &[String], idx: usize) -> String {
    row.get(idx).cloned().unwrap_or_default()
}

#[cfg(test)]
pub(crate) fn case(id: &str, module: &str) -> TestCase {
    TestCase {
        id: id.to_string(),
        module: module.to_string(),
        description: format!("{module} check {id}"),
    }
}
