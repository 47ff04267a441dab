use std::fmt::Write as _;

use chrono::Utc;

use crate::catalog::Catalog;
use crate::engine::{Basis, ImpactResult};

const RULE: &str = "==================================================";

/// Selected ids of one module, in catalog order.
#[derive(Debug)]
pub struct ModuleGroup {
    pub module: String,
    pub ids: Vec<String>,
}

impl ModuleGroup {
    pub fn count(&self) -> usize {
        self.ids.len()
    }
}

#[derive(Debug)]
pub struct AnalysisSummary {
    pub repository: String,
    pub commit: String,
    pub generated_at: String,
    pub used_fallback: bool,
    pub changed_files: Vec<(String, String)>,
    pub total_cases: usize,
    pub basis: Basis,
    pub delegate_reply: Option<String>,
    pub failure: Option<String>,
    /// Selected ids in catalog order.
    pub selected: Vec<String>,
    /// Groups in order of each module's first selected case.
    pub modules: Vec<ModuleGroup>,
}

impl AnalysisSummary {
    pub fn new(
        repository: &str,
        commit: &str,
        used_fallback: bool,
        result: &ImpactResult,
        catalog: &Catalog,
    ) -> Self {
        let chosen = catalog.in_catalog_order(&result.selected_ids);

        let mut modules: Vec<ModuleGroup> = Vec::new();
        for case in &chosen {
            match modules.iter_mut().find(|m| m.module == case.module) {
                Some(m) => m.ids.push(case.id.clone()),
                None => modules.push(ModuleGroup {
                    module: case.module.clone(),
                    ids: vec![case.id.clone()],
                }),
            }
        }

        Self {
            repository: repository.to_string(),
            commit: commit.to_string(),
            generated_at: Utc::now().to_rfc3339(),
            used_fallback,
            changed_files: result
                .verdicts
                .iter()
                .map(|(path, verdict)| (path.clone(), verdict.to_string()))
                .collect(),
            total_cases: catalog.len(),
            basis: result.basis,
            delegate_reply: result.delegate_reply.clone(),
            failure: result.failure.as_ref().map(|e| e.to_string()),
            selected: chosen.iter().map(|c| c.id.clone()).collect(),
            modules,
        }
    }
}

pub fn render(s: &AnalysisSummary) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "\nAnalyzing commit: {}", s.commit);
    let _ = writeln!(out, "Repository: {}", s.repository);
    let _ = writeln!(out, "Generated at: {}", s.generated_at);

    if s.used_fallback {
        let _ = writeln!(out, "\n{RULE}\nUsing TEST MODE with example files\n{RULE}");
    }

    let _ = writeln!(out, "\nChanged files detected:");
    if s.changed_files.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for (path, verdict) in &s.changed_files {
        let _ = writeln!(out, "  - {path}  [{verdict}]");
    }

    let _ = writeln!(out, "\nTotal test cases available: {}", s.total_cases);
    let _ = writeln!(out, "Resolved by: {}", s.basis.describe());

    if let Some(reply) = &s.delegate_reply {
        let _ = writeln!(out, "\nRaw AI output:\n{reply}");
    }
    if let Some(failure) = &s.failure {
        let _ = writeln!(out, "\nAnalysis degraded: {failure}");
    }

    if s.selected.is_empty() {
        let _ = writeln!(out, "\nNo test cases were identified for execution.");
        return out;
    }

    let _ = writeln!(out, "\n{RULE}\nSELECTED TEST CASES TO RUN\n{RULE}");
    for group in &s.modules {
        let _ = writeln!(out, "{} ({} test(s)):", group.module, group.count());
        for id in &group.ids {
            let _ = writeln!(out, "  - {id}");
        }
    }
    let _ = writeln!(out, "{RULE}");

    let _ = writeln!(out, "\n{RULE}\nANALYSIS SUMMARY\n{RULE}");
    let _ = writeln!(out, "\nTotal selected test cases: {}", s.selected.len());
    let _ = writeln!(out, "Affected modules:");
    for m in &s.modules {
        let _ = writeln!(out, "  - {}: {} test(s)", m.module, m.count());
    }
    let _ = writeln!(out, "{RULE}");

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::case;
    use crate::classifier::ModuleVerdict;
    use crate::engine::tests::portfolio_catalog;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn result(ids: &[&str]) -> ImpactResult {
        ImpactResult {
            selected_ids: ids.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            basis: Basis::Rules,
            verdicts: vec![(
                "contact.html".into(),
                ModuleVerdict::Specific("Contact Form".into()),
            )],
            delegate_reply: None,
            failure: None,
        }
    }

    #[test]
    fn groups_selection_by_module_in_catalog_order() {
        let catalog = portfolio_catalog();
        let s = AnalysisSummary::new(
            "owner/site",
            "abc",
            false,
            &result(&["TC_PF_001", "TC_CF_002", "TC_HP_001", "TC_CF_001"]),
            &catalog,
        );

        assert_eq!(s.selected, vec!["TC_HP_001", "TC_CF_001", "TC_CF_002", "TC_PF_001"]);
        let counts: Vec<(&str, usize)> = s.modules.iter().map(|m| (m.module.as_str(), m.count())).collect();
        assert_eq!(
            counts,
            vec![("Homepage", 1), ("Contact Form", 2), ("Performance", 1)]
        );

        let text = render(&s);
        assert!(text.contains("  - contact.html  [Contact Form]"));
        assert!(text.contains("  - Contact Form: 2 test(s)"));
        assert!(text.contains("Total selected test cases: 4"));
        assert!(!text.contains("TEST MODE"));
    }

    #[test]
    fn interleaved_catalog_prints_ids_under_their_module() {
        let catalog = Catalog::new(vec![
            case("TC_HP_001", "Homepage"),
            case("TC_CF_001", "Contact Form"),
            case("TC_HP_002", "Homepage"),
        ])
        .unwrap();
        let s = AnalysisSummary::new(
            "owner/site",
            "abc",
            false,
            &result(&["TC_HP_001", "TC_CF_001", "TC_HP_002"]),
            &catalog,
        );

        let ids: Vec<(&str, Vec<String>)> = s
            .modules
            .iter()
            .map(|m| (m.module.as_str(), m.ids.clone()))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("Homepage", vec!["TC_HP_001".to_string(), "TC_HP_002".to_string()]),
                ("Contact Form", vec!["TC_CF_001".to_string()]),
            ]
        );

        let text = render(&s);
        assert!(text.contains("Homepage (2 test(s)):\n  - TC_HP_001\n  - TC_HP_002\n"));
        assert!(text.contains("Contact Form (1 test(s)):\n  - TC_CF_001\n"));
    }

    #[test]
    fn empty_selection_says_so() {
        let catalog = portfolio_catalog();
        let s = AnalysisSummary::new("owner/site", "abc", true, &result(&[]), &catalog);
        let text = render(&s);
        assert!(text.contains("Using TEST MODE with example files"));
        assert!(text.contains("No test cases were identified for execution."));
        assert!(!text.contains("ANALYSIS SUMMARY"));
    }
}
