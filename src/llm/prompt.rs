use crate::llm::DelegateQuery;

#[derive(Debug, Clone)]
pub struct LlmPrompt {
    pub system: String,
    pub user: String,
}

pub fn build_prompt(query: &DelegateQuery) -> LlmPrompt {
    LlmPrompt {
        system: system_prompt(),
        user: user_prompt(query),
    }
}

/* ============================================================
   System prompt (stable, reused)
   ============================================================ */

fn system_prompt() -> String {
    r#"
You are a test impact analyst. You map changed source files to the recorded test cases they affect.

Rules:
- Be extremely selective: only return test cases directly related to the changed files
- Match file paths and file names to the Module names of the test cases
- Files that look like tests, samples, demos, examples or temporary files affect nothing
- Shared stylesheets (global, app, main, reset) affect every module
- A module-specific stylesheet affects only that module
- If you cannot determine the module of a file, return nothing for it instead of guessing
- Only use TC_ID values that appear in the test case list
- Output ONLY a JSON list of TC_ID strings, e.g. ["TC_HP_001", "TC_CF_001"], or [] when nothing matches
- No explanations, no prose, no code fences
"#
    .trim()
    .to_string()
}

/* ============================================================
   User prompt (fully derived from DelegateQuery)
   ============================================================ */

fn user_prompt(q: &DelegateQuery) -> String {
    let mut out = String::new();

    /* ---------- CHANGES ---------- */
    out.push_str("CHANGED FILES\n");
    out.push_str(&pretty(&q.changed_files));
    out.push_str("\n\n");

    if !q.resolved.is_empty() {
        out.push_str("ALREADY CLASSIFIED BY PATH RULES\n");
        for (file, verdict) in &q.resolved {
            out.push_str(&format!("- {file} -> {verdict}\n"));
        }
        out.push('\n');
    }

    out.push_str("FILES NEEDING YOUR JUDGEMENT\n");
    for file in &q.unresolved {
        out.push_str(&format!("- {file}\n"));
    }
    out.push('\n');

    /* ---------- CATALOG ---------- */
    out.push_str("AVAILABLE MODULES\n");
    out.push_str(&pretty(&q.modules));
    out.push_str("\n\n");

    out.push_str("ALL TEST CASES\n");
    out.push_str(&pretty(&q.catalog));
    out.push_str("\n\n");

    /* ---------- OUTPUT ---------- */
    out.push_str(
        "Return the TC_IDs of every test case affected by the changed files above, \
         taking the already classified files into account.\n\
         Output format: [\"TC_ID_1\", \"TC_ID_2\"]\n",
    );

    out
}

fn pretty<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "[]".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::case;
    use crate::classifier::ModuleVerdict;

    #[test]
    fn prompt_embeds_files_modules_and_records() {
        let query = DelegateQuery {
            changed_files: vec!["index.html".into(), "src/widgets/carousel.js".into()],
            modules: vec!["Homepage".into(), "Contact Form".into()],
            catalog: vec![case("TC_HP_001", "Homepage"), case("TC_CF_001", "Contact Form")],
            resolved: vec![(
                "index.html".into(),
                ModuleVerdict::Specific("Homepage".into()),
            )],
            unresolved: vec!["src/widgets/carousel.js".into()],
        };

        let prompt = build_prompt(&query);
        assert!(prompt.system.contains("JSON list"));
        assert!(prompt.user.contains("\"src/widgets/carousel.js\""));
        assert!(prompt.user.contains("- index.html -> Homepage"));
        assert!(prompt.user.contains("\"Contact Form\""));
        assert!(prompt.user.contains("\"TC_ID\": \"TC_HP_001\""));
        assert!(prompt.user.contains("\"Test Case\""));
    }

    #[test]
    fn resolved_section_is_omitted_when_empty() {
        let query = DelegateQuery {
            changed_files: vec!["lib/x.rb".into()],
            modules: vec![],
            catalog: vec![],
            resolved: vec![],
            unresolved: vec!["lib/x.rb".into()],
        };
        assert!(!build_prompt(&query).user.contains("ALREADY CLASSIFIED"));
    }
}
