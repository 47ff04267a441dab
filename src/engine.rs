use std::collections::BTreeSet;

use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::classifier::{Classifier, ModuleVerdict};
use crate::error::ImpactError;
use crate::llm::{DelegateQuery, ReasoningDelegate};
use crate::parser;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
}

impl From<&str> for ChangedFile {
    fn from(path: &str) -> Self {
        Self { path: path.to_string() }
    }
}

impl From<String> for ChangedFile {
    fn from(path: String) -> Self {
        Self { path }
    }
}

/// How a selection was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    /// A shared file touched every module.
    Global,
    /// Path rules placed every file.
    Rules,
    /// The reasoning delegate answered.
    Delegate,
    /// The delegate was needed but failed; nothing is selected.
    Degraded,
}

impl Basis {
    pub fn describe(self) -> &'static str {
        match self {
            Basis::Global => "shared file, every module",
            Basis::Rules => "path rules",
            Basis::Delegate => "reasoning delegate",
            Basis::Degraded => "delegate failed, nothing selected",
        }
    }
}

#[derive(Debug)]
pub struct ImpactResult {
    /// Always a subset of the catalog's ids.
    pub selected_ids: BTreeSet<String>,
    pub basis: Basis,
    pub verdicts: Vec<(String, ModuleVerdict)>,
    pub delegate_reply: Option<String>,
    pub failure: Option<ImpactError>,
}

/// Per-run split of classified files.
#[derive(Debug, Default)]
struct Partition {
    verdicts: Vec<(String, ModuleVerdict)>,
    global: usize,
    modules: BTreeSet<String>,
    unknown: Vec<String>,
}

impl Partition {
    fn build(classifier: &Classifier, changed: &[ChangedFile]) -> Self {
        let mut p = Partition::default();
        for file in changed {
            let verdict = classifier.classify(&file.path);
            match &verdict {
                ModuleVerdict::Ignore => {}
                ModuleVerdict::Global => p.global += 1,
                ModuleVerdict::Specific(m) => {
                    p.modules.insert(m.clone());
                }
                ModuleVerdict::Unknown => p.unknown.push(file.path.clone()),
            }
            debug!(path = %file.path, %verdict, "classified");
            p.verdicts.push((file.path.clone(), verdict));
        }
        p
    }
}

pub struct ImpactEngine<'a> {
    classifier: &'a Classifier,
    delegate: &'a dyn ReasoningDelegate,
}

impl<'a> ImpactEngine<'a> {
    pub fn new(classifier: &'a Classifier, delegate: &'a dyn ReasoningDelegate) -> Self {
        Self {
            classifier,
            delegate,
        }
    }

    /// Maps changed files to the catalog ids they impact.
    ///
    /// Rules decide whenever they can; the delegate is consulted only when
    /// some file matched no rule. A failing delegate yields an empty
    /// selection, recorded in `failure`, never a guess.
    pub fn resolve(&self, changed: &[ChangedFile], catalog: &Catalog) -> ImpactResult {
        let partition = Partition::build(self.classifier, changed);

        if partition.global > 0 {
            info!(files = partition.global, "shared file changed, selecting every test case");
            return ImpactResult {
                selected_ids: catalog.all_ids(),
                basis: Basis::Global,
                verdicts: partition.verdicts,
                delegate_reply: None,
                failure: None,
            };
        }

        if partition.unknown.is_empty() {
            let selected_ids = catalog.ids_in_modules(&partition.modules);
            info!(
                modules = partition.modules.len(),
                selected = selected_ids.len(),
                "path rules resolved every file"
            );
            return ImpactResult {
                selected_ids,
                basis: Basis::Rules,
                verdicts: partition.verdicts,
                delegate_reply: None,
                failure: None,
            };
        }

        let query = DelegateQuery {
            changed_files: partition
                .verdicts
                .iter()
                .filter(|(_, v)| *v != ModuleVerdict::Ignore)
                .map(|(path, _)| path.clone())
                .collect(),
            modules: catalog.modules(),
            catalog: catalog.cases().to_vec(),
            resolved: partition
                .verdicts
                .iter()
                .filter(|(_, v)| matches!(v, ModuleVerdict::Specific(_)))
                .cloned()
                .collect(),
            unresolved: partition.unknown.clone(),
        };
        info!(
            unresolved = query.unresolved.len(),
            "path rules inconclusive, consulting reasoning delegate"
        );

        let reply = match self.delegate.ask(&query) {
            Ok(reply) => reply,
            Err(e) => return degraded(partition.verdicts, None, e),
        };

        debug!(
            prompt_hash = %reply.prompt_hash,
            cached_tokens = ?reply.cached_tokens,
            "delegate replied"
        );

        let parsed = parser::parse(&reply.text, catalog.ids());
        if !parsed.ok {
            let e = ImpactError::DelegateMalformed("reply holds no list of test case ids".into());
            return degraded(partition.verdicts, Some(reply.text), e);
        }

        let selected_ids: BTreeSet<String> = parsed
            .ids
            .into_iter()
            .filter(|id| catalog.contains(id))
            .collect();
        info!(selected = selected_ids.len(), "reasoning delegate resolved impact");

        ImpactResult {
            selected_ids,
            basis: Basis::Delegate,
            verdicts: partition.verdicts,
            delegate_reply: Some(reply.text),
            failure: None,
        }
    }
}

fn degraded(
    verdicts: Vec<(String, ModuleVerdict)>,
    reply: Option<String>,
    failure: ImpactError,
) -> ImpactResult {
    error!(error = %failure, "impact resolution degraded to an empty selection");
    if let Some(text) = &reply {
        warn!(reply = %text, "unusable delegate reply");
    }
    ImpactResult {
        selected_ids: BTreeSet::new(),
        basis: Basis::Degraded,
        verdicts,
        delegate_reply: reply,
        failure: Some(failure),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::case;
    use crate::llm::DelegateReply;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Canned delegate that counts calls and remembers the last query.
    pub(crate) struct FakeDelegate {
        reply: Result<String, String>,
        pub calls: AtomicUsize,
        pub last_query: Mutex<Option<DelegateQuery>>,
    }

    impl FakeDelegate {
        pub(crate) fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
                last_query: Mutex::new(None),
            }
        }

        pub(crate) fn failing(msg: &str) -> Self {
            Self {
                reply: Err(msg.to_string()),
                calls: AtomicUsize::new(0),
                last_query: Mutex::new(None),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ReasoningDelegate for FakeDelegate {
        fn ask(&self, query: &DelegateQuery) -> Result<DelegateReply, ImpactError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_query.lock().unwrap() = Some(query.clone());
            match &self.reply {
                Ok(text) => Ok(DelegateReply::from_text(text.clone())),
                Err(msg) => Err(ImpactError::DelegateUnavailable(msg.clone())),
            }
        }
    }

    pub(crate) fn portfolio_catalog() -> Catalog {
        Catalog::new(vec![
            case("TC_HP_001", "Homepage"),
            case("TC_HP_002", "Homepage"),
            case("TC_CF_001", "Contact Form"),
            case("TC_CF_002", "Contact Form"),
            case("TC_API_001", "API Routes"),
            case("TC_PF_001", "Performance"),
        ])
        .unwrap()
    }

    fn files(paths: &[&str]) -> Vec<ChangedFile> {
        paths.iter().map(|p| ChangedFile::from(*p)).collect()
    }

    fn ids(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn run(paths: &[&str], delegate: &FakeDelegate) -> ImpactResult {
        let classifier = Classifier::default();
        let engine = ImpactEngine::new(&classifier, delegate);
        engine.resolve(&files(paths), &portfolio_catalog())
    }

    #[test]
    fn homepage_change_needs_no_delegate() {
        let delegate = FakeDelegate::replying("['TC_CF_001']");
        let out = run(&["index.html", "styles/home.css"], &delegate);

        assert_eq!(out.selected_ids, ids(&["TC_HP_001", "TC_HP_002"]));
        assert_eq!(out.basis, Basis::Rules);
        assert_eq!(delegate.calls(), 0);
    }

    #[test]
    fn global_stylesheet_selects_everything() {
        let delegate = FakeDelegate::replying("[]");
        let out = run(&["global.css"], &delegate);

        assert_eq!(out.selected_ids, portfolio_catalog().all_ids());
        assert_eq!(out.basis, Basis::Global);
        assert_eq!(delegate.calls(), 0);
    }

    #[test]
    fn global_overrides_other_files() {
        let delegate = FakeDelegate::replying("[]");
        let out = run(&["sample.py", "src/widgets/carousel.js", "app.css"], &delegate);

        assert_eq!(out.selected_ids, portfolio_catalog().all_ids());
        assert_eq!(delegate.calls(), 0);
    }

    #[test]
    fn noise_only_selects_nothing() {
        let delegate = FakeDelegate::replying("['TC_HP_001']");
        let out = run(&["sample.py", "demo/index.html", "temp.txt"], &delegate);

        assert!(out.selected_ids.is_empty());
        assert_eq!(delegate.calls(), 0);
    }

    #[test]
    fn several_modules_union() {
        let delegate = FakeDelegate::replying("[]");
        let out = run(
            &["contact.html", "server/routes/api.js", "webpack.config.js"],
            &delegate,
        );

        assert_eq!(
            out.selected_ids,
            ids(&["TC_CF_001", "TC_CF_002", "TC_API_001", "TC_PF_001"])
        );
        assert_eq!(delegate.calls(), 0);
    }

    #[test]
    fn no_changes_select_nothing() {
        let delegate = FakeDelegate::replying("['TC_HP_001']");
        let out = run(&[], &delegate);
        assert!(out.selected_ids.is_empty());
        assert_eq!(out.basis, Basis::Rules);
        assert_eq!(delegate.calls(), 0);
    }

    #[test]
    fn unknown_file_goes_to_delegate_and_hallucinations_are_dropped() {
        let delegate = FakeDelegate::replying("```json\n['TC_HP_002', 'TC_NOPE_999']\n```");
        let out = run(&["index.html", "sample.py", "src/widgets/carousel.js"], &delegate);

        assert_eq!(delegate.calls(), 1);
        assert_eq!(out.basis, Basis::Delegate);
        assert_eq!(out.selected_ids, ids(&["TC_HP_002"]));
        assert!(out.failure.is_none());

        let query = delegate.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(query.changed_files, vec!["index.html", "src/widgets/carousel.js"]);
        assert_eq!(query.unresolved, vec!["src/widgets/carousel.js"]);
        assert_eq!(
            query.modules,
            vec!["Homepage", "Contact Form", "API Routes", "Performance"]
        );
        assert_eq!(query.catalog.len(), 6);
        assert_eq!(query.resolved.len(), 1);
    }

    #[test]
    fn delegate_failure_degrades_to_empty() {
        let delegate = FakeDelegate::failing("connection reset");
        let out = run(&["lib/util.js"], &delegate);

        assert!(out.selected_ids.is_empty());
        assert_eq!(out.basis, Basis::Degraded);
        assert!(matches!(out.failure, Some(ImpactError::DelegateUnavailable(_))));
    }

    #[test]
    fn unparsable_reply_degrades_to_empty() {
        let delegate = FakeDelegate::replying("I think the homepage tests, probably.");
        let out = run(&["lib/util.js"], &delegate);

        assert!(out.selected_ids.is_empty());
        assert_eq!(out.basis, Basis::Degraded);
        assert!(matches!(out.failure, Some(ImpactError::DelegateMalformed(_))));
        assert_eq!(
            out.delegate_reply.as_deref(),
            Some("I think the homepage tests, probably.")
        );
    }

    #[test]
    fn verdicts_follow_input_order() {
        let delegate = FakeDelegate::replying("[]");
        let out = run(&["sample.py", "index.html"], &delegate);
        assert_eq!(
            out.verdicts,
            vec![
                ("sample.py".to_string(), ModuleVerdict::Ignore),
                (
                    "index.html".to_string(),
                    ModuleVerdict::Specific("Homepage".into())
                ),
            ]
        );
    }

    const NOISE: &[&str] = &[
        "tests/home.test.js",
        "sample.py",
        "demo/index.html",
        "examples/contact.html",
        "temp/app.css",
    ];
    const GLOBAL: &[&str] = &["global.css", "styles/app.scss", "css/main.less", "reset.sass"];
    const SPECIFIC: &[(&str, &str)] = &[
        ("index.html", "Homepage"),
        ("styles/home.css", "Homepage"),
        ("landing/hero.js", "Homepage"),
        ("contact.html", "Contact Form"),
        ("server/routes/users.js", "API Routes"),
        ("webpack.config.js", "Performance"),
        ("package.json", "Performance"),
    ];
    const UNKNOWN: &[&str] = &["src/widgets/carousel.js", "lib/util.js"];

    fn rule_resolvable() -> impl Strategy<Value = (&'static str, Option<&'static str>)> {
        prop_oneof![
            prop::sample::select(NOISE).prop_map(|p| (p, None)),
            prop::sample::select(SPECIFIC).prop_map(|(p, m)| (p, Some(m))),
        ]
    }

    fn any_path() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            prop::sample::select(NOISE),
            prop::sample::select(SPECIFIC).prop_map(|(p, _)| p),
            prop::sample::select(UNKNOWN),
        ]
    }

    proptest! {
        #[test]
        fn noise_alone_selects_nothing(paths in prop::collection::vec(prop::sample::select(NOISE), 0..8)) {
            let delegate = FakeDelegate::replying("['TC_HP_001']");
            let out = run(&paths, &delegate);

            prop_assert!(out.selected_ids.is_empty());
            prop_assert_eq!(delegate.calls(), 0);
        }

        #[test]
        fn one_global_file_selects_the_whole_catalog(
            others in prop::collection::vec(any_path(), 0..8),
            global in prop::sample::select(GLOBAL),
            at in any::<prop::sample::Index>(),
        ) {
            let mut paths = others;
            let pos = at.index(paths.len() + 1);
            paths.insert(pos, global);

            let delegate = FakeDelegate::replying("[]");
            let out = run(&paths, &delegate);

            prop_assert_eq!(out.selected_ids, portfolio_catalog().all_ids());
            prop_assert_eq!(out.basis, Basis::Global);
            prop_assert_eq!(delegate.calls(), 0);
        }

        #[test]
        fn rule_resolvable_changes_never_ask_the_delegate(
            files in prop::collection::vec(rule_resolvable(), 0..8),
        ) {
            let paths: Vec<&str> = files.iter().map(|(p, _)| *p).collect();
            let modules: BTreeSet<String> =
                files.iter().filter_map(|(_, m)| m.map(str::to_string)).collect();

            let delegate = FakeDelegate::replying("['TC_PF_001']");
            let out = run(&paths, &delegate);

            prop_assert_eq!(out.selected_ids, portfolio_catalog().ids_in_modules(&modules));
            prop_assert_eq!(out.basis, Basis::Rules);
            prop_assert_eq!(delegate.calls(), 0);
        }
    }
}
