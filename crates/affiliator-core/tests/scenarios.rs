//! End-to-end classification against small on-disk registries.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use affiliator_core::{
    AffiliationClassifier, Config, FuzzyBackend, Label, MatchConfidence, MatchMethod, MatchStatus,
    Matcher, RegistryIndex,
};

/// Exact-only scorer that counts how often it is consulted.
#[derive(Default)]
struct CountingScorer {
    calls: AtomicUsize,
}

impl FuzzyBackend for CountingScorer {
    fn name(&self) -> &str {
        "counting"
    }

    fn score(&self, query: &str, candidate: &str) -> f64 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if query == candidate { 100.0 } else { 0.0 }
    }
}

fn write_registry(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file.flush().unwrap();
    file
}

fn registry() -> Arc<RegistryIndex> {
    let file = write_registry(&[
        "massachusetts institute of technology\thttps://ror.org/042nb2s44\tUS",
        "harvard university\thttps://ror.org/03vek6s52\tUS",
        "university of tokyo\thttps://ror.org/057zh3y96\tJP",
        "eth zurich\thttps://ror.org/05a28rw58\tCH",
    ]);
    Arc::new(RegistryIndex::open(file.path()).unwrap())
}

fn classifier_with(scorer: Arc<CountingScorer>) -> AffiliationClassifier {
    let matcher = Matcher::new(registry()).with_fuzzy_backend(Some(scorer));
    AffiliationClassifier::new(Config::default(), Arc::new(matcher)).unwrap()
}

#[test]
fn acronym_misses_and_department_clause_resolves() {
    let index = Arc::new(RegistryIndex::from_triples([(
        "massachusetts institute of technology",
        "org1",
        Some("US"),
    )]));
    let matcher = Matcher::new(index);

    assert_eq!(matcher.resolve("MIT", false, 92), None);

    let hit = matcher
        .resolve("Massachusetts Institute of Technology, Department of Physics", false, 92)
        .unwrap();
    assert_eq!(hit.org_id, "org1");
    assert_eq!(hit.country_code.as_deref(), Some("US"));
    assert_eq!(hit.method, MatchMethod::Exact);
}

#[test]
fn independent_cell_is_labelled_independent() {
    let scorer = Arc::new(CountingScorer::default());
    let row = classifier_with(scorer).classify_cell("Independent");
    assert_eq!(row.label, Label::Independent);
    assert_eq!(row.match_count, 0);
    assert_eq!(row.matched_countries, vec!["Independent"]);
}

#[test]
fn blank_cell_is_unknown_and_unmatched() {
    let scorer = Arc::new(CountingScorer::default());
    let row = classifier_with(scorer).classify_cell("");
    assert_eq!(row.label, Label::Unknown);
    assert!(row.matched_countries.is_empty());
    assert!(row.matched_org_ids.is_empty());
    assert!(row.unmatched_fragments.is_empty());
    assert_eq!(row.match_status, MatchStatus::Unmatched);
}

#[test]
fn one_unresolved_fragment_makes_partial_match() {
    let scorer = Arc::new(CountingScorer::default());
    let row = classifier_with(scorer).classify_cell("Harvard University; Unknown Fictional Institute XYZ");
    assert_eq!(row.label, Label::Strong);
    assert_eq!(row.match_status, MatchStatus::Partial);
    assert_eq!(row.match_count, 1);
    assert_eq!(row.matched_org_ids, vec!["https://ror.org/03vek6s52"]);
    assert_eq!(row.unmatched_fragments, vec!["Unknown Fictional Institute XYZ"]);
    assert_eq!(row.confidence, MatchConfidence::Unresolved);
}

#[test]
fn not_available_cell_skips_matcher() {
    let scorer = Arc::new(CountingScorer::default());
    let classifier = classifier_with(scorer.clone());

    let row = classifier.classify_cell("Affiliation not provided");
    assert_eq!(row.label, Label::Unknown);
    assert!(classifier.split("Affiliation not provided").is_empty());
    assert_eq!(classifier.matcher().stats().calls, 0);
    assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn exact_match_never_consults_fuzzy_backend() {
    let scorer = Arc::new(CountingScorer::default());
    let classifier = classifier_with(scorer.clone());
    let row = classifier.classify_cell("The University of Tokyo (UTokyo); ETH Zürich");
    assert_eq!(row.match_status, MatchStatus::Full);
    assert_eq!(row.details, vec!["JP", "CH"]);
    assert_eq!(row.label, Label::Weak);
    assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn repeated_fragment_is_memoized() {
    let scorer = Arc::new(CountingScorer::default());
    let classifier = classifier_with(scorer.clone());

    let first = classifier.classify_cell("Atlantis Polytechnic Academy");
    let calls = scorer.calls.load(Ordering::SeqCst);
    assert!(calls > 0);

    let second = classifier.classify_cell("Atlantis Polytechnic Academy");
    assert_eq!(first, second);
    assert_eq!(scorer.calls.load(Ordering::SeqCst), calls);
    assert_eq!(classifier.matcher().stats().memo_hits, 1);
}

#[test]
fn json_registry_classifies_like_tsv() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"[{{"id": "https://ror.org/052gg0110", "country_code": "gb", "names": ["University of Oxford", "Oxford University"]}}]"#
    )
    .unwrap();
    file.flush().unwrap();

    let classifier = AffiliationClassifier::open(Config::default(), file.path()).unwrap();
    let row = classifier.classify_cell("Oxford University, Department of Computer Science");
    assert_eq!(row.label, Label::Strong);
    assert_eq!(row.matched_countries, vec!["GB"]);
}

#[test]
fn shared_classifier_across_threads() {
    let scorer = Arc::new(CountingScorer::default());
    let classifier = Arc::new(classifier_with(scorer));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let classifier = Arc::clone(&classifier);
            std::thread::spawn(move || {
                classifier
                    .classify_cell("Harvard University; Atlantis Polytechnic Academy")
                    .label
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Label::Strong);
    }
}

#[cfg(feature = "fuzzy")]
#[test]
fn real_backend_resolves_typo() {
    let classifier = AffiliationClassifier::from_index(Config::default(), registry()).unwrap();
    let hit = classifier.resolve("Harvard Univeristy").unwrap();
    assert_eq!(hit.org_id, "https://ror.org/03vek6s52");
    assert!(matches!(hit.method, MatchMethod::Fuzzy { score } if score >= 92.0));
}

mod determinism {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn resolve_is_stable_within_a_run(s in "[A-Za-z ,;()-]{0,40}") {
            let matcher = Matcher::new(registry());
            let first = matcher.resolve(&s, true, 92);
            prop_assert_eq!(matcher.resolve(&s, true, 92), first);
        }
    }
}
