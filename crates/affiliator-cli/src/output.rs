use std::io::Write;
use std::path::Path;
use std::time::Duration;

use affiliator_core::{Label, MatchMethod, MatchStatus, MatcherStats, OrgMatch, RegistryIndex, RowResult};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Counts accumulated over a classify run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rows: u64,
    /// Rows with invalid UTF-8 that were decoded lossily.
    pub repaired_rows: u64,
    pub strong: u64,
    pub weak: u64,
    pub unknown: u64,
    pub independent: u64,
    pub full: u64,
    pub partial: u64,
    pub unmatched: u64,
}

impl RunSummary {
    pub fn record(&mut self, row: &RowResult) {
        self.rows += 1;
        match row.label {
            Label::Strong => self.strong += 1,
            Label::Weak => self.weak += 1,
            Label::Unknown => self.unknown += 1,
            Label::Independent => self.independent += 1,
        }
        match row.match_status {
            MatchStatus::Full => self.full += 1,
            MatchStatus::Partial => self.partial += 1,
            MatchStatus::Unmatched => self.unmatched += 1,
        }
    }
}

/// Print the summary after a classify run.
pub fn print_run_summary(
    w: &mut dyn Write,
    summary: &RunSummary,
    stats: &MatcherStats,
    output: &Path,
    elapsed: Duration,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", "Summary".bold())?;
    } else {
        writeln!(w, "Summary")?;
    }
    writeln!(w, "  Rows:        {} ({:.1?})", summary.rows, elapsed)?;
    if summary.repaired_rows > 0 {
        let line = format!("  Repaired:    {} rows with invalid UTF-8", summary.repaired_rows);
        if color.enabled() {
            writeln!(w, "{}", line.yellow())?;
        } else {
            writeln!(w, "{}", line)?;
        }
    }

    if color.enabled() {
        writeln!(
            w,
            "  Background:  {} strong, {} weak, {} unknown, {} independent",
            summary.strong.to_string().green(),
            summary.weak.to_string().yellow(),
            summary.unknown.to_string().dimmed(),
            summary.independent.to_string().cyan()
        )?;
    } else {
        writeln!(
            w,
            "  Background:  {} strong, {} weak, {} unknown, {} independent",
            summary.strong, summary.weak, summary.unknown, summary.independent
        )?;
    }
    writeln!(
        w,
        "  Matching:    {} full, {} partial, {} none",
        summary.full, summary.partial, summary.unmatched
    )?;
    writeln!(
        w,
        "  Lookups:     {} calls, {} memo hits, {} exact, {} fuzzy, {} misses",
        stats.calls, stats.memo_hits, stats.exact_hits, stats.fuzzy_hits, stats.misses
    )?;
    writeln!(w, "  Output:      {}", output.display())?;
    Ok(())
}

/// Print the outcome of resolving one fragment.
pub fn print_resolution(
    w: &mut dyn Write,
    fragment: &str,
    found: Option<&OrgMatch>,
    color: ColorMode,
) -> std::io::Result<()> {
    let Some(found) = found else {
        if color.enabled() {
            writeln!(w, "{} -> {}", fragment, "NO MATCH".red())?;
        } else {
            writeln!(w, "{} -> NO MATCH", fragment)?;
        }
        return Ok(());
    };

    let country = found.country_code.as_deref().unwrap_or("??");
    let method = match found.method {
        MatchMethod::Exact => "exact".to_string(),
        MatchMethod::Fuzzy { score } => format!("fuzzy {:.1}", score),
    };
    if color.enabled() {
        writeln!(
            w,
            "{} -> {} {} ({}, key \"{}\")",
            fragment,
            found.org_id.green(),
            country.bold(),
            method,
            found.key.dimmed()
        )?;
    } else {
        writeln!(
            w,
            "{} -> {} {} ({}, key \"{}\")",
            fragment, found.org_id, country, method, found.key
        )?;
    }
    Ok(())
}

/// Print registry load statistics.
pub fn print_registry_stats(
    w: &mut dyn Write,
    path: &Path,
    index: &RegistryIndex,
    color: ColorMode,
) -> std::io::Result<()> {
    let stats = index.stats();
    if color.enabled() {
        writeln!(w, "{}", path.display().bold())?;
    } else {
        writeln!(w, "{}", path.display())?;
    }
    writeln!(w, "  Rows read:          {}", stats.rows_read)?;
    writeln!(w, "  Exact keys:         {}", index.len())?;
    writeln!(w, "  Indexed tokens:     {}", index.token_count())?;
    writeln!(w, "  Malformed rows:     {}", stats.malformed_rows)?;
    writeln!(w, "  Empty rows:         {}", stats.empty_rows)?;
    writeln!(w, "  Duplicate keys:     {}", stats.duplicate_keys)?;

    let line = format!("  Conflicting keys:   {}", stats.conflicting_keys);
    if color.enabled() && stats.conflicting_keys > 0 {
        writeln!(w, "{}", line.yellow())?;
    } else {
        writeln!(w, "{}", line)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use affiliator_core::aggregate;
    use affiliator_core::{AffiliationFragment, FragmentCategory};

    fn render(f: impl FnOnce(&mut dyn Write) -> std::io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn summary_counts_labels_and_status() {
        let english = ["US".to_string()].into_iter().collect();
        let frags = [AffiliationFragment {
            text: "Independent".into(),
            category: FragmentCategory::Independent,
        }];
        let mut summary = RunSummary::default();
        summary.record(&aggregate(&frags, &[None], &english));
        summary.record(&aggregate(&[], &[], &english));
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.independent, 1);
        assert_eq!(summary.unknown, 1);
        assert_eq!(summary.unmatched, 2);
    }

    #[test]
    fn resolution_plain_text() {
        let found = OrgMatch {
            org_id: "https://ror.org/03vek6s52".into(),
            country_code: Some("US".into()),
            key: "harvard university".into(),
            method: MatchMethod::Fuzzy { score: 93.4 },
        };
        let out = render(|w| print_resolution(w, "Harvrd University", Some(&found), ColorMode(false)));
        assert_eq!(
            out,
            "Harvrd University -> https://ror.org/03vek6s52 US (fuzzy 93.4, key \"harvard university\")\n"
        );
        let out = render(|w| print_resolution(w, "Nowhere", None, ColorMode(false)));
        assert_eq!(out, "Nowhere -> NO MATCH\n");
    }

    #[test]
    fn registry_stats_lists_counts() {
        let index = RegistryIndex::from_triples([
            ("Harvard University", "h", Some("US")),
            ("harvard university", "x", Some("US")),
        ]);
        let out = render(|w| print_registry_stats(w, Path::new("reg.tsv"), &index, ColorMode(false)));
        assert!(out.contains("Exact keys:         1"));
        assert!(out.contains("Conflicting keys:   1"));
    }
}
