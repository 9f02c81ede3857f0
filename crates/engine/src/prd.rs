#![forbid(unsafe_code)]

//! PRD context resolution.
//!
//! A task may freeze an excerpt of a product-requirements document at
//! creation time (`prd.excerpt` + `prd.hash`). At read time the engine
//! re-reads the live document, extracts the referenced sections, and reports
//! drift between the frozen state and the file as it is now.
//!
//! Anchors are GitHub-style heading slugs: `#heading-id` selects from that
//! heading through the next heading of the same or higher level. A line
//! range (1-based, inclusive) overrides the anchor.

use crate::spec::model::{PrdBinding, PrdRef};
use sha2::{Digest, Sha256};

#[derive(Clone, Debug)]
pub struct SectionSlice {
    pub anchor: String,
    pub lines: Option<(u64, u64)>,
    /// None when the anchor is missing or the range falls outside the file.
    pub text: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DriftReport {
    pub changed: bool,
    pub current_hash: String,
    /// Anchors that no longer resolve in the live document.
    pub missing_anchors: Vec<String>,
    /// Refs whose line ranges now extend past the end of the file.
    pub out_of_range: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PrdDelivery {
    pub excerpt: String,
    pub sections: Vec<SectionSlice>,
    /// Live sections concatenated, trimmed to the caller's budget.
    pub body: String,
    pub truncated: bool,
    pub drift: DriftReport,
    pub warnings: Vec<String>,
}

pub fn hash_source(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// GitHub-style heading slug: lowercase, spaces to hyphens, punctuation
/// dropped.
pub fn slugify_heading(heading: &str) -> String {
    let mut out = String::with_capacity(heading.len());
    for ch in heading.trim().chars() {
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else if ch == ' ' || ch == '-' || ch == '_' {
            out.push(if ch == '_' { '_' } else { '-' });
        }
        // other punctuation is dropped
    }
    // collapse runs introduced by "word - word" style headings
    let mut collapsed = String::with_capacity(out.len());
    let mut last_hyphen = false;
    for ch in out.chars() {
        if ch == '-' {
            if !last_hyphen {
                collapsed.push('-');
            }
            last_hyphen = true;
        } else {
            collapsed.push(ch);
            last_hyphen = false;
        }
    }
    collapsed.trim_matches('-').to_string()
}

fn heading_level(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(' ') && !rest.is_empty() {
        return None;
    }
    Some((hashes, rest.trim()))
}

/// Extracts the section under the heading whose slug matches `anchor`
/// (leading `#` optional), through the next same-or-higher heading.
pub fn extract_section(source: &str, anchor: &str) -> Option<String> {
    let want = anchor.trim_start_matches('#');
    let lines: Vec<&str> = source.lines().collect();

    let mut start = None;
    let mut level = 0;
    for (index, line) in lines.iter().enumerate() {
        if let Some((l, heading)) = heading_level(line) {
            if slugify_heading(heading) == want {
                start = Some(index);
                level = l;
                break;
            }
        }
    }
    let start = start?;

    let mut end = lines.len();
    for (index, line) in lines.iter().enumerate().skip(start + 1) {
        if let Some((l, _)) = heading_level(line) {
            if l <= level {
                end = index;
                break;
            }
        }
    }

    Some(lines[start..end].join("\n"))
}

/// Extracts 1-based inclusive `lines` from the source; None when the range
/// starts past EOF (a range ending past EOF is clipped).
pub fn extract_lines(source: &str, start: u64, end: u64) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    if start == 0 || start as usize > lines.len() {
        return None;
    }
    let end = (end as usize).min(lines.len());
    Some(lines[start as usize - 1..end].join("\n"))
}

/// Resolves one ref: a line range wins over the anchor.
pub fn extract_ref(source: &str, prd_ref: &PrdRef) -> Option<String> {
    match prd_ref.lines {
        Some((start, end)) => extract_lines(source, start, end),
        None => extract_section(source, &prd_ref.anchor),
    }
}

pub fn extract_sections(source: &str, refs: &[PrdRef]) -> Vec<SectionSlice> {
    refs.iter()
        .map(|r| SectionSlice {
            anchor: r.anchor.clone(),
            lines: r.lines,
            text: extract_ref(source, r),
        })
        .collect()
}

/// Compares the frozen binding to the live source.
pub fn drift(binding: &PrdBinding, source: &str) -> DriftReport {
    let current_hash = hash_source(source.as_bytes());
    let changed = current_hash != binding.hash;

    let mut missing_anchors = Vec::new();
    let mut out_of_range = Vec::new();
    if changed {
        let line_count = source.lines().count() as u64;
        for prd_ref in &binding.refs {
            match prd_ref.lines {
                Some((start, end)) => {
                    if start > line_count || end > line_count {
                        out_of_range.push(ref_name(prd_ref));
                    }
                }
                None => {
                    if extract_section(source, &prd_ref.anchor).is_none() {
                        missing_anchors.push(prd_ref.anchor.clone());
                    }
                }
            }
        }
    }

    DriftReport {
        changed,
        current_hash,
        missing_anchors,
        out_of_range,
    }
}

fn ref_name(prd_ref: &PrdRef) -> String {
    match prd_ref.lines {
        Some((start, end)) if prd_ref.anchor.is_empty() => format!("lines {start}-{end}"),
        Some((start, end)) => format!("{} (lines {start}-{end})", prd_ref.anchor),
        None => prd_ref.anchor.clone(),
    }
}

/// Builds the full context package: frozen excerpt, live sections, and a
/// concatenated body trimmed to `budget_chars`.
pub fn deliver(binding: &PrdBinding, source: &str, budget_chars: usize) -> PrdDelivery {
    let sections = extract_sections(source, &binding.refs);
    let drift = drift(binding, source);

    let mut warnings = Vec::new();
    for section in &sections {
        if section.text.is_none() {
            warnings.push(format!(
                "prd ref {} did not resolve in {}",
                ref_name(&PrdRef {
                    anchor: section.anchor.clone(),
                    lines: section.lines,
                }),
                binding.source
            ));
        }
    }

    let mut body = String::new();
    for section in &sections {
        if let Some(text) = &section.text {
            if !body.is_empty() {
                body.push_str("\n\n");
            }
            body.push_str(text);
        }
    }

    let mut truncated = false;
    if body.chars().count() > budget_chars {
        body = body.chars().take(budget_chars).collect();
        truncated = true;
    }

    PrdDelivery {
        excerpt: binding.excerpt.clone(),
        sections,
        body,
        truncated,
        drift,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Product\n\nIntro paragraph.\n\n## Goals\n\n- fast\n- correct\n\n### Sub-goal\n\ndetails\n\n## Non-goals\n\n- slow things\n";

    #[test]
    fn slugs_match_github_style() {
        assert_eq!(slugify_heading("Goals"), "goals");
        assert_eq!(slugify_heading("Non-goals"), "non-goals");
        assert_eq!(slugify_heading("API & Wire Format"), "api-wire-format");
        assert_eq!(slugify_heading("  Spaced   Out  "), "spaced-out");
    }

    #[test]
    fn section_runs_to_next_same_or_higher_heading() {
        let goals = extract_section(DOC, "#goals").expect("goals");
        assert!(goals.starts_with("## Goals"));
        assert!(goals.contains("Sub-goal"), "sub-sections belong to the section");
        assert!(!goals.contains("Non-goals"));

        let sub = extract_section(DOC, "sub-goal").expect("sub");
        assert!(sub.starts_with("### Sub-goal"));
        assert!(!sub.contains("Non-goals"));
    }

    #[test]
    fn missing_anchor_is_none() {
        assert!(extract_section(DOC, "#nope").is_none());
    }

    #[test]
    fn line_ranges_are_one_based_inclusive_and_clipped() {
        let text = "a\nb\nc\nd\n";
        assert_eq!(extract_lines(text, 2, 3), Some("b\nc".to_string()));
        assert_eq!(extract_lines(text, 2, 99), Some("b\nc\nd".to_string()));
        assert_eq!(extract_lines(text, 99, 100), None);
        assert_eq!(extract_lines(text, 0, 2), None);
    }

    #[test]
    fn hash_is_deterministic_hex() {
        let h1 = hash_source(b"abc");
        let h2 = hash_source(b"abc");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, hash_source(b"abd"));
    }

    fn binding(refs: Vec<PrdRef>, hash: &str) -> PrdBinding {
        PrdBinding {
            source: "docs/prd.md".to_string(),
            refs,
            excerpt: "frozen".to_string(),
            hash: hash.to_string(),
        }
    }

    #[test]
    fn unchanged_source_reports_no_drift() {
        let b = binding(
            vec![PrdRef {
                anchor: "#goals".to_string(),
                lines: None,
            }],
            &hash_source(DOC.as_bytes()),
        );
        let report = drift(&b, DOC);
        assert!(!report.changed);
        assert!(report.missing_anchors.is_empty());
    }

    #[test]
    fn edited_source_reports_drift_and_affected_refs() {
        let b = binding(
            vec![
                PrdRef {
                    anchor: "#goals".to_string(),
                    lines: None,
                },
                PrdRef {
                    anchor: "#vanished".to_string(),
                    lines: None,
                },
                PrdRef {
                    anchor: String::new(),
                    lines: Some((500, 510)),
                },
            ],
            "stale-hash",
        );
        let report = drift(&b, DOC);
        assert!(report.changed);
        assert_eq!(report.missing_anchors, vec!["#vanished".to_string()]);
        assert_eq!(report.out_of_range, vec!["lines 500-510".to_string()]);
    }

    #[test]
    fn deliver_trims_to_budget_and_flags_it() {
        let b = binding(
            vec![PrdRef {
                anchor: "#goals".to_string(),
                lines: None,
            }],
            &hash_source(DOC.as_bytes()),
        );
        let full = deliver(&b, DOC, 10_000);
        assert!(!full.truncated);
        assert!(full.body.contains("- fast"));
        assert_eq!(full.excerpt, "frozen");

        let tight = deliver(&b, DOC, 10);
        assert!(tight.truncated);
        assert_eq!(tight.body.chars().count(), 10);
    }

    #[test]
    fn deliver_warns_on_unresolved_refs() {
        let b = binding(
            vec![PrdRef {
                anchor: "#vanished".to_string(),
                lines: None,
            }],
            &hash_source(DOC.as_bytes()),
        );
        let delivery = deliver(&b, DOC, 1000);
        assert_eq!(delivery.warnings.len(), 1);
        assert!(delivery.sections[0].text.is_none());
        assert!(delivery.body.is_empty());
    }
}
