//! Free-text merge strategy.
//!
//! The upstream delta (snapshot → candidate) is computed as a line-based
//! patch with `diffy` and replayed against the working copy. When every hunk
//! applies, the patched working copy is the merge. When application fails in
//! either direction, the fallback output is candidate-shaped with the
//! disputed regions bracketed by conflict markers, so the user can locate
//! and resolve them in any merge-aware editor.

use tracing::debug;

use super::{ConflictRegion, MergeOutcome, MARKER_BEGIN, MARKER_END, MARKER_SEPARATOR};

/// Three-way merge of line-oriented text.
pub fn merge(base: &str, working: &str, candidate: &str) -> MergeOutcome {
    // Upstream delta applied onto the user's copy.
    let upstream = diffy::create_patch(base, candidate);
    if let Ok(merged) = diffy::apply(working, &upstream) {
        debug!("clean merge via applying upstream patch to working copy");
        return MergeOutcome::clean(merged);
    }

    // Reverse direction: user's delta applied onto the fresh candidate.
    let manual = diffy::create_patch(base, working);
    if let Ok(merged) = diffy::apply(candidate, &manual) {
        debug!("clean merge via applying manual patch to candidate");
        return MergeOutcome::clean(merged);
    }

    debug!("patch application failed in both directions, emitting conflict markers");
    let (content, conflict_regions) = conflict_output(working, candidate);
    MergeOutcome {
        content,
        had_conflict: true,
        conflict_regions,
    }
}

/// Build candidate-shaped output with conflict markers around every region
/// where the candidate and the working copy disagree.
///
/// A simple line-by-line walk: runs of identical lines pass through; runs of
/// differing lines become a marker block with the generated side first.
fn conflict_output(working: &str, candidate: &str) -> (String, Vec<ConflictRegion>) {
    let working_lines: Vec<&str> = working.lines().collect();
    let candidate_lines: Vec<&str> = candidate.lines().collect();

    let mut output: Vec<String> = Vec::new();
    let mut regions = Vec::new();

    let max_len = working_lines.len().max(candidate_lines.len());
    let mut i = 0;
    while i < max_len {
        let cand_line = candidate_lines.get(i).copied();
        let work_line = working_lines.get(i).copied();

        if cand_line == work_line {
            if let Some(line) = cand_line {
                output.push(line.to_string());
            }
            i += 1;
            continue;
        }

        // Collect the contiguous differing region.
        let mut cand_block: Vec<String> = Vec::new();
        let mut work_block: Vec<String> = Vec::new();
        let mut j = i;
        while j < max_len {
            let cl = candidate_lines.get(j).copied();
            let wl = working_lines.get(j).copied();
            if cl == wl {
                break;
            }
            if let Some(c) = cl {
                cand_block.push(c.to_string());
            }
            if let Some(w) = wl {
                work_block.push(w.to_string());
            }
            j += 1;
        }

        let start_line = output.len() + 1;
        output.push(MARKER_BEGIN.to_string());
        output.extend(cand_block);
        output.push(MARKER_SEPARATOR.to_string());
        output.extend(work_block);
        output.push(MARKER_END.to_string());
        regions.push(ConflictRegion {
            start_line,
            end_line: output.len(),
        });

        i = j;
    }

    let mut content = output.join("\n");
    if candidate.ends_with('\n') || working.ends_with('\n') {
        content.push('\n');
    }
    (content, regions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_overlapping_changes_merge_cleanly() {
        let base = "aaa\nbbb\nccc\nddd\neee\n";
        let working = "AAA\nbbb\nccc\nddd\neee\n";
        let candidate = "aaa\nbbb\nccc\nddd\nEEE\n";
        let out = merge(base, working, candidate);
        assert!(!out.had_conflict);
        assert!(out.content.contains("AAA"));
        assert!(out.content.contains("EEE"));
    }

    #[test]
    fn test_pure_append_plus_upstream_change() {
        let base = "A\nB\nC\n";
        let working = "A\nB\nC\nD (manual)\n";
        let candidate = "A\nB\nC-changed\n";
        let out = merge(base, working, candidate);
        assert!(!out.had_conflict);
        assert!(out.content.contains("C-changed"));
        assert!(out.content.contains("D (manual)"));
    }

    #[test]
    fn test_same_line_changed_both_sides_conflicts() {
        let base = "A\nB\nC\n";
        let working = "A\nB-edited\nC\n";
        let candidate = "A\nB-newgen\nC\n";
        let out = merge(base, working, candidate);
        assert!(out.had_conflict);
        assert!(out.content.contains(MARKER_BEGIN));
        assert!(out.content.contains(MARKER_SEPARATOR));
        assert!(out.content.contains(MARKER_END));
        assert!(out.content.contains("B-edited"));
        assert!(out.content.contains("B-newgen"));
        assert!(!out.conflict_regions.is_empty());
    }

    #[test]
    fn test_conflict_region_lines_point_at_markers() {
        let base = "A\nB\nC\n";
        let working = "A\nB-edited\nC\n";
        let candidate = "A\nB-newgen\nC\n";
        let out = merge(base, working, candidate);

        let lines: Vec<&str> = out.content.lines().collect();
        let region = &out.conflict_regions[0];
        assert_eq!(lines[region.start_line - 1], MARKER_BEGIN);
        assert_eq!(lines[region.end_line - 1], MARKER_END);
    }

    #[test]
    fn test_generated_side_listed_first_in_markers() {
        let (content, regions) = conflict_output("manual line\n", "generated line\n");
        assert_eq!(regions.len(), 1);
        let begin = content.find("generated line").unwrap();
        let sep = content.find(MARKER_SEPARATOR).unwrap();
        let manual = content.find("manual line").unwrap();
        assert!(begin < sep && sep < manual);
    }
}
