//! Line-based merging
//!
//! [`merge_three_way`] is a diff3-style merge: both sides are diffed against
//! the common ancestor, non-overlapping hunks are applied, and overlapping
//! hunks become conflict blocks unless both sides made the same change.
//! [`merge_two_way`] is the fallback when no ancestor is known: common lines
//! are kept and every divergent run is wrapped in markers.

use std::ops::Range;

use similar::{capture_diff_slices, Algorithm, DiffTag};
use tracing::debug;

use vaultsync_core::domain::{ConflictRegion, MergeResult};

use crate::markers::write_block;

/// A changed region: `base` lines were replaced by `side` lines
#[derive(Debug, Clone, PartialEq, Eq)]
struct Hunk {
    base: Range<usize>,
    side: Range<usize>,
}

fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Diff `base` against `side` and coalesce adjacent edits into hunks
fn hunks(base: &[&str], side: &[&str]) -> Vec<Hunk> {
    let mut out: Vec<Hunk> = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, base, side) {
        if op.tag() == DiffTag::Equal {
            continue;
        }
        let (b, s) = (op.old_range(), op.new_range());
        match out.last_mut() {
            Some(last) if last.base.end == b.start && last.side.end == s.start => {
                last.base.end = b.end;
                last.side.end = s.end;
            }
            _ => out.push(Hunk { base: b, side: s }),
        }
    }
    out
}

/// Does `range` belong to the cluster spanning `start..end`?
///
/// Overlapping ranges always do. Ranges that merely touch join only when an
/// insertion is involved, since two insertions at one point have no
/// well-defined order.
fn joins(range: &Range<usize>, start: usize, end: usize) -> bool {
    range.start < end || (range.start == end && (range.is_empty() || start == end))
}

fn offset(pos: usize, delta: isize) -> usize {
    (pos as isize + delta).max(0) as usize
}

/// Three-way merge of `local` and `remote` against their ancestor `base`
pub fn merge_three_way(base: &str, local: &str, remote: &str) -> MergeResult {
    let base_lines = split_lines(base);
    let local_lines = split_lines(local);
    let remote_lines = split_lines(remote);

    let local_hunks = hunks(&base_lines, &local_lines);
    let remote_hunks = hunks(&base_lines, &remote_lines);

    let mut out = String::with_capacity(local.len().max(remote.len()));
    let mut out_lines = 0usize;
    let mut regions = Vec::new();

    let (mut i, mut j) = (0usize, 0usize);
    // Line-count difference between each side and the base so far
    let (mut local_delta, mut remote_delta) = (0isize, 0isize);
    let mut base_pos = 0usize;

    loop {
        let next_local = local_hunks.get(i).map(|h| h.base.start);
        let next_remote = remote_hunks.get(j).map(|h| h.base.start);
        let start = match (next_local, next_remote) {
            (None, None) => break,
            (Some(l), None) => l,
            (None, Some(r)) => r,
            (Some(l), Some(r)) => l.min(r),
        };

        let (local_before, remote_before) = (local_delta, remote_delta);
        let mut end = start;
        let (mut touched_local, mut touched_remote) = (false, false);
        loop {
            let mut grew = false;
            while let Some(h) = local_hunks.get(i).filter(|h| joins(&h.base, start, end)) {
                end = end.max(h.base.end);
                local_delta = h.side.end as isize - h.base.end as isize;
                touched_local = true;
                grew = true;
                i += 1;
            }
            while let Some(h) = remote_hunks.get(j).filter(|h| joins(&h.base, start, end)) {
                end = end.max(h.base.end);
                remote_delta = h.side.end as isize - h.base.end as isize;
                touched_remote = true;
                grew = true;
                j += 1;
            }
            if !grew {
                break;
            }
        }

        for line in &base_lines[base_pos..start] {
            out.push_str(line);
            out_lines += 1;
        }

        let local_chunk =
            &local_lines[offset(start, local_before)..offset(end, local_delta)];
        let remote_chunk =
            &remote_lines[offset(start, remote_before)..offset(end, remote_delta)];

        let take_one = match (touched_local, touched_remote) {
            (true, false) => Some(local_chunk),
            (false, true) => Some(remote_chunk),
            _ if local_chunk == remote_chunk => Some(local_chunk),
            _ => None,
        };

        match take_one {
            Some(chunk) => {
                for line in chunk {
                    out.push_str(line);
                    out_lines += 1;
                }
            }
            None => {
                regions.push(ConflictRegion {
                    start_line: out_lines + 1,
                    base: base_lines[start..end].iter().map(|s| s.to_string()).collect(),
                    local: local_chunk.iter().map(|s| s.to_string()).collect(),
                    remote: remote_chunk.iter().map(|s| s.to_string()).collect(),
                });
                write_block(&mut out, local_chunk, remote_chunk);
                out_lines += local_chunk.len() + remote_chunk.len() + 3;
            }
        }
        base_pos = end;
    }

    for line in &base_lines[base_pos..] {
        out.push_str(line);
    }

    let conflict_count = regions.len();
    debug!(
        local_hunks = local_hunks.len(),
        remote_hunks = remote_hunks.len(),
        conflict_count,
        "Three-way merge finished"
    );

    MergeResult {
        content: out,
        has_conflicts: conflict_count > 0,
        conflict_count,
        regions,
    }
}

/// Two-way merge without an ancestor
///
/// Lines common to both inputs are kept once; each divergent run becomes a
/// conflict block with `primary` as the local half.
pub fn merge_two_way(primary: &str, other: &str) -> MergeResult {
    let primary_lines = split_lines(primary);
    let other_lines = split_lines(other);

    let mut out = String::with_capacity(primary.len().max(other.len()));
    let mut out_lines = 0usize;
    let mut regions = Vec::new();

    let mut pos = 0usize;
    for hunk in hunks(&primary_lines, &other_lines) {
        for line in &primary_lines[pos..hunk.base.start] {
            out.push_str(line);
            out_lines += 1;
        }
        let local = &primary_lines[hunk.base.clone()];
        let remote = &other_lines[hunk.side.clone()];
        regions.push(ConflictRegion {
            start_line: out_lines + 1,
            base: Vec::new(),
            local: local.iter().map(|s| s.to_string()).collect(),
            remote: remote.iter().map(|s| s.to_string()).collect(),
        });
        write_block(&mut out, local, remote);
        out_lines += local.len() + remote.len() + 3;
        pos = hunk.base.end;
    }
    for line in &primary_lines[pos..] {
        out.push_str(line);
    }

    let conflict_count = regions.len();
    MergeResult {
        content: out,
        has_conflicts: conflict_count > 0,
        conflict_count,
        regions,
    }
}
