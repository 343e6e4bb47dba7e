//! Line diffs between two text blobs.

use serde::Serialize;

/// Lines of context kept around each change when rendering hunks
pub const CONTEXT_LINES: usize = 5;

/// Above this many cells the LCS table is skipped and the whole file is
/// reported as replaced.
const MAX_TABLE_CELLS: usize = 16_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Context,
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub kind: LineKind,
    /// 1-based line number on the old side, if the line exists there
    pub old_line: Option<usize>,
    pub new_line: Option<usize>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileDiff {
    pub old_label: String,
    pub new_label: String,
    pub old_content: String,
    pub new_content: String,
    pub added: usize,
    pub removed: usize,
    pub lines: Vec<DiffLine>,
    /// `---`/`+++`/`@@` rendering with [`CONTEXT_LINES`] of context
    pub unified: String,
}

impl FileDiff {
    pub fn compute(
        old_label: impl Into<String>,
        new_label: impl Into<String>,
        old_content: String,
        new_content: String,
    ) -> Self {
        let old_label = old_label.into();
        let new_label = new_label.into();
        let lines = diff_lines(&old_content, &new_content);
        let added = lines.iter().filter(|l| l.kind == LineKind::Added).count();
        let removed = lines.iter().filter(|l| l.kind == LineKind::Removed).count();
        let unified = render_unified(&old_label, &new_label, &lines, CONTEXT_LINES);

        Self {
            old_label,
            new_label,
            old_content,
            new_content,
            added,
            removed,
            lines,
            unified,
        }
    }

    pub fn is_identical(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Full line-by-line alignment of `old` against `new`.
pub fn diff_lines(old: &str, new: &str) -> Vec<DiffLine> {
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();

    // Trim the common head and tail so the table only covers the changed middle
    let head = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let tail = a[head..]
        .iter()
        .rev()
        .zip(b[head..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let a_mid = &a[head..a.len() - tail];
    let b_mid = &b[head..b.len() - tail];

    let mut out = Vec::with_capacity(a.len().max(b.len()));
    for (i, text) in a[..head].iter().enumerate() {
        out.push(context(i + 1, i + 1, text));
    }

    let mut old_no = head;
    let mut new_no = head;
    for step in align(a_mid, b_mid) {
        match step {
            Step::Keep(text) => {
                old_no += 1;
                new_no += 1;
                out.push(context(old_no, new_no, text));
            }
            Step::Remove(text) => {
                old_no += 1;
                out.push(DiffLine {
                    kind: LineKind::Removed,
                    old_line: Some(old_no),
                    new_line: None,
                    text: text.to_string(),
                });
            }
            Step::Add(text) => {
                new_no += 1;
                out.push(DiffLine {
                    kind: LineKind::Added,
                    old_line: None,
                    new_line: Some(new_no),
                    text: text.to_string(),
                });
            }
        }
    }

    for text in &a[a.len() - tail..] {
        old_no += 1;
        new_no += 1;
        out.push(context(old_no, new_no, text));
    }
    out
}

fn context(old_line: usize, new_line: usize, text: &str) -> DiffLine {
    DiffLine {
        kind: LineKind::Context,
        old_line: Some(old_line),
        new_line: Some(new_line),
        text: text.to_string(),
    }
}

enum Step<'a> {
    Keep(&'a str),
    Remove(&'a str),
    Add(&'a str),
}

/// Longest-common-subsequence alignment. Removals are emitted before
/// additions within a changed run.
fn align<'a>(a: &[&'a str], b: &[&'a str]) -> Vec<Step<'a>> {
    let (n, m) = (a.len(), b.len());
    if n == 0 || m == 0 || (n + 1) * (m + 1) > MAX_TABLE_CELLS {
        let mut steps: Vec<Step<'a>> = a.iter().map(|l| Step::Remove(*l)).collect();
        steps.extend(b.iter().map(|l| Step::Add(*l)));
        return steps;
    }

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let width = m + 1;
    let mut lcs = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i * width + j] = if a[i] == b[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let mut steps = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            steps.push(Step::Keep(a[i]));
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            steps.push(Step::Remove(a[i]));
            i += 1;
        } else {
            steps.push(Step::Add(b[j]));
            j += 1;
        }
    }
    steps.extend(a[i..].iter().map(|l| Step::Remove(*l)));
    steps.extend(b[j..].iter().map(|l| Step::Add(*l)));
    steps
}

fn render_unified(old_label: &str, new_label: &str, lines: &[DiffLine], context: usize) -> String {
    let changed: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.kind != LineKind::Context)
        .map(|(i, _)| i)
        .collect();
    if changed.is_empty() {
        return String::new();
    }

    // Merge change indices into hunk windows [start, end)
    let mut windows: Vec<(usize, usize)> = Vec::new();
    for idx in changed {
        let start = idx.saturating_sub(context);
        let end = (idx + context + 1).min(lines.len());
        match windows.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => windows.push((start, end)),
        }
    }

    let mut out = format!("--- {old_label}\n+++ {new_label}\n");
    for (start, end) in windows {
        let hunk = &lines[start..end];
        let old_count = hunk.iter().filter(|l| l.old_line.is_some()).count();
        let new_count = hunk.iter().filter(|l| l.new_line.is_some()).count();
        let old_start = hunk.iter().find_map(|l| l.old_line).unwrap_or_else(|| {
            lines[..start].iter().rev().find_map(|l| l.old_line).unwrap_or(0)
        });
        let new_start = hunk.iter().find_map(|l| l.new_line).unwrap_or_else(|| {
            lines[..start].iter().rev().find_map(|l| l.new_line).unwrap_or(0)
        });

        out.push_str(&format!(
            "@@ -{old_start},{old_count} +{new_start},{new_count} @@\n"
        ));
        for line in hunk {
            let marker = match line.kind {
                LineKind::Context => ' ',
                LineKind::Added => '+',
                LineKind::Removed => '-',
            };
            out.push(marker);
            out.push_str(&line.text);
            out.push('\n');
        }
    }
    out
}
