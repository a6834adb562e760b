//! Shortened renderings of plugin answers for delivery.

use chatrelay_config::OrchestratorConfig;
use chatrelay_core::plugin::PluginKind;

/// Thresholds for shortening plugin answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Answers up to this many characters are shown whole.
    pub threshold: usize,
    /// Longest single line kept, in characters.
    pub line_limit: usize,
    pub head_lines: usize,
    pub tail_lines: usize,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            threshold: 720,
            line_limit: 120,
            head_lines: 3,
            tail_lines: 3,
        }
    }
}

impl SnapshotPolicy {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            threshold: config.snapshot_threshold,
            line_limit: config.snapshot_line_limit,
            head_lines: config.snapshot_head_lines,
            tail_lines: config.snapshot_tail_lines,
        }
    }

    /// Shorten `answer` if it is over the threshold.
    ///
    /// Search answers keep only their `[name](url)` link lines. Everything
    /// else keeps the first and last few lines around an elision marker.
    /// Kept lines are clipped to `line_limit`.
    pub fn apply(&self, answer: &str, kind: PluginKind) -> String {
        if answer.chars().count() <= self.threshold {
            return answer.to_string();
        }

        let lines: Vec<&str> = answer.lines().collect();

        if kind == PluginKind::Search {
            let links: Vec<String> = lines
                .iter()
                .filter(|line| line.contains("]("))
                .map(|line| self.clip_line(line))
                .collect();
            if !links.is_empty() {
                return links.join("\n");
            }
        }

        let keep = self.head_lines + self.tail_lines;
        if lines.len() <= keep {
            return lines
                .iter()
                .map(|line| self.clip_line(line))
                .collect::<Vec<_>>()
                .join("\n");
        }

        let omitted = lines.len() - keep;
        let mut out: Vec<String> = lines[..self.head_lines]
            .iter()
            .map(|line| self.clip_line(line))
            .collect();
        out.push(format!("... ({omitted} more lines)"));
        out.extend(
            lines[lines.len() - self.tail_lines..]
                .iter()
                .map(|line| self.clip_line(line)),
        );
        out.join("\n")
    }

    fn clip_line(&self, line: &str) -> String {
        if line.chars().count() <= self.line_limit {
            return line.to_string();
        }
        let mut clipped: String = line.chars().take(self.line_limit.saturating_sub(3)).collect();
        clipped.push_str("...");
        clipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize, width: usize) -> String {
        (0..n)
            .map(|i| format!("{i:0>width$}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn short_answers_pass_through() {
        let policy = SnapshotPolicy::default();
        let answer = "42\nsecond line";
        assert_eq!(policy.apply(answer, PluginKind::Knowledge), answer);
        assert_eq!(policy.apply(answer, PluginKind::Search), answer);
    }

    #[test]
    fn search_keeps_link_lines() {
        let policy = SnapshotPolicy::default();
        let mut answer = String::new();
        for i in 0..5 {
            answer.push_str(&format!("[Result {i}](https://example.com/{i})\n"));
            answer.push_str(&"snippet text ".repeat(20));
            answer.push('\n');
        }
        let snap = policy.apply(&answer, PluginKind::Search);
        assert_eq!(snap.lines().count(), 5);
        assert!(snap.lines().all(|l| l.starts_with("[Result ")));
    }

    #[test]
    fn search_without_links_falls_back_to_head_tail() {
        let policy = SnapshotPolicy::default();
        let answer = numbered(100, 10);
        let snap = policy.apply(&answer, PluginKind::Search);
        assert_eq!(snap.lines().count(), 7);
    }

    #[test]
    fn head_and_tail_around_elision() {
        let policy = SnapshotPolicy::default();
        let answer = numbered(100, 10);
        let snap = policy.apply(&answer, PluginKind::Code);
        let lines: Vec<&str> = snap.lines().collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], "0000000000");
        assert_eq!(lines[2], "0000000002");
        assert_eq!(lines[3], "... (94 more lines)");
        assert_eq!(lines[6], "0000000099");
    }

    #[test]
    fn long_lines_are_clipped() {
        let policy = SnapshotPolicy::default();
        let answer = "x".repeat(1000);
        let snap = policy.apply(&answer, PluginKind::Fetch);
        assert_eq!(snap.chars().count(), 120);
        assert!(snap.ends_with("..."));
    }

    #[test]
    fn custom_thresholds() {
        let policy = SnapshotPolicy {
            threshold: 10,
            line_limit: 8,
            head_lines: 1,
            tail_lines: 1,
        };
        let snap = policy.apply("first line\nmiddle\nlast line", PluginKind::Knowledge);
        assert_eq!(snap, "first...\n... (1 more lines)\nlast ...");
    }
}
