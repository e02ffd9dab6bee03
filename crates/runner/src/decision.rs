//! Accept/reject decisions for interactive snapshot updates

use async_trait::async_trait;
use similar::TextDiff;
use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Stdin};

use storyshots_common::StoryKey;

/// Outcome of reviewing one changed snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// A changed story awaiting a decision
#[derive(Debug, Clone)]
pub struct SnapshotReview<'a> {
    pub key: &'a StoryKey,
    pub recorded: &'a str,
    pub rendered: &'a str,
}

impl SnapshotReview<'_> {
    pub fn diff(&self) -> String {
        unified_diff(self.recorded, self.rendered)
    }
}

/// Unified line diff from the recorded snapshot to the rendered output
pub fn unified_diff(recorded: &str, rendered: &str) -> String {
    TextDiff::from_lines(recorded, rendered)
        .unified_diff()
        .context_radius(3)
        .header("snapshot", "rendered")
        .to_string()
}

/// Where interactive decisions come from.
///
/// The runner awaits exactly one decision per differing story.
#[async_trait]
pub trait DecisionSource: Send {
    async fn decide(&mut self, review: &SnapshotReview<'_>) -> Decision;
}

/// Prompts on stderr and reads `y`/`n` answers, one line per review.
///
/// The reader lives as long as the prompt so answers typed ahead or piped
/// in are kept for later reviews.
#[derive(Debug)]
pub struct TerminalPrompt<R = Stdin> {
    input: BufReader<R>,
}

impl TerminalPrompt<Stdin> {
    pub fn new() -> Self {
        Self::with_input(tokio::io::stdin())
    }
}

impl Default for TerminalPrompt<Stdin> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: AsyncRead + Unpin + Send> TerminalPrompt<R> {
    /// Read answers from `input` instead of stdin
    pub fn with_input(input: R) -> Self {
        Self {
            input: BufReader::new(input),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> DecisionSource for TerminalPrompt<R> {
    async fn decide(&mut self, review: &SnapshotReview<'_>) -> Decision {
        let mut stderr = tokio::io::stderr();
        let prompt = format!(
            "\n{}\n{}Update snapshot for '{}'? [y/N] ",
            review.key,
            review.diff(),
            review.key
        );
        if stderr.write_all(prompt.as_bytes()).await.is_err() {
            return Decision::Reject;
        }
        let _ = stderr.flush().await;

        let mut line = String::new();
        match self.input.read_line(&mut line).await {
            Ok(_) => parse_answer(&line),
            Err(_) => Decision::Reject,
        }
    }
}

fn parse_answer(line: &str) -> Decision {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Decision::Accept,
        _ => Decision::Reject,
    }
}

/// Replays a fixed list of decisions; rejects once exhausted
#[derive(Debug, Default)]
pub struct ScriptedDecisions {
    queue: VecDeque<Decision>,
    reviewed: Vec<StoryKey>,
}

impl ScriptedDecisions {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            queue: decisions.into_iter().collect(),
            reviewed: Vec::new(),
        }
    }

    /// Stories presented for review so far
    pub fn reviewed(&self) -> &[StoryKey] {
        &self.reviewed
    }
}

#[async_trait]
impl DecisionSource for ScriptedDecisions {
    async fn decide(&mut self, review: &SnapshotReview<'_>) -> Decision {
        self.reviewed.push(review.key.clone());
        self.queue.pop_front().unwrap_or(Decision::Reject)
    }
}
