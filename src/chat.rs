//! An interactive conversation over [`Router::converse`].
//!
//! Besides utterances, a session understands three words of its own:
//! `exit`/`quit` end it, `clear` forgets the conversation so far and
//! `sources` toggles whether answers list their documents.

use tracing::debug;

use crate::{
    collaborators::Turn,
    error::Result,
    router::{Outcome, Routed, Router},
};

/// What one line of input did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStep {
    Exit,
    Cleared,
    SourcesShown(bool),
    /// Blank input.
    Skipped,
    Routed(Routed),
}

#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    history: Vec<Turn>,
    show_sources: bool,
}

impl ChatSession {
    pub fn new(show_sources: bool) -> Self {
        Self {
            history: Vec::new(),
            show_sources,
        }
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn show_sources(&self) -> bool {
        self.show_sources
    }

    /// Handle one line of input.
    ///
    /// Generated replies are remembered and passed to later turns.
    /// Commands, collection changes and failed turns leave the history
    /// alone.
    pub async fn step(
        &mut self,
        router: &Router,
        line: &str,
    ) -> Result<ChatStep> {
        let line = line.trim();
        match line.to_lowercase().as_str() {
            "" => return Ok(ChatStep::Skipped),
            "exit" | "quit" => return Ok(ChatStep::Exit),
            "clear" => {
                self.history.clear();
                return Ok(ChatStep::Cleared);
            }
            "sources" => {
                self.show_sources = !self.show_sources;
                return Ok(ChatStep::SourcesShown(self.show_sources));
            }
            _ => {}
        }

        let routed = router.converse(line, &self.history).await?;
        if let Outcome::Reply { text } | Outcome::Answer { text, .. } =
            &routed.outcome
        {
            self.history.push(Turn::user(line));
            self.history.push(Turn::assistant(text.clone()));
        }

        debug!(
            turns = self.history.len(),
            intent = %routed.intent.kind(),
            "chat turn"
        );
        Ok(ChatStep::Routed(routed))
    }
}
