//! Conflict prompting and resolution.

use compact_str::CompactString;
use docshelf_core::{BoxFuture, Entity};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// How to resolve title conflicts at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConflictResolution {
    /// Replace every conflicting entity at the destination.
    OverwriteAll,
    /// Leave conflicting items where they are.
    #[default]
    SkipConflicting,
    /// Abort the whole transfer.
    Cancel,
}

impl std::fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OverwriteAll => write!(f, "Overwrite"),
            Self::SkipConflicting => write!(f, "Skip"),
            Self::Cancel => write!(f, "Cancel"),
        }
    }
}

/// The question put to the user when items collide at the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictPrompt {
    /// Source items whose titles are taken at the destination.
    pub conflicts: Vec<Entity>,
    /// Title of the destination folder.
    pub folder_title: CompactString,
}

impl ConflictPrompt {
    /// Create a prompt for the given conflicts.
    pub fn new(conflicts: Vec<Entity>, folder_title: impl Into<CompactString>) -> Self {
        Self {
            conflicts,
            folder_title: folder_title.into(),
        }
    }

    /// Check whether the prompt is about a single item.
    pub fn is_single(&self) -> bool {
        self.conflicts.len() == 1
    }

    /// The message shown to the user.
    pub fn message(&self) -> String {
        match self.conflicts.as_slice() {
            [item] => format!(
                "The item with the name '{}' already exists in the folder '{}'.",
                item.title, self.folder_title
            ),
            items => format!(
                "{} items with the same name already exist in the folder '{}'. Overwrite the items?",
                items.len(),
                self.folder_title
            ),
        }
    }
}

/// Decides how conflicts are resolved, usually by asking the user.
pub trait ConflictResolver: Send + Sync {
    fn resolve<'a>(&'a self, prompt: &'a ConflictPrompt) -> BoxFuture<'a, ConflictResolution>;
}

impl<F> ConflictResolver for F
where
    F: Fn(&ConflictPrompt) -> ConflictResolution + Send + Sync,
{
    fn resolve<'a>(&'a self, prompt: &'a ConflictPrompt) -> BoxFuture<'a, ConflictResolution> {
        let resolution = self(prompt);
        Box::pin(async move { resolution })
    }
}

/// Always answers with the same resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedResolver(pub ConflictResolution);

impl ConflictResolver for FixedResolver {
    fn resolve<'a>(&'a self, _prompt: &'a ConflictPrompt) -> BoxFuture<'a, ConflictResolution> {
        let resolution = self.0;
        Box::pin(async move { resolution })
    }
}

/// A pending conflict question delivered to the UI.
#[derive(Debug)]
pub struct ConflictRequest {
    pub prompt: ConflictPrompt,
    reply: oneshot::Sender<ConflictResolution>,
}

impl ConflictRequest {
    /// Answer the question. The planner resumes once this is called.
    pub fn respond(self, resolution: ConflictResolution) {
        let _ = self.reply.send(resolution);
    }
}

/// Forwards prompts over a channel and waits for the answer.
///
/// A request that is dropped without a response counts as
/// [`ConflictResolution::Cancel`].
#[derive(Debug, Clone)]
pub struct ChannelResolver {
    tx: mpsc::Sender<ConflictRequest>,
}

impl ChannelResolver {
    /// Create a resolver and the receiving end the UI listens on.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ConflictRequest>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl ConflictResolver for ChannelResolver {
    fn resolve<'a>(&'a self, prompt: &'a ConflictPrompt) -> BoxFuture<'a, ConflictResolution> {
        Box::pin(async move {
            let (reply, answer) = oneshot::channel();
            let request = ConflictRequest {
                prompt: prompt.clone(),
                reply,
            };
            if self.tx.send(request).await.is_err() {
                debug!("Conflict prompt receiver is gone");
                return ConflictResolution::Cancel;
            }
            answer.await.unwrap_or(ConflictResolution::Cancel)
        })
    }
}
