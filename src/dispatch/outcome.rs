//! What a handler tells the dispatch loop.

use crate::dispatch::reply::{IntoReply, Reply};

/// Result type returned by every route action.
///
/// `Err` is a genuine failure and ends the request with a 500; control flow
/// (fallthrough, redirect) is expressed through `Outcome`.
pub type HandlerResult = anyhow::Result<Outcome>;

/// A handler's decision.
#[derive(Debug)]
pub enum Outcome {
    /// Finalize the response with this reply.
    Respond(Reply),
    /// Not the right handler after all; keep scanning as if it did not exist.
    Fallthrough(Option<String>),
    /// Re-run matching from the top against a new request target.
    Redirect(String),
}

impl Outcome {
    pub fn respond(reply: impl IntoReply) -> Self {
        Outcome::Respond(reply.into_reply())
    }

    pub fn fallthrough() -> Self {
        Outcome::Fallthrough(None)
    }

    pub fn fallthrough_because(reason: impl Into<String>) -> Self {
        Outcome::Fallthrough(Some(reason.into()))
    }

    pub fn redirect(target: impl Into<String>) -> Self {
        Outcome::Redirect(target.into())
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Respond(_) => "respond",
            Outcome::Fallthrough(_) => "fallthrough",
            Outcome::Redirect(_) => "redirect",
        }
    }
}

impl From<Reply> for Outcome {
    fn from(reply: Reply) -> Self {
        Outcome::Respond(reply)
    }
}
