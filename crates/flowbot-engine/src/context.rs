use flowbot_core::{MediaItem, ResumePoint};

use crate::response::ButtonPayload;

/// A side effect an `action` node asked for. The engine records it; running
/// it is someone else's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAction {
    pub node_id: String,
    pub method: String,
    pub url: String,
}

/// Per-request scratch state for one run of the step loop.
#[derive(Debug)]
pub struct ExecutionContext<'a> {
    pub user_text: &'a str,
    /// True when the run began at the trigger rather than a paused node.
    pub started_fresh: bool,
    resume: Option<String>,
    pub messages: Vec<String>,
    pub media: Vec<MediaItem>,
    pub buttons: Option<ButtonPayload>,
    pub actions: Vec<RecordedAction>,
    pub step: usize,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(user_text: &'a str, resume: &ResumePoint) -> Self {
        Self {
            user_text,
            started_fresh: resume.is_fresh(),
            resume: resume.awaiting().map(str::to_string),
            messages: Vec::new(),
            media: Vec::new(),
            buttons: None,
            actions: Vec::new(),
            step: 0,
        }
    }

    /// True exactly once: the first time the paused node is reached in this run.
    pub fn take_resume(&mut self, node_id: &str) -> bool {
        if self.resume.as_deref() == Some(node_id) {
            self.resume = None;
            true
        } else {
            false
        }
    }

    pub fn push_text(&mut self, text: &str) {
        if !text.is_empty() {
            self.messages.push(text.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_is_consumed_once() {
        let resume = ResumePoint::AwaitingNode("b".into());
        let mut ctx = ExecutionContext::new("yes", &resume);
        assert!(!ctx.started_fresh);
        assert!(!ctx.take_resume("other"));
        assert!(ctx.take_resume("b"));
        assert!(!ctx.take_resume("b"));
    }

    #[test]
    fn test_empty_text_not_accumulated() {
        let mut ctx = ExecutionContext::new("", &ResumePoint::Fresh);
        ctx.push_text("");
        ctx.push_text("hi");
        assert_eq!(ctx.messages, vec!["hi"]);
    }
}
