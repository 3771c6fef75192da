use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use flowbot_core::traits::AiDelegate;
use flowbot_core::AiReply;

/// AI delegate that plays back canned replies in order and records what it was asked.
/// Once the script runs out it keeps answering with the last reply.
pub struct ScriptedDelegate {
    script: Mutex<VecDeque<AiReply>>,
    last: Mutex<AiReply>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedDelegate {
    pub fn new(replies: Vec<AiReply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            last: Mutex::new(AiReply::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always(reply: AiReply) -> Self {
        Self::new(vec![reply])
    }

    /// `(prompt, user_text)` pairs, oldest first.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl AiDelegate for ScriptedDelegate {
    fn generate_reply(&self, prompt: &str, user_text: &str) -> BoxFuture<'_, AiReply> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((prompt.to_string(), user_text.to_string()));
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let reply = match next {
            Some(reply) => {
                if let Ok(mut last) = self.last.lock() {
                    *last = reply.clone();
                }
                reply
            }
            None => self.last.lock().map(|l| l.clone()).unwrap_or_default(),
        };
        Box::pin(async move { reply })
    }
}
