pub mod buttons;
pub mod condition;
pub mod context;
pub mod dispatch;
pub mod interpreter;
pub mod response;
pub mod service;
pub mod validate;

pub use context::RecordedAction;
pub use dispatch::Transition;
pub use interpreter::{Interpreter, RunOutcome, SessionWrite};
pub use response::Reply;
pub use service::ConversationService;
pub use validate::diagnose;
