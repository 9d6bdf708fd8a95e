//! Question-answering strategies
//!
//! When the agent raises structured questions mid-session, the coordinator
//! asks an `AnswerSource` for one answer-set per question. Returning
//! `EngineError::Cancelled` makes the coordinator reject the questions and end
//! the session as `blocked`.

mod interactive;
mod recorded;

pub use interactive::InteractiveAnswers;
pub use recorded::{AnswerDecision, AnswerValue, RecordedAnswer, RecordedAnswers};

use async_trait::async_trait;

use crate::error::Result;
use crate::runtime::QuestionInfo;

#[async_trait]
pub trait AnswerSource: Send + Sync {
    /// Answer every question in the batch, in order.
    async fn answer(&self, questions: &[QuestionInfo]) -> Result<Vec<Vec<String>>>;
}
