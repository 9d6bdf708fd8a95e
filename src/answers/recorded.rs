//! Pre-recorded answers for non-interactive and reproducible runs.
//!
//! File format:
//!
//! ```json
//! {"answers": [
//!   {"match": "database", "answer": "Postgres"},
//!   {"match": "features", "answer": ["auth", "billing"]}
//! ]}
//! ```

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

use super::AnswerSource;
use crate::error::{EngineError, Result};
use crate::runtime::QuestionInfo;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    One(String),
    Many(Vec<String>),
}

impl AnswerValue {
    fn to_vec(&self) -> Vec<String> {
        match self {
            AnswerValue::One(answer) => vec![answer.clone()],
            AnswerValue::Many(answers) => answers.clone(),
        }
    }
}

/// One recorded entry: a case-insensitive substring and its answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedAnswer {
    #[serde(rename = "match")]
    pub pattern: String,
    pub answer: AnswerValue,
}

#[derive(Debug, Default, Deserialize)]
struct AnswersFile {
    #[serde(default)]
    answers: Vec<RecordedAnswer>,
}

/// How one question was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerDecision {
    pub question: String,
    pub answer: Vec<String>,
    /// Pattern that matched; `None` when the default was used
    pub matched: Option<String>,
}

#[derive(Debug, Default)]
pub struct RecordedAnswers {
    entries: Vec<RecordedAnswer>,
    history: Mutex<Vec<AnswerDecision>>,
}

impl RecordedAnswers {
    pub fn new(entries: Vec<RecordedAnswer>) -> Self {
        Self {
            entries,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read answers file {}: {}", path.display(), e)))?;
        let file: AnswersFile = serde_json::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse answers file {}: {}", path.display(), e)))?;
        info!("Loaded {} recorded answer(s) from {}", file.answers.len(), path.display());
        Ok(Self::new(file.answers))
    }

    /// Every decision made so far, in order.
    pub fn history(&self) -> Vec<AnswerDecision> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    fn decide(&self, question: &QuestionInfo) -> AnswerDecision {
        let haystack = question.prompt_text().to_lowercase();
        let found = self
            .entries
            .iter()
            .find(|entry| haystack.contains(&entry.pattern.to_lowercase()));

        match found {
            Some(entry) => {
                let answer = entry.answer.to_vec();
                info!(
                    "Answered \"{}\" with {:?} (matched \"{}\")",
                    question.question, answer, entry.pattern
                );
                AnswerDecision {
                    question: question.question.clone(),
                    answer,
                    matched: Some(entry.pattern.clone()),
                }
            }
            None => {
                let answer: Vec<String> = question.options.first().map(|o| o.label.clone()).into_iter().collect();
                info!(
                    "No recorded answer for \"{}\", defaulting to {:?}",
                    question.question, answer
                );
                AnswerDecision {
                    question: question.question.clone(),
                    answer,
                    matched: None,
                }
            }
        }
    }
}

#[async_trait]
impl AnswerSource for RecordedAnswers {
    async fn answer(&self, questions: &[QuestionInfo]) -> Result<Vec<Vec<String>>> {
        let decisions: Vec<AnswerDecision> = questions.iter().map(|q| self.decide(q)).collect();
        let answers = decisions.iter().map(|d| d.answer.clone()).collect();
        if let Ok(mut history) = self.history.lock() {
            history.extend(decisions);
        }
        Ok(answers)
    }
}
