//! Line-based terminal prompt for agent questions.

use async_trait::async_trait;
use colored::*;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;

use super::AnswerSource;
use crate::error::{EngineError, Result};
use crate::runtime::QuestionInfo;

const CANCELLED: &str = "User cancelled question";

/// Prompts on a writer and reads answers line by line from a reader.
///
/// Options are numbered from 1. Multi-select questions take comma-separated
/// numbers. Free text is accepted when the question allows custom input. An
/// empty line or end of input cancels.
pub struct InteractiveAnswers<R, W> {
    io: Mutex<(R, W)>,
}

impl InteractiveAnswers<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> InteractiveAnswers<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }
}

fn render_question(question: &QuestionInfo) -> String {
    let mut text = format!("\n{} {}\n", "?".cyan().bold(), question.prompt_text().bold());
    for (i, option) in question.options.iter().enumerate() {
        match &option.description {
            Some(desc) if !desc.is_empty() => text.push_str(&format!("  {}) {} - {}\n", i + 1, option.label, desc.dimmed())),
            _ => text.push_str(&format!("  {}) {}\n", i + 1, option.label)),
        }
    }
    if question.multiple && !question.options.is_empty() {
        text.push_str("  (comma-separated numbers)\n");
    }
    if question.custom {
        text.push_str("  (or type your own answer)\n");
    }
    text.push_str("> ");
    text
}

/// Interpret one input line. `None` means the line was not acceptable.
fn parse_selection(question: &QuestionInfo, line: &str) -> Option<Vec<String>> {
    let pick = |token: &str| -> Option<String> {
        let index: usize = token.trim().parse().ok()?;
        question.options.get(index.checked_sub(1)?).map(|o| o.label.clone())
    };

    let picked: Option<Vec<String>> = if question.multiple {
        line.split(',').map(pick).collect()
    } else {
        pick(line).map(|label| vec![label])
    };

    match picked {
        Some(labels) if !labels.is_empty() => Some(labels),
        _ if question.custom => Some(vec![line.to_string()]),
        _ => None,
    }
}

#[async_trait]
impl<R, W> AnswerSource for InteractiveAnswers<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn answer(&self, questions: &[QuestionInfo]) -> Result<Vec<Vec<String>>> {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;
        let mut answers = Vec::with_capacity(questions.len());

        for question in questions {
            writer.write_all(render_question(question).as_bytes()).await?;
            writer.flush().await?;

            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await? == 0 {
                    return Err(EngineError::Cancelled(CANCELLED.to_string()));
                }
                let line = line.trim();
                if line.is_empty() {
                    return Err(EngineError::Cancelled(CANCELLED.to_string()));
                }
                match parse_selection(question, line) {
                    Some(answer) => {
                        answers.push(answer);
                        break;
                    }
                    None => {
                        writer
                            .write_all(format!("{} pick a listed number\n> ", "Invalid choice:".red()).as_bytes())
                            .await?;
                        writer.flush().await?;
                    }
                }
            }
        }
        Ok(answers)
    }
}
