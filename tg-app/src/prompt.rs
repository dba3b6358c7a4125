//! Terminal confirmer: asks on stderr, answers from stdin.

use async_trait::async_trait;
use tg_orchestrator::{ConfirmationChoice, ConfirmationPrompt, Confirmer, OrchestratorError};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::Mutex;

pub struct TerminalConfirmer<R> {
    lines: Mutex<Lines<BufReader<R>>>,
}

impl TerminalConfirmer<tokio::io::Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

impl<R: AsyncRead + Unpin> TerminalConfirmer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: Mutex::new(BufReader::new(reader).lines()),
        }
    }
}

fn parse_answer(answer: &str) -> Option<ConfirmationChoice> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(ConfirmationChoice::AllowOnce),
        "a" | "always" => Some(ConfirmationChoice::AllowAlwaysThisSession),
        "n" | "no" | "" => Some(ConfirmationChoice::Deny),
        _ => None,
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> Confirmer for TerminalConfirmer<R> {
    async fn confirm(
        &self,
        prompt: &ConfirmationPrompt,
    ) -> tg_orchestrator::Result<ConfirmationChoice> {
        let mut lines = self.lines.lock().await;
        loop {
            eprintln!("{}", prompt.description);
            eprint!("allow {}? [y]es once / [a]lways this session / [n]o: ", prompt.tool_name);
            let line = lines
                .next_line()
                .await
                .map_err(|e| OrchestratorError::Confirmation(e.to_string()))?;
            let Some(line) = line else {
                tracing::info!(tool_name = %prompt.tool_name, "stdin closed; denying");
                return Ok(ConfirmationChoice::Deny);
            };
            match parse_answer(&line) {
                Some(choice) => return Ok(choice),
                None => eprintln!("please answer y, a or n"),
            }
        }
    }
}
