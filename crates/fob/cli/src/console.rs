//! Operator input: commands typed at the prompt and answers to questions

use std::io::BufRead;
use std::thread;

use async_trait::async_trait;
use crossbeam_channel::{Receiver, Sender, unbounded};
use fob_provision::{Fob, Operator};
use tokio::sync::oneshot;
use tracing::debug;

/// A command typed by the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Input {
    Init,
    Verify,
    Stop,
    List,
    Upload,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Input {
    pub(crate) fn parse(line: &str) -> Self {
        match line.trim().to_ascii_lowercase().as_str() {
            "" => Self::Empty,
            "init" | "i" => Self::Init,
            "verify" | "v" => Self::Verify,
            "stop" | "s" => Self::Stop,
            "list" | "ls" => Self::List,
            "upload" | "u" => Self::Upload,
            "help" | "h" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

pub(crate) const HELP: &str = "\
Commands:
  init    provision every fob tapped on the reader
  verify  check the key of every fob tapped on the reader
  stop    return to idle
  list    show all known fobs
  upload  upload every initialized fob not yet registered
  quit    upload what is pending and exit";

/// Whether an answer line means yes
pub(crate) fn is_yes(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Lines read from stdin; the channel closes at end of input
pub(crate) fn stdin_lines() -> Receiver<String> {
    let (sender, receiver) = unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if sender.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Stopped reading stdin");
                    break;
                }
            }
        }
    });
    receiver
}

/// A yes/no question waiting for the next input line
#[derive(Debug)]
pub(crate) struct Prompt {
    pub(crate) question: String,
    reply: oneshot::Sender<bool>,
}

impl Prompt {
    /// The asking side stopped waiting, for instance because the pipeline
    /// closed
    pub(crate) fn is_stale(&self) -> bool {
        self.reply.is_closed()
    }

    pub(crate) fn answer(self, yes: bool) {
        // The asking task may have gone away; nothing to do then
        let _ = self.reply.send(yes);
    }
}

/// Asks questions through the console loop
#[derive(Debug, Clone)]
pub(crate) struct ConsoleOperator {
    prompts: Sender<Prompt>,
}

impl ConsoleOperator {
    pub(crate) fn new() -> (Self, Receiver<Prompt>) {
        let (prompts, receiver) = unbounded();
        (Self { prompts }, receiver)
    }

    async fn ask(&self, question: String) -> bool {
        let (reply, answer) = oneshot::channel();
        if self.prompts.send(Prompt { question, reply }).is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    async fn confirm_retry(&self, fob: &Fob, message: &str) -> bool {
        self.ask(format!(
            "Upload of {} failed: {message}. Retry?",
            fob.display_number()
        ))
        .await
    }

    async fn confirm_upload(&self, fob: &Fob) -> bool {
        self.ask(format!(
            "{} is initialized but not uploaded. Upload now?",
            fob.display_number()
        ))
        .await
    }

    async fn confirm_batch(&self, pending: &[String], failures: Option<&str>) -> bool {
        let question = match failures {
            Some(failures) => format!("Some uploads failed:\n{failures}\nTry again?"),
            None => format!(
                "{} fob(s) are not uploaded:\n{}\nUpload them now?",
                pending.len(),
                pending.join("\n")
            ),
        };
        self.ask(question).await
    }
}
