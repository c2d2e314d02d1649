//! Terminal prompter and progress output.

use std::io::{self, BufRead, IsTerminal, Write};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal,
};
use skyward_engine::{ProgressObserver, PromptError, PromptRequest, Prompter, ValidationError};
use skyward_types::{StepEvent, StepStatus};

/// Asks on stderr and reads answers from stdin; secrets are read without echo.
#[derive(Debug, Default)]
pub struct ConsolePrompter;

impl ConsolePrompter {
    pub fn new() -> Self {
        Self
    }
}

impl Prompter for ConsolePrompter {
    fn ask(&mut self, request: &PromptRequest<'_>) -> Result<String, PromptError> {
        let mut stderr = io::stderr();
        if !request.confirmation
            && let Some(description) = &request.field.description
        {
            writeln!(stderr, "  {description}")?;
        }
        write!(stderr, "{}", prompt_line(request))?;
        stderr.flush()?;

        if request.field.secret && io::stdin().is_terminal() {
            read_masked()
        } else {
            read_line()
        }
    }

    fn reject(&mut self, _request: &PromptRequest<'_>, error: &ValidationError) {
        eprintln!("  {}", error.message);
    }
}

fn prompt_line(request: &PromptRequest<'_>) -> String {
    let prompt = request.field.prompt.trim_end_matches(':');
    if request.confirmation {
        return format!("Confirm {}: ", prompt.to_lowercase());
    }
    match request.default.as_deref() {
        Some(default) if !default.is_empty() && !request.field.secret => format!("{prompt} [{default}]: "),
        _ => format!("{prompt}: "),
    }
}

fn read_line() -> Result<String, PromptError> {
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(PromptError::Interrupted);
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

fn read_masked() -> Result<String, PromptError> {
    let mut secret = String::new();
    let mut stderr = io::stderr();
    {
        let _raw = RawModeGuard::enable()?;
        loop {
            let Event::Key(KeyEvent {
                code, modifiers, kind, ..
            }) = event::read()?
            else {
                continue;
            };
            if kind != KeyEventKind::Press {
                continue;
            }
            match code {
                KeyCode::Enter => break,
                KeyCode::Esc => return Err(PromptError::Interrupted),
                KeyCode::Char('c') | KeyCode::Char('d') if modifiers.contains(KeyModifiers::CONTROL) => {
                    return Err(PromptError::Interrupted);
                }
                KeyCode::Backspace => {
                    if secret.pop().is_some() {
                        write!(stderr, "\u{8} \u{8}")?;
                    }
                }
                KeyCode::Char(character) => {
                    secret.push(character);
                    write!(stderr, "*")?;
                }
                _ => {}
            }
            stderr.flush()?;
        }
    }
    writeln!(stderr)?;
    Ok(secret)
}

/// Prints `[k/N]: label` as each step is reached and its outcome when it ends.
#[derive(Debug, Default)]
pub struct ConsoleObserver;

impl ProgressObserver for ConsoleObserver {
    fn on_event(&mut self, event: &StepEvent) {
        if let Some(line) = progress_line(event) {
            println!("{line}");
        }
    }
}

fn progress_line(event: &StepEvent) -> Option<String> {
    let line = match event.status {
        StepStatus::Pending => format!("[{}/{}]: {}", event.index, event.total, event.label),
        StepStatus::Running => return None,
        StepStatus::Succeeded => "      done".to_string(),
        StepStatus::Skipped => "      already done, skipping".to_string(),
        StepStatus::Failed => match &event.detail {
            Some(detail) => format!("      failed: {detail}"),
            None => "      failed".to_string(),
        },
    };
    Some(line)
}
