//! Line-oriented presentation surface on stderr/stdin.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use parley_coordinator::{
    ContentItem, PresentationSession, PresentationSurface, SessionEvents, SessionRequest,
};
use tracing::debug;

/// Surface that prints each prompt to stderr and reads one reply line from
/// stdin on a helper thread.
#[derive(Debug, Default)]
pub(crate) struct TerminalSurface;

struct TerminalSession {
    closed: Arc<AtomicBool>,
}

impl PresentationSession for TerminalSession {
    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl PresentationSurface for TerminalSurface {
    fn create(
        &mut self,
        request: SessionRequest,
        events: SessionEvents,
    ) -> Result<Box<dyn PresentationSession>> {
        let mut stderr = io::stderr().lock();
        stderr
            .write_all(render_session_prompt(&request).as_bytes())
            .and_then(|()| stderr.flush())
            .context("failed to write prompt to terminal")?;

        let closed = Arc::new(AtomicBool::new(false));
        let reader_closed = Arc::clone(&closed);
        let options = request.options;
        thread::Builder::new()
            .name("parley-terminal-input".to_string())
            .spawn(move || {
                let mut line = String::new();
                let read = io::stdin().lock().read_line(&mut line);
                if reader_closed.load(Ordering::SeqCst) {
                    debug!(
                        reason_code = "terminal_input_after_close",
                        task_id = %events.task_id(),
                        "session closed before input arrived"
                    );
                    return;
                }
                match read {
                    Ok(0) | Err(_) => events.closed(),
                    Ok(_) => events.feedback_provided(parse_terminal_reply(&line, &options)),
                }
            })
            .context("failed to spawn terminal input thread")?;

        Ok(Box::new(TerminalSession { closed }))
    }
}

pub(crate) fn render_session_prompt(request: &SessionRequest) -> String {
    let mut rendered = format!("\n[{}]\n{}\n", request.task_id, request.prompt.trim_end());
    for (index, option) in request.options.iter().enumerate() {
        rendered.push_str(&format!("  {}. {}\n", index + 1, option));
    }
    rendered.push_str(if request.options.is_empty() {
        "reply (empty line to skip, @path to reference a file): "
    } else {
        "reply (number(s), free text, empty line to skip, @path to reference a file): "
    });
    rendered
}

/// Interprets one reply line.
///
/// A line made only of option numbers (`2`, `1,3`, `1 3`) selects those
/// options; `@path` references a file; anything else is sent as text. An
/// empty line yields no content.
pub(crate) fn parse_terminal_reply(line: &str, options: &[String]) -> Vec<ContentItem> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }
    if let Some(path) = line.strip_prefix('@') {
        let path = path.trim();
        if !path.is_empty() {
            let display_name = Path::new(path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string());
            return vec![ContentItem::file_reference(display_name, path)];
        }
    }
    if let Some(selected) = selected_options(line, options) {
        return selected.into_iter().map(ContentItem::text).collect();
    }
    vec![ContentItem::text(line)]
}

fn selected_options(line: &str, options: &[String]) -> Option<Vec<String>> {
    if options.is_empty() {
        return None;
    }
    let mut selected = Vec::new();
    for token in line
        .split(|character: char| character == ',' || character.is_whitespace())
        .filter(|token| !token.is_empty())
    {
        let index = token.parse::<usize>().ok()?;
        let option = options.get(index.checked_sub(1)?)?;
        if !selected.contains(option) {
            selected.push(option.clone());
        }
    }
    (!selected.is_empty()).then_some(selected)
}
