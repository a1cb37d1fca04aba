//! Prompt assembly.
//!
//! ```text
//! <system text>
//!
//! Conversation so far:
//! User: ...
//! Assistant: ...
//!
//! Sources:
//! [1] <title> (<url>)
//! <passage>
//!
//! Question: <query>
//! Answer:
//! ```
use siteqa_core::config::PromptSettings;
use siteqa_core::types::RankedCandidate;
use tracing::debug;

use crate::gateway::truncate_chars;
use crate::session::Turn;

const SOURCES_HEADER: &str = "Sources:";
const QUESTION_PREFIX: &str = "Question: ";
const UNGROUNDED_SYSTEM: &str =
    "No relevant website content was found for this question. Answer briefly from general knowledge, \
     and say that the answer is not based on the organization's website.";

pub struct GroundedPrompt {
    pub text: String,
    /// How many of the supplied sources fit in the context budget. Source `[n]`
    /// is `sources[n - 1]`.
    pub sources_used: usize,
}

/// Prompt over the gated sources, numbered `[1]..`, in rank order. The whole
/// prompt stays within `max_chars`.
///
/// The question is cut to `max_query_chars` and always ends the prompt.
/// Sources are added whole until the next one would exceed
/// `max_context_chars`; the first source is always included, truncated if it
/// is larger on its own. History fills what is left, newest turns first.
pub fn grounded(
    settings: &PromptSettings,
    max_chars: usize,
    query: &str,
    history: &[Turn],
    sources: &[RankedCandidate],
) -> GroundedPrompt {
    let tail = question_block(query, settings.max_query_chars);
    let mut room = max_chars.saturating_sub(tail.chars().count());
    let system = system_block(settings.system.trim(), room);
    room = room.saturating_sub(system.chars().count());

    let header_len = SOURCES_HEADER.chars().count() + 1;
    let budget = settings.max_context_chars.min(room.saturating_sub(header_len));
    let (context, used) = sources_block(sources, budget);
    room = room.saturating_sub(header_len + context.chars().count());

    let mut text = system;
    text.push_str(&history_block(history, room));
    text.push_str(SOURCES_HEADER);
    text.push('\n');
    text.push_str(&context);
    text.push_str(&tail);
    GroundedPrompt { text, sources_used: used }
}

/// Prompt for the fallback path: history and question, no sources.
pub fn ungrounded(settings: &PromptSettings, max_chars: usize, query: &str, history: &[Turn]) -> String {
    let tail = question_block(query, settings.max_query_chars);
    let mut room = max_chars.saturating_sub(tail.chars().count());
    let mut text = system_block(UNGROUNDED_SYSTEM, room);
    room = room.saturating_sub(text.chars().count());
    text.push_str(&history_block(history, room));
    text.push_str(&tail);
    text
}

fn system_block(system: &str, room: usize) -> String {
    format!("{}\n\n", truncate_chars(system, room.saturating_sub(2)))
}

fn sources_block(sources: &[RankedCandidate], budget: usize) -> (String, usize) {
    let mut context = String::new();
    let mut spent = 0;
    let mut used = 0;
    for (i, rc) in sources.iter().enumerate() {
        let chunk = rc.chunk();
        let header = format!("[{}] {} ({})\n", i + 1, chunk.title, chunk.source_url);
        let header_len = header.chars().count() + 2;
        let block_len = header_len + chunk.text.chars().count();
        if spent + block_len > budget {
            if used == 0 && header_len < budget {
                context.push_str(&header);
                context.push_str(truncate_chars(&chunk.text, budget - header_len));
                context.push_str("\n\n");
                used = 1;
            }
            break;
        }
        context.push_str(&header);
        context.push_str(&chunk.text);
        context.push_str("\n\n");
        spent += block_len;
        used += 1;
    }
    (context, used)
}

/// The most recent turns that fit in `room`, oldest first.
fn history_block(history: &[Turn], room: usize) -> String {
    const HEADER: &str = "Conversation so far:\n";
    let mut spent = HEADER.len() + 1;
    let mut kept = Vec::new();
    for turn in history.iter().rev() {
        let rendered = format!("User: {}\nAssistant: {}\n", turn.query.trim(), turn.response.trim());
        let len = rendered.chars().count();
        if spent + len > room {
            break;
        }
        spent += len;
        kept.push(rendered);
    }
    if kept.is_empty() {
        return String::new();
    }
    if kept.len() < history.len() {
        debug!("Prompt keeps {} of {} history turns", kept.len(), history.len());
    }
    let mut text = String::from(HEADER);
    for rendered in kept.iter().rev() {
        text.push_str(rendered);
    }
    text.push('\n');
    text
}

fn question_block(query: &str, max_query_chars: usize) -> String {
    let query = query.trim();
    let cut = truncate_chars(query, max_query_chars);
    if cut.len() < query.len() {
        debug!("Question cut to {} characters in the prompt", max_query_chars);
    }
    format!("{QUESTION_PREFIX}{}\nAnswer:", cut.trim_end())
}

/// Passage text of source `[1]` in a prompt built by [`grounded`].
pub fn first_source(prompt: &str) -> Option<&str> {
    let (_, after) = prompt.split_once(&format!("\n{SOURCES_HEADER}\n"))?;
    let block = after.strip_prefix("[1] ")?;
    let (_, body) = block.split_once('\n')?;
    let end = body.find("\n\n").unwrap_or(body.len());
    let passage = body[..end].trim();
    (!passage.is_empty()).then_some(passage)
}
