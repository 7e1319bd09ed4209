//! Text rendering for bucket log files. Kept free of IO so the format
//! can be swapped without touching the pipeline.

use crate::model::Message;

/// Render one message block: a header naming the resolved author, the
/// author id and the RFC 3339 timestamp, the body when non-empty, and
/// one reference line per attachment.
pub fn message_block(msg: &Message, author: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} <{}>: {}\n",
        author,
        msg.user,
        msg.time.to_rfc3339()
    ));
    if !msg.text.is_empty() {
        out.push_str(&msg.text);
        out.push('\n');
    }
    for file in &msg.files {
        if file.name == file.title {
            out.push_str(&format!("<{}|{}>\n", file.id, file.name));
        } else {
            out.push_str(&format!("<{}|{}|{}>\n", file.id, file.name, file.title));
        }
    }
    out
}

/// Render a reply nested under its parent: every line of the plain block
/// gains a "> " prefix.
pub fn reply_block(msg: &Message, author: &str) -> String {
    let mut out = String::new();
    for line in message_block(msg, author).lines() {
        out.push_str("> ");
        out.push_str(line);
        out.push('\n');
    }
    out
}
