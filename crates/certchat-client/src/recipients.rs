//! `@name` addressing for outbound chat lines.
//!
//! `"@alice, @bob see you at 5"` goes to `alice` and `bob` with body
//! `"see you at 5"`. A word is a recipient word when, ignoring trailing
//! commas, it is one or more `@name` tokens joined by commas. Recipient words
//! may appear anywhere in the line; everything else is the body, with runs of
//! whitespace collapsed to a single space.

use crate::error::{ClientError, ClientResult};

/// A parsed outbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub recipients: Vec<String>,
    pub body: String,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Names in `word` if the whole word is an `@a,@b,` list.
fn recipient_word(word: &str) -> Option<Vec<&str>> {
    let word = word.trim_end_matches(',');
    if word.is_empty() {
        return None;
    }
    word.split(',')
        .map(|token| {
            let name = token.strip_prefix('@')?;
            (!name.is_empty() && name.chars().all(is_name_char)).then_some(name)
        })
        .collect()
}

/// Split a raw input line into recipients and body.
///
/// Fails with [`ClientError::NoRecipients`] when the line names nobody, so
/// nothing is sent.
pub fn parse_line(line: &str) -> ClientResult<Outgoing> {
    let mut recipients: Vec<String> = Vec::new();
    let mut body: Vec<&str> = Vec::new();

    for word in line.split_whitespace() {
        match recipient_word(word) {
            Some(names) => {
                for name in names {
                    if !recipients.iter().any(|r| r == name) {
                        recipients.push(name.to_string());
                    }
                }
            }
            None => body.push(word),
        }
    }

    if recipients.is_empty() {
        return Err(ClientError::NoRecipients);
    }
    Ok(Outgoing {
        recipients,
        body: body.join(" "),
    })
}
