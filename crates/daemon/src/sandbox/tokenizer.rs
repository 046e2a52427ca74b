//! Command line tokenizer.
//!
//! Splits one line into argument tokens. Whitespace outside quotes separates
//! tokens; single or double quotes group text (including whitespace) and are
//! stripped. There is no escape processing: a backslash never reaches the
//! tokenizer because the security filter rejects it first.

use thiserror::Error;

/// Tokenizer failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A quote was opened and never closed.
    #[error("unterminated {quote} quote")]
    UnterminatedQuote { quote: char },
}

/// Splits `line` into tokens.
///
/// Quoted text joins the surrounding token, so `a"b c"d` yields `ab cd`, and
/// an empty quoted string yields an empty token.
pub fn tokenize(line: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if let Some(q) = quote {
        return Err(ParseError::UnterminatedQuote { quote: q });
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}
