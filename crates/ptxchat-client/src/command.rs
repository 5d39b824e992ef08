//! Parsing of terminal input lines.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain line: broadcast to everyone.
    Public(String),
    /// `/to <nick> <text>`
    Private { to: String, text: String },
    /// `/history` or `/history <nick>`
    History(Option<String>),
    /// `/quit`
    Quit,
    /// Blank line.
    Nothing,
}

pub fn parse_line(line: &str) -> Result<Command, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(Command::Nothing);
    }
    if !line.starts_with('/') {
        return Ok(Command::Public(line.to_owned()));
    }

    let mut parts = line.splitn(3, ' ');
    let cmd = parts.next().unwrap_or_default().to_lowercase();
    match cmd.as_str() {
        "/to" | "/msg" => {
            let to = parts.next().filter(|s| !s.is_empty());
            let text = parts.next().map(str::trim).filter(|s| !s.is_empty());
            match (to, text) {
                (Some(to), Some(text)) => Ok(Command::Private {
                    to: to.to_owned(),
                    text: text.to_owned(),
                }),
                _ => Err("usage: /to <nick> <text>".to_owned()),
            }
        }
        "/history" => Ok(Command::History(
            parts.next().map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned),
        )),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("unknown command {other}")),
    }
}
