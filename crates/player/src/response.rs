use std::fmt;

use crate::error::ProtocolError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckError {
    pub code: u32,
    pub index: u32,
    pub command: String,
    pub message: String,
}

impl fmt::Display for AckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}@{}] {{{}}} {}",
            self.code, self.index, self.command, self.message
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseLine {
    Ok,
    ListOk,
    Ack(AckError),
    Pair { name: String, value: String },
}

pub fn parse_line(line: &str) -> Result<ResponseLine, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line == "OK" {
        return Ok(ResponseLine::Ok);
    }
    if line == "list_OK" {
        return Ok(ResponseLine::ListOk);
    }
    if let Some(rest) = line.strip_prefix("ACK ") {
        return parse_ack(rest)
            .map(ResponseLine::Ack)
            .ok_or_else(|| ProtocolError::Parse(line.to_string()));
    }
    match line.split_once(": ") {
        Some((name, value)) if !name.is_empty() => Ok(ResponseLine::Pair {
            name: name.to_string(),
            value: value.to_string(),
        }),
        _ => Err(ProtocolError::Parse(line.to_string())),
    }
}

/// Returns the protocol version announced by the `OK MPD <version>` greeting.
pub fn parse_greeting(line: &str) -> Result<String, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    line.strip_prefix("OK MPD ")
        .map(|version| version.trim().to_string())
        .filter(|version| !version.is_empty())
        .ok_or_else(|| ProtocolError::Parse(line.to_string()))
}

// [code@index] {command} message
fn parse_ack(rest: &str) -> Option<AckError> {
    let rest = rest.strip_prefix('[')?;
    let (location, rest) = rest.split_once(']')?;
    let (code, index) = location.split_once('@')?;
    let rest = rest.trim_start().strip_prefix('{')?;
    let (command, message) = rest.split_once('}')?;
    Some(AckError {
        code: code.trim().parse().ok()?,
        index: index.trim().parse().ok()?,
        command: command.to_string(),
        message: message.trim_start().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_greeting, parse_line, ResponseLine};
    use crate::error::ProtocolError;

    #[test]
    fn parses_sentinels() {
        assert_eq!(parse_line("OK\n").unwrap(), ResponseLine::Ok);
        assert_eq!(parse_line("list_OK").unwrap(), ResponseLine::ListOk);
    }

    #[test]
    fn parses_ack_with_code_and_index() {
        let line = parse_line("ACK [50@2] {add} No such directory").unwrap();
        let ResponseLine::Ack(ack) = line else {
            panic!("expected ack, got {:?}", line);
        };
        assert_eq!(ack.code, 50);
        assert_eq!(ack.index, 2);
        assert_eq!(ack.command, "add");
        assert_eq!(ack.message, "No such directory");
    }

    #[test]
    fn ack_with_empty_command_is_accepted() {
        let ResponseLine::Ack(ack) = parse_line("ACK [5@0] {} unknown command \"foo\"").unwrap()
        else {
            panic!("expected ack");
        };
        assert_eq!(ack.code, 5);
        assert!(ack.command.is_empty());
    }

    #[test]
    fn pair_splits_on_first_separator() {
        let line = parse_line("Title: Intro: Part 1").unwrap();
        assert_eq!(
            line,
            ResponseLine::Pair {
                name: "Title".to_string(),
                value: "Intro: Part 1".to_string(),
            }
        );
        let empty = parse_line("Album: ").unwrap();
        assert_eq!(
            empty,
            ResponseLine::Pair {
                name: "Album".to_string(),
                value: String::new(),
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_line("nonsense"), Err(ProtocolError::Parse(_))));
        assert!(matches!(parse_line("ACK broken"), Err(ProtocolError::Parse(_))));
    }

    #[test]
    fn greeting_yields_version() {
        assert_eq!(parse_greeting("OK MPD 0.23.5\n").unwrap(), "0.23.5");
        assert!(parse_greeting("OK").is_err());
    }
}
