//! Classification of SMTP command lines

/// A command line recognized by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `HELO <domain>`; the domain is `None` when missing
    Helo(Option<String>),
    /// `EHLO <domain>`
    Ehlo(Option<String>),
    /// `MAIL FROM:<path>`
    MailFrom(String),
    /// `RCPT TO:<path>`
    RcptTo(String),
    Data,
    Rset,
    /// `VRFY <address>`
    Vrfy(String),
    Noop,
    Quit,
    /// Anything else, carrying the raw line
    Unknown(String),
}

impl Command {
    /// Classify a command line with its terminator already stripped.
    ///
    /// Verbs are matched case-insensitively by prefix, the way most
    /// receivers tolerate sloppy clients.
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end();

        if starts_with_ignore_case(line, "MAIL FROM") {
            return Command::MailFrom(extract_path(after_colon(line)));
        }
        if starts_with_ignore_case(line, "RCPT TO") {
            return Command::RcptTo(extract_path(after_colon(line)));
        }

        let (verb, argument) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let domain = || argument.split_whitespace().next().map(str::to_string);

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => Command::Helo(domain()),
            "EHLO" => Command::Ehlo(domain()),
            "DATA" => Command::Data,
            "RSET" => Command::Rset,
            "VRFY" => Command::Vrfy(extract_path(argument)),
            "NOOP" => Command::Noop,
            "QUIT" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }

    /// The verb as it appears on the wire
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Helo(_) => "HELO",
            Command::Ehlo(_) => "EHLO",
            Command::MailFrom(_) => "MAIL",
            Command::RcptTo(_) => "RCPT",
            Command::Data => "DATA",
            Command::Rset => "RSET",
            Command::Vrfy(_) => "VRFY",
            Command::Noop => "NOOP",
            Command::Quit => "QUIT",
            Command::Unknown(_) => "UNKNOWN",
        }
    }
}

fn starts_with_ignore_case(line: &str, prefix: &str) -> bool {
    line.len() >= prefix.len()
        && line.is_char_boundary(prefix.len())
        && line[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn after_colon(line: &str) -> &str {
    match line.find(':') {
        Some(idx) => &line[idx + 1..],
        None => "",
    }
}

/// Pull the address out of a path argument.
///
/// `<a@b.test> SIZE=100` yields `a@b.test`; an argument without angle
/// brackets yields its first whitespace separated word.
fn extract_path(argument: &str) -> String {
    let argument = argument.trim();
    if let Some(rest) = argument.strip_prefix('<') {
        return match rest.find('>') {
            Some(end) => rest[..end].to_string(),
            None => rest.to_string(),
        };
    }
    argument
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}
