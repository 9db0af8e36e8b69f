//! Multi-line command responses.

use std::fmt;

/// Whether `line` ends a response: equal to `ok` or containing `err`,
/// ignoring case.
pub fn is_terminal_line(line: &str) -> bool {
    line.eq_ignore_ascii_case("ok")
        || line
            .to_ascii_lowercase()
            .contains("err")
}

/// Lines of one response, terminal line included and last.
///
/// Informational lines are kept verbatim, including empty ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    lines: Vec<String>,
}

impl Response {
    /// Collect lines up to and including the first terminal line.
    ///
    /// Returns `None` if the lines run out before a terminal line appears.
    pub fn from_lines<I, S>(lines: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut response = Self::default();
        for line in lines {
            if response.push(line.into()) {
                return Some(response);
            }
        }
        None
    }

    /// Append a line; returns `true` once the terminal line was pushed.
    pub(crate) fn push(&mut self, line: String) -> bool {
        let done = is_terminal_line(&line);
        self.lines
            .push(line);
        done
    }

    /// All lines, terminal line last.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Line at `index`, if present.
    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines
            .get(index)
            .map(String::as_str)
    }

    /// Lines before the terminal line.
    pub fn body(&self) -> &[String] {
        match self
            .lines
            .split_last()
        {
            Some((_, body)) => body,
            None => &[],
        }
    }

    /// The terminal line.
    pub fn terminal(&self) -> Option<&str> {
        self.lines
            .last()
            .map(String::as_str)
    }

    /// Whether the device answered `OK`.
    pub fn is_ok(&self) -> bool {
        self.terminal()
            .is_some_and(|t| t.eq_ignore_ascii_case("ok"))
    }

    /// Whether the device reported an error.
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }

    /// Consume into the raw lines.
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_lines() {
        assert!(is_terminal_line("OK"));
        assert!(is_terminal_line("ok"));
        assert!(is_terminal_line("Ok"));
        assert!(is_terminal_line("ERR"));
        assert!(is_terminal_line("ERROR: no card"));
        assert!(is_terminal_line("sd err"));
        assert!(!is_terminal_line("OK then"));
        assert!(!is_terminal_line(""));
        assert!(!is_terminal_line("DATA"));
    }

    #[test]
    fn test_stops_at_first_terminal_for_any_prefix() {
        let prefix = ["DATA", "", "Lab1", "okay", "60000"];
        for n in 0..=prefix.len() {
            let mut lines: Vec<&str> = prefix[..n].to_vec();
            lines.push("OK");
            lines.push("after");
            lines.push("ERR");

            let response = Response::from_lines(lines).unwrap();
            assert_eq!(response.lines().len(), n + 1);
            assert_eq!(response.terminal(), Some("OK"));
            assert_eq!(response.body(), &prefix[..n]);
            assert!(response.is_ok());
        }
    }

    #[test]
    fn test_error_terminal() {
        let response = Response::from_lines(["working", "Err: SD card missing", "OK"]).unwrap();
        assert_eq!(response.lines().len(), 2);
        assert!(response.is_err());
        assert_eq!(response.line(0), Some("working"));
    }

    #[test]
    fn test_missing_terminal() {
        assert!(Response::from_lines(["DATA", "Lab1"]).is_none());
        assert!(Response::from_lines(Vec::<String>::new()).is_none());
    }
}
