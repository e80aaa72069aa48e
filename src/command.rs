//! The Command Processor (spec.md §4.8): parses slash-prefixed input and
//! dispatches to `Session` operations.

/// A parsed slash command, ready to dispatch. Produced by `parse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Nick(String),
    Join(String),
    Users,
    Rooms,
    Help,
    Quit,
    Me(String),
    Clear,
    Unknown(String),
}

/// Strip the leading `/`, split on whitespace runs, lowercase the command
/// name, and resolve aliases. `line` must already have been trimmed by the
/// caller (Session's `handleInput` does this before routing to `/`).
pub fn parse(line: &str) -> Command {
    let body = line.strip_prefix('/').unwrap_or(line);
    let mut parts = body.split_whitespace();
    let name = parts.next().unwrap_or("").to_lowercase();
    let rest: Vec<&str> = parts.collect();

    match name.as_str() {
        "nick" | "n" => Command::Nick(rest.first().copied().unwrap_or("").to_string()),
        "join" | "j" => Command::Join(rest.first().copied().unwrap_or("").to_string()),
        "users" | "who" | "w" => Command::Users,
        "rooms" | "r" => Command::Rooms,
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        "me" => Command::Me(rest.join(" ")),
        "clear" | "cls" => Command::Clear,
        other => Command::Unknown(other.to_string()),
    }
}

/// Strips everything but `[a-zA-Z0-9_-]`, then truncates to `max_len`. Rooms
/// additionally get lowercased by the caller after sanitizing (spec.md §4.8).
pub fn sanitize(raw: &str, max_len: usize) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    cleaned.chars().take(max_len).collect()
}

/// A sanitized value is valid iff it is non-empty — sanitizing never
/// introduces characters the predicate would reject, so this is the same
/// character-class check as `sanitize` plus a non-empty requirement.
pub fn is_valid(sanitized: &str) -> bool {
    !sanitized.is_empty()
        && sanitized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub const HELP_TEXT: &str = "\
Commands:
  /nick <name>   (n)          change your nickname
  /join <room>   (j)          switch rooms
  /users         (who, w)     list users in this room
  /rooms         (r)          list known rooms
  /help          (h, ?)       show this message
  /quit          (q, exit)    disconnect
  /me <text>                  send an action message
  /clear         (cls)        clear your screen";

pub fn unknown_command_message(name: &str) -> String {
    format!("Unknown command: /{name}. Type /help for available commands.")
}

pub fn command_failed_message(reason: &str) -> String {
    format!("Command failed: {reason}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_names_and_aliases() {
        assert_eq!(parse("/nick bob"), Command::Nick("bob".into()));
        assert_eq!(parse("/n bob"), Command::Nick("bob".into()));
        assert_eq!(parse("/join dev"), Command::Join("dev".into()));
        assert_eq!(parse("/j dev"), Command::Join("dev".into()));
        assert_eq!(parse("/who"), Command::Users);
        assert_eq!(parse("/w"), Command::Users);
        assert_eq!(parse("/r"), Command::Rooms);
        assert_eq!(parse("/?"), Command::Help);
        assert_eq!(parse("/q"), Command::Quit);
        assert_eq!(parse("/cls"), Command::Clear);
    }

    #[test]
    fn command_name_is_case_insensitive() {
        assert_eq!(parse("/NICK bob"), Command::Nick("bob".into()));
    }

    #[test]
    fn me_joins_remaining_args_with_single_spaces() {
        assert_eq!(parse("/me waves   hello"), Command::Me("waves hello".into()));
    }

    #[test]
    fn unknown_name_is_preserved_verbatim_lowercased() {
        assert_eq!(parse("/Frobnicate"), Command::Unknown("frobnicate".into()));
    }

    #[test]
    fn sanitize_strips_disallowed_characters_and_truncates() {
        assert_eq!(sanitize("bob! the_builder-99", 10), "bobthe_bui");
    }

    #[test]
    fn is_valid_rejects_empty_sanitized_input() {
        assert!(!is_valid(""));
        assert!(is_valid("bob-99"));
    }
}
