//! POSIX shell quoting for rendering and forwarding command lines

/// Quote a single argument so a POSIX shell reads it back verbatim.
pub fn shell_quote(arg: &str) -> String {
    if arg.is_empty() {
        "''".to_string()
    } else if arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "._-/=:@,+%".contains(c))
    {
        arg.to_string()
    } else {
        // End the quote, emit an escaped quote, start quoting again
        format!("'{}'", arg.replace('\'', "'\"'\"'"))
    }
}

/// Join a program and its arguments into one shell-safe command line.
pub fn render_command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(AsRef::as_ref))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}
