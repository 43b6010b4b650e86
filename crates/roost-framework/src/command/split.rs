use roost_core::Fragment;

/// Shell-like argument splitting.
///
/// Handles whitespace separation, single and double quotes, and backslash
/// escapes inside double quotes.
pub fn shell_split(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut escape_next = false;
    // Keeps `""` as an empty argument.
    let mut quoted = false;

    for ch in input.chars() {
        if escape_next {
            current.push(ch);
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_double_quote => escape_next = true,
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                quoted = true;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                quoted = true;
            }
            c if c.is_whitespace() && !in_single_quote && !in_double_quote => {
                if !current.is_empty() || quoted {
                    args.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() || quoted {
        args.push(current);
    }

    args
}

/// Splits message fragments into command arguments.
///
/// Text fragments are shell-split; a fragment boundary always breaks a word.
/// A mention becomes one argument holding the user id. Media is ignored.
pub fn fragment_split(fragments: &[Fragment]) -> Vec<String> {
    let mut args = Vec::new();
    for fragment in fragments {
        match fragment {
            Fragment::Text(text) => args.extend(shell_split(text)),
            Fragment::Mention(user) => args.push(user.to_string()),
            Fragment::Media(_) => {}
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_split_simple() {
        assert_eq!(shell_split("/echo hello world"), vec!["/echo", "hello", "world"]);
    }

    #[test]
    fn test_shell_split_quoted() {
        let args = shell_split(r#"/puzzle ask "is it alive?" now"#);
        assert_eq!(args, vec!["/puzzle", "ask", "is it alive?", "now"]);
    }

    #[test]
    fn test_shell_split_mixed_quotes() {
        let args = shell_split(r#"/cmd "double's quote" 'single"s quote'"#);
        assert_eq!(args, vec!["/cmd", "double's quote", r#"single"s quote"#]);
    }

    #[test]
    fn test_shell_split_escape_in_double_quotes() {
        let args = shell_split(r#"/say "a \"b\" c""#);
        assert_eq!(args, vec!["/say", r#"a "b" c"#]);
    }

    #[test]
    fn test_shell_split_empty_quotes_kept() {
        assert_eq!(shell_split(r#"/say """#), vec!["/say", ""]);
    }

    #[test]
    fn test_shell_split_whitespace_only() {
        assert!(shell_split("   \t  ").is_empty());
    }

    #[test]
    fn test_fragment_split_mentions_and_boundaries() {
        let fragments = vec![
            Fragment::text("/status tok ban "),
            Fragment::mention("42"),
            Fragment::media("pic.png"),
            Fragment::text("/x"),
            Fragment::text("y"),
        ];
        assert_eq!(
            fragment_split(&fragments),
            vec!["/status", "tok", "ban", "42", "/x", "y"]
        );
    }
}
