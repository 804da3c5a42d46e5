/// One tokenized input line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CommandLine {
    pub argv: Vec<String>,
    pub background: bool,
}

/// Split a raw line into words.
///
/// Words are separated by spaces. A word starting with `'` runs to the next
/// `'` and keeps its inner spaces; an unterminated quote takes the rest of
/// the line. A final `&` word marks a background job and is dropped.
pub fn tokenize(input: &str) -> CommandLine {
    let mut argv = Vec::new();
    let mut rest = input.trim_end_matches(['\n', '\r']);

    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }
        if let Some(quoted) = rest.strip_prefix('\'') {
            match quoted.find('\'') {
                Some(end) => {
                    argv.push(quoted[..end].to_string());
                    rest = &quoted[end + 1..];
                }
                None => {
                    argv.push(quoted.to_string());
                    rest = "";
                }
            }
        } else {
            let end = rest.find(' ').unwrap_or(rest.len());
            argv.push(rest[..end].to_string());
            rest = &rest[end..];
        }
    }

    let background = argv.last().is_some_and(|t| t == "&");
    if background {
        argv.pop();
    }
    CommandLine { argv, background }
}
