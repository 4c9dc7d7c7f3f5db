//! Terminal utility functions

/// Format a URL as a clickable terminal hyperlink if the terminal supports it,
/// otherwise fall back to plain colored text.
pub fn terminal_link(url: &str) -> String {
    if supports_hyperlinks::on(supports_hyperlinks::Stream::Stdout) {
        format!("\x1b]8;;{}\x07\x1b[36m{}\x1b[0m\x1b]8;;\x07", url, url)
    } else {
        format!("\x1b[36m{}\x1b[0m", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_link_contains_url_and_color() {
        let url = "http://127.0.0.1:5380";
        let result = terminal_link(url);
        assert!(result.contains(url));
        assert!(result.contains("\x1b[36m"));
        assert!(result.contains("\x1b[0m"));
    }
}
