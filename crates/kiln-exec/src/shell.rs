//! Quoting for arguments spliced into shell command strings

/// Wrap `value` in single quotes so `sh` reads it as one literal word
#[must_use]
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

/// Like `quote`, but a leading `~/` stays outside the quotes so the shell
/// still expands it to the login user's home
#[must_use]
pub fn quote_path(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => format!("~/{}", quote(rest)),
        None if path == "~" => path.to_string(),
        None => quote(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Connection, LocalConnection};

    #[test]
    fn test_quote_plain() {
        assert_eq!(quote("/srv/env"), "'/srv/env'");
    }

    #[test]
    fn test_quote_single_quote() {
        assert_eq!(quote("it's"), "'it'\"'\"'s'");
    }

    #[test]
    fn test_quote_path_keeps_home() {
        assert_eq!(quote_path("~/.cache/kiln"), "~/'.cache/kiln'");
        assert_eq!(quote_path("~"), "~");
        assert_eq!(quote_path("/tmp/~/x"), "'/tmp/~/x'");
    }

    #[tokio::test]
    async fn test_quoted_words_survive_the_shell() {
        let conn = LocalConnection::new();
        let value = "a b&c;d'e$HOME?f=1";

        let echoed = conn.run(&format!("printf %s {}", quote(value))).await.unwrap();
        assert_eq!(echoed, value);

        let home = conn.run("printf %s ~").await.unwrap();
        let expanded = conn.run(&format!("printf %s {}", quote_path("~/a b"))).await.unwrap();
        assert_eq!(expanded, format!("{home}/a b"));
    }
}
