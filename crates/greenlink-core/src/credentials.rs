//! Login credentials.

/// What a session authenticates with.
///
/// Both variants unlock the same capability; watch-only grants read access
/// only and is resolved by the backend against credentials previously set via
/// `set_watch_only`.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Mnemonic {
        phrase: String,
        /// Optional password the phrase was encrypted with.
        password: Option<String>,
    },
    WatchOnly {
        username: String,
        password: String,
    },
}

impl Credentials {
    pub fn mnemonic(phrase: impl Into<String>) -> Self {
        Credentials::Mnemonic {
            phrase: phrase.into(),
            password: None,
        }
    }

    pub fn mnemonic_with_password(phrase: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Mnemonic {
            phrase: phrase.into(),
            password: Some(password.into()),
        }
    }

    pub fn watch_only(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::WatchOnly {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_watch_only(&self) -> bool {
        matches!(self, Credentials::WatchOnly { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::Mnemonic { .. } => "mnemonic",
            Credentials::WatchOnly { .. } => "watch-only",
        }
    }
}

// Secrets never reach logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Mnemonic { phrase, password } => f
                .debug_struct("Mnemonic")
                .field("words", &phrase.split_whitespace().count())
                .field("password", &password.as_ref().map(|_| "<redacted>"))
                .finish(),
            Credentials::WatchOnly { username, .. } => f
                .debug_struct("WatchOnly")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_mnemonic() {
        let creds = Credentials::mnemonic_with_password("abandon ability able", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("abandon"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("words: 3"));
    }

    #[test]
    fn debug_redacts_watch_only_password() {
        let creds = Credentials::watch_only("alice", "s3cret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn kind_and_watch_only_flag() {
        assert!(Credentials::watch_only("u", "p").is_watch_only());
        assert!(!Credentials::mnemonic("a b c").is_watch_only());
        assert_eq!(Credentials::mnemonic("a").kind(), "mnemonic");
        assert_eq!(Credentials::watch_only("u", "p").kind(), "watch-only");
    }
}
