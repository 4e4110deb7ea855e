#[derive(thiserror::Error, Debug)]
pub enum SshError {
    #[error("host key error: {0}")]
    HostKey(String),

    #[error("dial failed: {0}")]
    Dial(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("ssh: {0}")]
    Russh(#[from] russh::Error),
}

/// Maps a raw dial error into the short, user-facing messages spec.md
/// §4.5 calls for. Anything unrecognized passes the raw message through
/// unchanged rather than a generic label.
pub fn classify_dial_error(message: &str) -> String {
    let lower = message.to_ascii_lowercase();
    if lower.contains("unable to authenticate") || lower.contains("failed login") {
        "Authentication failed".to_string()
    } else if lower.contains("connection refused") {
        "Connection refused".to_string()
    } else if lower.contains("i/o timeout") || lower.contains("timed out") {
        "i/o timeout".to_string()
    } else if lower.contains("no route to host") {
        "No route to host".to_string()
    } else if lower.contains("network is unreachable") {
        "network is unreachable".to_string()
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_dial_failures() {
        assert_eq!(classify_dial_error("unable to authenticate"), "Authentication failed");
        assert_eq!(classify_dial_error("Connection refused"), "Connection refused");
        assert_eq!(classify_dial_error("i/o timeout"), "i/o timeout");
        assert_eq!(classify_dial_error("no route to host"), "No route to host");
        assert_eq!(classify_dial_error("network is unreachable"), "network is unreachable");
        assert_eq!(classify_dial_error("something else entirely"), "something else entirely");
    }
}
