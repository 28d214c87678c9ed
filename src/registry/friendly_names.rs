//! Friendly-name table (spec.md §9): a configuration-time constant map from a
//! lowercased, `.exe`-stripped process name to a human-presentable display
//! name. Read-only; injected into the Registry Manager.

/// Looks up a friendly display name for a lowercased, extension-stripped
/// process name (e.g. `"chrome"`, `"firefox"`). Returns `None` when the name
/// is not in the table — callers fall back to a title-cased rendering of the
/// raw name.
pub fn lookup(app_id: &str) -> Option<&'static str> {
    FRIENDLY_NAMES
        .iter()
        .find(|(key, _)| *key == app_id)
        .map(|(_, name)| *name)
}

const FRIENDLY_NAMES: &[(&str, &str)] = &[
    ("chrome", "Google Chrome"),
    ("firefox", "Mozilla Firefox"),
    ("msedge", "Microsoft Edge"),
    ("safari", "Safari"),
    ("brave", "Brave Browser"),
    ("opera", "Opera"),
    ("code", "Visual Studio Code"),
    ("slack", "Slack"),
    ("discord", "Discord"),
    ("spotify", "Spotify"),
    ("zoom", "Zoom"),
    ("teams", "Microsoft Teams"),
    ("outlook", "Microsoft Outlook"),
    ("explorer", "Windows Explorer"),
    ("svchost", "Windows Service Host"),
    ("dropbox", "Dropbox"),
    ("steam", "Steam"),
    ("docker", "Docker Desktop"),
    ("ssh", "SSH Client"),
    ("sshd", "SSH Server"),
    ("curl", "cURL"),
    ("git", "Git"),
    ("node", "Node.js"),
    ("python", "Python"),
    ("python3", "Python"),
    ("systemd-resolved", "systemd-resolved"),
];

/// Title-case a process name by splitting on `-`, `_`, or space and
/// upper-casing each word's first letter — the fallback path when an app has
/// no friendly-name table entry (§4.8 step 1).
pub fn title_case_fallback(name: &str) -> String {
    name.split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_app() {
        assert_eq!(lookup("firefox"), Some("Mozilla Firefox"));
    }

    #[test]
    fn test_lookup_unknown_app_returns_none() {
        assert_eq!(lookup("some-obscure-daemon"), None);
    }

    #[test]
    fn test_title_case_fallback_splits_on_separators() {
        assert_eq!(title_case_fallback("some-obscure-daemon"), "Some Obscure Daemon");
        assert_eq!(title_case_fallback("my_cool_app"), "My Cool App");
        assert_eq!(title_case_fallback("plainname"), "Plainname");
    }
}
