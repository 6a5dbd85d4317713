use std::path::PathBuf;

use crate::constants::LEADER_TIMEOUT_MS;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SESSION_DIR: &str = ".data/session";
const MAX_VIEWER_ID_LEN: usize = 64;

pub fn sanitize_viewer_id(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_VIEWER_ID_LEN {
        return None;
    }
    let valid = trimmed
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | ':'));
    valid.then(|| trimmed.to_string())
}

pub fn parse_port(raw: Option<&str>) -> u16 {
    raw.and_then(|value| value.trim().parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT)
}

pub fn session_dir(raw: Option<&str>) -> PathBuf {
    match raw.map(str::trim) {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(DEFAULT_SESSION_DIR),
    }
}

pub fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|value| value.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

pub fn normalize_timeout_ms(value: Option<u64>) -> u64 {
    value.unwrap_or(LEADER_TIMEOUT_MS).clamp(1_000, 120_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_id_is_trimmed_and_validated() {
        assert_eq!(sanitize_viewer_id(" tab-7 "), Some("tab-7".to_string()));
        assert_eq!(sanitize_viewer_id("a.b:c_d"), Some("a.b:c_d".to_string()));
        assert_eq!(sanitize_viewer_id(""), None);
        assert_eq!(sanitize_viewer_id("   "), None);
        assert_eq!(sanitize_viewer_id("has space"), None);
        assert_eq!(sanitize_viewer_id("<script>"), None);
        assert_eq!(sanitize_viewer_id(&"x".repeat(65)), None);
        assert!(sanitize_viewer_id(&"x".repeat(64)).is_some());
    }

    #[test]
    fn port_parsing_falls_back_to_default() {
        assert_eq!(parse_port(Some("9000")), 9000);
        assert_eq!(parse_port(Some(" 9001 ")), 9001);
        assert_eq!(parse_port(Some("70000")), DEFAULT_PORT);
        assert_eq!(parse_port(Some("abc")), DEFAULT_PORT);
        assert_eq!(parse_port(None), DEFAULT_PORT);
    }

    #[test]
    fn session_dir_defaults_when_blank() {
        assert_eq!(session_dir(None), PathBuf::from(DEFAULT_SESSION_DIR));
        assert_eq!(session_dir(Some("  ")), PathBuf::from(DEFAULT_SESSION_DIR));
        assert_eq!(session_dir(Some("/tmp/s")), PathBuf::from("/tmp/s"));
    }

    #[test]
    fn flags_accept_common_truthy_spellings() {
        assert!(parse_flag(Some("1")));
        assert!(parse_flag(Some(" TRUE ")));
        assert!(parse_flag(Some("on")));
        assert!(!parse_flag(Some("0")));
        assert!(!parse_flag(Some("")));
        assert!(!parse_flag(None));
    }

    #[test]
    fn timeout_is_clamped() {
        assert_eq!(normalize_timeout_ms(None), LEADER_TIMEOUT_MS);
        assert_eq!(normalize_timeout_ms(Some(5)), 1_000);
        assert_eq!(normalize_timeout_ms(Some(u64::MAX)), 120_000);
        assert_eq!(normalize_timeout_ms(Some(20_000)), 20_000);
    }
}
