//! Search Text Sanitization
//!
//! Builds the derived search text for the durable backend and strips secrets
//! (API keys, tokens, password assignments) from it. The JSON blob keeps the
//! node unchanged; only the indexed text is redacted.

use std::sync::OnceLock;

use agent_memory_core::MemoryNode;
use regex::Regex;

struct SecretPattern {
    kind: &'static str,
    regex: Regex,
}

/// Redaction patterns, compiled once.
fn secret_patterns() -> &'static Vec<SecretPattern> {
    static PATTERNS: OnceLock<Vec<SecretPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let raw: [(&'static str, &'static str); 9] = [
            ("openai_key", r"sk-[a-zA-Z0-9_\-]{20,}"),
            ("aws_access_key", r"AKIA[0-9A-Z]{16}"),
            ("github_token", r"gh[pousr]_[a-zA-Z0-9]{36,}"),
            ("slack_token", r"xox[bps]-[a-zA-Z0-9\-]+"),
            ("database_url", r"(?i)DATABASE_URL\s*=\s*\S+"),
            ("private_key", r"(?i)PRIVATE_KEY\s*=\s*\S+"),
            ("jwt_secret", r"(?i)JWT_SECRET\s*=\s*\S+"),
            ("aws_secret", r"(?i)AWS_SECRET_ACCESS_KEY\s*=\s*\S+"),
            (
                "password",
                r#"(?i)\b(password|passwd|secret|token)\s*[=:]\s*["']?[^\s"']{4,}["']?"#,
            ),
        ];
        raw.into_iter()
            .filter_map(|(kind, pattern)| {
                Regex::new(pattern)
                    .ok()
                    .map(|regex| SecretPattern { kind, regex })
            })
            .collect()
    })
}

/// Replace every secret in `text` with `[REDACTED:<kind>]`.
pub fn redact_secrets(text: &str) -> String {
    let mut redacted = text.to_string();
    for pattern in secret_patterns() {
        if pattern.regex.is_match(&redacted) {
            let replacement = format!("[REDACTED:{}]", pattern.kind);
            redacted = pattern
                .regex
                .replace_all(&redacted, replacement.as_str())
                .into_owned();
        }
    }
    redacted
}

/// Whether `text` contains anything `redact_secrets` would replace.
pub fn contains_secret(text: &str) -> bool {
    secret_patterns().iter().any(|p| p.regex.is_match(text))
}

/// Searchable text for a node: content, source, domain, tags and scope values.
pub fn search_text(node: &MemoryNode) -> String {
    let meta = &node.metadata;
    let mut parts: Vec<&str> = vec![
        node.content.as_str(),
        meta.source_id.as_str(),
        meta.domain.as_str(),
    ];
    parts.extend(meta.tags.iter().map(String::as_str));
    parts.extend(
        [&meta.scope.session, &meta.scope.project, &meta.scope.role, &meta.scope.org]
            .into_iter()
            .filter_map(|v| v.as_deref()),
    );
    redact_secrets(&parts.join(" "))
}
