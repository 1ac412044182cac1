//! Deterministic object names
//!
//! Instance names are a pure function of `(owner, selector)` so concurrent
//! connects for the same pair race on a single object name. Names must be
//! valid DNS-1123 labels; anything else is sanitized and disambiguated with
//! a short hash of the original input.

use sha2::{Digest, Sha256};

/// Maximum length of a DNS-1123 label
pub const MAX_NAME_LEN: usize = 63;

const HASH_LEN: usize = 10;

/// Name of the instance a user gets for `selector`
pub fn instance_name(owner: &str, selector: &str) -> String {
    let candidate = format!("{}-{}", owner, selector);
    if is_dns_label(&candidate) {
        return candidate;
    }
    hashed(&candidate, &[owner.as_bytes(), b"\0", selector.as_bytes()])
}

/// Name of the pod backing an instance
pub fn pod_name(instance: &str) -> String {
    with_suffix(instance, "-pod")
}

/// Name of the claim holding an instance's volume
pub fn claim_name(instance: &str) -> String {
    with_suffix(instance, "-home")
}

/// Lowercase alphanumerics and `-`, starting and ending alphanumeric
pub fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

fn with_suffix(base: &str, suffix: &str) -> String {
    let candidate = format!("{}{}", base, suffix);
    if candidate.len() <= MAX_NAME_LEN {
        return candidate;
    }
    let digest = digest_hex(&[base.as_bytes()]);
    let keep = MAX_NAME_LEN - suffix.len() - HASH_LEN - 1;
    let head: String = base.chars().take(keep).collect();
    format!(
        "{}-{}{}",
        head.trim_end_matches('-'),
        &digest[..HASH_LEN],
        suffix
    )
}

fn digest_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

fn hashed(readable: &str, parts: &[&[u8]]) -> String {
    let digest = digest_hex(parts);

    let mut prefix = String::with_capacity(readable.len());
    for c in readable.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prefix.push(c);
        } else if !prefix.ends_with('-') {
            prefix.push('-');
        }
    }
    let prefix = prefix.trim_matches('-');
    let max_prefix = MAX_NAME_LEN - HASH_LEN - 1;
    let prefix = &prefix[..prefix.len().min(max_prefix)];
    let prefix = prefix.trim_end_matches('-');

    if prefix.is_empty() {
        format!("bw-{}", &digest[..HASH_LEN])
    } else {
        format!("{}-{}", prefix, &digest[..HASH_LEN])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_names_are_readable() {
        assert_eq!(instance_name("alice", "web"), "alice-web");
        assert_eq!(instance_name("alice", "42"), "alice-42");
        assert_eq!(pod_name("alice-web"), "alice-web-pod");
        assert_eq!(claim_name("alice-web"), "alice-web-home");
    }

    #[test]
    fn test_names_are_deterministic_and_case_sensitive() {
        let a = instance_name("Alice", "web");
        let b = instance_name("alice", "web");
        assert_ne!(a, b);
        assert_eq!(a, instance_name("Alice", "web"));
        assert!(is_dns_label(&a));
        assert!(a.starts_with("alice-web-"));
    }

    #[test]
    fn test_long_names_are_bounded() {
        let selector = "x".repeat(200);
        let name = instance_name("alice", &selector);
        assert!(is_dns_label(&name), "{}", name);

        let pod = pod_name(&name);
        assert!(is_dns_label(&pod), "{}", pod);
        assert!(pod.ends_with("-pod"));
    }

    #[test]
    fn test_symbol_only_selector() {
        let name = instance_name("alice", "@@@");
        assert!(is_dns_label(&name), "{}", name);
    }
}
