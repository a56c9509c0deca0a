//! Project-slug and deployment-id derivation.
//!
//! Pure, total functions — no error path, no I/O. Every other component
//! keys off the strings these produce, so their shape is load-bearing:
//! filesystem path segments, compose project names, route-file prefixes.

/// Derive a filesystem/URL-safe identifier from a repo owner and name.
///
/// Lowercases, replaces runs of non-alphanumerics with a single `-`, and
/// trims leading/trailing `-`.
pub fn to_project_slug(owner: &str, name: &str) -> String {
    sanitize(&format!("{owner}/{name}"))
}

fn sanitize(input: &str) -> String {
    let lowered = input.to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    let mut last_was_dash = false;
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

/// `<projectSlug>-<prNumber>` — the only identifier used across the
/// tracker, proxy, compose, and filesystem.
pub fn to_deployment_id(project_slug: &str, pr_number: u64) -> String {
    format!("{project_slug}-{pr_number}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugifies_owner_and_name() {
        assert_eq!(to_project_slug("acme", "api"), "acme-api");
    }

    #[test]
    fn collapses_non_alphanumeric_runs() {
        assert_eq!(to_project_slug("Acme Co.", "My--App!!"), "acme-co-my-app");
    }

    #[test]
    fn trims_leading_and_trailing_dashes() {
        assert_eq!(sanitize("--foo--"), "foo");
    }

    #[test]
    fn deployment_id_joins_slug_and_pr() {
        assert_eq!(to_deployment_id("acme-api", 42), "acme-api-42");
    }

    #[test]
    fn project_slug_always_matches_charset() {
        let re_like = |s: &str| {
            !s.is_empty()
                && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && !s.starts_with('-')
                && !s.ends_with('-')
                && !s.contains("--")
        };
        for (owner, name) in [
            ("acme", "api"),
            ("ACME_Corp", "my.app"),
            ("---", "???"),
            ("a", "b"),
            ("Owner123", "Repo-Name_2"),
        ] {
            let slug = to_project_slug(owner, name);
            if slug.is_empty() {
                continue;
            }
            assert!(re_like(&slug), "slug {slug:?} violates charset invariant");
        }
    }
}
