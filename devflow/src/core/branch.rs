//! Feature branch naming.

/// Maximum branch name length, in characters.
pub const MAX_BRANCH_LEN: usize = 100;

/// Build the branch name for a feature: `feature/{id}-{title}` with the title
/// lower-cased, then every character outside `[A-Za-z0-9_-]` (including the
/// `/`) replaced by `-`, runs of `-` collapsed, and the result cut to 100
/// characters.
pub fn feature_branch_name(feature_id: &str, title: &str) -> String {
    let raw = format!(
        "feature/{}-{}",
        feature_id,
        title.replace(' ', "-").to_lowercase()
    );
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            ch
        } else {
            '-'
        };
        if mapped == '-' && out.ends_with('-') {
            continue;
        }
        out.push(mapped);
    }
    out.chars().take(MAX_BRANCH_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_title_and_keeps_id_case() {
        assert_eq!(
            feature_branch_name("F101", "Implement Light/Dark Mode Toggle!"),
            "feature-F101-implement-light-dark-mode-toggle-"
        );
    }

    #[test]
    fn collapses_separator_runs() {
        assert_eq!(
            feature_branch_name("F2", "Add  a 'contact us' form"),
            "feature-F2-add-a-contact-us-form"
        );
    }

    #[test]
    fn truncates_to_limit() {
        let name = feature_branch_name("F3", &"x".repeat(500));
        assert_eq!(name.chars().count(), MAX_BRANCH_LEN);
        assert!(name.starts_with("feature-F3-xxx"));
    }

    #[test]
    fn non_ascii_letters_become_separators() {
        assert_eq!(feature_branch_name("F4", "Café menü"), "feature-F4-caf-men-");
    }
}
