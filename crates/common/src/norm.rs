/// Normalized form of a title or artist name: the equivalence class used
/// by the album-title and artist-name indices. Lowercased, whitespace
/// runs collapsed, one leading article dropped.
pub fn normalize_name(input: &str) -> String {
    let mut collapsed = String::with_capacity(input.len());
    let mut last_space = true;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space {
                collapsed.push(' ');
                last_space = true;
            }
        } else {
            for lower in ch.to_lowercase() {
                collapsed.push(lower);
            }
            last_space = false;
        }
    }
    let collapsed = collapsed.trim_end();

    for article in ["the ", "a ", "an "] {
        if let Some(rest) = collapsed.strip_prefix(article) {
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }
    collapsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::normalize_name;

    #[test]
    fn folds_case_and_whitespace() {
        assert_eq!(normalize_name("  Paul   SIMON "), "paul simon");
    }

    #[test]
    fn strips_one_leading_article() {
        assert_eq!(normalize_name("The Beatles"), "beatles");
        assert_eq!(normalize_name("A Night at the Opera"), "night at the opera");
        assert_eq!(normalize_name("An American in Paris"), "american in paris");
    }

    #[test]
    fn keeps_bare_articles() {
        assert_eq!(normalize_name("The"), "the");
        assert_eq!(normalize_name("a"), "a");
    }

    #[test]
    fn article_needs_word_boundary() {
        assert_eq!(normalize_name("Theatre of Tragedy"), "theatre of tragedy");
        assert_eq!(normalize_name("Another One"), "another one");
    }
}
