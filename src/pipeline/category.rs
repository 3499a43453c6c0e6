//! Category classification (§4.6 step 4, §9 "Category matching").
//!
//! `incomingFoldersRegexes`: one anchored regex per category, ordered by
//! category index. Matching proceeds from the highest index down so that
//! texture/OS-specific paths are classified before the coarser `desktop/`,
//! `mobile/`, or `general/` folders; first match wins. Each regex captures
//! the remaining relative path (the logical `local_path`) into group 1.

use crate::db::models::Category;
use regex::Regex;
use std::sync::OnceLock;

struct CategoryPattern {
    category: Category,
    regex: Regex,
}

fn patterns() -> &'static [CategoryPattern] {
    static PATTERNS: OnceLock<Vec<CategoryPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        Category::ALL_DESCENDING
            .iter()
            .map(|&category| {
                let folder = category.folder();
                let regex = Regex::new(&format!("^{folder}/(.+)$")).expect("static pattern is valid");
                CategoryPattern { category, regex }
            })
            .collect()
    })
}

/// Classify a zip-entry's relative path. Returns the matched category and
/// the captured logical path under its category root, or `None` if no
/// pattern matched (such entries are dropped silently, per §4.6 step 4).
pub fn classify(relative_path: &str) -> Option<(Category, String)> {
    let normalized = relative_path.replace('\\', "/");
    for pattern in patterns() {
        if let Some(caps) = pattern.regex.captures(&normalized) {
            let local_path = caps.get(1).unwrap().as_str().to_string();
            return Some((pattern.category, local_path));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_general_folder() {
        let (category, local_path) = classify("general/a.png").unwrap();
        assert_eq!(category, Category::General);
        assert_eq!(local_path, "a.png");
    }

    #[test]
    fn classifies_texture_before_coarser_folders() {
        let (category, local_path) = classify("bc7/textures/b.ktx").unwrap();
        assert_eq!(category, Category::Bc7);
        assert_eq!(local_path, "textures/b.ktx");
    }

    #[test]
    fn classifies_os_specific_folder() {
        let (category, local_path) = classify("windows/w.dll").unwrap();
        assert_eq!(category, Category::Windows);
        assert_eq!(local_path, "w.dll");
    }

    #[test]
    fn unmatched_path_returns_none() {
        assert!(classify("readme.txt").is_none());
    }

    #[test]
    fn nested_paths_preserve_full_remainder() {
        let (_, local_path) = classify("desktop/bin/lib/x.so").unwrap();
        assert_eq!(local_path, "bin/lib/x.so");
    }
}
