//! Word validation against language dictionaries.
//!
//! Dictionaries are plain word lists, one word per line. Words are stored
//! lowercased for validation; the first-seen original casing is kept in a
//! companion map for canonicalization and abbreviation detection. With no
//! dictionary available the engine either accepts everything of minimum
//! length (auto-fallback) or refuses every word.

use crate::config::Config;
use crate::hasher::WordHasher;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Shortest word worth tracking.
pub const MIN_WORD_LENGTH: usize = 3;

/// Well-known system word-list locations per language code.
fn candidate_paths(lang: &str) -> &'static [&'static str] {
    match lang {
        "en" => &[
            "/usr/share/dict/american-english",
            "/usr/share/dict/british-english",
            "/usr/share/dict/words",
        ],
        "de" => &["/usr/share/dict/ngerman", "/usr/share/dict/ogerman"],
        _ => &[],
    }
}

/// Guesses a language code from a word-list filename.
fn guess_language(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();
    if name.contains("german") {
        "de".to_string()
    } else {
        "en".to_string()
    }
}

pub struct Dictionary {
    /// language code -> lowercase word set
    words: HashMap<String, HashSet<String>>,
    /// language code -> lowercase -> first-seen original casing
    capitalized: HashMap<String, HashMap<String, String>>,
    accept_all_mode: bool,
    /// Lowercase entries from the plain-text ignore file.
    ignored_words: HashSet<String>,
    /// Hashes of ignored words from storage (synced across machines).
    ignored_hashes: HashSet<String>,
    names: HashSet<String>,
    exclude_names: bool,
}

impl Dictionary {
    /// Builds the dictionary per configuration. `ignore_file` and
    /// `names_file` are optional plain-text lists.
    pub fn new(config: &Config, ignore_file: Option<&Path>, names_file: Option<&Path>) -> Self {
        let mut dict = Dictionary {
            words: HashMap::new(),
            capitalized: HashMap::new(),
            accept_all_mode: config.accept_all_mode(),
            ignored_words: HashSet::new(),
            ignored_hashes: HashSet::new(),
            names: HashSet::new(),
            exclude_names: config.exclude_names_enabled,
        };

        if let Some(path) = ignore_file {
            dict.ignored_words = load_word_list(path);
            if !dict.ignored_words.is_empty() {
                info!(count = dict.ignored_words.len(), path = %path.display(), "loaded ignore words");
            }
        }
        if dict.exclude_names {
            if let Some(path) = names_file {
                dict.names = load_names_with_genitives(path);
                info!(count = dict.names.len(), "loaded common names for exclusion");
            }
        }

        if dict.accept_all_mode {
            warn!("dictionary in accept-all mode, any word of {MIN_WORD_LENGTH}+ letters is valid");
            return dict;
        }

        let explicit = config.dictionary_paths();
        if !explicit.is_empty() {
            for path in &explicit {
                // Explicit paths carry no language tag; guess from the filename.
                let lang = guess_language(path);
                dict.load_file(&lang, Path::new(path));
            }
        } else {
            for lang in config.languages() {
                for candidate in candidate_paths(&lang) {
                    if dict.load_file(&lang, Path::new(candidate)) {
                        break;
                    }
                }
            }
        }

        if dict.words.is_empty() {
            if config.dictionary_auto_fallback {
                warn!("no dictionaries found, falling back to accept-all mode");
                dict.accept_all_mode = true;
            } else {
                warn!("no dictionaries found and auto-fallback disabled, all words rejected");
            }
        } else {
            let loaded: Vec<&String> = dict.words.keys().collect();
            info!(languages = ?loaded, "dictionaries loaded");
        }

        dict
    }

    fn load_file(&mut self, lang: &str, path: &Path) -> bool {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                if path.exists() {
                    warn!(path = %path.display(), error = %e, "failed to read dictionary");
                }
                return false;
            }
        };

        let word_set = self.words.entry(lang.to_string()).or_default();
        let cap_map = self.capitalized.entry(lang.to_string()).or_default();
        for line in contents.lines() {
            let original = line.trim();
            if original.is_empty() {
                continue;
            }
            let lower = original.to_lowercase();
            // First-seen casing wins; list order puts the canonical form first.
            cap_map.entry(lower.clone()).or_insert_with(|| original.to_string());
            word_set.insert(lower);
        }
        info!(lang, count = word_set.len(), path = %path.display(), "loaded dictionary");
        true
    }

    /// Replaces the synced hashed-ignore set (loaded from storage).
    pub fn set_ignored_hashes(&mut self, hashes: HashSet<String>) {
        self.ignored_hashes = hashes;
    }

    pub fn add_ignored_hash(&mut self, hash: String) {
        self.ignored_hashes.insert(hash);
    }

    /// Flips name exclusion at runtime (sync side effect §settings).
    pub fn set_exclude_names(&mut self, enabled: bool, names_file: Option<&Path>) {
        self.exclude_names = enabled;
        if enabled && self.names.is_empty() {
            if let Some(path) = names_file {
                self.names = load_names_with_genitives(path);
            }
        }
    }

    pub fn accept_all_mode(&self) -> bool {
        self.accept_all_mode
    }

    pub fn names(&self) -> &HashSet<String> {
        &self.names
    }

    /// True when the lowercase word is filtered by either ignore channel.
    pub fn is_ignored(&self, word_lower: &str, hasher: &WordHasher) -> bool {
        if self.ignored_words.contains(word_lower) {
            return true;
        }
        if self.ignored_hashes.is_empty() {
            return false;
        }
        self.ignored_hashes.contains(&hasher.hash_word(word_lower))
    }

    pub fn is_name(&self, word_lower: &str) -> bool {
        self.exclude_names && self.names.contains(word_lower)
    }

    /// Validates a word against every loaded language.
    /// In accept-all mode any word of minimum length is valid.
    pub fn is_valid_word(&self, word: &str) -> bool {
        if word.is_empty() {
            return false;
        }
        if self.accept_all_mode {
            return word.chars().count() >= MIN_WORD_LENGTH;
        }
        let lower = word.to_lowercase();
        self.words.values().any(|set| set.contains(&lower))
    }

    /// True when the dictionary's original form of the word carries two or
    /// more uppercase code points (`PC` yes, `Haus` no).
    pub fn is_abbreviation(&self, word_lower: &str) -> bool {
        if word_lower.is_empty() || self.accept_all_mode {
            return false;
        }
        for mapping in self.capitalized.values() {
            if let Some(original) = mapping.get(word_lower) {
                let uppercase = original.chars().filter(|c| c.is_uppercase()).count();
                return uppercase >= 2;
            }
        }
        false
    }

    /// Canonical casing: the dictionary's stored original form, or the
    /// input unchanged when unknown.
    pub fn get_capitalized_form(&self, word: &str) -> String {
        if word.is_empty() || self.accept_all_mode {
            return word.to_string();
        }
        let lower = word.to_lowercase();
        for mapping in self.capitalized.values() {
            if let Some(original) = mapping.get(&lower) {
                return original.clone();
            }
        }
        word.to_string()
    }

    pub fn loaded_languages(&self) -> Vec<String> {
        self.words.keys().cloned().collect()
    }
}

/// Reads a plain-text word list: one entry per line, blank lines and `#`
/// comments skipped, entries lowercased.
pub fn load_word_list(path: &Path) -> HashSet<String> {
    let mut set = HashSet::new();
    let Ok(contents) = fs::read_to_string(path) else {
        return set;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        set.insert(line.to_lowercase());
    }
    set
}

/// Loads a names list and adds the genitive form (`name + s`) for every
/// base name that does not already end in `s`.
pub fn load_names_with_genitives(path: &Path) -> HashSet<String> {
    let mut names = HashSet::new();
    for name in load_word_list(path) {
        if let Some(genitive) = generate_genitive(&name) {
            names.insert(genitive);
        }
        names.insert(name);
    }
    names
}

/// `name + s` unless the name already ends in `s`.
pub fn generate_genitive(name: &str) -> Option<String> {
    if name.ends_with('s') {
        None
    } else {
        Some(format!("{name}s"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn dict_with_file(lines: &str, mode: &str) -> (Dictionary, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(lines.as_bytes()).unwrap();
        let config = Config {
            dictionary_mode: mode.to_string(),
            enabled_dictionaries: file.path().display().to_string(),
            ..Config::default()
        };
        (Dictionary::new(&config, None, None), file)
    }

    #[test]
    fn validates_and_canonicalizes() {
        let (dict, _file) = dict_with_file("Haus\nhello\nPC\n", "validate");
        assert!(dict.is_valid_word("haus"));
        assert!(dict.is_valid_word("HELLO"));
        assert!(!dict.is_valid_word("zzz"));
        assert_eq!(dict.get_capitalized_form("haus"), "Haus");
        assert_eq!(dict.get_capitalized_form("unknown"), "unknown");
        assert_eq!(dict.loaded_languages(), vec!["en".to_string()]);
    }

    #[test]
    fn abbreviation_needs_two_uppercase() {
        let (dict, _file) = dict_with_file("Haus\nPC\nUSB\n", "validate");
        assert!(!dict.is_abbreviation("haus"));
        assert!(dict.is_abbreviation("pc"));
        assert!(dict.is_abbreviation("usb"));
        assert!(!dict.is_abbreviation("missing"));
    }

    #[test]
    fn accept_all_mode_checks_length_only() {
        let (dict, _file) = dict_with_file("", "accept_all");
        assert!(dict.is_valid_word("xyz"));
        assert!(!dict.is_valid_word("xy"));
        assert_eq!(dict.get_capitalized_form("xyz"), "xyz");
    }

    #[test]
    fn no_dictionaries_without_fallback_rejects_everything() {
        let config = Config {
            enabled_dictionaries: "/nonexistent/wordlist".to_string(),
            dictionary_auto_fallback: false,
            ..Config::default()
        };
        let dict = Dictionary::new(&config, None, None);
        assert!(!dict.accept_all_mode());
        assert!(!dict.is_valid_word("hello"));
    }

    #[test]
    fn no_dictionaries_with_fallback_accepts_all() {
        let config = Config {
            enabled_dictionaries: "/nonexistent/wordlist".to_string(),
            ..Config::default()
        };
        let dict = Dictionary::new(&config, None, None);
        assert!(dict.accept_all_mode());
        assert!(dict.is_valid_word("hello"));
    }

    #[test]
    fn genitive_generation() {
        assert_eq!(generate_genitive("anna"), Some("annas".to_string()));
        assert_eq!(generate_genitive("hans"), None);
    }

    #[test]
    fn ignore_channels() {
        let (mut dict, _file) = dict_with_file("secret\n", "validate");
        let hasher = WordHasher::new(&[0u8; 32]);
        assert!(!dict.is_ignored("secret", &hasher));
        dict.add_ignored_hash(hasher.hash_word("secret"));
        assert!(dict.is_ignored("secret", &hasher));
        assert!(dict.is_ignored("SECRET".to_lowercase().as_str(), &hasher));
    }
}
