//! Read-only provider of race passages, loaded once at startup.

use std::{fs, io::ErrorKind, path::Path};

use rand::seq::IndexedRandom;
use serde::Deserialize;
use tracing::{info, warn};

/// Number of players from which a session is handed a long passage.
pub const LONG_TEXT_PLAYER_THRESHOLD: usize = 5;

/// Static corpus of race passages, partitioned into short and long texts.
#[derive(Debug, Clone)]
pub struct TextCorpus {
    texts: Vec<String>,
    long_texts: Vec<String>,
}

#[derive(Debug, Deserialize)]
/// JSON representation of the corpus file.
struct RawCorpus {
    texts: Vec<String>,
    #[serde(rename = "longTexts", default)]
    long_texts: Vec<String>,
}

impl TextCorpus {
    /// Load the corpus from disk, falling back to the baked-in passages when
    /// the file is missing or malformed.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RawCorpus>(&contents) {
                Ok(raw) if !raw.texts.is_empty() => {
                    let corpus = Self {
                        texts: raw.texts,
                        long_texts: raw.long_texts,
                    };
                    info!(
                        path = %path.display(),
                        short = corpus.texts.len(),
                        long = corpus.long_texts.len(),
                        "loaded text corpus"
                    );
                    corpus
                }
                Ok(_) => {
                    warn!(path = %path.display(), "corpus file has no texts; using built-in defaults");
                    Self::default()
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse corpus; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "corpus file not found; using built-in defaults");
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read corpus; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Pick a random passage; sessions with `player_count` at or above
    /// [`LONG_TEXT_PLAYER_THRESHOLD`] receive a long passage when available.
    pub fn pick(&self, player_count: usize) -> String {
        let mut rng = rand::rng();
        let pool = if player_count >= LONG_TEXT_PLAYER_THRESHOLD && !self.long_texts.is_empty() {
            &self.long_texts
        } else {
            &self.texts
        };
        pool.choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| default_short_texts()[0].to_string())
    }
}

impl Default for TextCorpus {
    fn default() -> Self {
        Self {
            texts: default_short_texts().iter().map(|s| s.to_string()).collect(),
            long_texts: default_long_texts().iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Built-in short passages shipped with the binary.
fn default_short_texts() -> &'static [&'static str] {
    &[
        "The quick brown fox jumps over the lazy dog while the farmer watches from the barn door.",
        "Typing fast is a skill that rewards rhythm and accuracy more than raw finger speed.",
        "A steady pace wins the race; bursts of speed mean nothing if every other word has a typo.",
        "Keyboards come in many layouts, but muscle memory only ever learns the one in front of you.",
        "Practice does not make perfect; perfect practice makes perfect, as every coach likes to say.",
        "Rain tapped against the window as she finished the last sentence of her midnight letter.",
    ]
}

/// Built-in long passages used for larger sessions.
fn default_long_texts() -> &'static [&'static str] {
    &[
        "In the early days of the telegraph, operators developed a reputation for recognizing one another purely by the rhythm of their keying, a signature as distinctive as handwriting. Decades later, typists at mechanical keyboards carried the same habit forward, and even now a trained ear can pick out a familiar colleague from the cadence of their keystrokes echoing down an office corridor.",
        "The library opened at dawn, and by the time the first readers arrived the archivist had already sorted three crates of returned volumes, repaired a cracked spine with linen tape, and catalogued a donation of maps so old that their coastlines no longer matched any modern atlas. She worked without hurry, because hurry was the enemy of both bookbinding and accuracy.",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_corpus_is_nonempty() {
        let corpus = TextCorpus::default();
        assert!(!corpus.texts.is_empty());
        assert!(!corpus.long_texts.is_empty());
    }

    #[test]
    fn small_sessions_get_short_texts() {
        let corpus = TextCorpus::default();
        let text = corpus.pick(2);
        assert!(corpus.texts.contains(&text));
    }

    #[test]
    fn large_sessions_get_long_texts() {
        let corpus = TextCorpus::default();
        let text = corpus.pick(LONG_TEXT_PLAYER_THRESHOLD);
        assert!(corpus.long_texts.contains(&text));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let corpus = TextCorpus::load(Path::new("/nonexistent/texts.json"));
        assert!(!corpus.texts.is_empty());
    }
}
