use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// On-disk form of the vocabulary: just the ordered character list.
#[derive(Serialize, Deserialize)]
struct VocabFile {
    chars: Vec<char>,
}

/// Immutable bijection between the distinct characters of a corpus and the
/// dense id range `[0, len)`. Built once from the full corpus and passed by
/// reference wherever encode/decode is needed.
#[derive(Clone, Debug)]
pub struct CharVocab {
    chars: Vec<char>,
    index: HashMap<char, u32>,
}

impl CharVocab {
    /// Scan the corpus and assign ids to its distinct characters in sorted
    /// order.
    pub fn fit(text: &str) -> Result<Self> {
        let distinct: BTreeSet<char> = text.chars().collect();
        if distinct.is_empty() {
            return Err(anyhow!("cannot build a vocabulary from an empty corpus"));
        }
        Ok(Self::from_chars(distinct.into_iter().collect()))
    }

    fn from_chars(chars: Vec<char>) -> Self {
        let index = chars
            .iter()
            .enumerate()
            .map(|(id, &ch)| (ch, id as u32))
            .collect();
        Self { chars, index }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn contains(&self, ch: char) -> bool {
        self.index.contains_key(&ch)
    }

    /// Id of a character, or an unknown-symbol error for characters outside
    /// the fitted vocabulary.
    pub fn code(&self, ch: char) -> Result<u32> {
        self.index
            .get(&ch)
            .copied()
            .ok_or_else(|| anyhow!("character {ch:?} is not in the vocabulary"))
    }

    pub fn char_for(&self, id: u32) -> Option<char> {
        self.chars.get(id as usize).copied()
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        text.chars().map(|ch| self.code(ch)).collect()
    }

    /// Decode ids back into text. Ids outside the vocabulary are skipped.
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter().filter_map(|&id| self.char_for(id)).collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = VocabFile {
            chars: self.chars.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write vocabulary {}", path.display()))
    }

    /// Conventional location of the vocabulary file next to a checkpoint,
    /// so sampling can rebuild the mapping without the corpus.
    pub fn sidecar_path(ckpt_path: &Path) -> std::path::PathBuf {
        ckpt_path.with_extension("vocab.json")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read vocabulary {}", path.display()))?;
        let file: VocabFile = serde_json::from_str(&json)
            .with_context(|| format!("failed to parse vocabulary {}", path.display()))?;
        if file.chars.is_empty() {
            return Err(anyhow!("vocabulary {} is empty", path.display()));
        }
        Ok(Self::from_chars(file.chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ids_follow_sorted_character_order() {
        let vocab = CharVocab::fit("cab").expect("fit");
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.code('a').unwrap(), 0);
        assert_eq!(vocab.code('b').unwrap(), 1);
        assert_eq!(vocab.code('c').unwrap(), 2);
    }

    #[test]
    fn encode_decode_round_trip() {
        let vocab = CharVocab::fit("hello world").expect("fit");
        let ids = vocab.encode("hello").expect("encode");
        assert_eq!(vocab.decode(&ids), "hello");
    }

    #[test]
    fn unknown_character_is_an_error() {
        let vocab = CharVocab::fit("abc").expect("fit");
        assert!(vocab.encode("abz").is_err());
    }

    #[test]
    fn save_load_preserves_mapping() {
        let vocab = CharVocab::fit("the quick brown fox").expect("fit");
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("vocab.json");
        vocab.save(&path).expect("save");

        let loaded = CharVocab::load(&path).expect("load");
        assert_eq!(loaded.len(), vocab.len());
        for ch in "the quick brown fox".chars() {
            assert_eq!(loaded.code(ch).unwrap(), vocab.code(ch).unwrap());
        }
    }
}
