use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::TokenizerError;
use crate::lexer::lex;

/// Token backend: text to ids and back.
///
/// `decode(encode(x)) == x` must hold for any backend handed to the reducer;
/// [`check_round_trip`] verifies it for a given text.
pub trait Tokenizer: Send + Sync {
    fn name(&self) -> &str;
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, ids: &[u32]) -> String;
}

/// One token per Unicode scalar value.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn name(&self) -> &str {
        "char"
    }

    fn encode(&self, text: &str) -> Vec<u32> {
        text.chars().map(u32::from).collect()
    }

    fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .map(|&id| char::from_u32(id).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }
}

#[derive(Debug, Default)]
struct Vocab {
    ids: HashMap<String, u32>,
    lexemes: Vec<String>,
}

impl Vocab {
    fn intern(&mut self, lexeme: &str) -> u32 {
        if let Some(&id) = self.ids.get(lexeme) {
            return id;
        }
        let id = self.lexemes.len() as u32;
        self.lexemes.push(lexeme.to_string());
        self.ids.insert(lexeme.to_string(), id);
        id
    }
}

/// Java lexemes with a vocabulary that grows as new lexemes are seen.
///
/// Ids are stable for the lifetime of the tokenizer.
#[derive(Debug, Default)]
pub struct LexicalTokenizer {
    vocab: Mutex<Vocab>,
}

impl LexicalTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vocab_size(&self) -> usize {
        self.lock().lexemes.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vocab> {
        self.vocab.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Tokenizer for LexicalTokenizer {
    fn name(&self) -> &str {
        "lexical"
    }

    fn encode(&self, text: &str) -> Vec<u32> {
        let mut vocab = self.lock();
        lex(text).into_iter().map(|lexeme| vocab.intern(lexeme)).collect()
    }

    fn decode(&self, ids: &[u32]) -> String {
        let vocab = self.lock();
        let mut out = String::new();
        for &id in ids {
            match vocab.lexemes.get(id as usize) {
                Some(lexeme) => out.push_str(lexeme),
                None => out.push(char::REPLACEMENT_CHARACTER),
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    Char,
    Lexical,
}

impl TokenizerKind {
    pub fn build(self) -> Box<dyn Tokenizer> {
        match self {
            TokenizerKind::Char => Box::new(CharTokenizer),
            TokenizerKind::Lexical => Box::new(LexicalTokenizer::new()),
        }
    }
}

/// Encode `text`, failing if decoding the ids does not give `text` back.
pub fn check_round_trip(tokenizer: &dyn Tokenizer, text: &str) -> Result<Vec<u32>, TokenizerError> {
    let ids = tokenizer.encode(text);
    let decoded = tokenizer.decode(&ids);
    if decoded == text {
        return Ok(ids);
    }
    let first_difference = text
        .bytes()
        .zip(decoded.bytes())
        .position(|(a, b)| a != b)
        .unwrap_or_else(|| text.len().min(decoded.len()));
    Err(TokenizerError::RoundTrip {
        tokenizer: tokenizer.name().to_string(),
        original_len: text.len(),
        decoded_len: decoded.len(),
        first_difference,
    })
}
