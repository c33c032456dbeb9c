//! Message translation seam.
//!
//! The hosted translation API is an external collaborator; the client only
//! knows this trait. [`StubTranslator`] backs mock mode.

use async_trait::async_trait;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    /// Language detected in the source text.
    pub detected_language: String,
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> Result<Translation>;
}

/// Tags the text with the target language instead of translating it.
#[derive(Debug, Default, Clone)]
pub struct StubTranslator;

#[async_trait]
impl Translator for StubTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> Result<Translation> {
        let lang = target_language.trim();
        if lang.is_empty() || !lang.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
            return Err(ClientError::Translation(format!(
                "unsupported language code {target_language:?}"
            )));
        }
        Ok(Translation {
            text: format!("[{lang}] {text}"),
            detected_language: "und".into(),
        })
    }
}
