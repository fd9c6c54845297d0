//! Prompt assembly
//!
//! `PromptAssembler::assemble` is a pure function of its inputs: no clock,
//! no randomness, no I/O. Identical inputs give byte-identical prompts.
//!
//! Section order:
//! 1. persona
//! 2. target-language instruction block (English and Japanese only)
//! 3. explanation-language directive
//! 4. session continuity note (only with a session id)
//! 5. reference material (only with passages)
//! 6. the quoted query, response language and formatting directives

use super::retriever::ContextPassage;
use crate::config::PromptConfig;
use crate::db::models::DEFAULT_LANGUAGE;
use std::fmt;

const CHINESE_SUFFIX: &str = " (简体中文)";

const FORMAT_DIRECTIVE: &str = "Format your response in a clear, structured way with appropriate headings and bullet points when needed. If explaining grammar points, include a \"Practice\" section with 1-2 simple exercises to help reinforce learning.\n";

/// An assembled prompt, ready to send as the single user turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Target languages with a dedicated instruction block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageProfile {
    English,
    Japanese,
}

impl LanguageProfile {
    /// Case-insensitive lookup; unknown languages have no profile
    pub fn for_language(language: &str) -> Option<Self> {
        match language.trim().to_lowercase().as_str() {
            "english" => Some(LanguageProfile::English),
            "japanese" => Some(LanguageProfile::Japanese),
            _ => None,
        }
    }

    fn instructions(self, explanation_language: &str) -> String {
        match self {
            LanguageProfile::English => format!(
                "When explaining English concepts, you should provide:\n\
                 1. Clear explanations in {explanation_language}\n\
                 2. Relevant example sentences demonstrating proper usage\n\
                 3. Common mistakes made by Chinese speakers learning English and how to avoid them\n\
                 4. If pronunciation is discussed, provide pinyin approximations that would help Chinese speakers\n\
                 5. Cultural context when relevant to language usage\n"
            ),
            LanguageProfile::Japanese => format!(
                "When explaining Japanese concepts, you should provide:\n\
                 1. Clear explanations in {explanation_language}\n\
                 2. Example sentences demonstrating proper usage with kanji, hiragana, and katakana as appropriate\n\
                 3. Common mistakes made by Chinese speakers learning Japanese and how to avoid them\n\
                 4. If pronunciation is discussed, provide Chinese phonetic approximations\n\
                 5. Appropriate kanji usage with furigana when helpful\n\
                 6. Cultural context when relevant to language usage\n"
            ),
        }
    }
}

/// Resolve `(target, explanation)` languages.
///
/// Blank values count as absent. The target defaults to english and the
/// explanation language defaults to the target.
pub fn resolve_languages(target: Option<&str>, explanation: Option<&str>) -> (String, String) {
    fn present(value: Option<&str>) -> Option<&str> {
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    let target = present(target).unwrap_or(DEFAULT_LANGUAGE).to_string();
    let explanation = present(explanation)
        .map(str::to_string)
        .unwrap_or_else(|| target.clone());
    (target, explanation)
}

fn language_directive(explanation_language: &str) -> &'static str {
    if explanation_language.eq_ignore_ascii_case("chinese") {
        CHINESE_SUFFIX
    } else {
        ""
    }
}

/// Builds tutoring prompts for one student population
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    student_origin: String,
    student_language: String,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::new(&PromptConfig::default())
    }
}

impl PromptAssembler {
    pub fn new(config: &PromptConfig) -> Self {
        Self {
            student_origin: config.student_origin.clone(),
            student_language: config.student_language.clone(),
        }
    }

    pub fn assemble(
        &self,
        query: &str,
        target_language: Option<&str>,
        explanation_language: Option<&str>,
        session_id: Option<&str>,
        passages: &[ContextPassage],
    ) -> Prompt {
        let (target, explain) = resolve_languages(target_language, explanation_language);
        let suffix = language_directive(&explain);

        let mut prompt = format!(
            "You are a helpful, accurate and supportive language tutor for students from {} learning {}. \n\
             You provide clear explanations, examples, and personalized guidance. The student's primary language is {}.\n\n",
            self.student_origin, target, self.student_language
        );

        if let Some(profile) = LanguageProfile::for_language(&target) {
            prompt.push_str(&profile.instructions(&explain));
        }

        prompt.push_str(&format!(
            "\nThe student has requested explanations in {explain}{suffix}.\n\n"
        ));

        if let Some(session_id) = session_id.map(str::trim).filter(|s| !s.is_empty()) {
            prompt.push_str(&format!(
                "This is part of an ongoing tutoring session ({session_id}). If this follows previous questions, make sure your response takes the conversation context into account.\n\n"
            ));
        }

        if !passages.is_empty() {
            prompt.push_str("Here is some relevant information that might help answer the question:\n\n");
            for (n, passage) in passages.iter().enumerate() {
                prompt.push_str(&format!("Source {}: {}\n\n", n + 1, passage.content));
            }
            prompt.push_str("Using the above information as reference where applicable, ");
        }

        prompt.push_str(&format!("The student's question is: \"{query}\"\n\n"));
        prompt.push_str(&format!("Respond in {explain}{suffix}.\n"));
        prompt.push_str(FORMAT_DIRECTIVE);

        Prompt(prompt)
    }

    /// System instruction attached to calls that belong to a session
    pub fn session_persona(&self) -> String {
        format!(
            "You are a helpful, accurate, and supportive language tutor for students from {} learning foreign languages. You provide personalized guidance, clear explanations, and follow up on previous interactions in the most helpful way.",
            self.student_origin
        )
    }
}
