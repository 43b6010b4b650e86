use std::fmt;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use super::text::{normalize, similarity};

const DEFAULT_JUDGE_PROMPT: &str = "\
You are the judge of a guessing game. The players are trying to guess a concept.

Answer: {answer}
Aliases: {aliases}
Category: {category}

Question: {question}

Reply \"yes\" if the question is true of the concept, \"no\" if it is not, and \
\"unsure\" if it cannot be decided. Reply with exactly one word.";

/// One puzzle: the concept to guess and how it is presented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub answer: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
}

impl Concept {
    /// Whether `guess` names the answer or one of its aliases.
    pub fn matches(&self, guess: &str) -> bool {
        let guess = normalize(guess);
        !guess.is_empty()
            && std::iter::once(&self.answer)
                .chain(&self.aliases)
                .any(|name| normalize(name) == guess)
    }

    /// Best similarity of `guess` to the answer or any alias.
    pub fn closeness(&self, guess: &str) -> f64 {
        std::iter::once(&self.answer)
            .chain(&self.aliases)
            .map(|name| similarity(guess, name))
            .fold(0.0, f64::max)
    }
}

/// `[plugins.puzzle]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PuzzleConfig {
    pub concepts: Vec<Concept>,
    /// Overrides the judge prompt. Placeholders: `{answer}`, `{aliases}`,
    /// `{category}`, `{question}`.
    pub judge_prompt: Option<String>,
    /// Let `start` abandon a running game instead of refusing.
    pub replace_running: bool,
}

/// The configured concepts, shared by every room.
#[derive(Debug)]
pub struct PuzzleBook {
    concepts: Vec<Concept>,
    judge_prompt: String,
    replace_running: bool,
}

impl PuzzleBook {
    pub fn new(config: PuzzleConfig) -> Self {
        Self {
            concepts: config.concepts,
            judge_prompt: config
                .judge_prompt
                .unwrap_or_else(|| DEFAULT_JUDGE_PROMPT.to_string()),
            replace_running: config.replace_running,
        }
    }

    pub fn replaces_running(&self) -> bool {
        self.replace_running
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    pub fn random(&self) -> Option<Concept> {
        self.concepts.choose(&mut rand::rng()).cloned()
    }

    pub fn judge_prompt(&self, concept: &Concept, question: &str) -> String {
        let aliases = if concept.aliases.is_empty() {
            "none".to_string()
        } else {
            concept.aliases.join(", ")
        };
        self.judge_prompt
            .replace("{answer}", &concept.answer)
            .replace("{aliases}", &aliases)
            .replace("{category}", &concept.category)
            .replace("{question}", question)
    }
}

/// Per-room game state.
#[derive(Debug, Clone)]
pub struct PuzzleState {
    pub concept: Concept,
    pub questions: u32,
    pub guesses: u32,
}

impl PuzzleState {
    pub fn new(concept: Concept) -> Self {
        Self {
            concept,
            questions: 0,
            guesses: 0,
        }
    }
}

/// The judge's answer to a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Yes,
    No,
    Unsure,
}

impl Verdict {
    /// Reads the first word of a backend reply.
    pub fn parse(reply: &str) -> Self {
        let word: String = reply
            .trim()
            .chars()
            .take_while(|c| c.is_alphabetic())
            .flat_map(char::to_lowercase)
            .collect();
        match word.as_str() {
            "yes" => Self::Yes,
            "no" => Self::No,
            _ => Self::Unsure,
        }
    }

    /// Unsure answers do not use up a question.
    pub fn counts(self) -> bool {
        self != Self::Unsure
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Yes => "Yes.",
            Self::No => "No.",
            Self::Unsure => "Unsure.",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kettle() -> Concept {
        Concept {
            answer: "Kettle".to_string(),
            aliases: vec!["tea kettle".to_string()],
            category: "object".to_string(),
            description: "Boils water.".to_string(),
        }
    }

    #[test]
    fn matches_answer_and_aliases() {
        let c = kettle();
        assert!(c.matches("kettle"));
        assert!(c.matches("Tea-Kettle!"));
        assert!(!c.matches("teapot"));
        assert!(!c.matches("  "));
        assert!(c.closeness("kettel") > 0.5);
    }

    #[test]
    fn verdict_parsing() {
        assert_eq!(Verdict::parse("Yes."), Verdict::Yes);
        assert_eq!(Verdict::parse(" no, it is not"), Verdict::No);
        assert_eq!(Verdict::parse("not sure"), Verdict::Unsure);
        assert_eq!(Verdict::parse("unsure"), Verdict::Unsure);
        assert!(!Verdict::Unsure.counts());
    }

    #[test]
    fn prompt_placeholders() {
        let book = PuzzleBook::new(PuzzleConfig {
            concepts: vec![kettle()],
            judge_prompt: Some("{answer}|{aliases}|{category}|{question}".to_string()),
            ..PuzzleConfig::default()
        });
        assert!(!book.replaces_running());
        assert_eq!(
            book.judge_prompt(&kettle(), "is it hot?"),
            "Kettle|tea kettle|object|is it hot?"
        );
        assert_eq!(book.random(), Some(kettle()));
    }
}
