//! Question bank and weighted scoring
//!
//! The session core only needs two things from a question bank: the ordered
//! question list (to count unanswered questions on manual submit) and a pure
//! scoring function whose report is attached to the submitted payload.

use crate::types::{Answers, CompletionStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_BANK: &str = include_str!("../data/questions.json");

/// One selectable answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub text: String,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub category: String,
    /// Keyed by option label (`A`, `B`, `C`)
    pub options: BTreeMap<String, AnswerOption>,
}

impl Question {
    /// Best achievable weight for this question
    pub fn max_weight(&self) -> u32 {
        self.options.values().map(|o| o.weight).max().unwrap_or(0)
    }

    /// Weight of the chosen option; unknown labels score zero
    pub fn weight_for(&self, choice: &str) -> u32 {
        self.options.get(choice).map(|o| o.weight).unwrap_or(0)
    }
}

/// Score within one category
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub score: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub total: u32,
    pub max: u32,
    /// 0-100
    pub percentage: f64,
    pub by_category: BTreeMap<String, CategoryScore>,
}

/// Ordered questions plus a pure scorer
pub trait QuestionBank {
    fn questions(&self) -> &[Question];

    fn score(&self, answers: &Answers) -> ScoreReport;

    fn total(&self) -> usize {
        self.questions().len()
    }

    /// Questions without a non-blank answer
    fn unanswered(&self, answers: &Answers) -> usize {
        self.questions()
            .iter()
            .filter(|q| answers.get(&q.id).map_or(true, |a| a.trim().is_empty()))
            .count()
    }

    fn completion(&self, answers: &Answers) -> CompletionStats {
        let total = self.total();
        CompletionStats {
            completed: total - self.unanswered(answers),
            total,
            score: self.score(answers).percentage,
        }
    }
}

/// Bank where each option carries a fixed weight
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedQuestionBank {
    questions: Vec<Question>,
}

impl WeightedQuestionBank {
    pub fn new(questions: Vec<Question>) -> Self {
        Self { questions }
    }

    /// Parse a JSON array of questions
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn load(path: &std::path::Path) -> Result<Self, crate::error::ProctorError> {
        let content = std::fs::read_to_string(path).map_err(crate::error::StorageError::from)?;
        Ok(Self::from_json(&content)?)
    }

    /// Built-in bank shipped with the crate
    pub fn builtin() -> Self {
        // The bundled file is checked by `test_builtin_bank_parses`
        Self::from_json(DEFAULT_BANK).unwrap_or_else(|_| Self::new(Vec::new()))
    }
}

impl QuestionBank for WeightedQuestionBank {
    fn questions(&self) -> &[Question] {
        &self.questions
    }

    fn score(&self, answers: &Answers) -> ScoreReport {
        let mut report = ScoreReport::default();

        for question in &self.questions {
            let earned = answers
                .get(&question.id)
                .map(|choice| question.weight_for(choice.trim()))
                .unwrap_or(0);
            let max = question.max_weight();

            report.total += earned;
            report.max += max;
            let category = report
                .by_category
                .entry(question.category.clone())
                .or_default();
            category.score += earned;
            category.max += max;
        }

        if report.max > 0 {
            report.percentage = report.total as f64 / report.max as f64 * 100.0;
        }
        report
    }
}
