//! Question catalog: the built-in 18-question Prakruti questionnaire plus
//! validation for catalogs loaded from configuration.

use std::collections::HashSet;

use thiserror::Error;

use crate::domain::{Category, Choice, Question};

/// Why a question set cannot be used as a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
  #[error("catalog has no questions")]
  Empty,

  #[error("duplicate question id {0}")]
  DuplicateId(u32),

  #[error("question {0} has an empty prompt")]
  EmptyPrompt(u32),

  #[error("question {0} has no choices")]
  NoChoices(u32),

  #[error("question {question_id} choice '{choice}' must carry a positive weight")]
  ZeroWeight { question_id: u32, choice: String },
}

/// Ordered, read-only list of questions presented by a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Catalog {
  questions: Vec<Question>,
}

impl Catalog {
  /// Build a catalog, rejecting malformed question sets.
  pub fn new(questions: Vec<Question>) -> Result<Self, CatalogError> {
    let catalog = Self { questions };
    catalog.validate()?;
    Ok(catalog)
  }

  /// The reference questionnaire (ids 1..=18, one choice per category, 3 points each).
  pub fn builtin() -> Self {
    Self { questions: builtin_questions() }
  }

  pub fn validate(&self) -> Result<(), CatalogError> {
    if self.questions.is_empty() {
      return Err(CatalogError::Empty);
    }
    let mut seen = HashSet::new();
    for q in &self.questions {
      if !seen.insert(q.id) {
        return Err(CatalogError::DuplicateId(q.id));
      }
      if q.prompt.trim().is_empty() {
        return Err(CatalogError::EmptyPrompt(q.id));
      }
      if q.choices.is_empty() {
        return Err(CatalogError::NoChoices(q.id));
      }
      if let Some(c) = q.choices.iter().find(|c| c.points == 0) {
        return Err(CatalogError::ZeroWeight { question_id: q.id, choice: c.text.clone() });
      }
    }
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.questions.len()
  }

  pub fn questions(&self) -> &[Question] {
    &self.questions
  }

  pub fn at(&self, index: usize) -> Option<&Question> {
    self.questions.get(index)
  }

  pub fn find(&self, id: u32) -> Option<&Question> {
    self.questions.iter().find(|q| q.id == id)
  }
}

macro_rules! question {
  ($id:expr, $topic:expr, $prompt:expr, $vata:expr, $pitta:expr, $kapha:expr) => {
    Question {
      id: $id,
      topic: $topic.into(),
      prompt: $prompt.into(),
      choices: vec![
        Choice { text: $vata.into(), category: Category::Vata, points: 3 },
        Choice { text: $pitta.into(), category: Category::Pitta, points: 3 },
        Choice { text: $kapha.into(), category: Category::Kapha, points: 3 },
      ],
    }
  };
}

const PHYSICAL: &str = "Physical Constitution";
const DIGESTIVE: &str = "Digestive Patterns";
const MENTAL: &str = "Mental & Emotional";
const ENVIRONMENT: &str = "Environmental Response";
const LIFESTYLE: &str = "Lifestyle Patterns";

fn builtin_questions() -> Vec<Question> {
  vec![
    question!(1, PHYSICAL, "What is your natural body build?",
      "Thin, light frame with prominent joints",
      "Medium build with good muscle definition",
      "Large, heavy frame with broad shoulders"),
    question!(2, PHYSICAL, "How is your skin texture naturally?",
      "Dry, rough, and tends to crack easily",
      "Warm, oily, and prone to inflammation",
      "Thick, smooth, and naturally moisturized"),
    question!(3, PHYSICAL, "Describe your hair quality:",
      "Dry, brittle, and frizzy",
      "Fine, soft, and prone to early graying",
      "Thick, oily, and lustrous"),
    question!(4, DIGESTIVE, "What is your appetite like?",
      "Variable - sometimes very hungry, sometimes no appetite",
      "Strong and regular - get uncomfortable when hungry",
      "Steady but can easily skip meals without discomfort"),
    question!(5, DIGESTIVE, "How is your digestion?",
      "Irregular - bloating, gas, and constipation",
      "Quick and strong - feel heat after eating",
      "Slow and steady - feel heavy after meals"),
    question!(6, DIGESTIVE, "What is your thirst pattern?",
      "Variable thirst - sometimes forget to drink",
      "Intense thirst - crave cold drinks",
      "Low thirst - prefer warm drinks"),
    question!(7, MENTAL, "How is your sleep pattern?",
      "Light, restless, and easily disturbed",
      "Moderate but sound - wake up refreshed",
      "Deep and long - love to sleep in"),
    question!(8, MENTAL, "How do you handle stress?",
      "Become anxious and worry excessively",
      "Get irritated and angry quickly",
      "Withdraw and become quiet or sad"),
    question!(9, MENTAL, "What describes your energy levels?",
      "Bursts of energy followed by fatigue",
      "Consistent high energy throughout the day",
      "Steady, sustained energy but slow to start"),
    question!(10, MENTAL, "How do you learn and retain information?",
      "Learn quickly but forget easily",
      "Learn at moderate pace with good comprehension",
      "Learn slowly but remember for a long time"),
    question!(11, MENTAL, "What is your speaking pattern?",
      "Talk fast, jump between topics",
      "Speak clearly with conviction",
      "Speak slowly and thoughtfully"),
    question!(12, ENVIRONMENT, "How do you react to cold weather?",
      "Dislike cold - feel stiff and uncomfortable",
      "Tolerate cold well - actually prefer it",
      "Don't mind cold but feel sluggish"),
    question!(13, ENVIRONMENT, "How do you react to hot weather?",
      "Tolerate heat reasonably well",
      "Become uncomfortable and irritable in heat",
      "Handle heat well but become lethargic"),
    question!(14, LIFESTYLE, "What is your natural tendency toward physical activity?",
      "Enjoy varied activities but tire quickly",
      "Like competitive sports and vigorous exercise",
      "Prefer gentle, steady exercise"),
    question!(15, LIFESTYLE, "How do you handle routine?",
      "Dislike routine - prefer variety and change",
      "Like organized routine but can adapt",
      "Love routine and resist change"),
    question!(16, PHYSICAL, "What is your natural body weight tendency?",
      "Tend to be underweight - hard to gain",
      "Maintain moderate weight easily",
      "Tend to gain weight easily"),
    question!(17, MENTAL, "How is your memory pattern?",
      "Good short-term, poor long-term memory",
      "Sharp, clear memory with good recall",
      "Slow to remember but very retentive"),
    question!(18, MENTAL, "What describes your decision-making style?",
      "Quick decisions but often change mind",
      "Decisive and stick to decisions",
      "Take time to decide but rarely change"),
  ]
}
