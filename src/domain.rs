//! Domain models: categories (doshas), questions and their choices, responses,
//! subject details, score tallies and the finished classification.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{FieldViolation, ValidationError};

/// The three constitutional energies a respondent is scored against.
///
/// Declaration order is the tie-break precedence used when ranking tallies:
/// Vata before Pitta before Kapha.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Category {
  Vata,
  Pitta,
  Kapha,
}

impl Category {
  /// All categories in precedence order.
  pub const ALL: [Category; 3] = [Category::Vata, Category::Pitta, Category::Kapha];

  /// Stable lowercase identifier, as used in stored answer maps and archives.
  pub fn id(&self) -> &'static str {
    match self {
      Category::Vata => "vata",
      Category::Pitta => "pitta",
      Category::Kapha => "kapha",
    }
  }

  pub fn display_name(&self) -> &'static str {
    match self {
      Category::Vata => "Vata",
      Category::Pitta => "Pitta",
      Category::Kapha => "Kapha",
    }
  }

  /// Position in the fixed precedence list (lower wins ties).
  pub fn precedence(&self) -> usize {
    match self {
      Category::Vata => 0,
      Category::Pitta => 1,
      Category::Kapha => 2,
    }
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.display_name())
  }
}

impl FromStr for Category {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "vata" => Ok(Category::Vata),
      "pitta" => Ok(Category::Pitta),
      "kapha" => Ok(Category::Kapha),
      other => Err(format!("unknown category '{}'", other)),
    }
  }
}

/// One selectable answer of a question.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Choice {
  pub text: String,
  #[serde(rename = "dosha")]
  pub category: Category,
  pub points: u32,
}

/// Immutable questionnaire entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
  pub id: u32,
  /// Display grouping only (e.g. "Digestive Patterns").
  #[serde(rename = "category")]
  pub topic: String,
  #[serde(rename = "question")]
  pub prompt: String,
  #[serde(rename = "options")]
  pub choices: Vec<Choice>,
}

/// The choice selected for one question.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Response {
  pub question_id: u32,
  pub selected_option: Choice,
}

/// Who is being assessed. Collected before a session starts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubjectDetails {
  pub name: String,
  pub age: u32,
  #[serde(rename = "mobileNumber")]
  pub contact: String,
}

impl SubjectDetails {
  /// Check every field and report all violations at once.
  pub fn validate(&self) -> Result<(), ValidationError> {
    let mut violations = Vec::new();

    let name = self.name.trim();
    if name.is_empty() {
      violations.push(FieldViolation::new("name", "Name is required"));
    } else if name.chars().count() < 2 {
      violations.push(FieldViolation::new("name", "Name must be at least 2 characters"));
    }

    if self.age < 1 {
      violations.push(FieldViolation::new("age", "Please enter a valid age"));
    } else if self.age > 120 {
      violations.push(FieldViolation::new("age", "Please enter a realistic age"));
    }

    if self.contact.trim().is_empty() {
      violations.push(FieldViolation::new("mobileNumber", "Mobile number is required"));
    } else if !is_valid_contact(&self.contact) {
      violations.push(FieldViolation::new("mobileNumber", "Please enter a valid mobile number"));
    }

    if violations.is_empty() { Ok(()) } else { Err(ValidationError::new(violations)) }
  }
}

/// Optional leading '+', then 10..=15 of digits, '-', '(' or ')', whitespace ignored.
fn is_valid_contact(raw: &str) -> bool {
  let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
  let body = compact.strip_prefix('+').unwrap_or(&compact);
  let len = body.chars().count();
  (10..=15).contains(&len)
    && body.chars().all(|c| c.is_ascii_digit() || matches!(c, '-' | '(' | ')'))
}

/// Authenticated user context supplied by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
  pub owner_id: String,
}

/// Per-category point totals.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreTally {
  pub vata: u64,
  pub pitta: u64,
  pub kapha: u64,
}

impl ScoreTally {
  pub fn get(&self, category: Category) -> u64 {
    match category {
      Category::Vata => self.vata,
      Category::Pitta => self.pitta,
      Category::Kapha => self.kapha,
    }
  }

  pub fn add(&mut self, category: Category, points: u64) {
    let slot = match category {
      Category::Vata => &mut self.vata,
      Category::Pitta => &mut self.pitta,
      Category::Kapha => &mut self.kapha,
    };
    *slot = slot.saturating_add(points);
  }

  pub fn total(&self) -> u64 {
    self.vata.saturating_add(self.pitta).saturating_add(self.kapha)
  }

  /// Share of the total in percent; `None` when nothing was scored.
  pub fn percentage(&self, category: Category) -> Option<f64> {
    let total = self.total();
    if total == 0 {
      return None;
    }
    Some(self.get(category) as f64 / total as f64 * 100.0)
  }

  /// Rounded share for reports; 0 when nothing was scored.
  pub fn rounded_percentage(&self, category: Category) -> u64 {
    self.percentage(category).map(|p| p.round() as u64).unwrap_or(0)
  }
}

/// Outcome of classifying a finished questionnaire. Immutable once built.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
  pub scores: ScoreTally,
  #[serde(rename = "primaryDosha")]
  pub primary: Category,
  #[serde(rename = "secondaryDosha", default, skip_serializing_if = "Option::is_none")]
  pub secondary: Option<Category>,
  pub constitution: String,
  pub recommendations: Vec<String>,
}

impl ClassificationResult {
  pub fn primary_percentage(&self) -> Option<f64> {
    self.scores.percentage(self.primary)
  }
}
