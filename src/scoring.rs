//! Response aggregation, constitution classification and recommendation lookup.
//!
//! Ranking is by tally descending; equal tallies fall back to the fixed
//! category precedence (Vata, Pitta, Kapha). A result whose tallies are all
//! equal (including the all-zero case) is classified as balanced with no
//! secondary category.

use tracing::{debug, instrument};

use crate::domain::{Category, ClassificationResult, Response, ScoreTally};

/// Share of the total (in percent) the primary must exceed to be "Dominant".
pub const DOMINANCE_THRESHOLD: f64 = 60.0;

pub const BALANCED_LABEL: &str = "Balanced (Tridoshic-equivalent)";

/// Sum the weight of every selected choice into its category.
pub fn aggregate<'a, I>(responses: I) -> ScoreTally
where
  I: IntoIterator<Item = &'a Response>,
{
  responses.into_iter().fold(ScoreTally::default(), |mut tally, r| {
    tally.add(r.selected_option.category, u64::from(r.selected_option.points));
    tally
  })
}

/// Categories with their tallies, best first.
pub fn rank(scores: &ScoreTally) -> [(Category, u64); 3] {
  let mut ranked = Category::ALL.map(|c| (c, scores.get(c)));
  ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.precedence().cmp(&b.0.precedence())));
  ranked
}

/// Classify a tally into primary/secondary categories and a constitution label.
#[instrument(level = "debug", skip_all, fields(vata = scores.vata, pitta = scores.pitta, kapha = scores.kapha))]
pub fn classify(scores: ScoreTally) -> ClassificationResult {
  let ranked = rank(&scores);
  let (primary, primary_tally) = ranked[0];
  let total = scores.total();
  let all_equal = ranked.iter().all(|(_, t)| *t == primary_tally);

  let (secondary, constitution) = if total == 0 || all_equal {
    (None, BALANCED_LABEL.to_string())
  } else {
    let secondary = (ranked[1].1 > 0).then_some(ranked[1].0);
    let primary_pct = primary_tally as f64 / total as f64 * 100.0;
    let label = if primary_pct > DOMINANCE_THRESHOLD {
      format!("{} Dominant", primary)
    } else if let Some(s) = secondary {
      format!("{}-{} (Dual)", primary, s)
    } else {
      BALANCED_LABEL.to_string()
    };
    (secondary, label)
  };

  debug!(target: "assessment", %primary, ?secondary, %constitution, "Classified tally");

  ClassificationResult {
    scores,
    primary,
    secondary,
    constitution,
    recommendations: recommendations_for(primary).iter().map(|s| s.to_string()).collect(),
  }
}

/// Aggregate then classify.
pub fn evaluate<'a, I>(responses: I) -> ClassificationResult
where
  I: IntoIterator<Item = &'a Response>,
{
  classify(aggregate(responses))
}

/// Fixed advice for the primary category. Never blended with the secondary.
pub fn recommendations_for(category: Category) -> &'static [&'static str] {
  match category {
    Category::Vata => &[
      "Maintain regular daily routines and meal times",
      "Prefer warm, cooked foods and avoid raw, cold foods",
      "Practice calming activities like gentle yoga and meditation",
      "Ensure adequate rest and avoid overstimulation",
      "Use warm oils for regular self-massage (abhyanga)",
      "Stay warm and avoid excessive cold and wind",
    ],
    Category::Pitta => &[
      "Avoid excessive heat and direct sun exposure",
      "Prefer cooling foods and avoid spicy, acidic foods",
      "Practice moderate exercise and avoid overexertion",
      "Maintain work-life balance and avoid perfectionism",
      "Spend time in nature, especially near water",
      "Practice cooling pranayama and meditation",
    ],
    Category::Kapha => &[
      "Engage in regular vigorous exercise and movement",
      "Prefer light, warm, spicy foods and reduce dairy/sweets",
      "Maintain active lifestyle and avoid excessive sleep",
      "Seek mental stimulation and new experiences",
      "Practice energizing breathing techniques",
      "Keep environment warm and dry",
    ],
  }
}
