//! Tabular (CSV) report. Every cell is quoted, embedded quotes are doubled,
//! rows are joined with `\n`. Row order is fixed.

use crate::domain::Category;
use crate::util::iso_millis;

use super::Report;

pub fn render_table(report: &Report<'_>) -> String {
    let result = report.result;
    let scores = &result.scores;

    let mut rows: Vec<Vec<String>> = vec![
        vec!["Prakruti Assessment Results".into()],
        vec![String::new()],
        vec![
            "Assessment Date".into(),
            iso_millis(report.generated_at),
        ],
        vec!["Patient Name".into(), report.subject_name().into()],
    ];
    if let Some(subject) = report.subject {
        rows.push(vec!["Age".into(), subject.age.to_string()]);
        rows.push(vec!["Mobile Number".into(), subject.contact.clone()]);
    }
    rows.push(vec!["Constitution".into(), result.constitution.clone()]);
    rows.push(vec!["Primary Dosha".into(), result.primary.id().into()]);
    rows.push(vec![
        "Secondary Dosha".into(),
        result
            .secondary
            .map(|c| c.id().to_string())
            .unwrap_or_else(|| "None".into()),
    ]);
    rows.push(vec![String::new()]);
    rows.push(vec!["Dosha Scores".into()]);
    rows.push(vec!["Dosha".into(), "Points".into(), "Percentage".into()]);
    for category in Category::ALL {
        rows.push(vec![
            category.display_name().into(),
            scores.get(category).to_string(),
            format!("{}%", scores.rounded_percentage(category)),
        ]);
    }
    rows.push(vec![String::new()]);
    rows.push(vec!["Recommendations".into()]);
    for (i, rec) in result.recommendations.iter().enumerate() {
        rows.push(vec![(i + 1).to_string(), rec.clone()]);
    }

    rows.iter()
        .map(|row| {
            row.iter()
                .map(|cell| quote(cell))
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn quote(cell: &str) -> String {
    format!("\"{}\"", cell.replace('"', "\"\""))
}
