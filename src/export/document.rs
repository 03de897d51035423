//! Paginated PDF report (A4, Helvetica).
//!
//! Layout is expressed in millimetres from the top-left corner of the page and
//! converted to PDF user space when operations are emitted. Text width is
//! estimated at half an em per character, which is close enough for Helvetica
//! to wrap recommendations and centre the title.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tracing::debug;

use crate::domain::Category;

use super::{ExportError, Report};

const PAGE_WIDTH_MM: f64 = 210.0;
const PAGE_HEIGHT_MM: f64 = 297.0;
const PT_PER_MM: f64 = 72.0 / 25.4;
const MARGIN_MM: f64 = 20.0;
const AVG_CHAR_EM: f64 = 0.5;
const LINE_HEIGHT_FACTOR: f64 = 1.15;

const TITLE: &str = "Prakruti Assessment Report";
pub const DISCLAIMER: &str = "Disclaimer: This assessment is for educational purposes only and \
should not replace professional medical advice. Consult with a qualified Ayurvedic practitioner \
for personalized treatment recommendations.";

type Rgb = (u8, u8, u8);
const FOREST_GREEN: Rgb = (34, 69, 34);
const GRAY: Rgb = (100, 100, 100);
const BLACK: Rgb = (0, 0, 0);

/// Accumulates text operations page by page.
struct PageWriter {
  pages: Vec<Vec<Operation>>,
}

impl PageWriter {
  fn new() -> Self {
    Self { pages: vec![Vec::new()] }
  }

  fn add_page(&mut self) {
    self.pages.push(Vec::new());
  }

  fn text(&mut self, x_mm: f64, y_mm: f64, size: f64, color: Rgb, text: &str) {
    let Some(ops) = self.pages.last_mut() else { return };
    let (r, g, b) = color;
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec!["F1".into(), Object::Real(size as f32)]));
    ops.push(Operation::new(
      "rg",
      vec![
        Object::Real(f32::from(r) / 255.0),
        Object::Real(f32::from(g) / 255.0),
        Object::Real(f32::from(b) / 255.0),
      ],
    ));
    ops.push(Operation::new(
      "Td",
      vec![
        Object::Real((x_mm * PT_PER_MM) as f32),
        Object::Real(((PAGE_HEIGHT_MM - y_mm) * PT_PER_MM) as f32),
      ],
    ));
    ops.push(Operation::new("Tj", vec![Object::string_literal(encode_latin1(text))]));
    ops.push(Operation::new("ET", vec![]));
  }

  fn centered(&mut self, y_mm: f64, size: f64, color: Rgb, text: &str) {
    let x = (PAGE_WIDTH_MM - text_width_mm(text, size)) / 2.0;
    self.text(x.max(0.0), y_mm, size, color, text);
  }

  /// Draw pre-wrapped lines starting at `y_mm`, one line height apart.
  fn lines(&mut self, x_mm: f64, y_mm: f64, size: f64, color: Rgb, lines: &[String]) {
    let step = line_height_mm(size);
    for (i, line) in lines.iter().enumerate() {
      self.text(x_mm, y_mm + step * i as f64, size, color, line);
    }
  }
}

/// Render the report as PDF bytes.
pub fn render_document(report: &Report<'_>) -> Result<Vec<u8>, ExportError> {
  let result = report.result;
  let scores = &result.scores;
  let mut w = PageWriter::new();

  w.centered(25.0, 24.0, FOREST_GREEN, TITLE);

  let date = report.generated_at.format("%B %-d, %Y").to_string();
  w.text(MARGIN_MM, 40.0, 12.0, GRAY, &format!("Assessment Date: {date}"));
  w.text(MARGIN_MM, 48.0, 12.0, GRAY, &format!("Patient Name: {}", report.subject_name()));
  if let Some(subject) = report.subject {
    w.text(MARGIN_MM, 56.0, 12.0, GRAY, &format!("Age: {} years", subject.age));
    w.text(MARGIN_MM, 64.0, 12.0, GRAY, &format!("Mobile: {}", subject.contact));
  }

  let y_start = if report.subject.is_some() { 80.0 } else { 65.0 };
  w.text(MARGIN_MM, y_start, 18.0, BLACK, "Constitution Analysis");
  w.text(
    MARGIN_MM,
    y_start + 15.0,
    16.0,
    FOREST_GREEN,
    &format!("Primary Constitution: {}", result.constitution),
  );
  w.text(MARGIN_MM, y_start + 35.0, 14.0, BLACK, "Dosha Distribution:");

  let mut y = y_start + 45.0;
  for category in Category::ALL {
    let line = format!(
      "{}: {}% ({} points)",
      category.id().to_uppercase(),
      scores.rounded_percentage(category),
      scores.get(category)
    );
    w.text(25.0, y, 12.0, BLACK, &line);
    y += 8.0;
  }

  w.text(MARGIN_MM, y + 10.0, 14.0, BLACK, "Personalized Recommendations:");
  y += 20.0;

  let wrap_width = PAGE_WIDTH_MM - 2.0 * MARGIN_MM;
  for (i, rec) in result.recommendations.iter().enumerate() {
    let lines = wrap_text(&format!("{}. {}", i + 1, rec), 11.0, wrap_width);
    w.lines(25.0, y, 11.0, BLACK, &lines);
    y += lines.len() as f64 * 6.0 + 3.0;
    if y > PAGE_HEIGHT_MM - 30.0 {
      w.add_page();
      y = 20.0;
    }
  }

  if y > PAGE_HEIGHT_MM - 50.0 {
    w.add_page();
    y = 20.0;
  }
  let disclaimer = wrap_text(DISCLAIMER, 10.0, wrap_width);
  w.lines(MARGIN_MM, y + 20.0, 10.0, GRAY, &disclaimer);

  debug!(target: "export", pages = w.pages.len(), "Document laid out");
  assemble(w.pages)
}

fn assemble(pages: Vec<Vec<Operation>>) -> Result<Vec<u8>, ExportError> {
  let mut doc = Document::with_version("1.5");
  let pages_id = doc.new_object_id();
  let font_id = doc.add_object(dictionary! {
    "Type" => "Font",
    "Subtype" => "Type1",
    "BaseFont" => "Helvetica",
    "Encoding" => "WinAnsiEncoding",
  });
  let resources_id = doc.add_object(dictionary! {
    "Font" => dictionary! { "F1" => font_id },
  });

  let mut kids = Vec::with_capacity(pages.len());
  for operations in pages {
    let content = Content { operations }
      .encode()
      .map_err(|e| ExportError::Render(e.to_string()))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));
    let page_id = doc.add_object(dictionary! {
      "Type" => "Page",
      "Parent" => pages_id,
      "Contents" => content_id,
    });
    kids.push(Object::from(page_id));
  }

  let count = kids.len() as i64;
  let media_box: Vec<Object> = vec![
    Object::Integer(0),
    Object::Integer(0),
    Object::Real((PAGE_WIDTH_MM * PT_PER_MM) as f32),
    Object::Real((PAGE_HEIGHT_MM * PT_PER_MM) as f32),
  ];
  doc.objects.insert(
    pages_id,
    Object::Dictionary(dictionary! {
      "Type" => "Pages",
      "Kids" => kids,
      "Count" => count,
      "Resources" => resources_id,
      "MediaBox" => media_box,
    }),
  );
  let catalog_id = doc.add_object(dictionary! {
    "Type" => "Catalog",
    "Pages" => pages_id,
  });
  doc.trailer.set("Root", catalog_id);

  let mut bytes = Vec::new();
  doc
    .save_to(&mut bytes)
    .map_err(|e| ExportError::Render(e.to_string()))?;
  Ok(bytes)
}

fn text_width_mm(text: &str, size: f64) -> f64 {
  text.chars().count() as f64 * size * AVG_CHAR_EM / PT_PER_MM
}

fn line_height_mm(size: f64) -> f64 {
  size * LINE_HEIGHT_FACTOR / PT_PER_MM
}

/// Greedy word wrap to `width_mm`. Words longer than a line are split.
fn wrap_text(text: &str, size: f64, width_mm: f64) -> Vec<String> {
  let max_chars = ((width_mm / text_width_mm("m", size)).floor() as usize).max(1);
  let mut lines = Vec::new();
  let mut current = String::new();

  for word in text.split_whitespace() {
    let mut word: Vec<char> = word.chars().collect();
    while word.len() > max_chars {
      if !current.is_empty() {
        lines.push(std::mem::take(&mut current));
      }
      let rest = word.split_off(max_chars);
      lines.push(word.into_iter().collect());
      word = rest;
    }
    let word: String = word.into_iter().collect();
    let needed = if current.is_empty() { 0 } else { current.chars().count() + 1 };
    if needed + word.chars().count() > max_chars {
      lines.push(std::mem::take(&mut current));
    }
    if !current.is_empty() {
      current.push(' ');
    }
    current.push_str(&word);
  }
  if !current.is_empty() || lines.is_empty() {
    lines.push(current);
  }
  lines
}

/// WinAnsi covers Latin-1 for the characters we print; anything else becomes '?'.
fn encode_latin1(text: &str) -> Vec<u8> {
  text
    .chars()
    .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
    .collect()
}
