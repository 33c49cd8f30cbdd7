//! Server-rendered HTML for the informational pages.

use shared::{DiseaseRecord, Treatment};

use crate::knowledge::{KnowledgeBase, title_case};

const HEALTHY_KEY: &str = "healthy";

pub fn render_home(kb: &KnowledgeBase) -> String {
    let cards: String = kb
        .summaries()
        .into_iter()
        .filter(|summary| summary.key != HEALTHY_KEY)
        .map(|summary| {
            format!(
                r#"<li class="disease-card"><a href="/disease/{href}"><h3>{name}</h3></a>
<p>{description}</p><span>{count} symptoms</span></li>"#,
                href = urlencoding::encode(&summary.key),
                name = escape_html(&summary.name),
                description = escape_html(&summary.description),
                count = summary.symptoms_count,
            )
        })
        .collect();

    layout(
        "LeafGuard - Leaf Disease Predictor",
        &format!(
            r#"<section class="hero"><h1>LeafGuard</h1>
<p>Upload a tomato leaf photo to identify common diseases.</p>
<a class="button" href="/predictor">Predict Now</a></section>
<section><h2>Diseases we detect</h2><ul class="diseases">{cards}</ul></section>"#
        ),
    )
}

pub fn render_predictor(allowed_extensions: &[String], max_bytes: usize) -> String {
    let accept = allowed_extensions
        .iter()
        .map(|ext| format!(".{}", ext))
        .collect::<Vec<_>>()
        .join(",");
    layout(
        "LeafGuard - Predictor",
        &format!(
            r#"<section><h1>Predict leaf disease</h1>
<form method="post" action="/api/predict" enctype="multipart/form-data">
<input type="file" name="file" accept="{accept}" required>
<button type="submit">Analyze</button>
</form>
<p>Allowed formats: {formats}. Maximum size: {max_mb} MB.</p></section>"#,
            accept = escape_html(&accept),
            formats = escape_html(&allowed_extensions.join(", ")),
            max_mb = max_bytes / (1024 * 1024),
        ),
    )
}

pub fn render_disease(key: &str, record: &DiseaseRecord) -> String {
    let name = title_case(key);
    let treatment = match &record.treatment {
        Treatment::Steps(steps) => list(steps),
        Treatment::Note(note) => format!("<p>{}</p>", escape_html(note)),
    };
    layout(
        &format!("LeafGuard - {}", name),
        &format!(
            r#"<article><h1>{name}</h1><p>{description}</p>
<h2>Symptoms</h2>{symptoms}
<h2>Causes</h2><p>{causes}</p>
<h2>Prevention</h2>{prevention}
<h2>Treatment</h2>{treatment}
<a href="/predictor">Check a leaf</a></article>"#,
            name = escape_html(&name),
            description = escape_html(&record.description),
            symptoms = list(&record.symptoms),
            causes = escape_html(&record.causes),
            prevention = list(&record.prevention),
        ),
    )
}

pub fn render_not_found() -> String {
    layout(
        "LeafGuard - Not found",
        r#"<section><h1>Page not found</h1><a href="/">Back to home</a></section>"#,
    )
}

fn list(items: &[String]) -> String {
    let entries: String = items
        .iter()
        .map(|item| format!("<li>{}</li>", escape_html(item)))
        .collect();
    format!("<ul>{}</ul>", entries)
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en"><head><meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1"><title>{}</title></head>
<body><nav><a href="/">Home</a> <a href="/predictor">Predictor</a></nav>
<main>{}</main></body></html>"#,
        escape_html(title),
        body
    )
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
