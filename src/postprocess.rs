use std::collections::HashSet;

use gray_matter::Matter;
use gray_matter::engine::YAML;
use serde::{Deserialize, Serialize};

use crate::prompt::find_category;

const EXCERPT_CHARS: usize = 200;
const WORDS_PER_MINUTE: usize = 200;
const MAX_TAGS: usize = 10;

/// Title and body recovered from raw model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedArticle {
    pub title: String,
    pub body: String,
    /// Tags the model put into YAML frontmatter, if any.
    pub frontmatter_tags: Vec<String>,
}

/// Split raw output into title and body.
///
/// Title precedence: frontmatter `title`, first `# ` heading, `fallback_title`.
/// The heading used as title is removed from the body.
pub fn parse_article(raw: &str, fallback_title: &str) -> ParsedArticle {
    let matter = Matter::<YAML>::new();
    let result = matter.parse(strip_markdown_fence(raw));

    let frontmatter = result.data.as_ref().and_then(|d| d.as_hashmap().ok());

    let frontmatter_title = frontmatter
        .as_ref()
        .and_then(|m| m.get("title"))
        .and_then(|v| v.as_string().ok())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let frontmatter_tags: Vec<String> = frontmatter
        .as_ref()
        .and_then(|m| m.get("tags"))
        .and_then(|v| v.as_vec().ok())
        .map(|vec| vec.into_iter().filter_map(|v| v.as_string().ok()).collect())
        .unwrap_or_default();

    let body = result.content;

    if let Some(title) = frontmatter_title {
        return ParsedArticle {
            title,
            body: body.trim().to_string(),
            frontmatter_tags,
        };
    }

    let mut heading = None;
    let mut remaining = Vec::new();
    for line in body.lines() {
        if heading.is_none()
            && let Some(h) = line.strip_prefix("# ")
            && !h.trim().is_empty()
        {
            heading = Some(h.trim().to_string());
            continue;
        }
        remaining.push(line);
    }

    match heading {
        Some(title) => ParsedArticle {
            title,
            body: remaining.join("\n").trim().to_string(),
            frontmatter_tags,
        },
        None => ParsedArticle {
            title: fallback_title.to_string(),
            body: body.trim().to_string(),
            frontmatter_tags,
        },
    }
}

/// Unwrap a reply that sits entirely inside one ```` ```markdown ```` (or bare ```` ``` ````) fence.
///
/// Fences tagged with another language are code and stay untouched.
fn strip_markdown_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return raw;
    };
    let Some((info, inner)) = rest.split_once('\n') else {
        return raw;
    };
    if !matches!(info.trim().to_ascii_lowercase().as_str(), "" | "markdown" | "md") {
        return raw;
    }
    match inner.trim_end().strip_suffix("```") {
        Some(body) if !body.contains("\n```") => body,
        _ => raw,
    }
}

pub fn markdown_to_html(markdown: &str) -> String {
    let parser = pulldown_cmark::Parser::new(markdown);
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

/// Convert HTML (e.g. from the rich-text editor) to plain text.
pub fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 100).unwrap_or_else(|_| html.to_string())
}

pub fn looks_like_html(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('<') && trimmed.contains("</")
}

/// Plain-text teaser of at most `EXCERPT_CHARS` characters, cut on a word boundary.
pub fn excerpt(markdown: &str) -> String {
    use pulldown_cmark::{Event, Parser};

    let mut text = String::new();
    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak | Event::End(_) => text.push(' '),
            _ => {}
        }
    }
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    let cut = match cut.rfind(' ') {
        Some(pos) => &cut[..pos],
        None => cut.as_str(),
    };
    format!("{}…", cut.trim_end_matches([',', '.', ';', ':']))
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .filter(|w| w.chars().any(|c| c.is_alphanumeric()))
        .count()
}

pub fn reading_time_minutes(words: usize) -> usize {
    words.div_ceil(WORDS_PER_MINUTE).max(1)
}

/// URL slug with German umlauts and common Latin accents folded to ASCII.
pub fn slug_from_title(title: &str) -> String {
    let mut folded = String::with_capacity(title.len());
    for c in title.to_lowercase().chars() {
        match c {
            'ä' | 'æ' => folded.push_str("ae"),
            'ö' | 'œ' => folded.push_str("oe"),
            'ü' => folded.push_str("ue"),
            'ß' => folded.push_str("ss"),
            c if c.is_ascii_alphanumeric() => folded.push(c),
            c => match fold_accent(c) {
                Some(base) => folded.push(base),
                None => folded.push('-'),
            },
        }
    }
    let slug = folded
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() { "artikel".to_string() } else { slug }
}

fn fold_accent(c: char) -> Option<char> {
    let base = match c {
        'à' | 'á' | 'â' | 'ã' | 'å' | 'ā' | 'ą' => 'a',
        'ç' | 'ć' | 'č' => 'c',
        'ď' => 'd',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ę' | 'ě' => 'e',
        'ì' | 'í' | 'î' | 'ï' | 'ī' => 'i',
        'ł' => 'l',
        'ñ' | 'ń' | 'ň' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ø' | 'ō' | 'ő' => 'o',
        'ř' => 'r',
        'ś' | 'š' => 's',
        'ť' => 't',
        'ù' | 'ú' | 'û' | 'ū' | 'ů' | 'ű' => 'u',
        'ý' | 'ÿ' => 'y',
        'ź' | 'ż' | 'ž' => 'z',
        _ => return None,
    };
    Some(base)
}

/// Locate the outermost `open`..`close` span in free text.
fn json_span(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse a JSON string array out of model output. `None` if nothing usable is found.
pub fn parse_tag_list(raw: &str) -> Option<Vec<String>> {
    let span = json_span(raw, '[', ']')?;
    let values: Vec<serde_json::Value> = serde_json::from_str(span).ok()?;
    let tags = normalize_tags(values.iter().filter_map(|v| v.as_str()).map(str::to_string));
    (!tags.is_empty()).then_some(tags)
}

fn normalize_tags(tags: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().trim_start_matches('#').trim().to_string())
        .filter(|t| !t.is_empty() && t.chars().count() <= 40)
        .filter(|t| seen.insert(t.to_lowercase()))
        .take(MAX_TAGS)
        .collect()
}

/// Heuristic tags from the category table plus prominent title words. Never empty.
pub fn fallback_tags(category: &str, title: &str) -> Vec<String> {
    let mut tags: Vec<String> = match find_category(category) {
        Some(c) => c.tags.iter().map(|t| t.to_string()).collect(),
        None if !category.trim().is_empty() => vec![category.trim().to_string()],
        None => vec!["FluxAO".to_string()],
    };

    let title_words = title
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| w.chars().count() >= 6 && w.chars().next().is_some_and(char::is_uppercase))
        .take(2)
        .map(str::to_string);
    tags.extend(title_words);

    normalize_tags(tags)
}

/// Configured category first, then its related categories.
pub fn suggested_categories(category: &str) -> Vec<String> {
    let mut out = vec![category.to_string()];
    if let Some(c) = find_category(category) {
        out.extend(c.related.iter().map(|r| r.to_string()));
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentIdea {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Parse an idea list; falls back to one idea per non-empty line.
pub fn parse_ideas(raw: &str, limit: usize) -> (Vec<ContentIdea>, bool) {
    if let Some(span) = json_span(raw, '[', ']')
        && let Ok(ideas) = serde_json::from_str::<Vec<ContentIdea>>(span)
    {
        let ideas: Vec<_> = ideas
            .into_iter()
            .filter(|i| !i.title.trim().is_empty())
            .take(limit)
            .collect();
        if !ideas.is_empty() {
            return (ideas, false);
        }
    }

    let ideas = raw
        .lines()
        .map(strip_list_marker)
        .filter(|l| !l.is_empty() && !l.starts_with("```"))
        .take(limit)
        .map(|title| ContentIdea {
            title: title.to_string(),
            angle: None,
            keywords: Vec::new(),
        })
        .collect();
    (ideas, true)
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line.trim_start_matches(['-', '*', '•']).trim_start();
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim();
        }
    }
    line.trim_matches('"').trim()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchBrief {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub angles: Vec<String>,
}

/// Parse a research brief; falls back to the raw text as summary.
pub fn parse_research(raw: &str) -> (ResearchBrief, bool) {
    if let Some(span) = json_span(raw, '{', '}')
        && let Ok(brief) = serde_json::from_str::<ResearchBrief>(span)
        && !brief.summary.trim().is_empty()
    {
        return (brief, false);
    }
    (
        ResearchBrief {
            summary: raw.trim().to_string(),
            ..ResearchBrief::default()
        },
        true,
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn markdown_fence_around_article_is_unwrapped() {
        let parsed = parse_article("```markdown\n# Titel\n\nErster Absatz.\n```", "Fallback");
        assert_eq!(parsed.title, "Titel");
        assert_eq!(parsed.body, "Erster Absatz.");
        assert_eq!(markdown_to_html(&parsed.body), "<p>Erster Absatz.</p>\n");

        let bare = parse_article("```\n---\ntitle: Aus Frontmatter\n---\nText.\n```\n", "Fallback");
        assert_eq!(bare.title, "Aus Frontmatter");
        assert_eq!(bare.body, "Text.");
    }

    #[test]
    fn inner_code_blocks_and_other_languages_are_kept() {
        let code = "```python\nprint('hi')\n```";
        assert_eq!(strip_markdown_fence(code), code);

        let mixed = "# Titel\n\n```rust\nfn main() {}\n```";
        let parsed = parse_article(mixed, "Fallback");
        assert_eq!(parsed.body, "```rust\nfn main() {}\n```");
    }

    #[test]
    fn title_from_first_heading_is_removed_from_body() {
        let raw = "# Maschinen, die träumen\n\nErster Absatz.\n\n## Teil 1\nMehr.";
        let parsed = parse_article(raw, "Fallback");
        assert_eq!(parsed.title, "Maschinen, die träumen");
        assert_eq!(parsed.body, "Erster Absatz.\n\n## Teil 1\nMehr.");
    }

    #[test]
    fn title_falls_back_without_heading() {
        let raw = "Nur Text ohne Überschrift.\n\n## Abschnitt";
        let parsed = parse_article(raw, "KI & Tech: Neuer Artikel");
        assert_eq!(parsed.title, "KI & Tech: Neuer Artikel");
        assert_eq!(parsed.body, raw);
    }

    #[test]
    fn frontmatter_title_and_tags_win() {
        let raw = "---\ntitle: \"Aus dem Frontmatter\"\ntags:\n  - KI\n  - Ethik\n---\n# Andere Überschrift\n\nText.";
        let parsed = parse_article(raw, "Fallback");
        assert_eq!(parsed.title, "Aus dem Frontmatter");
        assert_eq!(parsed.frontmatter_tags, vec!["KI".to_string(), "Ethik".to_string()]);
        assert!(parsed.body.starts_with("# Andere Überschrift"));
    }

    #[test]
    fn slug_folds_umlauts() {
        assert_eq!(slug_from_title("Über Größe & Maß: KI 2030!"), "ueber-groesse-mass-ki-2030");
        assert_eq!(slug_from_title("???"), "artikel");
    }

    #[test]
    fn slug_keeps_base_letter_of_accents() {
        assert_eq!(slug_from_title("Déjà-vu im Café"), "deja-vu-im-cafe");
        assert_eq!(slug_from_title("Łódź, São Paulo & Œuvre"), "lodz-sao-paulo-oeuvre");
    }

    #[test]
    fn tag_list_parses_json_inside_prose() {
        let raw = "Gerne! Hier sind Tags:\n```json\n[\"KI\", \" Ethik \", \"#Zukunft\", \"ki\"]\n```";
        assert_eq!(
            parse_tag_list(raw),
            Some(vec!["KI".to_string(), "Ethik".to_string(), "Zukunft".to_string()])
        );
    }

    #[test]
    fn tag_list_rejects_garbage() {
        assert_eq!(parse_tag_list("KI, Ethik, Zukunft"), None);
        assert_eq!(parse_tag_list("[not json]"), None);
        assert_eq!(parse_tag_list("[]"), None);
    }

    #[test]
    fn fallback_tags_use_category_table() {
        let tags = fallback_tags("KI & Tech", "Warum Sprachmodelle lügen");
        assert!(tags.contains(&"KI".to_string()));
        assert!(tags.contains(&"Sprachmodelle".to_string()));
        assert!(!fallback_tags("", "").is_empty());
        assert_eq!(fallback_tags("Unbekannt", "kurz"), vec!["Unbekannt".to_string()]);
    }

    #[test]
    fn excerpt_is_bounded_plain_text() {
        let ex = excerpt(&"## Kopf\n\n**Wort** ".repeat(50));
        assert!(!ex.contains('<'));
        assert!(!ex.contains("**"));
        assert!(ex.chars().count() <= EXCERPT_CHARS + 1);
        assert!(ex.ends_with('…'));
    }

    #[test]
    fn reading_time_rounds_up() {
        assert_eq!(reading_time_minutes(0), 1);
        assert_eq!(reading_time_minutes(201), 2);
        assert_eq!(word_count("Eins zwei — drei"), 3);
    }

    #[test]
    fn ideas_parse_json_or_fall_back_to_lines() {
        let json = r#"[{"title": "KI im Rathaus", "angle": "Verwaltung", "keywords": ["E-Government"]}]"#;
        let (ideas, fallback) = parse_ideas(json, 5);
        assert!(!fallback);
        assert_eq!(ideas[0].title, "KI im Rathaus");
        assert_eq!(ideas[0].keywords, vec!["E-Government".to_string()]);

        let (ideas, fallback) = parse_ideas("1. Erste Idee\n2) Zweite Idee\n- Dritte Idee\n\n", 2);
        assert!(fallback);
        assert_eq!(
            ideas.iter().map(|i| i.title.as_str()).collect::<Vec<_>>(),
            vec!["Erste Idee", "Zweite Idee"]
        );
    }

    #[test]
    fn research_falls_back_to_summary() {
        let (brief, fallback) = parse_research(r#"{"summary": "Kurz", "keyPoints": ["A"]}"#);
        assert!(!fallback);
        assert_eq!(brief.key_points, vec!["A".to_string()]);

        let (brief, fallback) = parse_research("Freitext ohne JSON");
        assert!(fallback);
        assert_eq!(brief.summary, "Freitext ohne JSON");
    }

    #[test]
    fn detects_editor_html() {
        assert!(looks_like_html("<p>Hallo</p>"));
        assert!(!looks_like_html("# Markdown"));
        assert!(html_to_text("<p>Hallo <b>Welt</b></p>").contains("Hallo"));
    }
}
