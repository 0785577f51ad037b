//! Prompt construction for every writer and central task.
//!
//! Everything here is a pure function of its input: no clock, no randomness,
//! no I/O. The vocabulary tables are constants and are handed to the
//! `templates` endpoint as-is.

use serde::Serialize;

use crate::models::{
    Audience, ChatMessage, ChatRole, FactLevel, HookStyle, OptimizationType, ResearchDepth, SourcesPolicy, Structure,
    Style, Thinker, Tone, WriterConfig,
};

/// A publication category with its editorial focus and heuristic tag set.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Category {
    pub name: &'static str,
    pub focus: &'static str,
    pub tags: &'static [&'static str],
    pub related: &'static [&'static str],
}

pub const CATEGORIES: &[Category] = &[
    Category {
        name: "KI & Tech",
        focus: "künstliche Intelligenz, Software, Hardware und digitale Infrastruktur",
        tags: &["KI", "Technologie", "Zukunft", "Innovation", "Digitalisierung"],
        related: &["Mensch & Gesellschaft", "Mindset & Philosophie"],
    },
    Category {
        name: "Mensch & Gesellschaft",
        focus: "soziale Veränderung, Arbeit, Politik und Zusammenleben",
        tags: &["Gesellschaft", "Wandel", "Arbeit", "Ethik", "Zukunft"],
        related: &["KI & Tech", "Mindset & Philosophie"],
    },
    Category {
        name: "Style & Ästhetik",
        focus: "Design, Mode, Architektur und visuelle Kultur",
        tags: &["Design", "Ästhetik", "Kultur", "Trends", "Kreativität"],
        related: &["Gaming & Kultur", "Fiction Lab"],
    },
    Category {
        name: "Gaming & Kultur",
        focus: "Games, Popkultur, Medien und digitale Unterhaltung",
        tags: &["Gaming", "Popkultur", "Medien", "Unterhaltung", "Digitalkultur"],
        related: &["Style & Ästhetik", "KI & Tech"],
    },
    Category {
        name: "Mindset & Philosophie",
        focus: "Denken, Bewusstsein, Ethik und persönliche Entwicklung",
        tags: &["Philosophie", "Bewusstsein", "Ethik", "Mindset", "Reflexion"],
        related: &["Mensch & Gesellschaft", "KI & Tech"],
    },
    Category {
        name: "Fiction Lab",
        focus: "spekulative Kurzgeschichten und Zukunftsszenarien",
        tags: &["Science-Fiction", "Zukunftsszenario", "Kurzgeschichte", "Spekulation", "Utopie"],
        related: &["Mindset & Philosophie", "Gaming & Kultur"],
    },
];

pub fn find_category(name: &str) -> Option<&'static Category> {
    CATEGORIES.iter().find(|c| c.name == name)
}

/// Persona description injected into the prompt.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Persona {
    pub id: Thinker,
    pub display_name: &'static str,
    pub voice: &'static str,
}

pub const PERSONAS: &[Persona] = &[
    Persona {
        id: Thinker::Auto,
        display_name: "Automatisch",
        voice: "Wähle selbst die Denkschule und Perspektive, die am besten zu Thema und Kategorie passt.",
    },
    Persona {
        id: Thinker::Kurzweil,
        display_name: "Ray Kurzweil",
        voice: "Denke in exponentiellen Kurven, technologischer Singularität und beschleunigtem Fortschritt.",
    },
    Persona {
        id: Thinker::Harari,
        display_name: "Yuval Noah Harari",
        voice: "Erzähle in großen historischen Bögen und frage, welche Geschichten Gesellschaften zusammenhalten.",
    },
    Persona {
        id: Thinker::Bostrom,
        display_name: "Nick Bostrom",
        voice: "Argumentiere präzise über Risiken, Wahrscheinlichkeiten und langfristige Folgen für die Menschheit.",
    },
    Persona {
        id: Thinker::Tegmark,
        display_name: "Max Tegmark",
        voice: "Verbinde physikalisches Denken mit der Frage, wie wir eine wünschenswerte Zukunft mit KI gestalten.",
    },
    Persona {
        id: Thinker::Lanier,
        display_name: "Jaron Lanier",
        voice: "Schreibe als humanistischer Technologiekritiker, der die Würde des Einzelnen gegen Plattformlogik verteidigt.",
    },
    Persona {
        id: Thinker::Zuboff,
        display_name: "Shoshana Zuboff",
        voice: "Analysiere ökonomische Machtstrukturen, Datenextraktion und Überwachungskapitalismus.",
    },
];

pub fn persona(thinker: Thinker) -> &'static Persona {
    PERSONAS
        .iter()
        .find(|p| p.id == thinker)
        .unwrap_or(&PERSONAS[0])
}

fn tone_instruction(tone: Tone) -> &'static str {
    match tone {
        Tone::AnalytischKuehl => "sachlich, präzise und distanziert; Argumente vor Emotionen",
        Tone::VisionaerInspirierend => "mitreißend und bildhaft; zeige Möglichkeiten und entwirf große Bilder",
        Tone::KritischHinterfragend => "skeptisch und prüfend; benenne Widersprüche und blinde Flecken",
        Tone::OptimistischZukunftsgewandt => "zuversichtlich und konstruktiv; betone Lösungen und Chancen",
        Tone::PhilosophischNachdenklich => "ruhig und reflektierend; stelle grundlegende Fragen",
        Tone::ProvokantZugespitzt => "pointiert und meinungsstark; scheue keine zugespitzten Thesen",
    }
}

fn hook_instruction(hook: HookStyle) -> &'static str {
    match hook {
        HookStyle::Question => "Beginne mit einer überraschenden Frage, die den Leser direkt anspricht.",
        HookStyle::Scenario => "Beginne mit einem kurzen, konkreten Zukunftsszenario.",
        HookStyle::Statistic => "Beginne mit einer eindrücklichen Zahl oder Statistik.",
        HookStyle::Anecdote => "Beginne mit einer kurzen persönlichen oder historischen Anekdote.",
        HookStyle::Provocation => "Beginne mit einer provokanten These.",
    }
}

fn style_instruction(style: Style) -> &'static str {
    match style {
        Style::Essay => "Essay mit klarer These und durchgehender Argumentationslinie",
        Style::Reportage => "Reportage mit szenischen Elementen und Beobachtungen",
        Style::Analysis => "Analyse mit sauberer Gliederung von Ursachen, Mechanismen und Folgen",
        Style::Interview => "fiktives Interview mit prägnanten Fragen und Antworten",
        Style::Guide => "praktischer Leitfaden mit konkreten Handlungsschritten",
    }
}

fn audience_instruction(audience: Audience) -> &'static str {
    match audience {
        Audience::General => "interessierte Allgemeinheit; Fachbegriffe kurz erklären",
        Audience::Experts => "Fachleute; Fachterminologie ist erwünscht, Grundlagen weglassen",
        Audience::DecisionMakers => "Entscheider in Wirtschaft und Politik; Relevanz und Konsequenzen betonen",
        Audience::Students => "Studierende; verständlich, mit Beispielen und Denkanstößen",
        Audience::Creatives => "Kreative; inspirierend, mit Bezügen zu Kunst und Gestaltung",
    }
}

fn structure_instruction(structure: Structure) -> &'static str {
    match structure {
        Structure::Classic => "Einleitung, drei bis fünf Hauptabschnitte, Fazit",
        Structure::Listicle => "nummerierte Liste von Kernpunkten mit je einem erläuternden Absatz",
        Structure::ProblemSolution => "Problem beschreiben, Ursachen analysieren, Lösungen vorschlagen",
        Structure::Timeline => "chronologischer Verlauf von heute bis zum Zeithorizont",
        Structure::Dialogue => "Dialog zwischen zwei gegensätzlichen Positionen",
        Structure::Scenarios => "drei alternative Zukunftsszenarien (optimistisch, realistisch, pessimistisch)",
    }
}

fn sources_instruction(sources: SourcesPolicy) -> &'static str {
    match sources {
        SourcesPolicy::Omit => "Keine Quellenangaben.",
        SourcesPolicy::Cited => "Füge am Ende einen Abschnitt \"## Quellen\" mit den verwendeten Quellen hinzu.",
        SourcesPolicy::Inline => "Nenne Quellen direkt im Text, wenn du dich auf Studien oder Zahlen beziehst.",
    }
}

fn fact_level_instruction(fact_level: FactLevel) -> &'static str {
    match fact_level {
        FactLevel::Speculative => {
            "Spekulation ist ausdrücklich erlaubt; kennzeichne sie aber als Gedankenexperiment."
        }
        FactLevel::Balanced => "Trenne klar zwischen belegten Fakten und begründeten Prognosen.",
        FactLevel::Strict => "Nur belegbare Fakten; keine Zahlen oder Zitate erfinden, Unsicherheit offen benennen.",
    }
}

fn time_horizon_instruction(years: u32) -> String {
    match years {
        0 => "Bleibe in der Gegenwart (Zeithorizont: 0 Jahre).".to_string(),
        1 => "Blicke 1 Jahr in die Zukunft.".to_string(),
        n => format!("Blicke {n} Jahre in die Zukunft."),
    }
}

/// Render the article prompt for a writer request.
pub fn build_writer_prompt(config: &WriterConfig) -> String {
    let persona = persona(config.thinker);
    let mut p = String::with_capacity(2048);

    p.push_str("Du bist Autor für FluxAO, ein Magazin über Technologie, Gesellschaft und Kultur.\n\n");

    p.push_str("## Auftrag\n");
    p.push_str(&format!("Kategorie: {}", config.category));
    if let Some(category) = find_category(&config.category) {
        p.push_str(&format!(" (Schwerpunkt: {})", category.focus));
    }
    p.push('\n');
    if let Some(ref title) = config.title
        && !title.trim().is_empty()
    {
        p.push_str(&format!("Arbeitstitel: {}\n", title.trim()));
    }
    p.push_str(&format!("Umfang: ca. {} Wörter\n\n", config.length));

    p.push_str("## Stimme\n");
    p.push_str(&format!(
        "Denker-Persona: {} ({}). {}\n",
        config.thinker, persona.display_name, persona.voice
    ));
    p.push_str(&format!("Tonalität: {} – {}\n", config.tone, tone_instruction(config.tone)));
    p.push_str(&format!("Stil: {} – {}\n", config.style, style_instruction(config.style)));
    p.push_str(&format!(
        "Zielgruppe: {} – {}\n\n",
        config.audience,
        audience_instruction(config.audience)
    ));

    p.push_str("## Aufbau\n");
    p.push_str(&format!(
        "Struktur: {} – {}\n",
        config.structure,
        structure_instruction(config.structure)
    ));
    p.push_str(&format!("Einstieg: {} – {}\n", config.hook, hook_instruction(config.hook)));
    p.push_str(&format!("Zeithorizont: {}\n\n", time_horizon_instruction(config.time_horizon)));

    p.push_str("## Fakten und Quellen\n");
    p.push_str(&format!(
        "Faktenlevel: {} – {}\n",
        config.fact_level,
        fact_level_instruction(config.fact_level)
    ));
    p.push_str(&format!("Quellen: {} – {}\n\n", config.sources, sources_instruction(config.sources)));

    let context = config.user_context.trim();
    if !context.is_empty() {
        p.push_str("## Kontext der Redaktion\n");
        p.push_str(context);
        p.push_str("\n\n");
    }

    p.push_str("## Ausgabeformat\n");
    p.push_str("- Schreibe auf Deutsch in Markdown.\n");
    p.push_str("- Die erste Zeile ist der Titel als `# Überschrift`.\n");
    p.push_str("- Zwischenüberschriften als `##`.\n");
    p.push_str("- Keine Vorbemerkungen oder Kommentare zur Aufgabe, nur der Artikel.\n");
    if config.options.seo_optimize {
        p.push_str("- Suchmaschinenoptimiert: prägnanter Titel unter 60 Zeichen, Schlüsselbegriffe natürlich in Überschriften und ersten Absatz einbinden.\n");
    }

    p
}

/// Input for [`build_seo_prompt`].
#[derive(Debug, Clone, Copy)]
pub struct SeoPromptInput<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub target_keywords: &'a [String],
    pub language: &'a str,
}

pub fn build_seo_prompt(input: SeoPromptInput<'_>) -> String {
    let mut p = String::with_capacity(input.content.len() + 1024);
    p.push_str("Du bist SEO-Redakteur. Optimiere den folgenden Artikel für Suchmaschinen, ohne seine Aussage zu verändern.\n\n");
    p.push_str(&format!("Sprache: {}\n", language_name(input.language)));
    p.push_str(&format!("Titel: {}\n", input.title));
    if input.target_keywords.is_empty() {
        p.push_str("Ziel-Keywords: leite zwei bis vier passende Keywords aus dem Inhalt ab.\n");
    } else {
        p.push_str(&format!("Ziel-Keywords: {}\n", input.target_keywords.join(", ")));
    }
    p.push_str("\nAnforderungen:\n");
    p.push_str("- Titel unter 60 Zeichen, Keyword möglichst am Anfang.\n");
    p.push_str("- Keywords natürlich in Zwischenüberschriften und im ersten Absatz verwenden.\n");
    p.push_str("- Kurze Absätze, aussagekräftige `##`-Überschriften.\n");
    p.push_str("- Gib den vollständigen optimierten Artikel in Markdown zurück, beginnend mit `# Titel`.\n");
    p.push_str("- Schließe mit einer Zeile `Meta-Beschreibung: ...` (maximal 155 Zeichen).\n\n");
    p.push_str("Artikel:\n");
    p.push_str(input.content);
    p.push('\n');
    p
}

/// Input for non-SEO optimization passes.
#[derive(Debug, Clone, Copy)]
pub struct OptimizePromptInput<'a> {
    pub optimization: OptimizationType,
    pub title: &'a str,
    pub content: &'a str,
    pub target_keywords: &'a [String],
    pub language: &'a str,
    pub tone: Option<Tone>,
    pub target_length: Option<u32>,
}

pub fn build_optimize_prompt(input: OptimizePromptInput<'_>) -> String {
    let goal = match input.optimization {
        OptimizationType::Seo => {
            return build_seo_prompt(SeoPromptInput {
                title: input.title,
                content: input.content,
                target_keywords: input.target_keywords,
                language: input.language,
            });
        }
        OptimizationType::Tone => match input.tone {
            Some(tone) => format!(
                "Überarbeite die Tonalität zu \"{}\" ({}), ohne Inhalt oder Struktur zu verändern.",
                tone,
                tone_instruction(tone)
            ),
            None => "Vereinheitliche die Tonalität, sodass der Text durchgehend konsistent klingt.".to_string(),
        },
        OptimizationType::Length => match input.target_length {
            Some(words) => format!("Bringe den Text auf ca. {words} Wörter, ohne Kernaussagen zu verlieren."),
            None => "Kürze den Text um etwa ein Drittel, ohne Kernaussagen zu verlieren.".to_string(),
        },
        OptimizationType::Readability => {
            "Verbessere die Lesbarkeit: kürzere Sätze, aktive Formulierungen, klare Übergänge.".to_string()
        }
    };

    let mut p = String::with_capacity(input.content.len() + 512);
    p.push_str("Du bist Lektor bei FluxAO.\n\n");
    p.push_str(&format!("Aufgabe: {goal}\n"));
    p.push_str(&format!("Sprache: {}\n", language_name(input.language)));
    p.push_str(&format!("Titel: {}\n\n", input.title));
    p.push_str("Gib nur den überarbeiteten Artikel in Markdown zurück, beginnend mit `# Titel`.\n\n");
    p.push_str("Artikel:\n");
    p.push_str(input.content);
    p.push('\n');
    p
}

/// Ask for a JSON array of tags for a finished article.
pub fn build_tag_prompt(title: &str, excerpt: &str, category: &str) -> String {
    format!(
        "Schlage 5 bis 8 prägnante Tags für den folgenden Artikel der Kategorie \"{category}\" vor.\n\
         Antworte ausschließlich mit einem JSON-Array aus Strings, zum Beispiel [\"KI\", \"Ethik\"].\n\n\
         Titel: {title}\n\
         Auszug: {excerpt}\n"
    )
}

pub fn build_ideas_prompt(category: &str, count: u32, audience: Option<Audience>, context: &str) -> String {
    let mut p = format!("Entwickle {count} originelle Artikelideen für die FluxAO-Kategorie \"{category}\"");
    if let Some(category) = find_category(category) {
        p.push_str(&format!(" (Schwerpunkt: {})", category.focus));
    }
    p.push_str(".\n");
    if let Some(audience) = audience {
        p.push_str(&format!(
            "Zielgruppe: {} – {}\n",
            audience,
            audience_instruction(audience)
        ));
    }
    let context = context.trim();
    if !context.is_empty() {
        p.push_str(&format!("Hintergrund: {context}\n"));
    }
    p.push_str(
        "\nAntworte ausschließlich mit einem JSON-Array. Jedes Element hat die Felder \
         \"title\" (String), \"angle\" (String, ein Satz zum Blickwinkel) und \"keywords\" (Array aus Strings).\n",
    );
    p
}

pub fn build_research_prompt(topic: &str, depth: ResearchDepth, audience: Option<Audience>) -> String {
    let scope = match depth {
        ResearchDepth::Overview => "einen kompakten Überblick mit den wichtigsten Punkten",
        ResearchDepth::Deep => "eine gründliche Recherche mit Hintergründen, Positionen und offenen Fragen",
    };
    let mut p = format!("Erstelle ein Recherche-Briefing zum Thema \"{topic}\". Liefere {scope}.\n");
    if let Some(audience) = audience {
        p.push_str(&format!(
            "Zielgruppe: {} – {}\n",
            audience,
            audience_instruction(audience)
        ));
    }
    p.push_str(
        "\nAntworte ausschließlich mit einem JSON-Objekt mit den Feldern \
         \"summary\" (String), \"keyPoints\" (Array aus Strings), \"questions\" (Array aus Strings), \
         \"sources\" (Array aus Strings) und \"angles\" (Array aus Strings).\n\
         Erfinde keine Quellen; nenne nur Quellen, deren Existenz du sicher kennst.\n",
    );
    p
}

/// Ask one model to synthesize the answers of several providers.
pub fn build_consensus_prompt(original_prompt: &str, answers: &[(&str, &str)]) -> String {
    let mut p = String::new();
    p.push_str("Mehrere KI-Modelle haben dieselbe Anfrage beantwortet. Fasse ihre Antworten zu einer ausgewogenen Synthese zusammen.\n");
    p.push_str("Benenne Übereinstimmungen, wichtige Unterschiede und gib eine abschließende Empfehlung.\n\n");
    p.push_str("Ursprüngliche Anfrage:\n");
    p.push_str(original_prompt);
    p.push_str("\n\n");
    for (provider, answer) in answers {
        p.push_str(&format!("### Antwort von {provider}\n{answer}\n\n"));
    }
    p
}

/// Flatten a chat history plus the new message into a single prompt.
pub fn build_chat_prompt(history: &[ChatMessage], message: &str) -> String {
    let mut p = String::from("Du bist der KI-Assistent der FluxAO-Redaktion. Antworte hilfreich und präzise.\n\n");
    for turn in history {
        let speaker = match turn.role {
            ChatRole::User => "Nutzer",
            ChatRole::Assistant => "Assistent",
        };
        p.push_str(&format!("{speaker}: {}\n", turn.content.trim()));
    }
    p.push_str(&format!("Nutzer: {}\nAssistent:", message.trim()));
    p
}

fn language_name(code: &str) -> &str {
    match code {
        "de" => "Deutsch",
        "en" => "Englisch",
        "fr" => "Französisch",
        "es" => "Spanisch",
        other => other,
    }
}

/// Template catalog entry for the `templates` introspection action.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TemplateInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub action: &'static str,
}

pub const TEMPLATES: &[TemplateInfo] = &[
    TemplateInfo {
        id: "article",
        name: "Artikel",
        description: "Vollständiger Artikel aus Kategorie, Tonalität, Persona und Struktur",
        action: "generate-article",
    },
    TemplateInfo {
        id: "seo",
        name: "SEO-Optimierung",
        description: "Bestehenden Artikel für Ziel-Keywords optimieren",
        action: "optimize-content",
    },
    TemplateInfo {
        id: "ideas",
        name: "Themenideen",
        description: "Liste neuer Artikelideen für eine Kategorie",
        action: "content-ideas",
    },
    TemplateInfo {
        id: "research",
        name: "Recherche-Briefing",
        description: "Strukturierte Zusammenfassung, Kernpunkte und offene Fragen zu einem Thema",
        action: "topic-research",
    },
    TemplateInfo {
        id: "tags",
        name: "Tag-Vorschläge",
        description: "JSON-Liste von Tags für einen fertigen Artikel",
        action: "generate-article",
    },
];

/// Full vocabulary served by `GET /api/ai/writer?action=templates`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub categories: &'static [Category],
    pub personas: &'static [Persona],
    pub tones: &'static [Tone],
    pub hook_styles: &'static [HookStyle],
    pub styles: &'static [Style],
    pub audiences: &'static [Audience],
    pub structures: &'static [Structure],
    pub sources_policies: &'static [SourcesPolicy],
    pub fact_levels: &'static [FactLevel],
    pub optimization_types: &'static [OptimizationType],
    pub templates: &'static [TemplateInfo],
}

pub fn catalog() -> Catalog {
    Catalog {
        categories: CATEGORIES,
        personas: PERSONAS,
        tones: Tone::ALL,
        hook_styles: HookStyle::ALL,
        styles: Style::ALL,
        audiences: Audience::ALL,
        structures: Structure::ALL,
        sources_policies: SourcesPolicy::ALL,
        fact_levels: FactLevel::ALL,
        optimization_types: OptimizationType::ALL,
        templates: TEMPLATES,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::OutputOptions;

    fn scenario_config() -> WriterConfig {
        WriterConfig {
            category: "KI & Tech".to_string(),
            length: 1200,
            tone: Tone::AnalytischKuehl,
            thinker: Thinker::Auto,
            hook: HookStyle::default(),
            time_horizon: 10,
            style: Style::default(),
            audience: Audience::default(),
            structure: Structure::default(),
            sources: SourcesPolicy::default(),
            fact_level: FactLevel::default(),
            user_context: String::new(),
            title: None,
            options: OutputOptions::default(),
        }
    }

    #[test]
    fn writer_prompt_is_deterministic() {
        let config = scenario_config();
        assert_eq!(build_writer_prompt(&config), build_writer_prompt(&config));
    }

    #[test]
    fn scenario_prompt_contains_category_and_tone() {
        let prompt = build_writer_prompt(&scenario_config());
        assert!(!prompt.is_empty());
        assert!(prompt.contains("KI & Tech"));
        assert!(prompt.contains("analytisch-kühl"));
        assert!(prompt.contains("1200 Wörter"));
    }

    #[test]
    fn each_content_field_changes_the_prompt() {
        let base = scenario_config();
        let base_prompt = build_writer_prompt(&base);

        let variants: Vec<(&str, WriterConfig)> = vec![
            ("tone", WriterConfig { tone: Tone::ProvokantZugespitzt, ..base.clone() }),
            ("thinker", WriterConfig { thinker: Thinker::Harari, ..base.clone() }),
            ("audience", WriterConfig { audience: Audience::Experts, ..base.clone() }),
            ("structure", WriterConfig { structure: Structure::Timeline, ..base.clone() }),
            ("factLevel", WriterConfig { fact_level: FactLevel::Strict, ..base.clone() }),
            ("timeHorizon", WriterConfig { time_horizon: 25, ..base.clone() }),
            ("hook", WriterConfig { hook: HookStyle::Statistic, ..base.clone() }),
            ("style", WriterConfig { style: Style::Reportage, ..base.clone() }),
            ("sources", WriterConfig { sources: SourcesPolicy::Inline, ..base.clone() }),
            ("length", WriterConfig { length: 800, ..base.clone() }),
            ("userContext", WriterConfig { user_context: "Fokus auf Europa".to_string(), ..base.clone() }),
        ];

        for (field, config) in variants {
            assert_ne!(build_writer_prompt(&config), base_prompt, "changing {field} must change the prompt");
        }
    }

    #[test]
    fn changed_field_is_attributable() {
        let base = scenario_config();
        let harari = WriterConfig { thinker: Thinker::Harari, ..base.clone() };
        let prompt = build_writer_prompt(&harari);
        assert!(prompt.contains("Yuval Noah Harari"));
        assert!(!build_writer_prompt(&base).contains("Yuval Noah Harari"));

        let horizon = WriterConfig { time_horizon: 25, ..base };
        assert!(build_writer_prompt(&horizon).contains("25 Jahre"));
    }

    #[test]
    fn user_context_and_working_title_are_embedded() {
        let config = WriterConfig {
            user_context: "  Bezug auf den AI Act nehmen  ".to_string(),
            title: Some("Regeln für Maschinen".to_string()),
            ..scenario_config()
        };
        let prompt = build_writer_prompt(&config);
        assert!(prompt.contains("## Kontext der Redaktion\nBezug auf den AI Act nehmen\n"));
        assert!(prompt.contains("Arbeitstitel: Regeln für Maschinen"));
    }

    #[test]
    fn seo_option_adds_instruction() {
        let config = WriterConfig {
            options: OutputOptions {
                seo_optimize: true,
                ..OutputOptions::default()
            },
            ..scenario_config()
        };
        assert!(build_writer_prompt(&config).contains("Suchmaschinenoptimiert"));
        assert!(!build_writer_prompt(&scenario_config()).contains("Suchmaschinenoptimiert"));
    }

    #[test]
    fn seo_prompt_lists_keywords_and_content() {
        let keywords = vec!["KI-Regulierung".to_string(), "AI Act".to_string()];
        let prompt = build_seo_prompt(SeoPromptInput {
            title: "Regeln für Maschinen",
            content: "Der AI Act tritt in Kraft.",
            target_keywords: &keywords,
            language: "de",
        });
        assert!(prompt.contains("Ziel-Keywords: KI-Regulierung, AI Act"));
        assert!(prompt.contains("Sprache: Deutsch"));
        assert!(prompt.ends_with("Der AI Act tritt in Kraft.\n"));
    }

    #[test]
    fn optimize_seo_delegates_to_seo_prompt() {
        let input = OptimizePromptInput {
            optimization: OptimizationType::Seo,
            title: "T",
            content: "Body",
            target_keywords: &[],
            language: "en",
            tone: None,
            target_length: None,
        };
        let seo = build_seo_prompt(SeoPromptInput {
            title: "T",
            content: "Body",
            target_keywords: &[],
            language: "en",
        });
        assert_eq!(build_optimize_prompt(input), seo);
    }

    #[test]
    fn optimize_length_mentions_target() {
        let prompt = build_optimize_prompt(OptimizePromptInput {
            optimization: OptimizationType::Length,
            title: "T",
            content: "Body",
            target_keywords: &[],
            language: "de",
            tone: None,
            target_length: Some(600),
        });
        assert!(prompt.contains("ca. 600 Wörter"));
    }

    #[test]
    fn chat_prompt_keeps_turn_order() {
        let now = chrono::DateTime::parse_from_rfc3339("2026-10-01T08:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let history = vec![
            ChatMessage {
                id: "1".to_string(),
                role: ChatRole::User,
                content: "Hallo".to_string(),
                provider: None,
                timestamp: now,
                metadata: None,
            },
            ChatMessage {
                id: "2".to_string(),
                role: ChatRole::Assistant,
                content: "Hi!".to_string(),
                provider: Some("claude".to_string()),
                timestamp: now,
                metadata: None,
            },
        ];
        let prompt = build_chat_prompt(&history, "Was ist neu?");
        let user = prompt.find("Nutzer: Hallo").unwrap();
        let assistant = prompt.find("Assistent: Hi!").unwrap();
        assert!(user < assistant);
        assert!(prompt.ends_with("Nutzer: Was ist neu?\nAssistent:"));
    }

    #[test]
    fn every_thinker_has_a_persona() {
        for thinker in Thinker::ALL {
            assert_eq!(persona(*thinker).id, *thinker);
        }
    }
}
