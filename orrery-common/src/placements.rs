//! Placement store value object
//!
//! Extracted chart attributes attached to a product session: astrology
//! placements, Human Design fields, and free-text user corrections. Fields
//! that could not be read from an uploaded chart carry the `"UNKNOWN"`
//! sentinel rather than being omitted, so a round-trip through storage
//! preserves exactly what the extraction saw.

use serde::{Deserialize, Serialize};

/// Sentinel for a field the extraction could not determine
pub const UNKNOWN: &str = "UNKNOWN";

/// Astrology placements read from a birth chart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AstrologyPlacements {
    pub sun: Option<String>,
    pub moon: Option<String>,
    pub rising: Option<String>,
    pub mercury: Option<String>,
    pub venus: Option<String>,
    pub mars: Option<String>,
    pub jupiter: Option<String>,
    pub saturn: Option<String>,
    pub uranus: Option<String>,
    pub neptune: Option<String>,
    pub pluto: Option<String>,
    pub houses: Option<String>,
}

/// Human Design fields read from an HD chart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanDesignPlacements {
    #[serde(rename = "type")]
    pub hd_type: Option<String>,
    pub strategy: Option<String>,
    pub authority: Option<String>,
    pub profile: Option<String>,
    pub centers: Option<String>,
    pub gifts: Option<String>,
}

/// Full placement store attached to a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementStore {
    pub astrology: AstrologyPlacements,
    pub human_design: HumanDesignPlacements,
    /// Free-text user corrections and additions from the confirmation gate
    pub notes: Option<String>,
}

/// True when a field value carries no information (absent, blank, or UNKNOWN)
fn is_unknown(value: &Option<String>) -> bool {
    match value {
        None => true,
        Some(v) => {
            let trimmed = v.trim();
            trimmed.is_empty() || trimmed.eq_ignore_ascii_case(UNKNOWN)
        }
    }
}

fn render(value: &Option<String>) -> &str {
    match value {
        Some(v) if !v.trim().is_empty() => v.trim(),
        _ => UNKNOWN,
    }
}

impl AstrologyPlacements {
    fn fields(&self) -> [(&'static str, &Option<String>); 12] {
        [
            ("Sun", &self.sun),
            ("Moon", &self.moon),
            ("Rising", &self.rising),
            ("Mercury", &self.mercury),
            ("Venus", &self.venus),
            ("Mars", &self.mars),
            ("Jupiter", &self.jupiter),
            ("Saturn", &self.saturn),
            ("Uranus", &self.uranus),
            ("Neptune", &self.neptune),
            ("Pluto", &self.pluto),
            ("Houses", &self.houses),
        ]
    }
}

impl HumanDesignPlacements {
    fn fields(&self) -> [(&'static str, &Option<String>); 6] {
        [
            ("Type", &self.hd_type),
            ("Strategy", &self.strategy),
            ("Authority", &self.authority),
            ("Profile", &self.profile),
            ("Centers", &self.centers),
            ("Gifts", &self.gifts),
        ]
    }
}

impl PlacementStore {
    /// Emptiness predicate driving the session guard invariants.
    ///
    /// A store is empty iff every astrology and Human Design field is
    /// absent, blank, or the UNKNOWN sentinel, AND the notes are blank.
    pub fn is_empty(&self) -> bool {
        let astro_has = self.astrology.fields().iter().any(|(_, v)| !is_unknown(v));
        let hd_has = self.human_design.fields().iter().any(|(_, v)| !is_unknown(v));
        let notes_has = self
            .notes
            .as_deref()
            .map(|n| !n.trim().is_empty())
            .unwrap_or(false);
        !(astro_has || hd_has || notes_has)
    }

    /// Prompt-facing rendering: every field on its own line, UNKNOWN shown
    /// explicitly so the model never guesses at missing data.
    pub fn summary(&self) -> String {
        let astro_lines: Vec<String> = self
            .astrology
            .fields()
            .iter()
            .map(|(label, v)| format!("{}: {}", label, render(v)))
            .collect();
        let hd_lines: Vec<String> = self
            .human_design
            .fields()
            .iter()
            .map(|(label, v)| format!("{}: {}", label, render(v)))
            .collect();
        format!(
            "Astrology:\n{}\n\nHuman Design:\n{}",
            astro_lines.join("\n"),
            hd_lines.join("\n")
        )
    }

    /// Briefing-facing rendering: only fields with real data, grouped by
    /// section, with notes appended. Empty sections are omitted entirely.
    pub fn known_summary(&self) -> String {
        let mut out = String::new();

        let astro: Vec<String> = self
            .astrology
            .fields()
            .iter()
            .filter(|(_, v)| !is_unknown(v))
            .map(|(label, v)| format!("{}: {}", label, render(v)))
            .collect();
        if !astro.is_empty() {
            out.push_str("ASTROLOGY:\n");
            out.push_str(&astro.join("\n"));
            out.push_str("\n\n");
        }

        let hd: Vec<String> = self
            .human_design
            .fields()
            .iter()
            .filter(|(_, v)| !is_unknown(v))
            .map(|(label, v)| format!("{}: {}", label, render(v)))
            .collect();
        if !hd.is_empty() {
            out.push_str("HUMAN DESIGN:\n");
            out.push_str(&hd.join("\n"));
            out.push_str("\n\n");
        }

        if let Some(notes) = self.notes.as_deref() {
            if !notes.trim().is_empty() {
                out.push_str("ADDITIONAL CHART NOTES:\n");
                out.push_str(notes.trim());
                out.push('\n');
            }
        }

        out.trim().to_string()
    }

    /// Replace the notes field, trimming blank input to None
    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes.filter(|n| !n.trim().is_empty());
        self
    }
}
