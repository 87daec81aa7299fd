use crate::config::ClassifierRules;
use crate::error::IngestError;
use crate::models::UnitMetadata;
use chrono::NaiveDate;
use regex::Regex;

const MONTH_NAMES: [(&str, u32); 12] = [
    ("janeiro", 1),
    ("fevereiro", 2),
    ("março", 3),
    ("abril", 4),
    ("maio", 5),
    ("junho", 6),
    ("julho", 7),
    ("agosto", 8),
    ("setembro", 9),
    ("outubro", 10),
    ("novembro", 11),
    ("dezembro", 12),
];

/// Rule-based metadata classifier.
///
/// Pure pattern matching over `(source filename, text)`: no randomness and
/// no external calls, so repeated invocations with the same rules produce
/// bit-identical output. Absent attributes stay `None`.
pub struct Classifier {
    rules: ClassifierRules,
    year_re: Regex,
    citation_res: Vec<Regex>,
    numeric_date_re: Regex,
    written_date_re: Regex,
    deadline_range_re: Regex,
    phase_number_re: Regex,
}

impl Classifier {
    pub fn new(rules: ClassifierRules) -> Result<Self, IngestError> {
        let citation_res = rules
            .citation_patterns
            .iter()
            .map(|pattern| Regex::new(&format!("(?i){pattern}")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            year_re: Regex::new(&rules.year_pattern)?,
            citation_res,
            numeric_date_re: Regex::new(r"\b([0-3]?\d)[/.-]([01]?\d)[/.-](20[2-4]\d)\b")?,
            written_date_re: Regex::new(r"(?i)(\d{1,2})\s+de\s+([a-zç]+)\s+de\s+(20\d{2})")?,
            deadline_range_re: Regex::new(
                r"(?i)de\s+([0-3]?\d)/([01]?\d)(?:/(20\d{2}))?\s+a\s+([0-3]?\d)/([01]?\d)(?:/(20\d{2}))?",
            )?,
            phase_number_re: Regex::new(r"(?i)fase\s*(\d+)")?,
            rules,
        })
    }

    /// Document-level attributes from the whole text plus the filename.
    /// Unit extraction re-derives process phase and legal references per
    /// span; everything else is inherited.
    pub fn classify_document(&self, source_file: &str, text: &str) -> UnitMetadata {
        let (deadline_start, deadline_end) = self.detect_deadlines(text);
        UnitMetadata {
            category: self.detect_category(source_file),
            norm_type: self.detect_norm_type(source_file, text),
            issuing_body: self.detect_issuing_body(text),
            publication_date: self.detect_publication_date(text),
            school_year: self.detect_school_year(source_file, text),
            process_phase: self.detect_process_phase(&format!("{source_file}\n{text}")),
            program: self.detect_program(text),
            audience: self.detect_audience(text),
            deadline_start,
            deadline_end,
            legal_references: self.extract_legal_references(text),
        }
    }

    pub fn detect_category(&self, source_file: &str) -> Option<String> {
        let name = source_file
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(source_file)
            .trim()
            .to_uppercase();

        for (prefix, label) in &self.rules.category_prefixes {
            if name.starts_with(prefix.as_str()) {
                return Some(label.clone());
            }
        }
        for (keyword, label) in &self.rules.category_keywords {
            if name.contains(keyword.as_str()) {
                return Some(label.clone());
            }
        }
        None
    }

    pub fn detect_norm_type(&self, source_file: &str, text: &str) -> Option<String> {
        let haystack = format!("{source_file}\n{text}").to_lowercase();
        self.rules
            .norm_types
            .iter()
            .find(|(keyword, _)| haystack.contains(keyword.as_str()))
            .map(|(_, label)| label.clone())
    }

    pub fn detect_issuing_body(&self, text: &str) -> Option<String> {
        let upper = text.to_uppercase();
        // Joint SUCOR/SUPED publications name both bodies.
        if upper.contains("SUCOR") && upper.contains("SUPED") {
            return Some("SUCOR/SUPED".to_string());
        }
        self.rules
            .issuing_bodies
            .iter()
            .find(|(acronym, _)| upper.contains(acronym.as_str()))
            .map(|(_, label)| label.clone())
    }

    /// Filename year wins; in the body, the latest plausible year does.
    pub fn detect_school_year(&self, source_file: &str, text: &str) -> Option<String> {
        if let Some(found) = self.year_re.find(source_file) {
            return Some(found.as_str().to_string());
        }
        self.year_re
            .find_iter(text)
            .map(|found| found.as_str().to_string())
            .max()
    }

    pub fn detect_publication_date(&self, text: &str) -> Option<NaiveDate> {
        if let Some(captures) = self.numeric_date_re.captures(text) {
            if let Some(date) = date_from_captures(&captures, 1, 2, 3) {
                return Some(date);
            }
        }

        let captures = self.written_date_re.captures(text)?;
        let day: u32 = captures.get(1)?.as_str().parse().ok()?;
        let month_name = captures.get(2)?.as_str().to_lowercase();
        let year: i32 = captures.get(3)?.as_str().parse().ok()?;
        let month = MONTH_NAMES
            .iter()
            .find(|(name, _)| *name == month_name)
            .map(|(_, number)| *number)?;
        NaiveDate::from_ymd_opt(year, month, day)
    }

    pub fn detect_process_phase(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        let (_, label) = self
            .rules
            .process_phases
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword.as_str()))?;

        let mut phase = label.clone();
        match label.as_str() {
            "Confirmação de Participação" => {
                if let Some(captures) = self.phase_number_re.captures(&lowered) {
                    phase = format!("{label} – Fase {}", &captures[1]);
                }
            }
            "Avaliação de Desempenho" => {
                if lowered.contains("final") {
                    phase = format!("{label} Final");
                } else if lowered.contains("parcial") {
                    phase = format!("{label} Parcial");
                }
            }
            "Transferência" => {
                if lowered.contains("pei") {
                    phase = format!("{label} PEI");
                }
            }
            _ => {}
        }
        Some(phase)
    }

    pub fn detect_program(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        self.rules
            .programs
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword.as_str()))
            .map(|(_, label)| label.clone())
    }

    pub fn detect_audience(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        let mut labels: Vec<&str> = self
            .rules
            .audiences
            .iter()
            .filter(|(keyword, _)| lowered.contains(keyword.as_str()))
            .map(|(_, label)| label.as_str())
            .collect();
        labels.sort_unstable();
        labels.dedup();

        if labels.is_empty() {
            None
        } else {
            Some(labels.join(", "))
        }
    }

    /// Deadline window: prefers the "de 10/02 a 20/02/2024" range form,
    /// borrowing the year from the other endpoint or the surrounding text
    /// when one side omits it; falls back to the first two full dates.
    pub fn detect_deadlines(&self, text: &str) -> (Option<NaiveDate>, Option<NaiveDate>) {
        if let Some(captures) = self.deadline_range_re.captures(text) {
            let year_hint = captures
                .get(3)
                .or_else(|| captures.get(6))
                .map(|m| m.as_str().to_string())
                .or_else(|| self.year_re.find(text).map(|m| m.as_str().to_string()));

            if let Some(year) = year_hint.and_then(|y| y.parse::<i32>().ok()) {
                let parse_side = |day_idx: usize, month_idx: usize, year_idx: usize| {
                    let day: u32 = captures.get(day_idx)?.as_str().parse().ok()?;
                    let month: u32 = captures.get(month_idx)?.as_str().parse().ok()?;
                    let side_year = captures
                        .get(year_idx)
                        .and_then(|m| m.as_str().parse().ok())
                        .unwrap_or(year);
                    NaiveDate::from_ymd_opt(side_year, month, day)
                };
                let start = parse_side(1, 2, 3);
                let end = parse_side(4, 5, 6);
                if start.is_some() || end.is_some() {
                    return (start, end);
                }
            }
        }

        let mut dates = self.numeric_date_re.captures_iter(text);
        let start = dates.next().and_then(|c| date_from_captures(&c, 1, 2, 3));
        let end = dates.next().and_then(|c| date_from_captures(&c, 1, 2, 3));
        match (start, end) {
            (Some(start), Some(end)) => (Some(start), Some(end)),
            _ => (None, None),
        }
    }

    /// All cited norms, deduplicated, preserving first appearance order.
    pub fn extract_legal_references(&self, text: &str) -> Vec<String> {
        let mut found: Vec<(usize, String)> = Vec::new();
        for citation_re in &self.citation_res {
            for matched in citation_re.find_iter(text) {
                let cited = matched.as_str().trim().to_string();
                let length = cited.chars().count();
                if length < self.rules.citation_min_len || length > self.rules.citation_max_len {
                    continue;
                }
                found.push((matched.start(), cited));
            }
        }

        found.sort_by_key(|(start, _)| *start);
        let mut references = Vec::new();
        for (_, cited) in found {
            if !references.contains(&cited) {
                references.push(cited);
            }
        }
        references
    }
}

fn date_from_captures(
    captures: &regex::Captures<'_>,
    day_idx: usize,
    month_idx: usize,
    year_idx: usize,
) -> Option<NaiveDate> {
    let day: u32 = captures.get(day_idx)?.as_str().parse().ok()?;
    let month: u32 = captures.get(month_idx)?.as_str().parse().ok()?;
    let year: i32 = captures.get(year_idx)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}
