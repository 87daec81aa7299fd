use serde::{Deserialize, Serialize};

/// Rule set driving the metadata classifier.
///
/// The taxonomy is domain configuration, not engine code: the defaults
/// below carry the pt-BR teacher-assignment rule set, but a caller can
/// load a different versioned rule file and nothing else changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRules {
    /// Filename prefix (uppercased) -> category label.
    pub category_prefixes: Vec<(String, String)>,
    /// Filename keyword (uppercased) -> category label, checked after prefixes.
    pub category_keywords: Vec<(String, String)>,
    /// Lowercased keyword -> norm type; first match wins, so order
    /// compound forms before their substrings.
    pub norm_types: Vec<(String, String)>,
    /// Uppercased acronym -> issuing body label.
    pub issuing_bodies: Vec<(String, String)>,
    /// Lowercased keyword -> process phase label; first match wins.
    pub process_phases: Vec<(String, String)>,
    /// Lowercased keyword -> program label.
    pub programs: Vec<(String, String)>,
    /// Lowercased keyword -> audience label; all matches are joined.
    pub audiences: Vec<(String, String)>,
    /// Pattern for a plausible school-year token.
    pub year_pattern: String,
    /// Patterns for cited norms, e.g. "Resolução SEDUC nº 68/2024".
    pub citation_patterns: Vec<String>,
    /// Accepted length range for a citation match.
    pub citation_min_len: usize,
    pub citation_max_len: usize,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        let owned = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>()
        };

        Self {
            category_prefixes: owned(&[
                ("AT", "Atribuição de Classes (AC)"),
                ("AC", "Atribuição de Classes (AC)"),
                ("AD", "Avaliação de Desempenho (AD)"),
                ("CP", "Confirmação de Participação (CP)"),
                ("PEI", "Programa Ensino Integral (PEI)"),
            ]),
            category_keywords: owned(&[
                ("ATRIBUI", "Atribuição de Classes (AC)"),
                ("AVALIACA", "Avaliação de Desempenho (AD)"),
                ("DESEMPENHO", "Avaliação de Desempenho (AD)"),
                ("CONFIRMACAO", "Confirmação de Participação (CP)"),
                ("ENSINO INTEGRAL", "Programa Ensino Integral (PEI)"),
            ]),
            norm_types: owned(&[
                ("portaria conjunta", "Portaria Conjunta"),
                ("portaria", "Portaria"),
                ("resolução", "Resolução"),
                ("resolucao", "Resolução"),
                ("comunicado", "Comunicado"),
                ("informação", "Informação"),
                ("informacao", "Informação"),
                ("decreto", "Decreto"),
                ("lei complementar", "Lei Complementar"),
            ]),
            issuing_bodies: owned(&[
                ("CGRH", "CGRH"),
                ("DIPES", "DIPES"),
                ("SUCOR", "SUCOR"),
                ("SUPED", "SUPED"),
                ("SEDUC", "SEDUC"),
            ]),
            process_phases: owned(&[
                ("conferência de dados", "Conferência de Dados"),
                ("conferencia de dados", "Conferência de Dados"),
                ("credenciamento", "Credenciamento"),
                ("realocação", "Realocação"),
                ("realocacao", "Realocação"),
                ("alocação inicial", "Alocação Inicial"),
                ("alocacao inicial", "Alocação Inicial"),
                ("alocação", "Alocação"),
                ("alocacao", "Alocação"),
                ("transferência", "Transferência"),
                ("transferencia", "Transferência"),
                ("confirmação de participação", "Confirmação de Participação"),
                ("confirmacao de participacao", "Confirmação de Participação"),
                ("classificação", "Classificação"),
                ("classificacao", "Classificação"),
                ("inscrição", "Inscrição"),
                ("inscricao", "Inscrição"),
                ("avaliação de desempenho", "Avaliação de Desempenho"),
                ("avaliacao de desempenho", "Avaliação de Desempenho"),
            ]),
            programs: owned(&[
                ("programa ensino integral", "PEI"),
                ("ensino integral", "PEI"),
                ("pei", "PEI"),
                ("tempo parcial", "Tempo Parcial"),
                ("eja", "EJA"),
                ("novotec", "Ensino Técnico / Novotec"),
                ("ensino técnico", "Ensino Técnico / Novotec"),
            ]),
            audiences: owned(&[
                ("docente", "Docentes"),
                ("professor", "Docentes"),
                ("diretor", "Gestores"),
                ("gestor", "Gestores"),
                ("coordenador", "Gestores"),
                ("candidato", "Candidatos/Contratados"),
                ("contratado", "Candidatos/Contratados"),
            ]),
            year_pattern: r"\b(20[2-4]\d)\b".to_string(),
            citation_patterns: vec![
                r"Resolu\w+[^\n]{0,100}?\b\d{1,4}/20[1-4]\d".to_string(),
                r"Portaria[^\n]{0,100}?\b\d{1,4}/20[1-4]\d".to_string(),
                r"Lei Complementar[^\n]{0,100}?\b\d{1,4}/(?:20\d{2}|19\d{2})".to_string(),
            ],
            citation_min_len: 6,
            citation_max_len: 140,
        }
    }
}

/// Weights for fusing the per-signal scores of one candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionWeights {
    pub vector: f64,
    pub keyword: f64,
    pub cooccurrence: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.55,
            keyword: 0.35,
            cooccurrence: 0.10,
        }
    }
}

/// Tunables for the online pipeline: planner thresholds, retrieval
/// depths, fusion weights and sub-query deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidate count for `short_definition` questions.
    pub top_k_short: usize,
    /// Candidate count for `complex` questions.
    pub top_k_complex: usize,
    /// How many fused candidates are handed to the semantic reranker.
    pub rerank_top_n: usize,
    /// Max words for a question to still count as a short definition.
    pub short_question_max_words: usize,
    /// Lowercased question openers that suggest a definition lookup.
    pub interrogative_openers: Vec<String>,
    /// Lowercased conjunctions; two or more force the complex plan.
    pub conjunctions: Vec<String>,
    pub weights: FusionWeights,
    /// Window, in characters, for counting co-occurring query terms.
    pub proximity_window: usize,
    /// Deadline for each retrieval sub-query.
    pub stage_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k_short: 4,
            top_k_complex: 12,
            rerank_top_n: 8,
            short_question_max_words: 8,
            interrogative_openers: [
                "o que", "qual", "quais", "quando", "quem", "onde", "what", "when", "who",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            conjunctions: [" e ", " ou ", " mas ", " porém ", ";"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            weights: FusionWeights::default(),
            proximity_window: 120,
            stage_timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_round_trip_through_json() {
        let rules = ClassifierRules::default();
        let encoded = serde_json::to_string(&rules).expect("serialize rules");
        let decoded: ClassifierRules = serde_json::from_str(&encoded).expect("parse rules");
        assert_eq!(decoded.category_prefixes.len(), rules.category_prefixes.len());
        assert_eq!(decoded.year_pattern, rules.year_pattern);
    }

    #[test]
    fn fusion_weights_have_sane_defaults() {
        let weights = FusionWeights::default();
        assert!(weights.vector > weights.keyword);
        assert!(weights.cooccurrence > 0.0);
    }
}
