use crate::config::RetrievalConfig;
use crate::models::{QueryIntent, RetrievalPlan};

/// Classifies a question's intent and picks retrieval parameters.
///
/// A short, single-clause question opening with an interrogative gets a
/// small candidate set and skips the rerank round-trip; anything else is
/// treated as complex. Misclassification costs retrieval quality, never
/// correctness, so the heuristic stays deliberately cheap.
pub fn plan_query(question: &str, config: &RetrievalConfig) -> RetrievalPlan {
    let lowered = question.trim().to_lowercase();
    let word_count = lowered.split_whitespace().count();

    let opens_interrogative = config
        .interrogative_openers
        .iter()
        .any(|opener| lowered.starts_with(opener.as_str()));

    let conjunction_count: usize = config
        .conjunctions
        .iter()
        .map(|conjunction| lowered.matches(conjunction.as_str()).count())
        .sum();

    let short_definition = opens_interrogative
        && word_count <= config.short_question_max_words
        && conjunction_count < 2;

    if short_definition {
        RetrievalPlan {
            intent: QueryIntent::ShortDefinition,
            top_k: config.top_k_short,
            rerank: false,
        }
    } else {
        RetrievalPlan {
            intent: QueryIntent::Complex,
            top_k: config.top_k_complex,
            rerank: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;

    #[test]
    fn short_interrogative_question_skips_rerank() {
        let config = RetrievalConfig::default();
        let plan = plan_query("O que é atribuição de classes?", &config);
        assert_eq!(plan.intent, QueryIntent::ShortDefinition);
        assert_eq!(plan.top_k, config.top_k_short);
        assert!(!plan.rerank);
    }

    #[test]
    fn long_question_is_complex() {
        let config = RetrievalConfig::default();
        let plan = plan_query(
            "Qual é o prazo de inscrição para docentes contratados que atuam no PEI \
             e como funciona a confirmação de participação na fase 2?",
            &config,
        );
        assert_eq!(plan.intent, QueryIntent::Complex);
        assert_eq!(plan.top_k, config.top_k_complex);
        assert!(plan.rerank);
    }

    #[test]
    fn multiple_conjunctions_force_complex_even_when_short() {
        let config = RetrievalConfig::default();
        let plan = plan_query("Qual prazo e qual fase e qual programa?", &config);
        assert_eq!(plan.intent, QueryIntent::Complex);
    }

    #[test]
    fn statement_without_interrogative_opener_is_complex() {
        let config = RetrievalConfig::default();
        let plan = plan_query("Explique o processo de credenciamento.", &config);
        assert_eq!(plan.intent, QueryIntent::Complex);
    }
}
