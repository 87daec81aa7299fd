use crate::error::QueryError;
use crate::models::{GroundedAnswer, RetrievalCandidate};
use crate::traits::Generator;
use regex::Regex;
use std::collections::HashSet;
use tracing::warn;

const SYSTEM_PROMPT: &str = "Você é um assistente sobre normas de atribuição de classes e aulas. \
Responda de forma concisa, usando exclusivamente os trechos fornecidos em 'Fontes'. \
Cite a origem de cada afirmação no formato [arquivo], usando apenas os identificadores \
listados nas fontes. Se os trechos não forem suficientes para responder com segurança, \
diga isso explicitamente em vez de inventar uma resposta.";

const REGENERATION_NOTICE: &str = "A resposta anterior citou fontes inexistentes. \
Gere a resposta novamente citando SOMENTE os identificadores entre colchetes \
presentes nas fontes fornecidas.";

const NO_EVIDENCE_ANSWER: &str = "Não foram encontrados trechos relevantes nas normas \
indexadas para responder a esta pergunta.";

/// Builds a grounding prompt from retrieved candidates, invokes the
/// generation capability, and enforces the citation contract: every
/// `[source]` token in the answer must name a document that was actually
/// in the supplied context. One regeneration attempt is allowed before
/// the request fails with a grounding failure.
pub struct AnswerSynthesizer<G> {
    generator: G,
    citation_re: Regex,
}

impl<G: Generator> AnswerSynthesizer<G> {
    pub fn new(generator: G) -> Result<Self, QueryError> {
        Ok(Self {
            generator,
            citation_re: Regex::new(r"\[([^\[\]]+)\]")?,
        })
    }

    pub async fn synthesize(
        &self,
        question: &str,
        candidates: &[RetrievalCandidate],
    ) -> Result<GroundedAnswer, QueryError> {
        if candidates.is_empty() {
            return Ok(GroundedAnswer {
                answer: NO_EVIDENCE_ANSWER.to_string(),
                citations: Vec::new(),
            });
        }

        let context = build_context(candidates);
        let allowed: HashSet<&str> = candidates
            .iter()
            .map(|candidate| candidate.source_file.as_str())
            .collect();
        let user_prompt = format!("Fontes:\n{context}\nPergunta: {question}");

        let answer = self.generator.generate(SYSTEM_PROMPT, &user_prompt).await?;
        let (citations, invalid) = self.split_citations(&answer, &allowed);
        if invalid.is_empty() {
            return Ok(GroundedAnswer { answer, citations });
        }

        warn!(
            invalid = %invalid.join(", "),
            "answer cited absent sources, regenerating once"
        );
        let retry_prompt = format!("{REGENERATION_NOTICE}\n\n{user_prompt}");
        let answer = self.generator.generate(SYSTEM_PROMPT, &retry_prompt).await?;
        let (citations, invalid) = self.split_citations(&answer, &allowed);
        if invalid.is_empty() {
            return Ok(GroundedAnswer { answer, citations });
        }

        Err(QueryError::GroundingFailure {
            invalid_citations: invalid,
        })
    }

    /// Citation tokens in answer order, deduplicated, partitioned into
    /// those present in the grounding context and those absent from it.
    fn split_citations(
        &self,
        answer: &str,
        allowed: &HashSet<&str>,
    ) -> (Vec<String>, Vec<String>) {
        let mut citations = Vec::new();
        let mut invalid = Vec::new();
        for captures in self.citation_re.captures_iter(answer) {
            let token = captures[1].trim().to_string();
            if allowed.contains(token.as_str()) {
                if !citations.contains(&token) {
                    citations.push(token);
                }
            } else if !invalid.contains(&token) {
                invalid.push(token);
            }
        }
        (citations, invalid)
    }
}

fn build_context(candidates: &[RetrievalCandidate]) -> String {
    let mut context = String::new();
    for candidate in candidates {
        context.push_str(&format!("[{}] {}\n", candidate.source_file, candidate.text.trim()));
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn candidate(source: &str, text: &str) -> RetrievalCandidate {
        RetrievalCandidate {
            key: source.to_string(),
            record_id: format!("{source}#chunk0"),
            document_id: source.to_string(),
            source_file: source.to_string(),
            doc_title: source.to_string(),
            unit_index: 0,
            text: text.to_string(),
            vector_score: Some(0.9),
            keyword_score: None,
            cooccurrence_boost: 0.0,
            rerank_score: None,
            fused_score: 0.5,
        }
    }

    struct ScriptedGenerator {
        answers: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new(answers: Vec<&str>) -> Self {
            Self {
                answers: Mutex::new(answers.into_iter().rev().map(String::from).collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut answers = self.answers.lock().expect("test lock");
            Ok(answers.pop().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn cited_sources_all_come_from_the_context() {
        let generator =
            ScriptedGenerator::new(vec!["O prazo é 10/02 [docs/AT-2024.txt]."]);
        let synthesizer = AnswerSynthesizer::new(generator).expect("synthesizer builds");
        let result = synthesizer
            .synthesize(
                "Qual o prazo?",
                &[candidate("docs/AT-2024.txt", "O prazo vai até 10/02.")],
            )
            .await
            .expect("grounded answer");

        assert_eq!(result.citations, vec!["docs/AT-2024.txt".to_string()]);
        assert_eq!(synthesizer.generator.call_count(), 1);
    }

    #[tokio::test]
    async fn absent_citation_triggers_exactly_one_regeneration() {
        let generator = ScriptedGenerator::new(vec![
            "Resposta com fonte falsa [docs/inventado.txt].",
            "Resposta corrigida [docs/AT-2024.txt].",
        ]);
        let synthesizer = AnswerSynthesizer::new(generator).expect("synthesizer builds");
        let result = synthesizer
            .synthesize("Qual o prazo?", &[candidate("docs/AT-2024.txt", "Prazo 10/02.")])
            .await
            .expect("regenerated answer is grounded");

        assert_eq!(result.citations, vec!["docs/AT-2024.txt".to_string()]);
        assert_eq!(synthesizer.generator.call_count(), 2);
    }

    #[tokio::test]
    async fn persistent_absent_citation_is_a_grounding_failure() {
        let generator = ScriptedGenerator::new(vec![
            "Fonte falsa [docs/inventado.txt].",
            "Ainda falsa [docs/outro-inventado.txt].",
        ]);
        let synthesizer = AnswerSynthesizer::new(generator).expect("synthesizer builds");
        let result = synthesizer
            .synthesize("Qual o prazo?", &[candidate("docs/AT-2024.txt", "Prazo 10/02.")])
            .await;

        match result {
            Err(QueryError::GroundingFailure { invalid_citations }) => {
                assert_eq!(invalid_citations, vec!["docs/outro-inventado.txt".to_string()]);
            }
            other => panic!("expected grounding failure, got {other:?}"),
        }
        assert_eq!(synthesizer.generator.call_count(), 2);
    }

    #[tokio::test]
    async fn empty_candidate_list_short_circuits_without_generation() {
        let generator = ScriptedGenerator::new(vec!["não deveria ser chamada"]);
        let synthesizer = AnswerSynthesizer::new(generator).expect("synthesizer builds");
        let result = synthesizer
            .synthesize("Qual o prazo?", &[])
            .await
            .expect("explicit no-evidence answer");

        assert!(result.citations.is_empty());
        assert_eq!(result.answer, NO_EVIDENCE_ANSWER);
        assert_eq!(synthesizer.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn uncited_answer_is_allowed() {
        let generator =
            ScriptedGenerator::new(vec!["As fontes não são suficientes para responder."]);
        let synthesizer = AnswerSynthesizer::new(generator).expect("synthesizer builds");
        let result = synthesizer
            .synthesize("Qual o prazo?", &[candidate("docs/AT-2024.txt", "Outro assunto.")])
            .await
            .expect("insufficiency answer passes validation");
        assert!(result.citations.is_empty());
    }
}
