//! Ticket classification: pluggable, trait-based classifier for incoming tickets.
//!
//! Default: `KeywordClassifier` (deterministic keyword heuristics, fully testable).
//! A real inference backend only needs to implement `TicketClassifier`.
//!
//! `AppState` holds an `Arc<dyn TicketClassifier>`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::ticket::{TicketCategory, TicketPriority};

// ────────────────────────────────────────────────────────────────────────────
// Output data models
// ────────────────────────────────────────────────────────────────────────────

/// A candidate reply produced alongside a classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateResponse {
    pub message: String,
    pub confidence: f64, // 0.0 – 1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub classification: TicketCategory,
    pub suggested_priority: TicketPriority,
    pub needs_additional_info: bool,
    pub confidence_score: f64, // 0.0 – 1.0
    pub suggested_responses: Vec<CandidateResponse>,
}

impl Classification {
    /// Tickets under this confidence are flagged for a human look.
    pub const REVIEW_THRESHOLD: f64 = 0.8;

    pub fn needs_human_review(&self) -> bool {
        self.confidence_score < Self::REVIEW_THRESHOLD
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Trait definition
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait TicketClassifier: Send + Sync {
    async fn classify(&self, title: &str, description: &str) -> Result<Classification, AppError>;

    /// Label stored for transparency ("keyword", "llm", ...).
    fn backend(&self) -> &'static str;
}

// ────────────────────────────────────────────────────────────────────────────
// KeywordClassifier
// ────────────────────────────────────────────────────────────────────────────

/// Keyword heuristic classifier. Stands in for a real model.
///
/// Algorithm:
/// 1. Lower-case `title + " " + description`.
/// 2. Category: first family with a hit wins (technical → feature → billing).
/// 3. Priority: critical → high → low keyword families, else medium.
/// 4. Confidence: 70 points, +15 for long text, +10 for detailed text,
///    −5 for a question mark; clamped to 0–100 and scaled to 0.0–1.0.
#[derive(Debug, Default, Clone)]
pub struct KeywordClassifier {
    /// Artificial delay that simulates a remote model call.
    pub latency: Duration,
}

impl KeywordClassifier {
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl TicketClassifier for KeywordClassifier {
    async fn classify(&self, title: &str, description: &str) -> Result<Classification, AppError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(classify_text(title, description))
    }

    fn backend(&self) -> &'static str {
        "keyword"
    }
}

const TECHNICAL_KEYWORDS: &[&str] = &[
    "error",
    "erro",
    "bug",
    "doesn't work",
    "not working",
    "não funciona",
    "nao funciona",
    "falha",
    "crash",
];

const FEATURE_KEYWORDS: &[&str] = &[
    "feature",
    "funcionalidade",
    "implement",
    "implementar",
    "add",
    "adicionar",
];

const BILLING_KEYWORDS: &[&str] = &[
    "charge",
    "cobrança",
    "payment",
    "pagamento",
    "invoice",
    "fatura",
    "boleto",
];

const CRITICAL_KEYWORDS: &[&str] = &[
    "urgent",
    "urgente",
    "critical",
    "crítico",
    "crítica",
    "critico",
    "emergency",
    "emergência",
];

const HIGH_KEYWORDS: &[&str] = &["important", "importante", "severe", "grave"];

const LOW_KEYWORDS: &[&str] = &[
    "low priority",
    "baixa prioridade",
    "no rush",
    "sem pressa",
    "when possible",
    "quando possível",
];

const MIN_DETAILED_CHARS: usize = 30;
const MIN_DETAILED_WORDS: usize = 5;
const LONG_TEXT_CHARS: usize = 100;

const BASE_POINTS: i32 = 70;
const LONG_TEXT_BONUS: i32 = 15;
const DETAIL_BONUS: i32 = 10;
const QUESTION_PENALTY: i32 = 5;

/// Pure classification over a ticket's title and description.
pub fn classify_text(title: &str, description: &str) -> Classification {
    let text = format!("{title} {description}").to_lowercase();

    let classification = detect_category(&text);
    let suggested_priority = detect_priority(&text);
    let needs_additional_info = needs_additional_info(&text);

    let mut points = BASE_POINTS;
    if text.chars().count() > LONG_TEXT_CHARS {
        points += LONG_TEXT_BONUS;
    }
    if !needs_additional_info {
        points += DETAIL_BONUS;
    }
    if text.contains('?') {
        points -= QUESTION_PENALTY;
    }
    let points = points.clamp(0, 100);

    Classification {
        classification,
        suggested_priority,
        needs_additional_info,
        confidence_score: to_score(points),
        suggested_responses: candidate_responses(classification, points),
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| text.contains(kw))
}

fn detect_category(text: &str) -> TicketCategory {
    if contains_any(text, TECHNICAL_KEYWORDS) {
        TicketCategory::TechnicalIssue
    } else if contains_any(text, FEATURE_KEYWORDS) {
        TicketCategory::FeatureRequest
    } else if contains_any(text, BILLING_KEYWORDS) {
        TicketCategory::Billing
    } else {
        TicketCategory::GeneralInquiry
    }
}

fn detect_priority(text: &str) -> TicketPriority {
    if contains_any(text, CRITICAL_KEYWORDS) {
        TicketPriority::Critical
    } else if contains_any(text, HIGH_KEYWORDS) {
        TicketPriority::High
    } else if contains_any(text, LOW_KEYWORDS) {
        TicketPriority::Low
    } else {
        TicketPriority::Medium
    }
}

/// True for under-specified tickets: short, a single token, or few words.
fn needs_additional_info(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.chars().count() < MIN_DETAILED_CHARS
        || !trimmed.contains(' ')
        || trimmed.split_whitespace().count() < MIN_DETAILED_WORDS
}

fn to_score(points: i32) -> f64 {
    f64::from(points.clamp(0, 100)) / 100.0
}

/// Reply templates per category with their confidence offsets (in points).
fn candidate_responses(category: TicketCategory, points: i32) -> Vec<CandidateResponse> {
    let templates: &[(&str, i32)] = match category {
        TicketCategory::TechnicalIssue => &[
            (
                "Olá! Identificamos que você está enfrentando um problema técnico. \
                 Nossa equipe já está analisando o erro. Poderia nos informar os passos \
                 para reproduzir o problema e, se possível, enviar capturas de tela?",
                5,
            ),
            (
                "Obrigado por relatar o problema. Enquanto investigamos, tente limpar o \
                 cache do navegador e acessar novamente. Se o erro persistir, avise-nos.",
                15,
            ),
        ],
        TicketCategory::FeatureRequest => &[
            (
                "Obrigado pela sugestão de funcionalidade! Registramos seu pedido e ele \
                 será avaliado pela nossa equipe de produto.",
                10,
            ),
            (
                "Agradecemos o feedback. Poderia detalhar como essa funcionalidade \
                 ajudaria no seu dia a dia? Isso nos ajuda a priorizar.",
                20,
            ),
        ],
        TicketCategory::Billing => &[
            (
                "Olá! Recebemos sua solicitação sobre cobrança. Nossa equipe financeira \
                 vai verificar sua fatura e retornará em breve.",
                5,
            ),
            (
                "Para agilizar a análise do pagamento, poderia nos enviar o número da \
                 fatura ou o comprovante?",
                15,
            ),
        ],
        TicketCategory::GeneralInquiry | TicketCategory::Other => &[(
            "Olá! Recebemos sua mensagem e um de nossos agentes responderá em breve.",
            10,
        )],
    };

    templates
        .iter()
        .map(|(message, offset)| CandidateResponse {
            message: (*message).to_string(),
            confidence: to_score(points - offset),
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_technical_ticket() {
        let c = classify_text("Sistema fora do ar", "erro crítico no sistema, não funciona");
        assert_eq!(c.classification, TicketCategory::TechnicalIssue);
        assert_eq!(c.suggested_priority, TicketPriority::Critical);
        assert!(!c.suggested_responses.is_empty());
        assert!(c.suggested_responses[0].message.contains("problema técnico"));
    }

    #[test]
    fn test_short_text_needs_additional_info() {
        let c = classify_text("Ajuda", "socorro");
        assert!(c.needs_additional_info);
    }

    #[test]
    fn test_few_words_needs_additional_info_even_if_long() {
        let c = classify_text("Extraordinariamente", "incompreensivelmente desconfigurado");
        assert!(c.needs_additional_info);
    }

    #[test]
    fn test_detailed_text_does_not_need_more_info() {
        let c = classify_text(
            "Relatório mensal",
            "o relatório mensal de vendas não mostra os dados de março",
        );
        assert!(!c.needs_additional_info);
    }

    #[test]
    fn test_critical_beats_high_and_low() {
        let c = classify_text(
            "urgent and important",
            "this is low priority but also an emergency for the team",
        );
        assert_eq!(c.suggested_priority, TicketPriority::Critical);
    }

    #[test]
    fn test_high_beats_low() {
        let c = classify_text("importante", "baixa prioridade mas importante para o time");
        assert_eq!(c.suggested_priority, TicketPriority::High);
    }

    #[test]
    fn test_low_priority_phrasing() {
        let c = classify_text("Dúvida", "quando possível, me expliquem como exportar relatórios");
        assert_eq!(c.suggested_priority, TicketPriority::Low);
    }

    #[test]
    fn test_default_priority_is_medium() {
        let c = classify_text("Dúvida", "como faço para exportar os relatórios do mês");
        assert_eq!(c.suggested_priority, TicketPriority::Medium);
    }

    #[test]
    fn test_technical_wins_over_billing() {
        let c = classify_text("Pagamento", "erro ao gerar o boleto de pagamento da fatura");
        assert_eq!(c.classification, TicketCategory::TechnicalIssue);
    }

    #[test]
    fn test_billing_category() {
        let c = classify_text("Fatura", "recebi uma cobrança duplicada neste mês na fatura");
        assert_eq!(c.classification, TicketCategory::Billing);
        assert_eq!(c.suggested_responses.len(), 2);
    }

    #[test]
    fn test_general_inquiry_fallback_has_single_response() {
        let c = classify_text("Horário", "qual é o horário de atendimento de vocês");
        assert_eq!(c.classification, TicketCategory::GeneralInquiry);
        assert_eq!(c.suggested_responses.len(), 1);
    }

    #[test]
    fn test_confidence_detailed_short_text() {
        // 70 + 10 (detailed) = 80
        let c = classify_text("Relatório", "o relatório mensal de vendas está vazio hoje");
        assert_eq!(c.confidence_score, 0.8);
        assert!(!c.needs_human_review());
    }

    #[test]
    fn test_confidence_long_detailed_question() {
        let description = "o relatório mensal de vendas está vazio desde a última atualização \
                           e já tentamos recarregar a página várias vezes sem sucesso, o que fazer?";
        let c = classify_text("Relatório vazio", description);
        // 70 + 15 + 10 − 5 = 90
        assert_eq!(c.confidence_score, 0.9);
    }

    #[test]
    fn test_confidence_underspecified_question_needs_review() {
        let c = classify_text("Ajuda?", "");
        // 70 − 5 = 65
        assert_eq!(c.confidence_score, 0.65);
        assert!(c.needs_human_review());
    }

    #[test]
    fn test_confidence_is_bounded() {
        let long = "palavra ".repeat(100);
        let c = classify_text("Texto longo", &long);
        assert!(c.confidence_score <= 1.0);
        assert!(c.confidence_score >= 0.0);
        for r in &c.suggested_responses {
            assert!((0.0..=1.0).contains(&r.confidence));
        }
    }

    #[test]
    fn test_response_confidence_below_ticket_confidence() {
        let c = classify_text("Nova funcionalidade", "gostaria de adicionar exportação em pdf nos relatórios");
        assert_eq!(c.classification, TicketCategory::FeatureRequest);
        for r in &c.suggested_responses {
            assert!(r.confidence < c.confidence_score);
        }
        assert_eq!(c.suggested_responses[0].confidence, 0.7);
        assert_eq!(c.suggested_responses[1].confidence, 0.6);
    }

    #[tokio::test]
    async fn test_keyword_classifier_backend_label() {
        let classifier = KeywordClassifier::default();
        let c = classifier.classify("bug", "the export button throws an error every time").await.unwrap();
        assert_eq!(c.classification, TicketCategory::TechnicalIssue);
        assert_eq!(classifier.backend(), "keyword");
    }
}
