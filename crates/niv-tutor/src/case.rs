//! Clinical case quiz.
//!
//! A case is generated by the model as schema-constrained JSON, validated
//! here, then played as a single-answer multiple-choice question.

use std::sync::Arc;

use niv_llm::{GenerationRequest, TextGenerator};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{Result, TutorError};

/// Themes the generator draws from.
pub const THEMES: [&str; 9] = [
    "Exacerbation aiguë de BPCO",
    "Œdème Aigu du Poumon Cardiogénique",
    "Syndrome Obésité-Hypoventilation en décompensation",
    "Insuffisance respiratoire post-extubation chez un patient à risque",
    "Insuffisance respiratoire post-opératoire",
    "Crise respiratoire aiguë dans un contexte de maladie neuromusculaire (SLA, Duchenne...)",
    "Gestion d'une complication de la VNI (fuites majeures, asynchronie)",
    "Décision de sevrage de la VNI",
    "Initiation de la VNI en pédiatrie",
];

const SYSTEM_INSTRUCTION: &str = "Tu es un expert en médecine respiratoire et un formateur médical. Crée des cas cliniques réalistes, concis et stimulants sur la Ventilation Non Invasive (VNI) pour les professionnels de santé, basés sur le thème fourni dans le prompt. Chaque cas doit présenter une catégorie, un scénario clinique, une question claire à choix multiple avec quatre options plausibles (A, B, C, D), l'ID de la réponse correcte, et une explication pédagogique complète. **L'explication doit être formatée en Markdown simple (titres en gras, listes à puces) pour une lisibilité optimale.** La langue de la réponse doit être exclusivement le Français.";

/// Message shown when case generation fails.
pub const CASE_ERROR_MESSAGE: &str =
    "Une erreur est survenue lors de la génération du cas. Veuillez réessayer.";

/// Returns the theme at `index`, or a random one when `index` is `None`.
///
/// Returns `None` for an out-of-range index.
#[must_use]
pub fn pick_theme(index: Option<usize>) -> Option<&'static str> {
    match index {
        Some(i) => THEMES.get(i).copied(),
        None => THEMES.choose(&mut rand::thread_rng()).copied(),
    }
}

/// Prompt asking for one case on `theme`.
#[must_use]
pub fn case_prompt(theme: &str) -> String {
    format!(
        "Génère un cas clinique stimulant sur la VNI concernant le thème suivant : \"{theme}\". Le cas doit être suivi d'une question à choix multiple avec 4 options (A, B, C, D) et une explication détaillée de la bonne réponse."
    )
}

/// Structured-output schema for [`ClinicalCase`].
#[must_use]
pub fn case_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "category": {
                "type": "STRING",
                "description": "La catégorie ou le thème du cas clinique, basé sur la demande."
            },
            "case": {
                "type": "STRING",
                "description": "Le scénario clinique concis et réaliste."
            },
            "question": {
                "type": "STRING",
                "description": "La question à choix multiple claire et précise."
            },
            "options": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "id": { "type": "STRING", "description": "L'identifiant de l'option (A, B, C, ou D)." },
                        "text": { "type": "STRING", "description": "Le texte de l'option." }
                    }
                }
            },
            "correctAnswerId": {
                "type": "STRING",
                "description": "L'ID de la bonne réponse (A, B, C, ou D)."
            },
            "explanation": {
                "type": "STRING",
                "description": "Une explication pédagogique détaillée de la bonne réponse, expliquant également pourquoi les autres options sont incorrectes. **Formatte cette explication en Markdown simple** en utilisant des titres en gras (ex: **Justification**) et des listes à puces pour une clarté maximale."
            }
        }
    })
}

/// Full generation request for a case on `theme`.
#[must_use]
pub fn case_request(theme: &str) -> GenerationRequest {
    GenerationRequest::prompt(SYSTEM_INSTRUCTION, case_prompt(theme)).with_schema(case_schema())
}

// ============================================================================
// Case data
// ============================================================================

/// One answer option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseOption {
    /// Option id, normally `A`-`D`.
    pub id: String,
    /// Option text.
    pub text: String,
}

/// A generated clinical case with its multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalCase {
    /// Theme of the case.
    pub category: String,
    /// Clinical scenario.
    pub case: String,
    /// The question asked.
    pub question: String,
    /// Candidate answers.
    pub options: Vec<CaseOption>,
    /// Id of the correct option.
    pub correct_answer_id: String,
    /// Markdown explanation of the answer.
    pub explanation: String,
}

impl ClinicalCase {
    /// Looks up an option by id.
    #[must_use]
    pub fn option(&self, id: &str) -> Option<&CaseOption> {
        self.options.iter().find(|o| o.id == id)
    }
}

/// Parses and validates the model's structured output.
///
/// # Errors
///
/// Returns `TutorError::GenerationFailed` if the text is not a JSON object,
/// does not match [`ClinicalCase`], has no options, or names a correct answer
/// that is not one of the options.
pub fn parse_case(text: &str) -> Result<ClinicalCase> {
    let text = text.trim();
    if !text.starts_with('{') || !text.ends_with('}') {
        return Err(TutorError::generation_failed(
            "model output is not a JSON object",
        ));
    }

    let case: ClinicalCase = serde_json::from_str(text)
        .map_err(|e| TutorError::generation_failed(format!("invalid case JSON: {e}")))?;

    if case.options.is_empty() {
        return Err(TutorError::generation_failed("case has no answer options"));
    }
    if case.option(&case.correct_answer_id).is_none() {
        return Err(TutorError::generation_failed(format!(
            "correct answer '{}' is not among the options",
            case.correct_answer_id
        )));
    }

    Ok(case)
}

// ============================================================================
// Service
// ============================================================================

/// Generates clinical cases.
#[derive(Clone)]
pub struct CaseService {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl CaseService {
    /// Creates the service; `None` means no API key is configured.
    #[must_use]
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self { generator }
    }

    /// Returns `true` when a generator is configured.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.generator.is_some()
    }

    /// Generates a case on a random theme.
    ///
    /// # Errors
    ///
    /// See [`generate_for`](Self::generate_for).
    pub async fn generate(&self) -> Result<ClinicalCase> {
        let theme = pick_theme(None).unwrap_or(THEMES[0]);
        self.generate_for(theme).await
    }

    /// Generates a case on `theme`.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ServiceUnavailable` without a generator,
    /// `TutorError::Llm` if the call fails and
    /// `TutorError::GenerationFailed` if the output is unusable.
    #[instrument(skip(self))]
    pub async fn generate_for(&self, theme: &str) -> Result<ClinicalCase> {
        let generator = self.generator.as_ref().ok_or(TutorError::ServiceUnavailable)?;
        let text = generator.generate(&case_request(theme)).await?;
        let case = parse_case(&text).map_err(|e| {
            warn!(error = %e, "Discarding unusable case");
            e
        })?;
        info!(category = %case.category, options = case.options.len(), "Clinical case generated");
        Ok(case)
    }
}

impl std::fmt::Debug for CaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseService")
            .field("available", &self.is_available())
            .finish()
    }
}

// ============================================================================
// Quiz
// ============================================================================

/// Result of a submitted answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    /// Whether the selected option is correct.
    pub correct: bool,
    /// Id of the correct option.
    pub correct_answer_id: String,
    /// Markdown explanation.
    pub explanation: String,
}

/// How an option should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionVerdict {
    /// Not submitted yet.
    Pending,
    /// The correct answer, revealed after submission.
    Correct,
    /// The learner's wrong choice.
    WrongSelection,
    /// Any other option after submission.
    Neutral,
}

/// One attempt at a [`ClinicalCase`].
#[derive(Debug, Clone)]
pub struct CaseQuiz {
    case: ClinicalCase,
    selected: Option<String>,
    feedback: Option<Feedback>,
}

impl CaseQuiz {
    /// Starts a quiz with nothing selected.
    #[must_use]
    pub const fn new(case: ClinicalCase) -> Self {
        Self {
            case,
            selected: None,
            feedback: None,
        }
    }

    /// The case being played.
    #[must_use]
    pub const fn case(&self) -> &ClinicalCase {
        &self.case
    }

    /// Currently selected option id.
    #[must_use]
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Feedback, once submitted.
    #[must_use]
    pub const fn feedback(&self) -> Option<&Feedback> {
        self.feedback.as_ref()
    }

    /// Returns `true` once an answer has been submitted.
    #[must_use]
    pub const fn is_submitted(&self) -> bool {
        self.feedback.is_some()
    }

    /// Selects an option. Returns `false` (and changes nothing) after
    /// submission.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::UnknownOption` for an id not in the case.
    pub fn select(&mut self, id: &str) -> Result<bool> {
        if self.is_submitted() {
            return Ok(false);
        }
        let option = self
            .case
            .option(id)
            .ok_or_else(|| TutorError::UnknownOption(id.to_string()))?;
        self.selected = Some(option.id.clone());
        Ok(true)
    }

    /// Submits the current selection.
    ///
    /// Submitting again returns the same feedback.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::NoSelection` if nothing is selected.
    pub fn submit(&mut self) -> Result<&Feedback> {
        let selected = self.selected.as_deref().ok_or(TutorError::NoSelection)?;
        let feedback = self.feedback.get_or_insert_with(|| Feedback {
            correct: selected == self.case.correct_answer_id,
            correct_answer_id: self.case.correct_answer_id.clone(),
            explanation: self.case.explanation.clone(),
        });
        Ok(feedback)
    }

    /// Display verdict for the option `id`.
    #[must_use]
    pub fn option_verdict(&self, id: &str) -> OptionVerdict {
        if !self.is_submitted() {
            return OptionVerdict::Pending;
        }
        if id == self.case.correct_answer_id {
            OptionVerdict::Correct
        } else if self.selected.as_deref() == Some(id) {
            OptionVerdict::WrongSelection
        } else {
            OptionVerdict::Neutral
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use niv_llm::{LlmError, ScriptedGenerator};

    const VALID_CASE: &str = r#"{
        "category": "Exacerbation aiguë de BPCO",
        "case": "Homme de 68 ans, BPCO stade III, pH 7,28, PaCO2 62 mmHg.",
        "question": "Quel réglage initial proposez-vous ?",
        "options": [
            {"id": "A", "text": "PEP 5, AI 10"},
            {"id": "B", "text": "PEP 15, AI 5"},
            {"id": "C", "text": "Oxygène seul"},
            {"id": "D", "text": "Intubation immédiate"}
        ],
        "correctAnswerId": "A",
        "explanation": "**Justification**\n- AI suffisante pour le Vt"
    }"#;

    fn sample_case() -> ClinicalCase {
        parse_case(VALID_CASE).unwrap()
    }

    #[test]
    fn test_nine_themes() {
        assert_eq!(THEMES.len(), 9);
        assert!(THEMES.iter().all(|t| !t.is_empty()));
    }

    #[test]
    fn test_pick_theme_by_index() {
        assert_eq!(pick_theme(Some(0)), Some("Exacerbation aiguë de BPCO"));
        assert_eq!(pick_theme(Some(8)), Some("Initiation de la VNI en pédiatrie"));
        assert_eq!(pick_theme(Some(9)), None);
    }

    #[test]
    fn test_pick_theme_random_is_a_known_theme() {
        for _ in 0..20 {
            let theme = pick_theme(None).unwrap();
            assert!(THEMES.contains(&theme));
        }
    }

    #[test]
    fn test_case_request_embeds_theme_and_schema() {
        let request = case_request("Décision de sevrage de la VNI");
        let prompt = request.last_user_text().unwrap();
        assert!(prompt.contains("\"Décision de sevrage de la VNI\""));
        assert!(prompt.contains("4 options (A, B, C, D)"));
        assert!(request.system_instruction.contains("exclusivement le Français"));

        let schema = request.response_schema.unwrap();
        assert_eq!(schema["type"], "OBJECT");
        assert!(schema["properties"]["correctAnswerId"].is_object());
    }

    #[test]
    fn test_parse_case_valid() {
        let case = sample_case();
        assert_eq!(case.options.len(), 4);
        assert_eq!(case.correct_answer_id, "A");
        assert_eq!(case.option("B").unwrap().text, "PEP 15, AI 5");
    }

    #[test]
    fn test_parse_case_tolerates_surrounding_whitespace() {
        let padded = format!("\n  {VALID_CASE}  \n");
        assert!(parse_case(&padded).is_ok());
    }

    #[test]
    fn test_parse_case_rejects_non_object() {
        for text in ["", "Voici le cas : {}", "```json\n{}\n```", "[1, 2]"] {
            let err = parse_case(text).unwrap_err();
            assert!(matches!(err, TutorError::GenerationFailed(_)), "{text}");
        }
    }

    #[test]
    fn test_parse_case_rejects_missing_fields() {
        let err = parse_case(r#"{"category": "x"}"#).unwrap_err();
        assert!(matches!(err, TutorError::GenerationFailed(_)));
    }

    #[test]
    fn test_parse_case_rejects_empty_options() {
        let json = serde_json::json!({
            "category": "c", "case": "c", "question": "q",
            "options": [], "correctAnswerId": "A", "explanation": "e"
        });
        let err = parse_case(&json.to_string()).unwrap_err();
        assert!(err.to_string().contains("no answer options"));
    }

    #[test]
    fn test_parse_case_rejects_unknown_correct_answer() {
        let json = serde_json::json!({
            "category": "c", "case": "c", "question": "q",
            "options": [{"id": "A", "text": "a"}],
            "correctAnswerId": "E", "explanation": "e"
        });
        let err = parse_case(&json.to_string()).unwrap_err();
        assert!(err.to_string().contains("'E'"));
    }

    #[tokio::test]
    async fn test_service_unavailable_without_generator() {
        let service = CaseService::new(None);
        assert!(!service.is_available());
        let err = service.generate().await.unwrap_err();
        assert!(matches!(err, TutorError::ServiceUnavailable));
    }

    #[tokio::test]
    async fn test_service_generates_case() {
        let generator = ScriptedGenerator::new().then_reply(VALID_CASE);
        let service = CaseService::new(Some(Arc::new(generator.clone())));

        let case = service.generate_for(THEMES[0]).await.unwrap();
        assert_eq!(case, sample_case());

        let requests = generator.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].response_schema.is_some());
    }

    #[tokio::test]
    async fn test_service_malformed_output() {
        let generator = ScriptedGenerator::new().then_reply("Désolé, je ne peux pas.");
        let service = CaseService::new(Some(Arc::new(generator)));
        let err = service.generate().await.unwrap_err();
        assert!(matches!(err, TutorError::GenerationFailed(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_service_llm_failure() {
        let generator = ScriptedGenerator::new().then_fail(LlmError::api(429, "quota"));
        let service = CaseService::new(Some(Arc::new(generator)));
        let err = service.generate().await.unwrap_err();
        assert!(matches!(err, TutorError::Llm(_)));
    }

    #[test]
    fn test_quiz_correct_answer() {
        let mut quiz = CaseQuiz::new(sample_case());
        assert!(quiz.select("A").unwrap());
        let feedback = quiz.submit().unwrap().clone();

        assert!(feedback.correct);
        assert_eq!(feedback.correct_answer_id, "A");
        assert!(feedback.explanation.contains("Justification"));
        assert_eq!(quiz.option_verdict("A"), OptionVerdict::Correct);
        assert_eq!(quiz.option_verdict("B"), OptionVerdict::Neutral);
    }

    #[test]
    fn test_quiz_wrong_answer_verdicts() {
        let mut quiz = CaseQuiz::new(sample_case());
        quiz.select("C").unwrap();
        assert_eq!(quiz.option_verdict("C"), OptionVerdict::Pending);

        assert!(!quiz.submit().unwrap().correct);
        assert_eq!(quiz.option_verdict("A"), OptionVerdict::Correct);
        assert_eq!(quiz.option_verdict("C"), OptionVerdict::WrongSelection);
        assert_eq!(quiz.option_verdict("D"), OptionVerdict::Neutral);
    }

    #[test]
    fn test_quiz_selection_can_change_before_submit() {
        let mut quiz = CaseQuiz::new(sample_case());
        quiz.select("B").unwrap();
        quiz.select("A").unwrap();
        assert_eq!(quiz.selected(), Some("A"));
    }

    #[test]
    fn test_quiz_selection_ignored_after_submit() {
        let mut quiz = CaseQuiz::new(sample_case());
        quiz.select("B").unwrap();
        quiz.submit().unwrap();

        assert!(!quiz.select("A").unwrap());
        assert_eq!(quiz.selected(), Some("B"));
        assert!(!quiz.submit().unwrap().correct);
    }

    #[test]
    fn test_quiz_unknown_option() {
        let mut quiz = CaseQuiz::new(sample_case());
        let err = quiz.select("Z").unwrap_err();
        assert!(matches!(err, TutorError::UnknownOption(id) if id == "Z"));
        assert!(quiz.selected().is_none());
    }

    #[test]
    fn test_quiz_submit_requires_selection() {
        let mut quiz = CaseQuiz::new(sample_case());
        assert!(matches!(quiz.submit(), Err(TutorError::NoSelection)));
        assert!(!quiz.is_submitted());
    }

    #[test]
    fn test_feedback_serialization() {
        let mut quiz = CaseQuiz::new(sample_case());
        quiz.select("A").unwrap();
        let json = serde_json::to_value(quiz.submit().unwrap()).unwrap();
        assert_eq!(json["correct"], true);
        assert_eq!(json["correctAnswerId"], "A");
    }
}
