//! Expert advice on the current ventilator settings.

use std::sync::Arc;
use std::time::Duration;

use niv_llm::{GenerationRequest, TextGenerator};
use niv_waveform::{Profile, Settings};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::debounce::Debouncer;
use crate::error::Result;
use crate::request_state::RequestState;

const SYSTEM_INSTRUCTION: &str = "Tu es un expert en pneumologie et un formateur clinique. Fournis une analyse experte, brève et actionnable sur les réglages de ventilation non invasive. La réponse doit être exclusivement en Français et formatée en Markdown.";

/// Returned instead of advice when no API key is configured.
pub const UNAVAILABLE_MESSAGE: &str = "Désolé, le service de conseil expert n'est pas disponible actuellement. La clé API Gemini n'est pas configurée. Veuillez consulter les sections du guide pour obtenir des informations sur la VNI.";

/// Shown in the panel when fetching advice fails.
pub const ADVICE_ERROR_MESSAGE: &str =
    "Impossible d'obtenir le conseil de l'expert. Veuillez réessayer plus tard.";

/// French label of a patient profile.
#[must_use]
pub const fn profile_label(profile: Profile) -> &'static str {
    match profile {
        Profile::Normal => "Normal",
        Profile::Obstructive => "Obstructif (type BPCO)",
        Profile::Restrictive => "Restrictif",
    }
}

/// Prompt describing `settings` to the model.
#[must_use]
pub fn advice_prompt(settings: &Settings) -> String {
    format!(
        "Analyse ces réglages de VNI pour un patient au profil '{}' : PEP={} cmH₂O, Aide Inspiratoire={} cmH₂O, Fréquence={}/min, Pente={}ms. Sont-ils optimaux ? Identifie les risques (ex: auto-PEEP, inconfort) et donne un conseil concis et pédagogique. Formatte ta réponse en Markdown simple avec des titres, des listes à puces, et du gras pour une meilleure lisibilité.",
        profile_label(settings.profile),
        settings.peep,
        settings.pressure_support,
        settings.respiratory_rate,
        settings.rise_time_ms,
    )
}

/// Asks the model for an opinion on a set of settings.
#[derive(Clone)]
pub struct AdviceService {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl AdviceService {
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

    /// Returns Markdown advice for `settings`.
    ///
    /// Without a generator this returns [`UNAVAILABLE_MESSAGE`] rather than
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::Llm` if the model call fails.
    #[instrument(skip(self), fields(profile = %settings.profile))]
    pub async fn advise(&self, settings: &Settings) -> Result<String> {
        let Some(generator) = &self.generator else {
            debug!("No generator configured, returning degraded-mode message");
            return Ok(UNAVAILABLE_MESSAGE.to_string());
        };

        let request = GenerationRequest::prompt(SYSTEM_INSTRUCTION, advice_prompt(settings));
        let advice = generator.generate(&request).await?.trim().to_string();
        info!(chars = advice.len(), "Expert advice received");
        Ok(advice)
    }
}

impl std::fmt::Debug for AdviceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdviceService")
            .field("available", &self.is_available())
            .finish()
    }
}

/// Keeps advice in step with settings that change in bursts.
///
/// Every change puts the panel in `Loading` at once; the fetch itself only
/// starts after the debounce delay, and a newer change supersedes it.
#[derive(Debug)]
pub struct AdvicePanel {
    service: AdviceService,
    debouncer: Debouncer,
    state: Arc<watch::Sender<RequestState<String>>>,
}

impl AdvicePanel {
    /// Creates an idle panel.
    #[must_use]
    pub fn new(service: AdviceService, delay: Duration) -> Self {
        let (sender, _) = watch::channel(RequestState::Idle);
        Self {
            service,
            debouncer: Debouncer::new(delay),
            state: Arc::new(sender),
        }
    }

    /// Records a settings change and schedules a fresh fetch.
    ///
    /// Must be called from within a tokio runtime.
    pub fn settings_changed(&self, settings: Settings) {
        self.state.send_modify(RequestState::begin);

        let service = self.service.clone();
        let state = Arc::clone(&self.state);
        self.debouncer.call(async move {
            let outcome = service.advise(&settings).await;
            state.send_modify(|current| {
                let transition = match outcome {
                    Ok(advice) => current.succeed(advice),
                    Err(e) => {
                        warn!(error = %e, "Expert advice failed");
                        current.fail(ADVICE_ERROR_MESSAGE)
                    }
                };
                if let Err(e) = transition {
                    warn!(error = %e, "Dropping stale advice");
                }
            });
        });
    }

    /// Current panel state.
    #[must_use]
    pub fn state(&self) -> RequestState<String> {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RequestState<String>> {
        self.state.subscribe()
    }

    /// Drops any pending fetch and returns to idle.
    pub fn reset(&self) {
        self.debouncer.cancel();
        self.state.send_modify(RequestState::reset);
    }
}
