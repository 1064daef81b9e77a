use crate::{
    Result,
    configs::Configs,
    experiences::Experiences,
    metrics,
    progress::Progress,
};
use uuid::Uuid;

/// The stages a guest can be routed through, in traversal order. `Welcome`
/// is the start screen a broken deep link falls back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Welcome,
    Pregate,
    Main,
    Preshare,
    Share,
}

/// Query parameters carried across a stage transition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageParams {
    /// The experience the target stage should run.
    pub experience_id: Option<Uuid>,
    /// The originally requested experience, carried through a pregate detour
    /// so the guest lands back where they were headed.
    pub return_to: Option<Uuid>,
    /// The main session id, threaded through preshare and share for linking.
    pub main_session_id: Option<Uuid>,
}

/// A routing decision. `Replace` navigations use history-replacing semantics
/// by construction: a completed or bypassed stage must not be reachable via
/// the back button, since its session may be stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Navigation {
    /// The requested stage is valid; render it.
    Proceed,
    /// Navigate (replace, not push) to another stage.
    Replace { stage: Stage, params: StageParams },
}

impl Navigation {
    fn replace(stage: Stage, params: StageParams) -> Self {
        metrics::record_flow_redirect();
        Navigation::Replace { stage, params }
    }
}

/// Decision engine sequencing pregate → main → preshare → share from the
/// published configuration, the experience catalog, and guest progress.
///
/// The router only decides; executing a navigation (and creating the target
/// stage's session) is the caller's side of the seam. Completion writes are
/// awaited before any navigation value is produced, so a failed write keeps
/// the guest on the current stage with a retry affordance.
#[derive(Clone)]
pub struct FlowRouter {
    configs: Configs,
    experiences: Experiences,
    progress: Progress,
}

impl FlowRouter {
    pub(crate) fn new(configs: Configs, experiences: Experiences, progress: Progress) -> Self {
        Self {
            configs,
            experiences,
            progress,
        }
    }

    /// A guest is entering the main stage directly. If the published
    /// configuration designates a pregate experience the guest has not
    /// completed, detour there first, remembering where they were headed.
    pub async fn resolve_main_entry(
        &self,
        event_id: Uuid,
        guest_id: Uuid,
        requested_experience: Uuid,
    ) -> Result<Navigation> {
        let Some(config) = self.configs.published(&event_id).await? else {
            return Ok(Navigation::Proceed);
        };
        let Some(pregate) = config.pregate_experience_id else {
            return Ok(Navigation::Proceed);
        };
        if self
            .progress
            .is_complete(&event_id, &guest_id, &pregate)
            .await?
        {
            return Ok(Navigation::Proceed);
        }

        Ok(Navigation::replace(
            Stage::Pregate,
            StageParams {
                experience_id: Some(pregate),
                return_to: Some(requested_experience),
                main_session_id: None,
            },
        ))
    }

    /// The guest finished the main experience. The completion write commits
    /// before any navigation is decided; a write failure propagates and the
    /// caller stays put.
    pub async fn complete_main(
        &self,
        event_id: Uuid,
        guest_id: Uuid,
        experience_id: Uuid,
        main_session_id: Uuid,
    ) -> Result<Navigation> {
        self.progress
            .mark_complete(&event_id, &guest_id, &experience_id)
            .await?;

        match self.preshare_target(event_id).await? {
            Some(preshare) => Ok(Navigation::replace(
                Stage::Preshare,
                StageParams {
                    experience_id: Some(preshare),
                    return_to: None,
                    main_session_id: Some(main_session_id),
                },
            )),
            None => Ok(Navigation::replace(
                Stage::Share,
                StageParams {
                    experience_id: None,
                    return_to: None,
                    main_session_id: Some(main_session_id),
                },
            )),
        }
    }

    /// Entry guard for the preshare stage. A missing main session id is an
    /// invalid deep link and goes back to the welcome screen; a misconfigured
    /// preshare skips straight to share, carrying the main session forward.
    pub async fn resolve_preshare_entry(
        &self,
        event_id: Uuid,
        main_session_id: Option<Uuid>,
    ) -> Result<Navigation> {
        let Some(main_session_id) = main_session_id else {
            tracing::warn!(event_id = %event_id, "preshare entered without a main session id");
            return Ok(Navigation::replace(Stage::Welcome, StageParams::default()));
        };

        match self.preshare_target(event_id).await? {
            Some(_) => Ok(Navigation::Proceed),
            None => Ok(Navigation::replace(
                Stage::Share,
                StageParams {
                    experience_id: None,
                    return_to: None,
                    main_session_id: Some(main_session_id),
                },
            )),
        }
    }

    /// The guest finished the preshare experience; mark it and move to share.
    pub async fn complete_preshare(
        &self,
        event_id: Uuid,
        guest_id: Uuid,
        experience_id: Uuid,
        main_session_id: Uuid,
    ) -> Result<Navigation> {
        self.progress
            .mark_complete(&event_id, &guest_id, &experience_id)
            .await?;

        Ok(Navigation::replace(
            Stage::Share,
            StageParams {
                experience_id: None,
                return_to: None,
                main_session_id: Some(main_session_id),
            },
        ))
    }

    /// The preshare experience to run, or `None` when the stage should be
    /// skipped: not configured, the referenced experience is gone from the
    /// catalog, or it has zero steps. Misconfigurations are logged and
    /// non-blocking.
    async fn preshare_target(&self, event_id: Uuid) -> Result<Option<Uuid>> {
        let Some(config) = self.configs.published(&event_id).await? else {
            return Ok(None);
        };
        let Some(preshare) = config.preshare_experience_id else {
            return Ok(None);
        };

        match self.experiences.step_count(&preshare).await? {
            None => {
                tracing::warn!(
                    event_id = %event_id,
                    experience_id = %preshare,
                    "preshare experience missing from catalog; skipping to share",
                );
                Ok(None)
            }
            Some(0) => {
                tracing::warn!(
                    event_id = %event_id,
                    experience_id = %preshare,
                    "preshare experience has no steps; skipping to share",
                );
                Ok(None)
            }
            Some(_) => Ok(Some(preshare)),
        }
    }
}
