//! Entry point for the external evaluation harness.

use crate::config::Settings;
use crate::crew::Crew;
use crate::error::Result;
use async_trait::async_trait;
use tracing::{info, instrument};

/// Answers one prompt per call.
#[async_trait]
pub trait Submission: Send + Sync {
    async fn run(&self, prompt: &str) -> Result<String>;
}

/// Submission backed by the full crew.
pub struct CrewSubmission {
    crew: Crew,
    call_id: String,
}

impl CrewSubmission {
    pub fn new(crew: Crew, call_id: &str) -> Self {
        Self {
            crew: crew.with_call_id(call_id),
            call_id: call_id.to_string(),
        }
    }
}

#[async_trait]
impl Submission for CrewSubmission {
    #[instrument(skip(self, prompt), fields(call_id = %self.call_id))]
    async fn run(&self, prompt: &str) -> Result<String> {
        let output = self.crew.kickoff(prompt).await?;
        info!("Run {} answered", output.run_id);
        Ok(output.raw)
    }
}

/// Build a submission from `.env`, the settings file and the environment.
///
/// `call_id` is attached to the tracing span of every run and sent as the
/// end-user id of each chat request.
pub fn create_submission(call_id: &str) -> Result<Box<dyn Submission>> {
    dotenv::dotenv().ok();
    let settings = Settings::load()?;
    let crew = Crew::from_settings(&settings)?;
    Ok(Box::new(CrewSubmission::new(crew, call_id)))
}
