//! Delivers scale commands to the fleet manager

use crate::error::ActuationError;
use crate::fetch::FleetManager;
use std::sync::Arc;
use tracing::info;

/// Sends scale-up commands; failures are returned, never retried here
#[derive(Clone)]
pub struct Actuator {
    fleet: Arc<dyn FleetManager>,
    dry_run: bool,
}

impl Actuator {
    pub fn new(fleet: Arc<dyn FleetManager>) -> Self {
        Self {
            fleet,
            dry_run: false,
        }
    }

    /// Log decisions instead of sending them
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Ask the fleet manager to run `target` instances of `app_id`
    pub async fn apply(&self, app_id: &str, target: u32) -> Result<(), ActuationError> {
        if self.dry_run {
            info!(app_id = %app_id, target, "Dry run, scale command not sent");
            return Ok(());
        }

        self.fleet
            .apply_scale(app_id, target)
            .await
            .map_err(|source| ActuationError {
                app_id: app_id.to_string(),
                target,
                source,
            })
    }
}
