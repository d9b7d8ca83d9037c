use std::sync::{Arc, Mutex};

/// Live progress of a campaign, shareable with whatever displays it.
#[derive(Clone, Default)]
pub struct CampaignStatus {
    inner: Arc<Mutex<CampaignStatusData>>,
}

#[derive(Default)]
struct CampaignStatusData {
    phase: String,
    total_trials: usize,
    dispatched_trials: usize,
    completed_trials: usize,
    failed_trials: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CampaignStatusSnapshot {
    pub phase: String,
    pub total_trials: usize,
    pub dispatched_trials: usize,
    pub completed_trials: usize,
    pub failed_trials: usize,
}

impl CampaignStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CampaignStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn start(&self, total_trials: usize) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_trials = total_trials;
            data.dispatched_trials = 0;
            data.completed_trials = 0;
            data.failed_trials = 0;
        }
    }

    pub fn record_dispatch(&self) {
        if let Ok(mut data) = self.inner.lock() {
            data.dispatched_trials += 1;
        }
    }

    pub fn record_outcome(&self, succeeded: bool) {
        if let Ok(mut data) = self.inner.lock() {
            if succeeded {
                data.completed_trials += 1;
            } else {
                data.failed_trials += 1;
            }
        }
    }

    pub fn snapshot(&self) -> CampaignStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            CampaignStatusSnapshot {
                phase: data.phase.clone(),
                total_trials: data.total_trials,
                dispatched_trials: data.dispatched_trials,
                completed_trials: data.completed_trials,
                failed_trials: data.failed_trials,
            }
        } else {
            CampaignStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_trials: 0,
                dispatched_trials: 0,
                completed_trials: 0,
                failed_trials: 0,
            }
        }
    }
}
