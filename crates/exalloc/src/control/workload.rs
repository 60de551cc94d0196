use crate::common::ids::{ProfileId, StageAttemptId, StageId};
use crate::control::intake::LocalityHints;
use crate::{Map, Set};

/// Bookkeeping for one attempt at executing a stage.
///
/// An attempt whose stage has finished is kept around as a *zombie* while any
/// of its tasks are still running; zombie tasks keep occupying executors and
/// therefore still count into the executor demand.
struct StageAttempt {
    profile: ProfileId,
    not_started: Set<u32>,
    running: Set<u32>,
    running_speculative: u32,
    pending_speculative: u32,
    zombie: bool,
    locality: LocalityHints,
}

impl StageAttempt {
    fn new(profile: ProfileId, task_count: u32, locality: LocalityHints) -> Self {
        Self {
            profile,
            not_started: (0..task_count).collect(),
            running: Set::default(),
            running_speculative: 0,
            pending_speculative: 0,
            zombie: false,
            locality,
        }
    }

    fn pending_task_count(&self) -> u64 {
        self.not_started.len() as u64 + self.pending_speculative as u64
    }

    fn running_task_count(&self) -> u64 {
        self.running.len() as u64 + self.running_speculative as u64
    }

    /// Zombies without running work have nothing left to account for.
    fn is_finished(&self) -> bool {
        self.zombie && self.running_task_count() == 0
    }

    fn make_zombie(&mut self) {
        self.zombie = true;
        self.not_started.clear();
        self.pending_speculative = 0;
    }
}

/// Tracks the scheduler-side workload: which stage attempts exist, which of
/// their tasks have not started yet, and which are running where.
#[derive(Default)]
pub struct WorkloadTracker {
    attempts: Map<StageAttemptId, StageAttempt>,
}

impl WorkloadTracker {
    pub fn stage_submitted(
        &mut self,
        id: StageAttemptId,
        profile: ProfileId,
        task_count: u32,
        locality: LocalityHints,
    ) {
        let attempt = StageAttempt::new(profile, task_count, locality);
        if self.attempts.insert(id, attempt).is_some() {
            log::debug!("Stage attempt {id} was submitted twice, replacing the previous record");
        }
    }

    /// Marks all attempts of the stage as zombies. Attempts with no running
    /// tasks are dropped right away; the rest die once their tasks terminate.
    pub fn stage_completed(&mut self, stage: StageId) {
        for (id, attempt) in self.attempts.iter_mut() {
            if id.stage() == stage && !attempt.zombie {
                attempt.make_zombie();
            }
        }
        self.attempts.retain(|_, attempt| !attempt.is_finished());
    }

    /// Returns false if the attempt is not known.
    pub fn task_started(&mut self, id: StageAttemptId, index: u32, speculative: bool) -> bool {
        let Some(attempt) = self.attempts.get_mut(&id) else {
            return false;
        };
        if speculative {
            attempt.pending_speculative = attempt.pending_speculative.saturating_sub(1);
            attempt.running_speculative += 1;
        } else {
            attempt.not_started.remove(&index);
            attempt.running.insert(index);
        }
        true
    }

    /// Returns false if the attempt is not known. A failed task of a live
    /// attempt is expected to be resubmitted, so its index goes back to the
    /// not-started set.
    pub fn task_ended(
        &mut self,
        id: StageAttemptId,
        index: u32,
        speculative: bool,
        success: bool,
    ) -> bool {
        let Some(attempt) = self.attempts.get_mut(&id) else {
            return false;
        };
        if speculative {
            attempt.running_speculative = attempt.running_speculative.saturating_sub(1);
        } else {
            let was_running = attempt.running.remove(&index);
            if !success && was_running && !attempt.zombie {
                attempt.not_started.insert(index);
            }
        }
        if attempt.is_finished() {
            self.attempts.remove(&id);
        }
        true
    }

    /// Records one more expected speculative copy for the newest live attempt
    /// of the stage. Returns false if the stage has no live attempt.
    pub fn speculative_task_submitted(&mut self, stage: StageId) -> bool {
        let attempt = self
            .attempts
            .iter_mut()
            .filter(|(id, attempt)| id.stage() == stage && !attempt.zombie)
            .max_by_key(|(id, _)| id.attempt());
        match attempt {
            Some((_, attempt)) => {
                attempt.pending_speculative += 1;
                true
            }
            None => false,
        }
    }

    pub fn pending_tasks(&self, profile: ProfileId) -> u64 {
        self.attempts
            .values()
            .filter(|attempt| attempt.profile == profile)
            .map(|attempt| attempt.pending_task_count())
            .sum()
    }

    pub fn running_tasks(&self, profile: ProfileId) -> u64 {
        self.attempts
            .values()
            .filter(|attempt| attempt.profile == profile)
            .map(|attempt| attempt.running_task_count())
            .sum()
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.attempts
            .values()
            .any(|attempt| attempt.pending_task_count() > 0)
    }

    /// Aggregated locality preferences of the live attempts of a profile.
    pub fn locality_summary(&self, profile: ProfileId) -> (u32, Map<String, u32>) {
        let mut task_count = 0;
        let mut host_tasks: Map<String, u32> = Map::default();
        for attempt in self
            .attempts
            .values()
            .filter(|attempt| attempt.profile == profile && !attempt.zombie)
        {
            task_count += attempt.locality.task_count;
            for (host, count) in &attempt.locality.host_tasks {
                *host_tasks.entry(host.clone()).or_default() += count;
            }
        }
        (task_count, host_tasks)
    }

    #[cfg(test)]
    pub(crate) fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::common::ids::StageAttemptId;
    use crate::control::intake::LocalityHints;
    use crate::control::workload::WorkloadTracker;

    const PROFILE: crate::ProfileId = crate::ProfileId::new(0);

    fn attempt(stage: u32, attempt: u32) -> StageAttemptId {
        (stage, attempt).into()
    }

    fn submit(workload: &mut WorkloadTracker, id: StageAttemptId, tasks: u32) {
        workload.stage_submitted(id, PROFILE, tasks, LocalityHints::default());
    }

    #[test]
    fn submitted_tasks_are_pending_until_started() {
        let mut workload = WorkloadTracker::default();
        submit(&mut workload, attempt(1, 0), 3);
        assert_eq!(workload.pending_tasks(PROFILE), 3);
        assert_eq!(workload.running_tasks(PROFILE), 0);

        workload.task_started(attempt(1, 0), 0, false);
        assert_eq!(workload.pending_tasks(PROFILE), 2);
        assert_eq!(workload.running_tasks(PROFILE), 1);
    }

    #[test]
    fn failed_tasks_become_pending_again() {
        let mut workload = WorkloadTracker::default();
        submit(&mut workload, attempt(1, 0), 2);
        workload.task_started(attempt(1, 0), 0, false);
        workload.task_started(attempt(1, 0), 1, false);
        assert_eq!(workload.pending_tasks(PROFILE), 0);

        workload.task_ended(attempt(1, 0), 0, false, false);
        assert_eq!(workload.pending_tasks(PROFILE), 1);
        assert_eq!(workload.running_tasks(PROFILE), 1);

        workload.task_ended(attempt(1, 0), 1, false, true);
        assert_eq!(workload.pending_tasks(PROFILE), 1);
        assert_eq!(workload.running_tasks(PROFILE), 0);
    }

    #[test]
    fn zombie_attempts_keep_running_tasks_only() {
        let mut workload = WorkloadTracker::default();
        submit(&mut workload, attempt(1, 0), 5);
        workload.task_started(attempt(1, 0), 0, false);
        workload.task_started(attempt(1, 0), 1, false);

        workload.stage_completed(1.into());
        assert_eq!(workload.pending_tasks(PROFILE), 0);
        assert_eq!(workload.running_tasks(PROFILE), 2);

        // A zombie task that fails is not resubmitted
        workload.task_ended(attempt(1, 0), 0, false, false);
        assert_eq!(workload.pending_tasks(PROFILE), 0);
        assert_eq!(workload.running_tasks(PROFILE), 1);

        // The attempt is dropped once its last task terminates
        workload.task_ended(attempt(1, 0), 1, false, true);
        assert_eq!(workload.attempt_count(), 0);
    }

    #[test]
    fn completed_stage_without_running_tasks_is_dropped_immediately() {
        let mut workload = WorkloadTracker::default();
        submit(&mut workload, attempt(1, 0), 5);
        workload.stage_completed(1.into());
        assert_eq!(workload.attempt_count(), 0);
    }

    #[test]
    fn speculative_copies_count_as_pending_then_running() {
        let mut workload = WorkloadTracker::default();
        submit(&mut workload, attempt(1, 0), 2);
        workload.task_started(attempt(1, 0), 0, false);
        workload.task_started(attempt(1, 0), 1, false);

        assert!(workload.speculative_task_submitted(1.into()));
        assert_eq!(workload.pending_tasks(PROFILE), 1);

        workload.task_started(attempt(1, 0), 1, true);
        assert_eq!(workload.pending_tasks(PROFILE), 0);
        assert_eq!(workload.running_tasks(PROFILE), 3);

        workload.task_ended(attempt(1, 0), 1, true, false);
        assert_eq!(workload.running_tasks(PROFILE), 2);
    }

    #[test]
    fn speculation_on_unknown_stage_is_rejected() {
        let mut workload = WorkloadTracker::default();
        assert!(!workload.speculative_task_submitted(9.into()));
    }

    #[test]
    fn events_for_unknown_attempts_are_ignored() {
        let mut workload = WorkloadTracker::default();
        assert!(!workload.task_started(attempt(1, 0), 0, false));
        assert!(!workload.task_ended(attempt(1, 0), 0, false, true));
    }

    #[test]
    fn new_attempt_runs_next_to_zombie_tasks() {
        let mut workload = WorkloadTracker::default();
        submit(&mut workload, attempt(1, 0), 5);
        workload.task_started(attempt(1, 0), 0, false);
        workload.task_started(attempt(1, 0), 1, false);
        workload.stage_completed(1.into());

        submit(&mut workload, attempt(1, 1), 5);
        workload.task_started(attempt(1, 1), 0, false);

        assert_eq!(workload.pending_tasks(PROFILE), 4);
        assert_eq!(workload.running_tasks(PROFILE), 3);
    }
}
