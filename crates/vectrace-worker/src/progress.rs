//! Event fan-out and per-run progress bookkeeping.

use std::fmt;

use crossbeam_channel::Sender;

use crate::event::{EventKind, TaskEvent, TaskKind};
use crate::orchestrator::Shared;

/// Why a task run did not produce output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskError {
    /// The stop flag was seen at a poll point.
    Cancelled,
    Failed { message: String, detail: String },
}

impl TaskError {
    pub(crate) fn failed(message: &str, cause: &dyn fmt::Display) -> Self {
        Self::Failed {
            message: message.to_owned(),
            detail: cause.to_string(),
        }
    }
}

/// Send `event` to every listener, forgetting the ones that hung up.
pub(crate) fn broadcast(listeners: &mut Vec<Sender<TaskEvent>>, event: &TaskEvent) {
    listeners.retain(|tx| tx.send(event.clone()).is_ok());
}

/// Emits the non-terminal events of one task run.
///
/// Percentages never go backwards: a lower value than the last one
/// reported is raised to it.
pub(crate) struct Reporter<'a> {
    shared: &'a Shared,
    task: TaskKind,
    last: u8,
}

impl<'a> Reporter<'a> {
    pub(crate) const fn new(shared: &'a Shared, task: TaskKind) -> Self {
        Self {
            shared,
            task,
            last: 0,
        }
    }

    pub(crate) fn emit(&self, kind: EventKind) {
        self.shared.emit(&TaskEvent {
            task: self.task,
            kind,
        });
    }

    pub(crate) fn started(&self) {
        tracing::debug!(task = %self.task, "task started");
        self.emit(EventKind::Started);
    }

    pub(crate) fn progress(&mut self, percent: u8, message: &str) {
        let percent = percent.min(100).max(self.last);
        self.last = percent;
        tracing::debug!(task = %self.task, percent, message, "progress");
        self.emit(EventKind::Progress {
            percent,
            message: message.to_owned(),
        });
    }

    /// Poll the stop flag.
    pub(crate) fn checkpoint(&self) -> Result<(), TaskError> {
        if self.shared.stop_requested() {
            tracing::info!(task = %self.task, percent = self.last, "stop requested");
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Poll the stop flag, then report the stage about to run.
    pub(crate) fn stage(&mut self, percent: u8, message: &str) -> Result<(), TaskError> {
        self.checkpoint()?;
        self.progress(percent, message);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) const fn last(&self) -> u8 {
        self.last
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn progress_is_monotonic_and_capped() {
        let shared = Shared::default();
        let (tx, rx) = unbounded();
        shared.subscribe(tx);

        let mut rep = Reporter::new(&shared, TaskKind::Segment);
        rep.progress(30, "a");
        rep.progress(10, "b");
        rep.progress(200, "c");
        assert_eq!(rep.last(), 100);

        let percents: Vec<u8> = rx
            .try_iter()
            .filter_map(|e| match e.kind {
                EventKind::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![30, 30, 100]);
    }

    #[test]
    fn dropped_listeners_are_forgotten() {
        let (tx1, rx1) = unbounded();
        let (tx2, rx2) = unbounded();
        let mut listeners = vec![tx1, tx2];
        drop(rx2);
        let event = TaskEvent {
            task: TaskKind::Export,
            kind: EventKind::Started,
        };
        broadcast(&mut listeners, &event);
        assert_eq!(listeners.len(), 1);
        assert!(matches!(rx1.try_recv().unwrap().kind, EventKind::Started));
    }

    #[test]
    fn checkpoint_sees_the_stop_flag() {
        let shared = Shared::default();
        let mut rep = Reporter::new(&shared, TaskKind::LoadModel);
        assert!(rep.stage(10, "checking").is_ok());
        shared.request_stop();
        assert_eq!(rep.stage(30, "next"), Err(TaskError::Cancelled));
        assert_eq!(rep.last(), 10);
    }

    #[test]
    fn failure_keeps_message_and_detail_apart() {
        let cause = std::io::Error::other("disk on fire");
        let e = TaskError::failed("could not save drawing", &cause);
        assert_eq!(
            e,
            TaskError::Failed {
                message: "could not save drawing".into(),
                detail: "disk on fire".into()
            }
        );
    }
}
