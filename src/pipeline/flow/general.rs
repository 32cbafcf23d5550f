//! Controller for stages with several input groups.
//!
//! Groups are evaluated in ascending id order and the first one that can
//! process becomes the active group; at most one round is exposed per call.
//! A lower group may run ahead of a higher one, so a group that is not yet
//! complete never blocks the others. Stop, pause, resume and reconfiguration
//! tags are barriers: a group that consumed one waits until every unfinished
//! group has consumed the same tag.

use super::group::{GroupDecision, SocketGroup};
use super::{FlowState, SyncEvent, SyncListener};
use crate::pipeline::error::{PipelineError, PipelineResult};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Barrier {
    Pause,
    Resume,
    Reconfigure(Arc<str>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Active,
    Waiting(Barrier),
    Finished,
}

pub struct GeneralController {
    groups: Vec<SocketGroup>,
    phases: Vec<Phase>,
    active: i32,
}

impl GeneralController {
    pub(crate) fn new(stage: &str, mut groups: Vec<SocketGroup>) -> Self {
        // Ascending order is the whole precedence rule: scanning lowest id first
        // lets lower groups run ahead without waiting on higher ones.
        groups.sort_by_key(|g| g.id);
        tracing::debug!(
            "{}: general controller over groups {:?}",
            stage,
            groups.iter().map(|g| g.id).collect::<Vec<_>>()
        );
        let active = groups.first().map(|g| g.id).unwrap_or(0);
        Self {
            phases: vec![Phase::Active; groups.len()],
            groups,
            active,
        }
    }

    pub(crate) fn groups(&self) -> &[SocketGroup] {
        &self.groups
    }

    pub fn active_group(&self) -> i32 {
        self.active
    }

    pub fn prepare_process(
        &mut self,
        stage: &str,
        listener: &dyn SyncListener,
    ) -> PipelineResult<FlowState> {
        for index in 0..self.groups.len() {
            if self.phases[index] != Phase::Active {
                continue;
            }
            let group = &self.groups[index];
            match group.decide(stage)? {
                GroupDecision::Incomplete => {}
                GroupDecision::Process => {
                    group.advance_all();
                    self.active = group.id;
                    return Ok(FlowState::Processable);
                }
                GroupDecision::Sync(kind) => {
                    group.advance_all();
                    group.forward(&kind.tag())?;
                    listener.sync_event(SyncEvent {
                        kind,
                        group_id: group.id,
                    })?;
                    return Ok(FlowState::Synchronized);
                }
                GroupDecision::Stop => {
                    group.advance_all();
                    tracing::debug!("{}: group {} finished", stage, group.id);
                    self.phases[index] = Phase::Finished;
                }
                GroupDecision::Pause => {
                    group.advance_all();
                    self.phases[index] = Phase::Waiting(Barrier::Pause);
                }
                GroupDecision::Resume => {
                    group.advance_all();
                    self.phases[index] = Phase::Waiting(Barrier::Resume);
                }
                GroupDecision::Reconfigure(name) => {
                    group.advance_all();
                    self.phases[index] = Phase::Waiting(Barrier::Reconfigure(name));
                }
            }
        }
        self.settle(stage)
    }

    /// Complete a barrier once every unfinished group has reached it.
    fn settle(&mut self, stage: &str) -> PipelineResult<FlowState> {
        if self.phases.iter().all(|p| *p == Phase::Finished) {
            return Ok(FlowState::Finished);
        }

        let mut barrier: Option<&Barrier> = None;
        let mut all_waiting = true;
        for (group, phase) in self.groups.iter().zip(&self.phases) {
            match phase {
                Phase::Active => all_waiting = false,
                Phase::Finished => {}
                Phase::Waiting(b) => match barrier {
                    None => barrier = Some(b),
                    Some(seen) if seen == b => {}
                    Some(seen) => {
                        return Err(PipelineError::Synchronization {
                            stage: stage.to_string(),
                            group: group.id,
                            found: format!("{:?} while other groups wait for {:?}", b, seen),
                        });
                    }
                },
            }
        }

        let Some(barrier) = barrier.cloned() else {
            return Ok(FlowState::Incomplete);
        };
        if !all_waiting {
            return Ok(FlowState::Incomplete);
        }
        for phase in self.phases.iter_mut() {
            if matches!(phase, Phase::Waiting(_)) {
                *phase = Phase::Active;
            }
        }
        Ok(match barrier {
            Barrier::Pause => FlowState::Paused,
            Barrier::Resume => FlowState::Resumed,
            Barrier::Reconfigure(name) => FlowState::Reconfigurable(name),
        })
    }
}
