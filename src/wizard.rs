//! Step-by-step execution of a checksheet.
//!
//! [`Wizard`] walks the ordered checkpoints one at a time, collecting one
//! answer per checkpoint, and finally produces the body for
//! `POST /api/results`. It holds no I/O: uploads and submission are done by
//! the caller, and a failed submission leaves the wizard untouched so it can
//! be retried.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use uuid::Uuid;

use crate::fields::FieldConfig;
use crate::models::Checkpoint;
use crate::status::ResultStatus;
use crate::submission::{CreateResultRequest, ResponseInput};

#[derive(Debug, Clone, PartialEq)]
pub struct WizardCheckpoint {
    pub id: Uuid,
    pub title: String,
    pub is_required: bool,
    pub field: FieldConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardState {
    /// Showing the checkpoint at this index.
    Step(usize),
    /// Past the last checkpoint; the summary is shown on the last screen.
    Review,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WizardError {
    #[error("required checkpoints are unanswered: {positions:?}")]
    MissingRequired { positions: Vec<usize> },
    #[error("invalid value for checkpoint {position}: {message}")]
    InvalidValue { position: usize, message: String },
    #[error("unknown checkpoint {0}")]
    UnknownCheckpoint(Uuid),
    #[error("already at the first checkpoint")]
    AtFirstCheckpoint,
    #[error("no checkpoint on screen")]
    NoCheckpoint,
    #[error("checkpoint {0} is stored with an invalid configuration")]
    InvalidCheckpoint(Uuid),
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Answer {
    value: String,
    note: Option<String>,
    photo_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Wizard {
    checksheet_id: Uuid,
    checkpoints: Vec<WizardCheckpoint>,
    answers: HashMap<Uuid, Answer>,
    state: WizardState,
    location: Option<String>,
    notes: Option<String>,
    gps: Option<(f64, f64)>,
}

impl Wizard {
    /// `checkpoints` must already be in execution order.
    pub fn new(checksheet_id: Uuid, checkpoints: Vec<WizardCheckpoint>) -> Self {
        let state = if checkpoints.is_empty() {
            WizardState::Review
        } else {
            WizardState::Step(0)
        };
        Self {
            checksheet_id,
            checkpoints,
            answers: HashMap::new(),
            state,
            location: None,
            notes: None,
            gps: None,
        }
    }

    /// Builds a wizard from stored checkpoint rows, ordering them by position.
    pub fn from_checkpoints(
        checksheet_id: Uuid,
        checkpoints: &[Checkpoint],
    ) -> Result<Self, WizardError> {
        let mut ordered: Vec<&Checkpoint> = checkpoints.iter().collect();
        ordered.sort_by_key(|checkpoint| checkpoint.position);

        let steps = ordered
            .into_iter()
            .map(|checkpoint| {
                let field = FieldConfig::from_stored(&checkpoint.field_type, &checkpoint.config)
                    .map_err(|_| WizardError::InvalidCheckpoint(checkpoint.id))?;
                Ok(WizardCheckpoint {
                    id: checkpoint.id,
                    title: checkpoint.title.clone(),
                    is_required: checkpoint.is_required,
                    field,
                })
            })
            .collect::<Result<Vec<_>, WizardError>>()?;

        Ok(Self::new(checksheet_id, steps))
    }

    pub fn state(&self) -> WizardState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Index of the checkpoint on screen; the review panel shares the last
    /// checkpoint's screen.
    pub fn current_index(&self) -> Option<usize> {
        match self.state {
            WizardState::Step(index) => Some(index),
            WizardState::Review => self.checkpoints.len().checked_sub(1),
        }
    }

    pub fn current(&self) -> Option<&WizardCheckpoint> {
        self.current_index().and_then(|index| self.checkpoints.get(index))
    }

    pub fn value(&self, checkpoint_id: Uuid) -> Option<&str> {
        self.answers
            .get(&checkpoint_id)
            .map(|answer| answer.value.as_str())
            .filter(|value| !value.is_empty())
    }

    /// Percentage of the walk completed, counting the current step.
    pub fn progress_percent(&self) -> u8 {
        let total = self.checkpoints.len();
        if total == 0 {
            return 100;
        }
        let step = self.current_index().map(|index| index + 1).unwrap_or(0);
        ((step as f64 / total as f64) * 100.0).round() as u8
    }

    /// Records an answer for the checkpoint on screen.
    pub fn record(&mut self, value: &str) -> Result<(), WizardError> {
        let checkpoint_id = self
            .current()
            .map(|checkpoint| checkpoint.id)
            .ok_or(WizardError::NoCheckpoint)?;
        self.record_for(checkpoint_id, value)
    }

    /// Records an answer for any checkpoint. An empty value clears it but
    /// keeps any note. Invalid values are rejected and the previous answer is
    /// kept.
    pub fn record_for(&mut self, checkpoint_id: Uuid, value: &str) -> Result<(), WizardError> {
        let (position, checkpoint) = self.find(checkpoint_id)?;

        if value.trim().is_empty() {
            if let Some(answer) = self.answers.get_mut(&checkpoint_id) {
                answer.value.clear();
                answer.photo_url = None;
                if answer.note.is_none() {
                    self.answers.remove(&checkpoint_id);
                }
            }
            return Ok(());
        }

        checkpoint
            .field
            .interpret(value)
            .map_err(|message| WizardError::InvalidValue { position, message })?;

        let answer = self.answers.entry(checkpoint_id).or_default();
        answer.value = value.trim().to_string();
        Ok(())
    }

    pub fn clear(&mut self, checkpoint_id: Uuid) -> Result<(), WizardError> {
        self.find(checkpoint_id)?;
        self.answers.remove(&checkpoint_id);
        Ok(())
    }

    /// Stores the URL returned by the upload endpoint as the answer.
    pub fn record_photo(&mut self, checkpoint_id: Uuid, url: &str) -> Result<(), WizardError> {
        self.record_for(checkpoint_id, url)?;
        if let Some(answer) = self.answers.get_mut(&checkpoint_id) {
            answer.photo_url = Some(url.trim().to_string());
        }
        Ok(())
    }

    /// Attaches a note to a checkpoint, answered or not. Notes on unanswered
    /// checkpoints are submitted without a value.
    pub fn annotate(&mut self, checkpoint_id: Uuid, note: &str) -> Result<(), WizardError> {
        self.find(checkpoint_id)?;
        let note = note.trim();
        match self.answers.get_mut(&checkpoint_id) {
            Some(answer) if note.is_empty() && answer.value.is_empty() => {
                self.answers.remove(&checkpoint_id);
            }
            Some(answer) => answer.note = (!note.is_empty()).then(|| note.to_string()),
            None if !note.is_empty() => {
                self.answers.insert(
                    checkpoint_id,
                    Answer {
                        note: Some(note.to_string()),
                        ..Answer::default()
                    },
                );
            }
            None => {}
        }
        Ok(())
    }

    pub fn set_location(&mut self, location: &str) {
        let location = location.trim();
        self.location = (!location.is_empty()).then(|| location.to_string());
    }

    pub fn set_notes(&mut self, notes: &str) {
        let notes = notes.trim();
        self.notes = (!notes.is_empty()).then(|| notes.to_string());
    }

    pub fn set_gps(&mut self, lat: f64, lng: f64) {
        self.gps = Some((lat, lng));
    }

    /// True when the checkpoint on screen may be left.
    pub fn can_proceed(&self) -> bool {
        match self.current() {
            Some(checkpoint) => !checkpoint.is_required || self.is_answered(checkpoint.id),
            None => true,
        }
    }

    pub fn next(&mut self) -> Result<WizardState, WizardError> {
        let Some(index) = self.current_index() else {
            return Ok(self.state);
        };
        if !self.can_proceed() {
            return Err(WizardError::MissingRequired {
                positions: vec![index],
            });
        }
        self.state = if index + 1 < self.checkpoints.len() {
            WizardState::Step(index + 1)
        } else {
            WizardState::Review
        };
        Ok(self.state)
    }

    pub fn previous(&mut self) -> Result<WizardState, WizardError> {
        match self.current_index() {
            Some(index) if index > 0 => {
                self.state = WizardState::Step(index - 1);
                Ok(self.state)
            }
            _ => Err(WizardError::AtFirstCheckpoint),
        }
    }

    /// Positions of required checkpoints that still lack an answer.
    pub fn missing_required(&self) -> Vec<usize> {
        let answered: HashSet<Uuid> = self
            .checkpoints
            .iter()
            .filter(|checkpoint| self.is_answered(checkpoint.id))
            .map(|checkpoint| checkpoint.id)
            .collect();
        let requirements: Vec<(Uuid, bool)> = self
            .checkpoints
            .iter()
            .map(|checkpoint| (checkpoint.id, checkpoint.is_required))
            .collect();
        missing_required(&requirements, &answered)
    }

    /// Builds the final submission. Does not change the wizard, so a failed
    /// request can simply be retried.
    pub fn submit(&self) -> Result<CreateResultRequest, WizardError> {
        let missing = self.missing_required();
        if !missing.is_empty() {
            return Err(WizardError::MissingRequired { positions: missing });
        }

        let responses = self
            .checkpoints
            .iter()
            .filter_map(|checkpoint| {
                let answer = self.answers.get(&checkpoint.id)?;
                if answer.value.is_empty() && answer.note.is_none() {
                    return None;
                }
                Some(ResponseInput {
                    checkpoint_id: checkpoint.id,
                    value: (!answer.value.is_empty()).then(|| answer.value.clone()),
                    notes: answer.note.clone(),
                    photo_urls: answer.photo_url.iter().cloned().collect(),
                    ..ResponseInput::default()
                })
            })
            .collect();

        Ok(CreateResultRequest {
            checksheet_id: self.checksheet_id,
            status: Some(ResultStatus::Completed),
            location: self.location.clone(),
            notes: self.notes.clone(),
            gps_lat: self.gps.map(|(lat, _)| lat),
            gps_lng: self.gps.map(|(_, lng)| lng),
            responses,
        })
    }

    fn is_answered(&self, checkpoint_id: Uuid) -> bool {
        self.answers
            .get(&checkpoint_id)
            .is_some_and(|answer| !answer.value.is_empty())
    }

    fn find(&self, checkpoint_id: Uuid) -> Result<(usize, &WizardCheckpoint), WizardError> {
        self.checkpoints
            .iter()
            .enumerate()
            .find(|(_, checkpoint)| checkpoint.id == checkpoint_id)
            .ok_or(WizardError::UnknownCheckpoint(checkpoint_id))
    }
}

/// Positions (in `checkpoints` order) of required entries missing from
/// `answered`. Shared by the wizard and the result endpoints.
pub fn missing_required(checkpoints: &[(Uuid, bool)], answered: &HashSet<Uuid>) -> Vec<usize> {
    checkpoints
        .iter()
        .enumerate()
        .filter(|(_, (id, required))| *required && !answered.contains(id))
        .map(|(position, _)| position)
        .collect()
}
