//! Dataset registry seen by the pipeline.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use magsurvey_io::{Dataset, DatasetId, DatasetState};
use tracing::debug;

use crate::error::PipelineError;

/// Lookup and lifecycle updates for datasets.
///
/// State changes go through [`update_state`](DatasetStore::update_state),
/// which must reject illegal transitions.
pub trait DatasetStore: Send + Sync {
    /// Return a snapshot of the dataset.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DatasetNotFound`] for an unknown id.
    fn get(&self, id: &DatasetId) -> Result<Dataset, PipelineError>;

    /// Advance the dataset to `state` and return the resulting state.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`PipelineError::DatasetNotFound`] | Unknown id |
    /// | [`PipelineError::Io`] | The transition is not allowed |
    fn update_state(&self, id: &DatasetId, state: DatasetState)
    -> Result<DatasetState, PipelineError>;

    /// Add or replace a tag.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DatasetNotFound`] for an unknown id.
    fn set_tag(&self, id: &DatasetId, key: &str, value: &str) -> Result<(), PipelineError>;
}

/// A [`DatasetStore`] held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDatasetStore {
    datasets: Mutex<BTreeMap<DatasetId, Dataset>>,
}

impl InMemoryDatasetStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a dataset.
    pub fn insert(&self, dataset: Dataset) {
        self.lock().insert(dataset.id().clone(), dataset);
    }

    /// Return every dataset, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<Dataset> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<DatasetId, Dataset>> {
        self.datasets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FromIterator<Dataset> for InMemoryDatasetStore {
    fn from_iter<I: IntoIterator<Item = Dataset>>(iter: I) -> Self {
        let store = Self::new();
        for dataset in iter {
            store.insert(dataset);
        }
        store
    }
}

fn not_found(id: &DatasetId) -> PipelineError {
    PipelineError::DatasetNotFound { id: id.clone() }
}

impl DatasetStore for InMemoryDatasetStore {
    fn get(&self, id: &DatasetId) -> Result<Dataset, PipelineError> {
        self.lock().get(id).cloned().ok_or_else(|| not_found(id))
    }

    fn update_state(
        &self,
        id: &DatasetId,
        state: DatasetState,
    ) -> Result<DatasetState, PipelineError> {
        let mut datasets = self.lock();
        let dataset = datasets.get_mut(id).ok_or_else(|| not_found(id))?;
        let from = dataset.state();
        let to = dataset.advance(state)?;
        debug!(%id, %from, %to, "dataset state updated");
        Ok(to)
    }

    fn set_tag(&self, id: &DatasetId, key: &str, value: &str) -> Result<(), PipelineError> {
        let mut datasets = self.lock();
        let dataset = datasets.get_mut(id).ok_or_else(|| not_found(id))?;
        dataset.set_tag(key, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magsurvey_io::{DatasetType, IoError};
    use std::path::Path;

    fn store() -> InMemoryDatasetStore {
        [Dataset::new(DatasetId::new("s"), Path::new("s.csv"), DatasetType::SurveyData)
            .with_state(DatasetState::Linked)]
        .into_iter()
        .collect()
    }

    #[test]
    fn unknown_id_is_not_found() {
        let store = store();
        let missing = DatasetId::new("nope");
        assert!(matches!(store.get(&missing), Err(PipelineError::DatasetNotFound { .. })));
        assert!(store.set_tag(&missing, "k", "v").is_err());
    }

    #[test]
    fn state_updates_are_validated() {
        let store = store();
        let id = DatasetId::new("s");
        assert_eq!(
            store.update_state(&id, DatasetState::DiurnallyCorrected).unwrap(),
            DatasetState::DiurnallyCorrected
        );
        // skipping residuals is not allowed
        assert!(matches!(
            store.update_state(&id, DatasetState::Interpolated),
            Err(PipelineError::Io(IoError::InvalidTransition { .. }))
        ));
        assert_eq!(store.get(&id).unwrap().state(), DatasetState::DiurnallyCorrected);
        // re-running an earlier stage keeps the state
        assert_eq!(
            store.update_state(&id, DatasetState::DiurnallyCorrected).unwrap(),
            DatasetState::DiurnallyCorrected
        );
    }

    #[test]
    fn tags_are_stored() {
        let store = store();
        let id = DatasetId::new("s");
        store.set_tag(&id, "Observation Dates", "06/01/2023 - 06/01/2023").unwrap();
        assert_eq!(
            store.get(&id).unwrap().observation_dates(),
            Some("06/01/2023 - 06/01/2023")
        );
        assert_eq!(store.list().len(), 1);
    }
}
