// src/service/fixture.rs
//! In-memory service for tests and offline runs. Every call is logged.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use serde_json::Value;

use super::InteractionService;
use crate::model::{ContactId, InteractionRecord, InteractionType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Contacts {
        interaction_type: InteractionType,
        start_time: Option<String>,
        end_time: Option<String>,
    },
    Recordings {
        contact_ids: Vec<ContactId>,
    },
}

#[derive(Default)]
pub struct FixtureService {
    /// Keyed by the `yyyy-mm-dd` prefix of `start_time`; `None` answers unbounded calls.
    contacts: BTreeMap<(InteractionType, Option<String>), Vec<Value>>,
    recordings: BTreeMap<ContactId, Value>,
    withheld: HashSet<ContactId>,
    pub calls: Mutex<Vec<ServiceCall>>,
}

impl FixtureService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contacts answered for a window starting on `day` (`yyyy-mm-dd`), or for
    /// unbounded calls when `day` is `None`.
    pub fn with_contacts(
        mut self,
        interaction_type: InteractionType,
        day: Option<&str>,
        payloads: Vec<Value>,
    ) -> Self {
        self.contacts
            .insert((interaction_type, day.map(str::to_string)), payloads);
        self
    }

    pub fn with_recording(mut self, contact_id: ContactId, payload: Value) -> Self {
        self.recordings.insert(contact_id, payload);
        self
    }

    /// Simulate an upstream gap: this id is never returned.
    pub fn withhold(mut self, contact_id: ContactId) -> Self {
        self.withheld.insert(contact_id);
        self
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn log(&self, call: ServiceCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait::async_trait]
impl InteractionService for FixtureService {
    async fn get_contacts(
        &self,
        interaction_type: InteractionType,
        start_time: Option<&str>,
        end_time: Option<&str>,
    ) -> Result<Vec<InteractionRecord>> {
        self.log(ServiceCall::Contacts {
            interaction_type,
            start_time: start_time.map(str::to_string),
            end_time: end_time.map(str::to_string),
        });
        let day = start_time.map(|s| s.chars().take(10).collect::<String>());
        Ok(self
            .contacts
            .get(&(interaction_type, day))
            .map(|payloads| {
                payloads
                    .iter()
                    .map(|p| InteractionRecord::new(interaction_type, p.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_recordings(&self, contact_ids: &[ContactId]) -> Result<Vec<InteractionRecord>> {
        self.log(ServiceCall::Recordings {
            contact_ids: contact_ids.to_vec(),
        });
        Ok(contact_ids
            .iter()
            .filter(|id| !self.withheld.contains(id))
            .filter_map(|id| self.recordings.get(id))
            .map(|p| InteractionRecord::new(InteractionType::Im, p.clone()))
            .collect())
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn answers_by_day_and_logs_calls() {
        let svc = FixtureService::new()
            .with_contacts(InteractionType::Im, Some("2019-01-01"), vec![json!({"ContactID": 1})])
            .with_recording(1, json!({"Value": {"ContactID": 1}}))
            .withhold(2);
        let c = svc
            .get_contacts(
                InteractionType::Im,
                Some("2019-01-01T00:00:00.000000"),
                Some("2019-01-01T23:59:59.999000"),
            )
            .await
            .unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].interaction_id, Some(1));

        let r = svc.get_recordings(&[1, 2]).await.unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(svc.calls().len(), 2);
    }
}
