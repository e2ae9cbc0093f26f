use async_trait::async_trait;
use chrono::Utc;
use converge_config::RecorderSettings;
use converge_core::{ConvergeError, CostEstimate, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{error, info, warn};

/// Record name used when no app name was configured or passed in.
pub const DEFAULT_APP_NAME: &str = "default-app";

const FIELD_MANAGER: &str = "converge";
const CREATED_BY: &str = "converge-agent";

/// Store-level failures, kept separate so the recorder's policy (surface vs
/// best-effort) does not depend on client error internals.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cluster API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("cluster unreachable: {0}")]
    Unreachable(String),
}

/// Narrow persistence seam for the run record.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Idempotent put of `record` under `name`. Last write wins.
    async fn apply(
        &self,
        name: &str,
        record: &ConfigMap,
    ) -> std::result::Result<ConfigMap, StoreError>;
}

/// ConfigMap store backed by the cluster API.
pub struct KubeStore {
    api: Api<ConfigMap>,
}

impl KubeStore {
    /// Connects via kubeconfig first, then in-cluster configuration.
    pub async fn connect(namespace: &str) -> std::result::Result<Self, StoreError> {
        let client = Client::try_default()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        Ok(Self {
            api: Api::namespaced(client, namespace),
        })
    }
}

#[async_trait]
impl RecordStore for KubeStore {
    async fn apply(
        &self,
        name: &str,
        record: &ConfigMap,
    ) -> std::result::Result<ConfigMap, StoreError> {
        let params = PatchParams::apply(FIELD_MANAGER).force();

        // The typed struct omits the type identifiers server-side apply
        // requires, so the patch body carries them explicitly.
        let payload = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": &record.metadata,
            "data": &record.data,
        });

        match self.api.patch(name, &params, &Patch::Apply(&payload)).await {
            Ok(applied) => Ok(applied),
            Err(kube::Error::Api(resp)) => Err(StoreError::Api {
                code: resp.code,
                message: resp.message,
            }),
            Err(e) => Err(StoreError::Unreachable(e.to_string())),
        }
    }
}

/// Result of one recording attempt.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    /// The record as the cluster persisted it.
    Persisted(ConfigMap),
    /// The cluster was unavailable; the record was built but not stored.
    Unpersisted(ConfigMap),
}

impl RecordOutcome {
    pub fn record(&self) -> &ConfigMap {
        match self {
            Self::Persisted(record) | Self::Unpersisted(record) => record,
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted(_))
    }
}

/// Writes the per-run audit record (prompt + cost summary) to the cluster.
///
/// Persistence is best-effort: an unreachable cluster downgrades the run to
/// an unpersisted record instead of failing it, while API errors surface to
/// the caller and fail the recording step only.
pub struct Recorder {
    app_name: String,
    settings: RecorderSettings,
}

impl Recorder {
    /// The app name is an explicit parameter resolved by the caller at
    /// startup; the recorder never reads process state.
    pub fn new(app_name: impl Into<String>, settings: RecorderSettings) -> Self {
        Self {
            app_name: app_name.into(),
            settings,
        }
    }

    /// The ConfigMap for this run, not yet persisted.
    pub fn build_record(&self, prompt: &str, estimate: &CostEstimate) -> ConfigMap {
        let labels = BTreeMap::from([
            ("app".to_string(), self.app_name.clone()),
            ("created-by".to_string(), CREATED_BY.to_string()),
        ]);
        let data = BTreeMap::from([
            ("prompt".to_string(), prompt.to_string()),
            ("cost_info".to_string(), estimate.summary()),
            ("app_name".to_string(), self.app_name.clone()),
            ("recorded_at".to_string(), Utc::now().to_rfc3339()),
        ]);

        ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.app_name.clone()),
                namespace: Some(self.settings.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    /// Build and upsert the record for this run.
    pub async fn record_run(&self, prompt: &str, estimate: &CostEstimate) -> Result<RecordOutcome> {
        let record = self.build_record(prompt, estimate);

        match KubeStore::connect(&self.settings.namespace).await {
            Ok(store) => self.record_with(&store, record).await,
            Err(e) => {
                warn!("Cluster client unavailable: {e}; keeping record unpersisted");
                Ok(RecordOutcome::Unpersisted(record))
            }
        }
    }

    /// Upsert through an explicit store; the seam tests exercise.
    pub async fn record_with(
        &self,
        store: &dyn RecordStore,
        record: ConfigMap,
    ) -> Result<RecordOutcome> {
        match store.apply(&self.app_name, &record).await {
            Ok(applied) => {
                info!(
                    "Record '{}' applied in namespace '{}'",
                    self.app_name, self.settings.namespace
                );
                Ok(RecordOutcome::Persisted(applied))
            }
            Err(StoreError::Api { code, message }) => {
                error!(
                    "Failed to apply record '{}' in namespace '{}': {code} {message}",
                    self.app_name, self.settings.namespace
                );
                Err(ConvergeError::RecordError(format!("{code}: {message}")))
            }
            Err(StoreError::Unreachable(reason)) => {
                warn!("Cluster unreachable: {reason}; keeping record unpersisted");
                Ok(RecordOutcome::Unpersisted(record))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn estimate() -> CostEstimate {
        CostEstimate {
            estimated_input_tokens: 100.0,
            estimated_output_tokens: 50.0,
            total_estimated_cost: 0.00105,
            duration_seconds: 2.0,
        }
    }

    fn settings() -> RecorderSettings {
        RecorderSettings {
            namespace: "agents".to_string(),
            app_name: None,
        }
    }

    #[test]
    fn builds_a_complete_record() {
        let recorder = Recorder::new("demo-app", settings());
        let record = recorder.build_record("fix the tests", &estimate());

        assert_eq!(record.metadata.name.as_deref(), Some("demo-app"));
        assert_eq!(record.metadata.namespace.as_deref(), Some("agents"));

        let labels = record.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("app").map(String::as_str), Some("demo-app"));
        assert_eq!(
            labels.get("created-by").map(String::as_str),
            Some("converge-agent")
        );

        let data = record.data.as_ref().unwrap();
        assert_eq!(
            data.get("prompt").map(String::as_str),
            Some("fix the tests")
        );
        assert_eq!(data.get("app_name").map(String::as_str), Some("demo-app"));
        assert!(data
            .get("cost_info")
            .unwrap()
            .contains("Total Cost: $0.001050"));
        assert!(data.contains_key("recorded_at"));
    }

    struct MemoryStore {
        records: Mutex<HashMap<String, ConfigMap>>,
    }

    #[async_trait]
    impl RecordStore for MemoryStore {
        async fn apply(
            &self,
            name: &str,
            record: &ConfigMap,
        ) -> std::result::Result<ConfigMap, StoreError> {
            self.records
                .lock()
                .unwrap()
                .insert(name.to_string(), record.clone());
            Ok(record.clone())
        }
    }

    #[tokio::test]
    async fn upsert_is_last_write_wins() {
        let store = MemoryStore {
            records: Mutex::new(HashMap::new()),
        };
        let recorder = Recorder::new("demo-app", settings());

        let first = recorder.build_record("first prompt", &estimate());
        let outcome = recorder.record_with(&store, first).await.unwrap();
        assert!(outcome.is_persisted());

        let second = recorder.build_record("second prompt", &estimate());
        recorder.record_with(&store, second).await.unwrap();

        let records = store.records.lock().unwrap();
        let stored = records.get("demo-app").unwrap();
        assert_eq!(
            stored.data.as_ref().unwrap().get("prompt").map(String::as_str),
            Some("second prompt")
        );
    }

    #[tokio::test]
    async fn api_errors_surface() {
        let mut store = MockRecordStore::new();
        store.expect_apply().returning(|_, _| {
            Err(StoreError::Api {
                code: 422,
                message: "invalid".to_string(),
            })
        });

        let recorder = Recorder::new("demo-app", settings());
        let record = recorder.build_record("prompt", &estimate());
        assert!(recorder.record_with(&store, record).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_cluster_returns_unpersisted_record() {
        let mut store = MockRecordStore::new();
        store
            .expect_apply()
            .returning(|_, _| Err(StoreError::Unreachable("no route to host".to_string())));

        let recorder = Recorder::new("demo-app", settings());
        let record = recorder.build_record("prompt", &estimate());
        let outcome = recorder.record_with(&store, record).await.unwrap();

        assert!(!outcome.is_persisted());
        let kept = outcome.record();
        assert_eq!(kept.metadata.name.as_deref(), Some("demo-app"));
        assert_eq!(kept.metadata.namespace.as_deref(), Some("agents"));
        assert!(kept.data.as_ref().unwrap().contains_key("cost_info"));
    }
}
