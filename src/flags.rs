//! The shared flags document.
//!
//! `Flags` is the whole negotiable state between the supervisor and its
//! workers: paths, hyperparameters, counters and control switches such as
//! `kill`, `done` and `started`. Every field has a default, so a reader never
//! sees a missing field. Deserialization fills absent fields from those
//! defaults and ignores fields it does not know, which keeps older and newer
//! builds able to talk to each other.
//!
//! Writes always carry the full document, never a delta.

use crate::errors::SyncError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Version of the default field set. Bump when fields are added or renamed.
pub const FLAGS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Flags {
    /// Version of the field set the writer was built with
    pub schema_version: u32,

    // Data locations, relative to the application root
    pub annotation: PathBuf,
    pub backup: PathBuf,
    pub binary: PathBuf,
    pub built_graph: PathBuf,
    pub config: PathBuf,
    pub dataset: PathBuf,
    pub imgdir: PathBuf,
    pub img_out: PathBuf,
    pub labels: PathBuf,
    pub log: PathBuf,
    pub summary: PathBuf,
    pub video_out: PathBuf,

    // Training hyperparameters
    pub batch: u32,
    pub clip: bool,
    pub clip_norm: f64,
    pub clr_mode: String,
    pub epoch: u32,
    pub keep: u32,
    pub load: i64,
    pub lr: f64,
    pub max_lr: f64,
    pub momentum: f64,
    pub save: u64,
    pub step_size_coefficient: u32,
    pub threshold: f64,
    pub trainer: String,
    pub freeze: bool,

    // Inference and capture
    pub capdevs: Vec<String>,
    pub demo: String,
    pub fbf: String,
    pub grayscale: bool,
    pub output_type: Vec<String>,
    pub save_video: bool,
    pub model: String,
    pub pb_load: bool,
    pub meta_load: bool,

    // Hardware
    pub gpu: f64,
    pub gpu_name: String,

    // Run bookkeeping
    pub project_name: String,
    pub size: u64,
    pub timeout: u64,
    pub train: bool,

    // Control and status
    /// Launched from the command line rather than the GUI
    pub cli: bool,
    /// Worker finished its job
    pub done: bool,
    /// Last error reported by the worker, empty when healthy
    pub error: String,
    /// Supervisor asks the worker to stop
    pub kill: bool,
    /// Fraction of work completed, 0.0 to 1.0
    pub progress: f64,
    /// Work has been started by the supervisor
    pub started: bool,
    /// Worker logs at debug level when set
    pub verbalise: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            schema_version: FLAGS_SCHEMA_VERSION,
            annotation: PathBuf::from("./data/committedframes/"),
            backup: PathBuf::from("./data/ckpt/"),
            binary: PathBuf::from("./data/bin/"),
            built_graph: PathBuf::from("./data/built_graph/"),
            config: PathBuf::from("./data/cfg/"),
            dataset: PathBuf::from("./data/committedframes/"),
            imgdir: PathBuf::from("./data/sample_img/"),
            img_out: PathBuf::from("./data/img_out/"),
            labels: PathBuf::from("./data/predefined_classes.txt"),
            log: PathBuf::from("./data/logs/flow.log"),
            summary: PathBuf::from("./data/summaries/"),
            video_out: PathBuf::from("./data/video_out/"),
            batch: 16,
            clip: false,
            clip_norm: 5.0,
            clr_mode: "triangular2".to_string(),
            epoch: 1,
            keep: 20,
            load: -1,
            lr: 1.0e-5,
            max_lr: 1.0e-5,
            momentum: 0.0,
            save: 16000,
            step_size_coefficient: 2,
            threshold: 0.4,
            trainer: "rmsprop".to_string(),
            freeze: false,
            capdevs: Vec::new(),
            demo: String::new(),
            fbf: String::new(),
            grayscale: false,
            output_type: Vec::new(),
            save_video: true,
            model: String::new(),
            pb_load: false,
            meta_load: false,
            gpu: 0.0,
            gpu_name: "/gpu:0".to_string(),
            project_name: "default".to_string(),
            size: 0,
            timeout: 0,
            train: false,
            cli: false,
            done: false,
            error: String::new(),
            kill: false,
            progress: 0.0,
            started: false,
            verbalise: false,
        }
    }
}

/// Coarse state of the supervised job, derived from the control flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Not started yet
    Waiting,
    /// Started and still going
    Running,
    /// Stop requested, worker has not finished
    Stopping,
    /// Worker reported completion
    Done,
    /// Worker reported an error
    Failed,
}

impl RunStatus {
    /// Whether the worker has nothing left to do.
    pub fn is_finished(&self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Waiting => write!(f, "waiting"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Stopping => write!(f, "stopping"),
            RunStatus::Done => write!(f, "done"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl Flags {
    /// Summarize the control flags. Errors win over completion, completion over a stop request.
    pub fn status(&self) -> RunStatus {
        if !self.error.is_empty() {
            RunStatus::Failed
        } else if self.done {
            RunStatus::Done
        } else if self.kill {
            RunStatus::Stopping
        } else if self.started {
            RunStatus::Running
        } else {
            RunStatus::Waiting
        }
    }

    /// Restore every field to its default in place.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Serialize the full document into the on-disk format.
    ///
    /// JSON has no NaN or infinity, so a non-finite float is refused here
    /// rather than written as `null` that no reader could parse back.
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        if let Some(field) = self.non_finite_field() {
            return Err(SyncError::NonFiniteValue {
                field: field.to_string(),
            });
        }
        serde_json::to_vec(self).map_err(SyncError::Serialize)
    }

    fn non_finite_field(&self) -> Option<&'static str> {
        [
            ("clip_norm", self.clip_norm),
            ("lr", self.lr),
            ("max_lr", self.max_lr),
            ("momentum", self.momentum),
            ("threshold", self.threshold),
            ("gpu", self.gpu),
            ("progress", self.progress),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_finite())
        .map(|(name, _)| name)
    }

    /// Parse a document written by [`Flags::encode`].
    ///
    /// A truncated buffer is reported as an error; deciding what to do about
    /// it is the caller's business.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Names of every field in the schema, sorted.
    pub fn field_names() -> Vec<String> {
        match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Read a field by name.
    pub fn get(&self, field: &str) -> Result<Value, SyncError> {
        let doc = serde_json::to_value(self).map_err(SyncError::Serialize)?;
        doc.get(field)
            .cloned()
            .ok_or_else(|| SyncError::UnknownField {
                field: field.to_string(),
            })
    }

    /// Assign a field by name. The value must fit the field's type.
    pub fn set(&mut self, field: &str, value: Value) -> Result<(), SyncError> {
        let mut doc = serde_json::to_value(&*self).map_err(SyncError::Serialize)?;
        let slot = doc.get_mut(field).ok_or_else(|| SyncError::UnknownField {
            field: field.to_string(),
        })?;
        *slot = value;

        *self = serde_json::from_value(doc).map_err(|e| SyncError::InvalidFieldValue {
            field: field.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Assign a field from command-line text.
    ///
    /// String fields take `raw` verbatim. Other fields parse it as JSON, so
    /// `true`, `0.42` and `["cam0"]` work as expected.
    pub fn set_from_str(&mut self, field: &str, raw: &str) -> Result<(), SyncError> {
        let current = self.get(field)?;
        let value = if current.is_string() {
            Value::String(raw.to_string())
        } else {
            serde_json::from_str(raw).map_err(|e| SyncError::InvalidFieldValue {
                field: field.to_string(),
                message: format!("cannot parse '{}': {}", raw, e),
            })?
        };
        self.set(field, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_idempotent() {
        let first = Flags::default();
        for _ in 0..5 {
            assert_eq!(Flags::default(), first);
        }
        assert_eq!(Flags::field_names(), Flags::field_names());
    }

    #[test]
    fn test_default_values() {
        let flags = Flags::default();
        assert_eq!(flags.schema_version, FLAGS_SCHEMA_VERSION);
        assert_eq!(flags.batch, 16);
        assert_eq!(flags.load, -1);
        assert_eq!(flags.trainer, "rmsprop");
        assert_eq!(flags.threshold, 0.4);
        assert!(flags.save_video);
        assert!(!flags.kill);
        assert!(!flags.done);
        assert!(!flags.started);
        assert_eq!(flags.progress, 0.0);
        assert_eq!(flags.log, PathBuf::from("./data/logs/flow.log"));
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let mut flags = Flags::default();
        flags.progress = 0.42;
        flags.capdevs = vec!["cam0".to_string(), "cam1".to_string()];
        flags.project_name = "polyps".to_string();

        let bytes = flags.encode().unwrap();
        assert_eq!(Flags::decode(&bytes).unwrap(), flags);
    }

    #[test]
    fn test_decode_fills_missing_fields_with_defaults() {
        let flags = Flags::decode(br#"{"kill": true, "batch": 8}"#).unwrap();
        assert!(flags.kill);
        assert_eq!(flags.batch, 8);
        assert_eq!(flags.trainer, "rmsprop");
        assert_eq!(flags.keep, 20);
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let flags = Flags::decode(br#"{"progress": 0.5, "from_the_future": {"a": 1}}"#).unwrap();
        assert_eq!(flags.progress, 0.5);
    }

    #[test]
    fn test_decode_rejects_truncated_document() {
        let bytes = Flags::default().encode().unwrap();
        assert!(Flags::decode(&bytes[..bytes.len() / 2]).is_err());
        assert!(Flags::decode(b"").is_err());
    }

    #[test]
    fn test_get_known_and_unknown_field() {
        let flags = Flags::default();
        assert_eq!(flags.get("batch").unwrap(), Value::from(16));
        assert_eq!(flags.get("kill").unwrap(), Value::Bool(false));

        let err = flags.get("learning_rate").unwrap_err();
        assert!(matches!(err, SyncError::UnknownField { ref field } if field == "learning_rate"));
    }

    #[test]
    fn test_set_updates_typed_field() {
        let mut flags = Flags::default();
        flags.set("kill", Value::Bool(true)).unwrap();
        flags.set("progress", serde_json::json!(0.75)).unwrap();
        assert!(flags.kill);
        assert_eq!(flags.progress, 0.75);
    }

    #[test]
    fn test_set_rejects_wrong_type_and_leaves_document_intact() {
        let mut flags = Flags::default();
        let err = flags.set("batch", Value::String("many".into())).unwrap_err();
        assert!(matches!(err, SyncError::InvalidFieldValue { ref field, .. } if field == "batch"));
        assert_eq!(flags, Flags::default());
    }

    #[test]
    fn test_set_unknown_field() {
        let mut flags = Flags::default();
        assert!(matches!(
            flags.set("nope", Value::Null),
            Err(SyncError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_set_from_str_parses_by_field_type() {
        let mut flags = Flags::default();
        flags.set_from_str("done", "true").unwrap();
        flags.set_from_str("progress", "0.42").unwrap();
        flags.set_from_str("epoch", "12").unwrap();
        flags.set_from_str("capdevs", r#"["cam0"]"#).unwrap();
        // numeric-looking text stays text for string fields
        flags.set_from_str("project_name", "2024").unwrap();
        flags.set_from_str("imgdir", "/tmp/images").unwrap();

        assert!(flags.done);
        assert_eq!(flags.progress, 0.42);
        assert_eq!(flags.epoch, 12);
        assert_eq!(flags.capdevs, vec!["cam0".to_string()]);
        assert_eq!(flags.project_name, "2024");
        assert_eq!(flags.imgdir, PathBuf::from("/tmp/images"));
    }

    #[test]
    fn test_set_from_str_rejects_garbage_for_numbers() {
        let mut flags = Flags::default();
        let err = flags.set_from_str("batch", "lots").unwrap_err();
        match &err {
            SyncError::InvalidFieldValue { field, message } => {
                assert_eq!(field, "batch");
                assert!(message.contains("cannot parse 'lots'"), "{}", message);
            }
            other => panic!("Expected InvalidFieldValue, got {:?}", other),
        }
        assert_eq!(flags, Flags::default());
    }

    #[test]
    fn test_set_from_str_rejects_bare_word_for_list() {
        let mut flags = Flags::default();
        let err = flags.set_from_str("capdevs", "cam0").unwrap_err();
        assert!(err.to_string().contains("cannot parse 'cam0'"));
    }

    #[test]
    fn test_encode_refuses_nan_and_infinity() {
        let mut flags = Flags::default();
        flags.progress = f64::NAN;
        flags.done = true;
        let err = flags.encode().unwrap_err();
        assert!(matches!(err, SyncError::NonFiniteValue { ref field } if field == "progress"));

        let mut flags = Flags::default();
        flags.lr = f64::INFINITY;
        assert!(matches!(
            flags.encode(),
            Err(SyncError::NonFiniteValue { ref field }) if field == "lr"
        ));

        flags.lr = f64::NEG_INFINITY;
        assert!(flags.encode().is_err());
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut flags = Flags::default();
        flags.kill = true;
        flags.progress = 1.0;
        flags.reset();
        assert_eq!(flags, Flags::default());
    }

    #[test]
    fn test_status_precedence() {
        let mut flags = Flags::default();
        assert_eq!(flags.status(), RunStatus::Waiting);
        flags.started = true;
        assert_eq!(flags.status(), RunStatus::Running);
        flags.kill = true;
        assert_eq!(flags.status(), RunStatus::Stopping);
        flags.done = true;
        assert_eq!(flags.status(), RunStatus::Done);
        assert!(flags.status().is_finished());
        flags.error = "out of memory".to_string();
        assert_eq!(flags.status(), RunStatus::Failed);
        assert_eq!(flags.status().to_string(), "failed");
    }

    #[test]
    fn test_field_names_cover_control_flags() {
        let names = Flags::field_names();
        for name in ["kill", "done", "started", "progress", "verbalise", "cli"] {
            assert!(names.iter().any(|n| n == name), "missing {}", name);
        }
    }
}
