use std::time::Duration;

use crate::normalizer::NormalizeOptions;

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Released operations kept retained, most recently released first, before their data
    /// becomes collectable.
    pub gc_release_buffer_size: usize,
    /// Records visited per garbage collection slice.
    pub gc_step_budget: usize,
    /// Data fetched longer ago than this is reported stale.
    #[serde(deserialize_with = "duration_str::deserialize_option_duration")]
    pub query_cache_expiration: Option<Duration>,
    /// Payload key holding the identity of an object.
    pub id_field: String,
    pub treat_missing_fields_as_null: bool,
    pub log_required_field_errors: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            gc_release_buffer_size: 10,
            gc_step_budget: 256,
            query_cache_expiration: None,
            id_field: String::from("id"),
            treat_missing_fields_as_null: false,
            log_required_field_errors: true,
        }
    }
}

impl StoreConfig {
    pub(crate) fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            id_field: self.id_field.clone(),
            treat_missing_fields_as_null: self.treat_missing_fields_as_null,
        }
    }
}
