//! Configuration for table-backed stores.
//!
//! [`TableSettings`] names the physical table and its columns.
//! [`StoreFactoryConfig`] adds provisioning and key-normalization settings.
//! Both can be built with a validating builder or deserialized; deserialized
//! values are validated when a [`StoreFactory`](crate::StoreFactory) is
//! created from them.
//!
//! # Example
//!
//! ```
//! use tablekv_storage_table::{BillingMode, StoreFactoryConfig, TableSettings};
//!
//! let config = StoreFactoryConfig::builder()
//!     .table(TableSettings::builder().table("stream-state").build()?)
//!     .billing_mode(BillingMode::Provisioned { read_capacity_units: 5, write_capacity_units: 5 })
//!     .build()?;
//!
//! assert_eq!(config.table().hash_key_column(), "key");
//! # Ok::<(), tablekv_storage::ConfigError>(())
//! ```

use serde::{Deserialize, Serialize};
use tablekv_storage::{ConfigError, DEFAULT_KEY_HASH_THRESHOLD, HASHED_KEY_LEN, KeyCodec};

use crate::client::{BillingMode, KeySchema};

/// Default partition key column.
pub const DEFAULT_HASH_KEY_COLUMN: &str = "key";

/// Default sort key column.
pub const DEFAULT_SORT_KEY_COLUMN: &str = "type";

/// Default value column.
pub const DEFAULT_VALUE_COLUMN: &str = "value";

/// Physical table layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSettings {
    /// Table name.
    pub(crate) table: String,

    /// Binary partition key column.
    #[serde(default = "default_hash_key_column")]
    pub(crate) hash_key_column: String,

    /// String sort key column, holding the store name.
    #[serde(default = "default_sort_key_column")]
    pub(crate) sort_key_column: String,

    /// Value column.
    #[serde(default = "default_value_column")]
    pub(crate) value_column: String,
}

fn default_hash_key_column() -> String {
    DEFAULT_HASH_KEY_COLUMN.to_owned()
}

fn default_sort_key_column() -> String {
    DEFAULT_SORT_KEY_COLUMN.to_owned()
}

fn default_value_column() -> String {
    DEFAULT_VALUE_COLUMN.to_owned()
}

#[bon::bon]
impl TableSettings {
    /// Creates table settings, validating all fields.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Any name is empty
    /// - Two columns share a name
    #[builder]
    pub fn new(
        #[builder(into)] table: String,
        #[builder(into, default = default_hash_key_column())] hash_key_column: String,
        #[builder(into, default = default_sort_key_column())] sort_key_column: String,
        #[builder(into, default = default_value_column())] value_column: String,
    ) -> Result<Self, ConfigError> {
        let settings = Self { table, hash_key_column, sort_key_column, value_column };
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the invariants enforced by the builder.
    ///
    /// # Errors
    ///
    /// See [`TableSettings::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("table", &self.table),
            ("hash_key_column", &self.hash_key_column),
            ("sort_key_column", &self.sort_key_column),
            ("value_column", &self.value_column),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Empty { field });
            }
        }

        if self.hash_key_column == self.sort_key_column
            || self.hash_key_column == self.value_column
            || self.sort_key_column == self.value_column
        {
            return Err(ConfigError::Invalid {
                field: "columns",
                reason: format!(
                    "column names must be distinct, got '{}', '{}', '{}'",
                    self.hash_key_column, self.sort_key_column, self.value_column
                ),
            });
        }

        Ok(())
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the partition key column.
    #[must_use]
    pub fn hash_key_column(&self) -> &str {
        &self.hash_key_column
    }

    /// Returns the sort key column.
    #[must_use]
    pub fn sort_key_column(&self) -> &str {
        &self.sort_key_column
    }

    /// Returns the value column.
    #[must_use]
    pub fn value_column(&self) -> &str {
        &self.value_column
    }

    /// Returns the primary key layout.
    #[must_use]
    pub fn key_schema(&self) -> KeySchema {
        KeySchema { hash_key: self.hash_key_column.clone(), sort_key: self.sort_key_column.clone() }
    }
}

/// Configuration of a [`StoreFactory`](crate::StoreFactory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreFactoryConfig {
    /// Physical table layout.
    pub(crate) table: TableSettings,

    /// Capacity mode used if the table has to be created.
    #[serde(default)]
    pub(crate) billing_mode: BillingMode,

    /// Whether to create the table before the first store is opened.
    #[serde(default = "default_provision_table")]
    pub(crate) provision_table: bool,

    /// Keys longer than this many bytes are replaced by their digest.
    #[serde(default = "default_key_hash_threshold")]
    pub(crate) key_hash_threshold: usize,
}

fn default_provision_table() -> bool {
    true
}

fn default_key_hash_threshold() -> usize {
    DEFAULT_KEY_HASH_THRESHOLD
}

#[bon::bon]
impl StoreFactoryConfig {
    /// Creates a factory configuration, validating all fields.
    ///
    /// # Optional Fields
    ///
    /// * `billing_mode` - Capacity mode for table creation (default: pay per request).
    /// * `provision_table` - Create the table on first open (default: true).
    /// * `key_hash_threshold` - Key normalization threshold in bytes (default: 2047).
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Provisioned capacity units are zero
    /// - `key_hash_threshold` is outside `64..=2047`
    #[builder]
    pub fn new(
        table: TableSettings,
        #[builder(default)] billing_mode: BillingMode,
        #[builder(default = default_provision_table())] provision_table: bool,
        #[builder(default = default_key_hash_threshold())] key_hash_threshold: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self { table, billing_mode, provision_table, key_hash_threshold };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants enforced by the builder.
    ///
    /// # Errors
    ///
    /// See [`StoreFactoryConfig::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.table.validate()?;

        if let BillingMode::Provisioned { read_capacity_units, write_capacity_units } =
            self.billing_mode
        {
            for (field, value) in [
                ("read_capacity_units", read_capacity_units),
                ("write_capacity_units", write_capacity_units),
            ] {
                if value == 0 {
                    return Err(ConfigError::BelowMinimum {
                        field,
                        min: "1".into(),
                        value: value.to_string(),
                    });
                }
            }
        }

        if self.key_hash_threshold < HASHED_KEY_LEN {
            return Err(ConfigError::BelowMinimum {
                field: "key_hash_threshold",
                min: HASHED_KEY_LEN.to_string(),
                value: self.key_hash_threshold.to_string(),
            });
        }
        if self.key_hash_threshold > DEFAULT_KEY_HASH_THRESHOLD {
            return Err(ConfigError::AboveMaximum {
                field: "key_hash_threshold",
                max: DEFAULT_KEY_HASH_THRESHOLD.to_string(),
                value: self.key_hash_threshold.to_string(),
            });
        }

        Ok(())
    }

    /// Returns the table layout.
    #[must_use]
    pub fn table(&self) -> &TableSettings {
        &self.table
    }

    /// Returns the billing mode used for table creation.
    #[must_use]
    pub fn billing_mode(&self) -> BillingMode {
        self.billing_mode
    }

    /// Returns whether the factory provisions the table.
    #[must_use]
    pub fn provision_table(&self) -> bool {
        self.provision_table
    }

    /// Returns the key normalization threshold.
    #[must_use]
    pub fn key_hash_threshold(&self) -> usize {
        self.key_hash_threshold
    }

    /// Builds the key codec for this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the threshold is invalid.
    pub fn key_codec(&self) -> Result<KeyCodec, ConfigError> {
        KeyCodec::new(self.key_hash_threshold)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn settings() -> TableSettings {
        TableSettings::builder().table("stream-state").build().unwrap()
    }

    #[test]
    fn test_table_settings_defaults() {
        let settings = settings();
        assert_eq!(settings.table(), "stream-state");
        assert_eq!(settings.hash_key_column(), "key");
        assert_eq!(settings.sort_key_column(), "type");
        assert_eq!(settings.value_column(), "value");
        assert_eq!(
            settings.key_schema(),
            KeySchema { hash_key: "key".into(), sort_key: "type".into() }
        );
    }

    #[test]
    fn test_custom_columns() {
        let settings = TableSettings::builder()
            .table("t")
            .hash_key_column("pk")
            .sort_key_column("sk")
            .value_column("v")
            .build()
            .unwrap();
        assert_eq!(settings.hash_key_column(), "pk");
        assert_eq!(settings.sort_key_column(), "sk");
        assert_eq!(settings.value_column(), "v");
    }

    #[test]
    fn test_empty_table_rejected() {
        let err = TableSettings::builder().table("").build().unwrap_err();
        assert_eq!(err, ConfigError::Empty { field: "table" });
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let err =
            TableSettings::builder().table("t").value_column("key").build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "columns", .. }));
    }

    #[test]
    fn test_factory_config_defaults() {
        let config = StoreFactoryConfig::builder().table(settings()).build().unwrap();
        assert_eq!(config.billing_mode(), BillingMode::PayPerRequest);
        assert!(config.provision_table());
        assert_eq!(config.key_hash_threshold(), DEFAULT_KEY_HASH_THRESHOLD);
        assert_eq!(config.key_codec().unwrap(), KeyCodec::default());
    }

    #[rstest]
    #[case::below_digest(63, false)]
    #[case::digest_len(64, true)]
    #[case::default(2047, true)]
    #[case::above_key_limit(2048, false)]
    fn test_key_hash_threshold_bounds(#[case] threshold: usize, #[case] valid: bool) {
        let result = StoreFactoryConfig::builder()
            .table(settings())
            .key_hash_threshold(threshold)
            .build();
        assert_eq!(result.is_ok(), valid, "threshold {threshold}: {result:?}");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = StoreFactoryConfig::builder()
            .table(settings())
            .billing_mode(BillingMode::Provisioned { read_capacity_units: 0, write_capacity_units: 1 })
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "read_capacity_units", .. }));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{ "table": { "table": "stream-state" } }"#;
        let config: StoreFactoryConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.table().value_column(), "value");
        assert!(config.provision_table());
    }

    #[test]
    fn test_deserialize_provisioned_billing() {
        let json = r#"{
            "table": { "table": "t", "hash_key_column": "pk" },
            "billing_mode": { "mode": "provisioned", "read_capacity_units": 10, "write_capacity_units": 4 },
            "provision_table": false,
            "key_hash_threshold": 512
        }"#;
        let config: StoreFactoryConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(
            config.billing_mode(),
            BillingMode::Provisioned { read_capacity_units: 10, write_capacity_units: 4 }
        );
        assert_eq!(config.table().hash_key_column(), "pk");
        assert_eq!(config.key_hash_threshold(), 512);
        assert!(!config.provision_table());
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let json = r#"{ "table": { "table": "t" }, "cache_size": 10 }"#;
        assert!(serde_json::from_str::<StoreFactoryConfig>(json).is_err());
    }

    #[test]
    fn test_deserialized_config_is_validated_separately() {
        let json = r#"{ "table": { "table": "" } }"#;
        let config: StoreFactoryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.validate().unwrap_err(), ConfigError::Empty { field: "table" });
    }
}
