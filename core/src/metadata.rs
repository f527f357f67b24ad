//! Metadata describing a registered health check

/// Default interval between runs when the last result was ok.
pub const DEFAULT_INTERVAL_IN_SECONDS: u32 = 600;
/// Default interval between runs when the last result was not ok.
pub const DEFAULT_INTERVAL_WHEN_NOT_OK_IN_SECONDS: u32 = 120;
/// Default expected maximum runtime before a check is flagged as slow.
pub const DEFAULT_EXPECTED_MAXIMUM_RUN_TIME_IN_SECONDS: u32 = 4;

/// Immutable descriptor for a health check. `name` is the registry key and
/// must be unique. Use [`CheckMetadata::builder`] to construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckMetadata {
    /// A human-understandable name of what this check examines,
    /// e.g. "My Database" or "File share connection".
    pub name: String,
    /// Optional longer explanation of what the check actually verifies.
    pub description: Option<String>,
    /// Optional user-defined type, hinting that the check supplies a certain
    /// kind of structured data.
    pub check_type: Option<String>,
    /// Set when issues found by this check belong to another service, and we
    /// are reporting them on behalf of that service.
    pub on_behalf_of: Option<String>,
    /// Checks run asynchronously in the background by default, and queries
    /// return the latest cached result. Setting `sync` makes every status
    /// query execute the check on the requesting task instead.
    ///
    /// Only use this for checks that read in-memory state. Checks that touch
    /// a database, the filesystem or the network must stay asynchronous, as
    /// such operations can suddenly take a long time and status queries
    /// should always respond immediately. Even a sync check keeps its
    /// background worker, so state changes are detected without queries.
    pub sync: bool,
    /// Seconds to wait between runs after an ok result. Zero means the
    /// default of [`DEFAULT_INTERVAL_IN_SECONDS`].
    pub interval_in_seconds: u32,
    /// Seconds to wait between runs after a not-ok result, so recovery is
    /// noticed quickly. Never effectively larger than `interval_in_seconds`.
    /// Zero means the default of [`DEFAULT_INTERVAL_WHEN_NOT_OK_IN_SECONDS`].
    pub interval_when_not_ok_in_seconds: u32,
    /// Runs taking longer than this are flagged as slow in the report.
    pub expected_maximum_run_time_in_seconds: u32,
}

impl CheckMetadata {
    /// Metadata with default values for the given check name.
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    /// Metadata for a check that always runs synchronously on the
    /// requesting task.
    pub fn new_synchronous(name: impl Into<String>) -> Self {
        Self::builder(name).sync(true).build()
    }

    /// Start building metadata for the given check name.
    pub fn builder(name: impl Into<String>) -> CheckMetadataBuilder {
        CheckMetadataBuilder {
            name: name.into(),
            description: None,
            check_type: None,
            on_behalf_of: None,
            sync: false,
            interval_in_seconds: DEFAULT_INTERVAL_IN_SECONDS,
            interval_when_not_ok_in_seconds: DEFAULT_INTERVAL_WHEN_NOT_OK_IN_SECONDS,
            expected_maximum_run_time_in_seconds: DEFAULT_EXPECTED_MAXIMUM_RUN_TIME_IN_SECONDS,
        }
    }

    /// The same metadata under a different name. Used to give each check a
    /// unique name when one specification is registered multiple times.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self { name: name.into(), ..self.clone() }
    }
}

/// Builder for [`CheckMetadata`]; metadata is immutable once built.
#[derive(Debug, Clone)]
pub struct CheckMetadataBuilder {
    name: String,
    description: Option<String>,
    check_type: Option<String>,
    on_behalf_of: Option<String>,
    sync: bool,
    interval_in_seconds: u32,
    interval_when_not_ok_in_seconds: u32,
    expected_maximum_run_time_in_seconds: u32,
}

impl CheckMetadataBuilder {
    /// Explain what the check verifies.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Tag the check with a user-defined type.
    pub fn check_type(mut self, check_type: impl Into<String>) -> Self {
        self.check_type = Some(check_type.into());
        self
    }

    /// Mark the check as reporting on behalf of another service.
    pub fn on_behalf_of(mut self, on_behalf_of: impl Into<String>) -> Self {
        self.on_behalf_of = Some(on_behalf_of.into());
        self
    }

    /// Make status queries execute the check synchronously.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Seconds between runs after an ok result.
    pub fn interval_in_seconds(mut self, seconds: u32) -> Self {
        self.interval_in_seconds = seconds;
        self
    }

    /// Seconds between runs after a not-ok result.
    pub fn interval_when_not_ok_in_seconds(mut self, seconds: u32) -> Self {
        self.interval_when_not_ok_in_seconds = seconds;
        self
    }

    /// Expected maximum runtime before the check is flagged slow.
    pub fn expected_maximum_run_time_in_seconds(mut self, seconds: u32) -> Self {
        self.expected_maximum_run_time_in_seconds = seconds;
        self
    }

    /// Build the metadata. An expected maximum runtime of zero falls back to
    /// the default, so the slow flag always has a meaningful threshold.
    pub fn build(self) -> CheckMetadata {
        CheckMetadata {
            name: self.name,
            description: self.description.filter(|value| !value.is_empty()),
            check_type: self.check_type.filter(|value| !value.is_empty()),
            on_behalf_of: self.on_behalf_of.filter(|value| !value.is_empty()),
            sync: self.sync,
            interval_in_seconds: self.interval_in_seconds,
            interval_when_not_ok_in_seconds: self.interval_when_not_ok_in_seconds,
            expected_maximum_run_time_in_seconds: if self.expected_maximum_run_time_in_seconds == 0 {
                DEFAULT_EXPECTED_MAXIMUM_RUN_TIME_IN_SECONDS
            } else {
                self.expected_maximum_run_time_in_seconds
            },
        }
    }
}
