// Claims Export Validator - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod decode;
pub mod delimiter;
pub mod error;
pub mod header;
pub mod metrics;
pub mod pipeline;
pub mod reference;
pub mod rules;
pub mod store;
pub mod table;

// Re-export commonly used types
pub use config::{FieldBindings, Settings};
pub use decode::{decode, DecodedText, TextEncoding};
pub use delimiter::{detect, Delimiter, DelimiterDetection};
pub use error::{ConfigError, InputError, Result, ValidatorError};
pub use header::{normalize, HeaderLookup};
pub use metrics::{DailyPatientCount, DateFormat, MetricOutcome};
pub use pipeline::{
    ingest, prepare, unique_patients, DailyPatientReport, IngestReport, MetricMeta,
    PreparedUpload, RawUpload,
};
pub use reference::{BillingCode, ContextEntry, Establishment};
pub use rules::{
    run_all, CompanionCodeIndex, CompanionCodeRule, Finding, FindingContext, GroupingFields,
    RequiredHeadersParams, Rule, RuleEngine, RuleKind,
};
pub use store::{ImportSummary, RuleStore, UpsertOutcome};
pub use table::{ParsedTable, Record};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
