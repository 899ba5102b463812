/// Constants pinned to the upstream fingerprinting release.
pub mod fingerprint {
    /// Fingerprint release recorded next to every fingerprint so stale vectors
    /// can be invalidated later. Bump together with the fingerprint program.
    pub const FINGERPRINT_VERSION: &str = "2.0.0";
}

/// Constants used by the batch pipeline driver.
pub mod pipeline {
    /// Rows processed per dataset when debug mode is on.
    pub const DEBUG_ROW_LIMIT: usize = 10;
    /// Calculation method tag attached to property rows by default.
    pub const DEFAULT_CALCULATION_METHOD: &str = "md";
    /// Category assigned to newly staged polymers by default.
    pub const DEFAULT_CATEGORY: &str = "known";
    /// CSV column-map key naming the structure column.
    pub const COLUMN_MAP_SMILES: &str = "smiles";
    /// CSV column-map key naming the measured value column.
    pub const COLUMN_MAP_VALUE: &str = "value";
}

/// Frame column names shared by the pipeline, auditor, and tests.
#[allow(missing_docs)]
pub mod columns {
    pub const PID: &str = "pid";
    pub const RID: &str = "rid";
    pub const SMILES: &str = "smiles";
    pub const CANONICAL_SMILES: &str = "canonical_smiles";
    pub const PG_FINGERPRINT: &str = "pg_fingerprint";
    pub const PG_FINGERPRINT_VERSION: &str = "pg_fingerprint_version";
    pub const CATEGORY: &str = "category";
    pub const HP_ID: &str = "hp_id";
    pub const PROP_ID: &str = "prop_id";
    pub const VALUE: &str = "value";
    pub const CALCULATION_METHOD: &str = "calculation_method";
    pub const CONDITIONS: &str = "conditions";
    pub const NOTE: &str = "note";
    pub const SHORT_NAME: &str = "short_name";
    pub const NAME: &str = "name";
    pub const SEARCH_NAME: &str = "search_name";
    pub const POLYMER: &str = "polymer";
    pub const CANONICAL: &str = "canonical";
    pub const CANONICAL2: &str = "canonical2";
    pub const IDEMPOTENT: &str = "idempotent";
}

/// Output file names written by the commands.
pub mod outputs {
    /// Property-type catalogue written before any dataset runs.
    pub const NEW_PROPERTIES_FILE: &str = "new_properties.jsonl";
    /// Deduplicated list of polymers missing from the store.
    pub const NEW_POLYMER_LIST_FILE: &str = "new_polymer_list.jsonl";
    /// Per-run summary with counts and property lookup outcomes.
    pub const PREPARE_REPORT_FILE: &str = "prepare_report.json";
    /// Suffix for property rows whose polymer is already persisted.
    pub const EXISTING_SUFFIX: &str = "_existing_polymers.jsonl";
    /// Suffix for property rows whose polymer is staged for creation.
    pub const NEW_SUFFIX: &str = "_new_polymers.jsonl";
    /// Every structure checked by the idempotence audit.
    pub const IDEMPOTENT_FILE: &str = "idempotent.csv";
    /// Structures whose canonical form changed on a second pass.
    pub const NOT_IDEMPOTENT_FILE: &str = "list_not_idempotent.csv";
    /// Polymer names exported from the store.
    pub const NAMELIST_FILE: &str = "namelist.jsonl";
}

/// Environment variable names read at startup.
pub mod env {
    /// Path of the SQLite polymer store. Takes precedence over `DB_HOST`.
    pub const DB_PATH: &str = "DB_PATH";
    /// Host of the PostgreSQL polymer store. Unset together with `DB_PATH`
    /// disables store access.
    pub const DB_HOST: &str = "DB_HOST";
    /// PostgreSQL port, [`DEFAULT_DB_PORT`] when unset.
    pub const DB_PORT: &str = "DB_PORT";
    /// PostgreSQL role.
    pub const DB_USER: &str = "DB_USER";
    /// PostgreSQL password, optional.
    pub const DB_PASSWORD: &str = "DB_PASSWORD";
    /// PostgreSQL database name.
    pub const DB_NAME: &str = "DB_NAME";
    /// Port used when `DB_PORT` is unset.
    pub const DEFAULT_DB_PORT: u16 = 5432;
    /// External canonicalization program.
    pub const CANONICALIZE_CMD: &str = "POLYLET_CANONICALIZE_CMD";
    /// External fingerprinting program.
    pub const FINGERPRINT_CMD: &str = "POLYLET_FINGERPRINT_CMD";
}
