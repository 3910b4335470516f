//! Constants shared across the engine.

/// Parameter table key carrying the debug parameter overlay.
pub const DEBUG_PARAMS_KEY: &str = "_DebugParams_";

/// Suffix appended to a logical store path to locate its checksum witness.
pub const CHECKSUM_FILE_SUFFIX: &str = ".checksum";

/// Root folder of the store layout.
pub const STORE_ROOT: &str = "Store";

/// File names inside a local build layout.
pub const APPLICATION_MANIFEST_FILE: &str = "ApplicationManifest.json";
pub const SERVICE_MANIFEST_FILE: &str = "ServiceManifest.json";

/// Environment variable overriding the filesystem store root used by the CLI.
pub const STORE_ENV_VAR: &str = "PKGDIGEST_STORE";

/// Prefix for configuration settings read from the environment.
pub const CONFIG_ENV_PREFIX: &str = "PKGDIGEST";

/// Default deadline for a whole build or upgrade operation.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
