// Runner constants
use std::time::Duration;

/// Sleep between monitoring polls (30s)
pub const DEFAULT_SLEEP_TIME: Duration = Duration::from_secs(30);

/// Sleep between running-process checks while draining (10s)
pub const DEFAULT_SLEEP_TIME_DURING_SHUTDOWN: Duration = Duration::from_secs(10);

/// Local host shutdown command
pub const DEFAULT_LOCAL_SHUTDOWN_COMMAND: &str = "sudo shutdown -h now";

/// Environment variable holding the termination service base URL
pub const SHUTDOWN_API_BASE_URL_VAR: &str = "SHUTDOWN_API_BASE_URL";

/// Environment variable holding the termination endpoint path
pub const SHUTDOWN_API_ENDPOINT_VAR: &str = "SHUTDOWN_API_ENDPOINT";
