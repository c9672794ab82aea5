#[derive(Debug, Clone)]
/// Session Configuration
pub struct Config {
    /// GDB executable to spawn
    pub gdb_path: String,
    /// C compiler used by `compile_and_launch`
    pub cc_path: String,
    /// Seconds to wait for GDB to exit before killing it
    pub exit_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gdb_path: std::env::var("GDB_PATH").unwrap_or_else(|_| "gdb".to_string()),
            cc_path: std::env::var("CC_PATH").unwrap_or_else(|_| "clang".to_string()),
            exit_timeout: std::env::var("GDB_EXIT_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }
}
