//! Run-time kernel limits.

/// Limits applied by the process subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Maximum number of live process identifiers.
    pub max_processes: usize,
    /// Maximum bytes an argument vector may occupy on the user stack.
    pub arg_max: usize,
    /// Maximum length of a program path, terminator included.
    pub path_max: usize,
    /// Number of exec or program launches that may stage arguments at once.
    pub exec_concurrency: usize,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            max_processes: 256,
            arg_max: 64 * 1024,
            path_max: 1024,
            exec_concurrency: 1,
        }
    }

    pub const fn with_max_processes(mut self, max_processes: usize) -> Self {
        self.max_processes = max_processes;
        self
    }

    pub const fn with_arg_max(mut self, arg_max: usize) -> Self {
        self.arg_max = arg_max;
        self
    }

    pub const fn with_path_max(mut self, path_max: usize) -> Self {
        self.path_max = path_max;
        self
    }

    pub const fn with_exec_concurrency(mut self, exec_concurrency: usize) -> Self {
        self.exec_concurrency = exec_concurrency;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
