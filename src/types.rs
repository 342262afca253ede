/// Where a sync starts and when it stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum SyncMode {
    /// Newest first, stopping at the first page with nothing new.
    Latest,
    /// Resume from the saved checkpoint and keep going to the end.
    Oldest,
    /// Walk the whole feed, filling in records and images not yet on disk.
    Missing,
}

impl SyncMode {
    pub fn as_str(&self) -> &str {
        match self {
            SyncMode::Latest => "latest",
            SyncMode::Oldest => "oldest",
            SyncMode::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
