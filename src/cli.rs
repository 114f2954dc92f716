//! Command-line surface shared by both frontend binaries.

use std::path::PathBuf;

use clap::{Args, Parser};

use crate::config::{CompilerConfig, ProjectPaths};

/// Arguments common to both `bcompiler` and `jitcompiler`.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Resource search root. Repeatable; first root wins when resolving a
    /// relative path.
    #[arg(long = "res", required = true, num_args = 1..)]
    pub res: Vec<PathBuf>,

    #[arg(long = "intermediatePath")]
    pub intermediate_path: PathBuf,

    #[arg(long = "outputPath")]
    pub output_path: PathBuf,

    #[arg(long = "cachePath")]
    pub cache_path: Option<PathBuf>,

    /// Worker thread count; defaults to the number of logical CPUs.
    #[arg(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    /// Block the calling thread on unready sub-tasks instead of
    /// suspending and requeuing. Used by the batch builder's nested
    /// sub-compiles; the JIT daemon always runs non-recursive.
    #[arg(long)]
    pub recursive: bool,

    #[arg(long = "forceRebuild")]
    pub force_rebuild: bool,

    #[arg(long = "noCacheRead")]
    pub no_cache_read: bool,

    #[arg(long = "noCacheWrite")]
    pub no_cache_write: bool,
}

impl CommonArgs {
    pub fn project_paths(&self) -> ProjectPaths {
        ProjectPaths::new(self.res.clone(), self.intermediate_path.clone(), self.output_path.clone())
            .with_cache_path(self.cache_path.clone())
    }

    pub fn compiler_config(&self) -> CompilerConfig {
        let mut config = CompilerConfig::default();
        if let Some(jobs) = self.jobs {
            config.num_threads = jobs.max(1);
        }
        config.recursive = self.recursive;
        config.force_rebuild = self.force_rebuild;
        config.cache_read_enabled = !self.no_cache_read;
        config.cache_write_enabled = !self.no_cache_write;
        config
    }
}

/// `bcompiler` - discovers and converts everything under the resource
/// roots, then exits.
#[derive(Debug, Parser)]
#[command(name = "bcompiler", about = "Batch asset compiler")]
pub struct BatchCliArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

/// `jitcompiler` - stays resident, watches the resource tree, and serves
/// `AssetClient` requests over a named pipe.
#[derive(Debug, Parser)]
#[command(name = "jitcompiler", about = "Just-in-time asset compiler daemon")]
pub struct JitCliArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Debounce window, in milliseconds, for coalescing bursts of
    /// file-system events into one rebuild.
    #[arg(long = "watch", default_value_t = 250)]
    pub watch_debounce_ms: u64,

    /// Overrides the pipe identity instead of deriving it from the
    /// resource roots; used by integration tests to avoid colliding with
    /// a real daemon's pipe.
    #[arg(long = "pipe-name-override")]
    pub pipe_name_override: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_args_parse_minimal_invocation() {
        let args = BatchCliArgs::parse_from([
            "bcompiler",
            "--res",
            "/res",
            "--intermediatePath",
            "/int",
            "--outputPath",
            "/out",
        ]);
        assert_eq!(args.common.res, vec![PathBuf::from("/res")]);
        assert!(!args.common.force_rebuild);
    }

    #[test]
    fn jit_args_accept_watch_and_pipe_override() {
        let args = JitCliArgs::parse_from([
            "jitcompiler",
            "--res",
            "/res",
            "--intermediatePath",
            "/int",
            "--outputPath",
            "/out",
            "--watch",
            "500",
            "--pipe-name-override",
            "TestPipe",
        ]);
        assert_eq!(args.watch_debounce_ms, 500);
        assert_eq!(args.pipe_name_override.as_deref(), Some("TestPipe"));
    }
}
