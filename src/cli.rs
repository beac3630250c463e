use std::path::PathBuf;

use clap::builder::TypedValueParser;
use clap::{Args, Parser, Subcommand};

use crate::config::UpdateConfig;

#[derive(Parser, Debug)]
#[command(name = "zipsync")]
#[command(version)]
#[command(about = "Incrementally update ZIP/JAR archives from a remote copy", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipsync index dist/                          write .idx files for every archive in dist/\n  \
  zipsync update lib/app.jar https://example.com/dist/app.jar\n  \
  zipsync update lib/ https://example.com/dist/   update every archive in lib/\n\n\
Exit codes:\n  \
  0  success\n  \
  2  bad arguments\n  \
  3  no ZIP/JAR files found\n  \
  4  update or indexing failed")]
pub struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info", value_name = "LEVEL")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Update an archive, or every archive in a directory, from a URL
    Update(UpdateArgs),

    /// Write `<archive>.idx` for an archive or every archive in a directory
    Index {
        /// Archive file or directory of archives
        #[arg(value_name = "ARCHIVE|DIR")]
        target: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Archive file or directory of archives
    #[arg(value_name = "ARCHIVE|DIR")]
    pub target: PathBuf,

    /// Archive URL, or base URL when updating a directory
    #[arg(value_name = "URL")]
    pub url: String,

    /// Read buffer size in bytes
    #[arg(
        long,
        env = "ZIPSYNC_BUFFER_SIZE",
        default_value_t = UpdateConfig::DEFAULT_BUFFER_SIZE,
        value_parser = clap::value_parser!(u32).range(1..).map(|v| v as usize)
    )]
    pub buffer_size: usize,

    /// Maximum download speed in KiB/s (0 = unlimited)
    #[arg(long, env = "ZIPSYNC_DOWNLOAD_SPEED", default_value_t = 0, value_name = "KIB_PER_SEC")]
    pub download_speed: u64,
}

impl UpdateArgs {
    pub fn config(&self) -> UpdateConfig {
        UpdateConfig::default()
            .with_buffer_size(self.buffer_size)
            .with_download_speed(self.download_speed)
    }

    pub fn is_http_url(&self) -> bool {
        self.url.starts_with("http://") || self.url.starts_with("https://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_update_with_defaults() {
        let cli = Cli::try_parse_from(["zipsync", "update", "app.jar", "http://host/app.jar"]).unwrap();
        assert_eq!(cli.log_level, "info");
        let Command::Update(args) = cli.command else {
            panic!("expected update");
        };
        assert!(args.is_http_url());
        assert_eq!(args.buffer_size, UpdateConfig::DEFAULT_BUFFER_SIZE);
        assert_eq!(args.config().download_speed, None);
    }

    #[test]
    fn rejects_zero_buffer_size() {
        assert!(
            Cli::try_parse_from([
                "zipsync",
                "update",
                "--buffer-size",
                "0",
                "app.jar",
                "http://host/app.jar"
            ])
            .is_err()
        );
    }

    #[test]
    fn parses_index() {
        let cli = Cli::try_parse_from(["zipsync", "--log-level", "debug", "index", "dist"]).unwrap();
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Command::Index { target } if target == PathBuf::from("dist")));
    }
}
