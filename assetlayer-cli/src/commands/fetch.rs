//! `fetch` command: download a file by fingerprint or by name.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use assetlayer::config::format_size;
use assetlayer::data::SparseData;
use assetlayer::fingerprint::{Fingerprint, RemoteFileId};
use assetlayer::range::Range;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

use super::common::{load_config, start_app};
use crate::error::CliError;

/// Arguments for the fetch command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Hex fingerprint, or a name URI to resolve (e.g. file:///srv/assets/tree.mesh)
    pub target: String,

    /// First byte to fetch
    #[arg(long, default_value_t = 0)]
    pub start: u64,

    /// Number of bytes to fetch (default: to end of file)
    #[arg(long)]
    pub length: Option<u64>,

    /// Write the bytes here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// What the user asked for.
#[derive(Debug, PartialEq)]
enum Target {
    Content(Fingerprint),
    Name(Url),
}

fn parse_target(target: &str) -> Result<Target, CliError> {
    if let Ok(fingerprint) = target.parse::<Fingerprint>() {
        return Ok(Target::Content(fingerprint));
    }
    Url::parse(target).map(Target::Name).map_err(|_| {
        CliError::InvalidArgument(format!(
            "'{target}' is neither a hex fingerprint nor a URI"
        ))
    })
}

fn requested_range(args: &FetchArgs) -> Range {
    match args.length {
        Some(length) => Range::with_length(args.start, length, false),
        None => Range::from_start(args.start),
    }
}

fn spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        bar.set_style(style);
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Run the fetch command.
pub async fn run(args: FetchArgs) -> Result<(), CliError> {
    let target = parse_target(&args.target)?;
    let range = requested_range(&args);
    let app = start_app(&load_config()).await?;

    let bar = spinner(format!("fetching {} ({range})", args.target));
    let outcome = match target {
        Target::Content(fingerprint) => {
            let id = RemoteFileId::local(fingerprint)
                .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
            app.transfer().fetch(id, range).await
        }
        Target::Name(name) => app
            .transfer()
            .fetch_by_name(name, range)
            .await
            .map(|(id, data)| {
                info!(resolved = %id, "name resolved");
                data
            }),
    };
    bar.finish_and_clear();
    app.shutdown().await;

    let data = outcome.map_err(CliError::Transfer)?;
    write_output(&data, args.output.as_ref())
}

fn write_output(data: &SparseData, output: Option<&PathBuf>) -> Result<(), CliError> {
    let bytes = data.flatten().ok_or_else(|| {
        CliError::Config(format!("received non-contiguous data: {}", data.debug_string()))
    })?;
    match output {
        Some(path) => {
            std::fs::write(path, &bytes)?;
            eprintln!("Wrote {} to {}", format_size(bytes.len() as u64), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        let fp = Fingerprint::compute(b"x");
        assert_eq!(parse_target(&fp.to_hex()).unwrap(), Target::Content(fp));
        assert!(matches!(
            parse_target("file:///srv/assets/tree.mesh").unwrap(),
            Target::Name(_)
        ));
        assert!(parse_target("tree.mesh").is_err());
    }

    #[test]
    fn test_requested_range() {
        let args = FetchArgs {
            target: String::new(),
            start: 10,
            length: Some(5),
            output: None,
        };
        assert_eq!(requested_range(&args), Range::with_length(10, 5, false));

        let to_eof = FetchArgs { length: None, ..args };
        assert_eq!(requested_range(&to_eof), Range::from_start(10));
    }
}
