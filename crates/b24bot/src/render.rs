use std::io::IsTerminal;
use std::path::PathBuf;

use b24bot_core::bbcode::{extract_references, ResourceReference, Transpiler};
use b24bot_core::diagnostics::{Diagnostic, Recorder};
use b24bot_core::lookup::{FileLookupResult, ResourceLookup, UserLookupResult};
use b24bot_core::truncate::{truncate_with_status, visible_length, DEFAULT_MAX_LENGTH};
use colored::Colorize;
use serde::Serialize;

use crate::bitrix::{BitrixClient, BitrixConfig, ConnectionArgs};
use crate::prelude::{eprintln, println, *};

#[derive(Debug, clap::Args)]
pub struct RenderOptions {
    /// BBCode to render (read from --file or stdin when omitted)
    pub input: Option<String>,

    /// Read BBCode from a file
    #[arg(short, long, conflicts_with = "input")]
    pub file: Option<PathBuf>,

    /// Maximum number of visible characters in the output
    #[arg(short = 'n', long, env = "B24BOT_MAX_LENGTH", default_value_t = DEFAULT_MAX_LENGTH)]
    pub max_length: usize,

    /// Do not contact Bitrix24: files render as not found, mentions as their label
    #[arg(long)]
    pub offline: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    #[clap(flatten)]
    pub connection: ConnectionArgs,
}

/// Lookup that knows nothing; every reference degrades to its fallback text
pub struct OfflineLookup;

impl ResourceLookup for OfflineLookup {
    async fn lookup_file(&self, _id: u64) -> FileLookupResult {
        FileLookupResult::NotFound
    }

    async fn lookup_user_link(&self, _id: u64) -> UserLookupResult {
        UserLookupResult::Unknown
    }
}

#[derive(Debug, Serialize)]
pub struct RenderOutput {
    pub html: String,
    pub truncated: bool,
    pub visible_length: usize,
    pub references: Vec<ResourceReference>,
    pub diagnostics: Vec<Diagnostic>,
}

fn read_input(options: &RenderOptions) -> Result<String> {
    if let Some(input) = &options.input {
        return Ok(input.clone());
    }
    if let Some(path) = &options.file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }
    if std::io::stdin().is_terminal() {
        return Err(eyre!("No input: pass BBCode as an argument, with --file, or on stdin"));
    }
    Ok(std::io::read_to_string(std::io::stdin()).map_err(Error::Input)?)
}

/// Transpile and truncate `bbcode`, collecting every diagnostic raised on the way
pub async fn render_data<L: ResourceLookup>(
    bbcode: &str,
    lookup: &L,
    max_length: usize,
) -> RenderOutput {
    let recorder = Recorder::new();
    let html = Transpiler::new(lookup, &recorder)
        .transpile(Some(bbcode))
        .await;
    let truncation = truncate_with_status(&html, max_length);

    let diagnostics = recorder.take();
    for diagnostic in &diagnostics {
        log::warn!("{diagnostic}");
    }

    RenderOutput {
        visible_length: visible_length(&truncation.text),
        html: truncation.text,
        truncated: truncation.truncated,
        references: extract_references(bbcode),
        diagnostics,
    }
}

pub async fn run(options: RenderOptions, global: crate::Global) -> Result<()> {
    let bbcode = read_input(&options)?;

    let output = if options.offline {
        render_data(&bbcode, &OfflineLookup, options.max_length).await
    } else {
        let config = BitrixConfig::load(&options.connection)?;
        if global.verbose {
            eprintln!("Bitrix24 portal: {}", config.portal_url);
        }
        let client = BitrixClient::new(config)?;
        render_data(&bbcode, &client, options.max_length).await
    };

    if options.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", output.html);
    if global.verbose {
        print_summary(&output);
    }
    Ok(())
}

fn print_summary(output: &RenderOutput) {
    eprintln!();
    eprintln!(
        "{} {} visible characters{}",
        "Length:".bright_white().bold(),
        output.visible_length,
        if output.truncated { " (truncated)" } else { "" }
    );
    for reference in &output.references {
        eprintln!(
            "{} {:?} {} {}",
            "Reference:".bright_white().bold(),
            reference.kind,
            reference.id,
            reference.raw_match.dimmed()
        );
    }
    for diagnostic in &output.diagnostics {
        eprintln!("{} {}", "Warning:".yellow().bold(), diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_render() {
        let output = render_data(
            "[B]Report[/B] [DISK FILE ID=n12] for [USER=3]Ann[/USER]",
            &OfflineLookup,
            300,
        )
        .await;

        assert_eq!(output.html, "<b>Report</b> [File 12 not found] for Ann");
        assert!(!output.truncated);
        assert_eq!(output.references.len(), 2);
        assert_eq!(
            output.diagnostics,
            vec![
                Diagnostic::FileNotFound { id: 12 },
                Diagnostic::UnknownUser { id: 3 }
            ]
        );
    }

    #[tokio::test]
    async fn test_offline_render_truncates() {
        let output = render_data("[I]abcdefgh[/I]", &OfflineLookup, 4).await;

        assert_eq!(output.html, "<i>abcd…</i>");
        assert!(output.truncated);
        assert_eq!(output.visible_length, 5);
    }

    #[test]
    fn test_read_input_prefers_argument() {
        let options = RenderOptions {
            input: Some("[B]x[/B]".to_string()),
            file: None,
            max_length: DEFAULT_MAX_LENGTH,
            offline: true,
            json: false,
            connection: ConnectionArgs::default(),
        };
        assert_eq!(read_input(&options).unwrap(), "[B]x[/B]");
    }
}
