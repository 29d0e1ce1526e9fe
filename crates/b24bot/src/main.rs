use crate::prelude::*;
use clap::Parser;

mod bitrix;
mod error;
mod prelude;
mod render;
mod task;

#[derive(Debug, clap::Parser)]
#[command(
    author,
    version,
    about,
    long_about = "Render Bitrix24 task and comment markup as chat bot HTML"
)]
pub struct App {
    #[command(subcommand)]
    pub command: SubCommands,

    #[clap(flatten)]
    global: Global,
}

#[derive(Debug, Clone, clap::Args)]
pub struct Global {
    /// Whether to display additional information.
    #[clap(long, env = "B24BOT_VERBOSE", global = true, default_value = "false")]
    verbose: bool,
}

#[derive(Debug, clap::Parser)]
pub enum SubCommands {
    /// Convert BBCode to bot HTML
    Render(crate::render::RenderOptions),

    /// Render the "new task" message for a task
    Task(crate::task::TaskOptions),

    /// Render the "task updated" message against an earlier task snapshot
    Update(crate::task::UpdateOptions),

    /// Render the "new comment" message for a task comment
    Comment(crate::task::CommentOptions),
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    color_eyre::install()?;

    let app = App::parse();

    match app.command {
        SubCommands::Render(options) => crate::render::run(options, app.global).await,
        SubCommands::Task(options) => crate::task::run_task(options, app.global).await,
        SubCommands::Update(options) => crate::task::run_update(options, app.global).await,
        SubCommands::Comment(options) => crate::task::run_comment(options, app.global).await,
    }
}
