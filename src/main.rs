use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use logchat::{ChatConfig, Session, SessionParams, Transcript};

#[derive(Parser)]
#[command(name = "logchat")]
#[command(version, about = "Chat over a durable log: replay recent history, then go live")]
struct Cli {
    /// Log address (`file:///path` or a directory path)
    log_address: String,

    /// Channel to join
    channel: String,

    /// Name shown next to your messages
    user: String,
}

/// Initialize tracing on stderr so stdout carries only the chat transcript
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "logchat=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(_) => {
            println!("{}", Cli::command().render_usage());
            std::process::exit(1);
        }
    };

    init_tracing();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ChatConfig::from_env()?;

    let mut session = Session::new(
        SessionParams {
            address: cli.log_address,
            channel: cli.channel,
            user: cli.user,
            config,
        },
        Transcript::stdout(),
    );

    let input = std::io::BufReader::new(std::io::stdin());
    session.start(input)?.wait_forever()
}
