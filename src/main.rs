use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

mod args;
use args::Args;

mod auth;
mod backend;
mod field;
mod paper;
mod paperfeed;
mod routes;
mod session;
mod time;
mod user;

#[cfg(test)]
mod mock;

use backend::Backend;
use paperfeed::PaperFeed;
use session::MemorySessions;

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 10);

#[tokio::main]
async fn main() -> ExitCode {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&filter)
        .init();

    let args = Args::parse();

    let addr = match args.addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid address: {e}");
            return ExitCode::FAILURE;
        }
    };

    let Ok(backend) = Backend::new(args.data_dir()).await else {
        error!("couldn't open data in {:?}", args.data_dir());
        return ExitCode::FAILURE;
    };

    let feed = Arc::new(PaperFeed::new(
        backend,
        Arc::new(MemorySessions::new()),
        args.session_ttl(),
    ));

    {
        let feed = Arc::clone(&feed);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            loop {
                interval.tick().await;
                let purged = feed.purge_sessions();
                if purged > 0 {
                    info!("purged {purged} expired sessions");
                }
            }
        });
    }

    let routes = routes::routes(
        feed,
        args.secure(),
        args.static_dir().map(|dir| dir.to_path_buf()),
    );

    info!("listening on {addr}");
    warp::serve(routes).run(addr).await;

    ExitCode::SUCCESS
}
