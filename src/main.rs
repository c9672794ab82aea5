use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use memreach::{AppError, Debugger};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// C source file to compile and trace
    source: PathBuf,

    /// Arguments passed to the target program
    #[arg(last = true)]
    target_args: Vec<String>,

    /// log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();

    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "memreach.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
        }))
        // needs to go to file, stdout belongs to the traced program
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
        .init();

    let mut gdb = Debugger::compile_and_launch(&args.source, &args.target_args).await?;

    let mut messages = gdb.out_of_band_messages()?;
    tokio::spawn(async move {
        while let Some(message) = messages.next().await {
            info!(target: "mi", "{}", message);
        }
    });

    let mut output = gdb.target_output()?;
    tokio::spawn(async move {
        while let Some(chunk) = output.next().await {
            print!("{}", String::from_utf8_lossy(&chunk));
        }
    });

    let functions = gdb.functions().await?;
    info!("found functions: {:?}", functions);
    for function in &functions {
        let number = gdb.breakpoint(function).await?;
        info!("breakpoint no. {} added on {}", number, function);
    }

    gdb.run().await?;
    wait_for_stop(&gdb).await;

    loop {
        match gdb.next().await {
            Ok(()) => {}
            Err(AppError::UnexpectedResult { class, results }) => {
                info!("target finished: {:?} {}", class, results);
                break;
            }
            Err(e) => {
                error!("stepping failed: {}", e);
                break;
            }
        }
        wait_for_stop(&gdb).await;

        match gdb.traverse().await {
            Ok(report) => println!("{:#?}", report),
            Err(e) => {
                error!("traversal failed: {}", e);
                break;
            }
        }
    }

    gdb.close().await?;
    Ok(())
}

/// The stop notification lands on the out-of-band stream; the session's
/// running flag tracks it.
async fn wait_for_stop(gdb: &Debugger) {
    while gdb.is_running() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
