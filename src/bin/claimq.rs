//! claimq CLI: operator interface to a claimq database.

use claimq::config::secrets::ExposeSecret;
use claimq::config::{Config, WorkerSettings};
use claimq::db::Db;
use claimq::engine::{Worker, WorkerConfig};
use claimq::listener::{LoggingNotificationHandler, Subscription};
use claimq::model::{Channel, Message, MessageState};
use claimq::task::{DelayedTask, LoggingTask, Task};
use claimq::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "claimq", about = "Durable work queue on Postgres row locks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// Enqueue one message
    Enqueue {
        /// Queue name
        queue: String,
        /// JSON body
        #[arg(long, default_value = "{}")]
        body: String,
        /// Channel to notify on commit
        #[arg(long)]
        channel: Option<String>,
    },
    /// Run a worker that logs each message it processes
    Work {
        /// Only claim from this queue
        #[arg(long)]
        queue: Option<String>,
        /// Channel to listen on for wake-ups
        #[arg(long)]
        channel: Option<String>,
        /// Polling fallback interval
        #[arg(long, default_value_t = 5000)]
        poll_ms: u64,
        /// Artificial delay before each message completes
        #[arg(long)]
        delay_ms: Option<u64>,
        /// TOML file with worker settings (overrides flags)
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Print notifications published on a channel
    Listen {
        /// Channel name
        channel: String,
    },
    /// Show the newest message of a queue
    Peek {
        /// Queue name
        queue: String,
    },
    /// Count messages of a queue by state
    Stats {
        /// Queue name
        queue: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "claimq".to_string(),
        default_level: config.log_level.clone(),
    })?;

    let db = Db::connect_with_max(config.database_url.expose_secret(), config.max_connections)
        .await?;

    match cli.command {
        Command::Migrate => {
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Command::Enqueue {
            queue,
            body,
            channel,
        } => cmd_enqueue(&db, queue, body, channel).await,
        Command::Work {
            queue,
            channel,
            poll_ms,
            delay_ms,
            settings,
        } => {
            let mut worker_config = WorkerConfig {
                queue_name: queue,
                channel: channel.map(Channel::new).transpose()?,
                poll_interval: Duration::from_millis(poll_ms.max(1)),
                task_timeout: None,
            };
            if let Some(path) = settings {
                worker_config = WorkerSettings::load(&path)?.apply(worker_config)?;
            }
            let task: Arc<dyn Task> = match delay_ms {
                Some(ms) => Arc::new(DelayedTask::new(Duration::from_millis(ms), LoggingTask)),
                None => Arc::new(LoggingTask),
            };
            cmd_work(db, task, worker_config).await
        }
        Command::Listen { channel } => cmd_listen(&db, channel).await,
        Command::Peek { queue } => cmd_peek(&db, queue).await,
        Command::Stats { queue } => cmd_stats(&db, queue).await,
    }
}

async fn cmd_enqueue(
    db: &Db,
    queue: String,
    body: String,
    channel: Option<String>,
) -> anyhow::Result<()> {
    let body: serde_json::Value = serde_json::from_str(&body)?;
    let channel = channel.map(Channel::new).transpose()?;

    let message = Message::new(queue, body)?;
    db.enqueue(&message, channel.as_ref()).await?;

    println!("Enqueued: {} (queue: {})", message.id(), message.queue_name());
    Ok(())
}

async fn cmd_work(db: Db, task: Arc<dyn Task>, config: WorkerConfig) -> anyhow::Result<()> {
    let worker = Worker::new(Arc::new(db), task, config);

    let handle = worker.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        handle.shutdown();
    });

    worker.run().await?;
    println!("Processed {} message(s).", worker.processed_count());
    Ok(())
}

async fn cmd_listen(db: &Db, channel: String) -> anyhow::Result<()> {
    let channel = Channel::new(channel)?;
    let mut subscription =
        Subscription::subscribe(db.pool(), channel.clone(), LoggingNotificationHandler).await?;
    println!("Listening on {channel}; Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    subscription.shutdown().await;
    Ok(())
}

async fn cmd_peek(db: &Db, queue: String) -> anyhow::Result<()> {
    let Some(message) = db.peek_last(&queue).await? else {
        println!("No messages in queue '{queue}'.");
        return Ok(());
    };

    println!("ID:       {}", message.id());
    println!("Queue:    {}", message.queue_name());
    println!("State:    {}", message.state());
    println!("Created:  {}", message.created_at());
    println!("Body:     {}", serde_json::to_string_pretty(message.body())?);
    Ok(())
}

async fn cmd_stats(db: &Db, queue: String) -> anyhow::Result<()> {
    println!("{:<10}  COUNT", "STATE");
    println!("{}", "-".repeat(20));
    for state in [MessageState::Created, MessageState::Processed] {
        let count = db.count_by_state(&queue, state).await?;
        println!("{:<10}  {count}", state.to_string());
    }
    Ok(())
}
